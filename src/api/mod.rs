pub mod connection;
pub mod contacts;
pub mod errors;
pub mod groups;
pub mod guard;
pub mod messages;
pub mod routes;
pub mod settings;
pub mod stats;

use crate::adapter::ImplWaAdapter;
use crate::router::EventRouter;
use crate::router::connection::ConnectionTracker;
use crate::services::dispatcher::WebhookDispatcher;
use crate::store::config::ConfigStore;
use crate::store::media::MediaStore;
use crate::store::messages::MessageStore;
use crate::store::stats::StatsStore;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub stats: Arc<StatsStore>,
    pub messages: Arc<MessageStore>,
    pub media: Arc<MediaStore>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub router: Arc<EventRouter>,
    pub connection: Arc<ConnectionTracker>,
    /// Present only when the direct client is enabled.
    pub adapter: Option<ImplWaAdapter>,
    /// Cumulative ingress events, drives the periodic config autosave.
    pub ingress_events: Arc<AtomicU64>,
}
