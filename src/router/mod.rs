//! Table-driven dispatch of normalized events to per-kind handlers.
//!
//! The canonical kinds live in [`EventKind`]; anything else lands in the
//! generic handler and gets its stats row created lazily. Handler failures
//! never propagate, they fold into the returned outcome.

pub mod connection;
pub mod message;

use crate::adapter::{AdapterState, EventEnvelope};
use crate::models::event::{EventAction, EventKind, EventOrigin, StoredEvent, normalize_event_name};
use crate::router::connection::ConnectionTracker;
use crate::services::ImplHttpPoster;
use crate::services::alerts::AlertSink;
use crate::services::dispatcher::WebhookDispatcher;
use crate::store::config::ConfigStore;
use crate::store::messages::MessageStore;
use crate::store::stats::{CounterField, StatsStore};
use anyhow::bail;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Runtime flags consumed while handling events; fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub mention_enabled: bool,
    pub mention_webhook_url: Option<String>,
    pub mention_webhook_token: String,
    pub mention_keywords: Vec<String>,
    pub mention_only: bool,
    pub forward_outgoing: bool,
    pub forward_message_updates: bool,
    pub log_presence: bool,
}

/// Everything a handler may touch, shared across the whole pipeline.
pub struct RouterContext {
    pub config: Arc<ConfigStore>,
    pub stats: Arc<StatsStore>,
    pub messages: Arc<MessageStore>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub alerts: Arc<AlertSink>,
    pub connection: Arc<ConnectionTracker>,
    pub adapter_state: Arc<AdapterState>,
    pub poster: ImplHttpPoster,
    pub options: RouterOptions,
}

#[derive(Debug, Serialize)]
pub struct RouteOutcome {
    pub success: bool,
    pub event: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct EventRouter {
    ctx: RouterContext,
}

impl EventRouter {
    pub fn new(ctx: RouterContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RouterContext {
        &self.ctx
    }

    /// Shape heuristics for payloads that arrive without an event name.
    pub fn detect_event_type(payload: &Value) -> Option<EventKind> {
        let data = crate::models::message::event_data(payload);

        if data.get("key").is_some() && data.get("message").is_some() {
            return Some(EventKind::MessagesUpsert);
        }
        if data.get("update").is_some() && data.get("key").is_some() {
            return Some(EventKind::MessagesUpdate);
        }
        if data.get("state").is_some() || data.get("connection").is_some() {
            return Some(EventKind::ConnectionUpdate);
        }
        if data.get("qrcode").is_some() || data.get("base64").is_some() {
            return Some(EventKind::QrcodeUpdated);
        }
        if data.get("subject").is_some()
            && data
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| id.contains("@g.us"))
        {
            return Some(EventKind::GroupsUpsert);
        }
        if data.get("participants").is_some() && data.get("action").is_some() {
            return Some(EventKind::GroupParticipantsUpdate);
        }

        None
    }

    /// Dispatches one event. Every event bumps its total counter first;
    /// handler errors come back as `{success:false, error}`.
    pub async fn route_event(
        &self,
        kind_name: &str,
        payload: &Value,
        origin: EventOrigin,
    ) -> RouteOutcome {
        let canonical = normalize_event_name(kind_name);
        debug!("routing {} event from {}", canonical, origin);
        self.ctx.stats.increment(&canonical, CounterField::Total);

        let handled = match EventKind::parse(&canonical) {
            Some(EventKind::MessagesUpsert) => {
                message::handle_message_upsert(&self.ctx, payload).await
            }
            Some(EventKind::SendMessage) => message::handle_outgoing(&self.ctx, payload).await,
            Some(EventKind::MessagesUpdate) => {
                message::handle_message_update(&self.ctx, payload).await
            }
            Some(EventKind::MessagesDelete) | Some(EventKind::MessagesSet) => {
                message::log_only(&self.ctx, &canonical)
            }
            Some(EventKind::ConnectionUpdate) => self.handle_connection_update(payload).await,
            Some(EventKind::QrcodeUpdated) => self.handle_qr_update(payload).await,
            Some(EventKind::LogoutInstance) | Some(EventKind::RemoveInstance) => {
                self.handle_session_end(&canonical).await
            }
            Some(EventKind::ApplicationStartup) => {
                info!("upstream instance reported startup");
                message::log_only(&self.ctx, &canonical)
            }
            Some(EventKind::PresenceUpdate) => self.handle_presence(&canonical),
            Some(_) => message::log_only(&self.ctx, &canonical),
            None => self.handle_generic(&canonical),
        };

        match handled {
            Ok(result) => RouteOutcome {
                success: true,
                event: canonical,
                result,
                error: None,
            },
            Err(e) => {
                warn!("handler for {} failed: {:#}", canonical, e);
                RouteOutcome {
                    success: false,
                    event: canonical,
                    result: Value::Null,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Consumer loop over the adapter's envelope channel; ends when the
    /// producer side closes on shutdown.
    pub async fn consume(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<EventEnvelope>) {
        while let Some(envelope) = rx.recv().await {
            let outcome = self
                .route_event(&envelope.kind, &envelope.payload, envelope.origin)
                .await;
            if !outcome.success {
                warn!(
                    "client event {} failed: {}",
                    outcome.event,
                    outcome.error.unwrap_or_default()
                );
            }
        }
        info!("event channel closed, router consumer stopping");
    }

    async fn handle_connection_update(&self, payload: &Value) -> anyhow::Result<Value> {
        let data = crate::models::message::event_data(payload);
        let raw = data
            .get("state")
            .or_else(|| data.get("connection"))
            .or_else(|| data.get("status"))
            .and_then(Value::as_str);

        let Some(raw) = raw else {
            bail!("connection update without a state field");
        };

        let (previous, current) = self.ctx.connection.apply_raw_state(raw).await;

        let mut record = StoredEvent::new("CONNECTION_UPDATE", EventAction::Logged);
        record.reason = Some(format!("{} -> {}", previous, current));
        self.ctx.stats.log_event(record);

        Ok(json!({
            "action": "logged",
            "previous": previous,
            "current": current,
        }))
    }

    async fn handle_qr_update(&self, payload: &Value) -> anyhow::Result<Value> {
        let data = crate::models::message::event_data(payload);

        let code = data
            .get("qrcode")
            .and_then(|q| {
                q.as_str()
                    .or_else(|| q.get("code").and_then(Value::as_str))
                    .or_else(|| q.get("base64").and_then(Value::as_str))
            })
            .or_else(|| data.get("base64").and_then(Value::as_str))
            .or_else(|| data.get("code").and_then(Value::as_str));

        let Some(code) = code else {
            bail!("qr update without code data");
        };

        self.ctx.connection.set_qr(code).await;
        self.ctx
            .stats
            .log_event(StoredEvent::new("QRCODE_UPDATED", EventAction::Logged));

        Ok(json!({"action": "logged", "qr": true}))
    }

    async fn handle_session_end(&self, kind: &str) -> anyhow::Result<Value> {
        self.ctx
            .connection
            .apply_status(crate::models::connection::ConnectionStatus::LoggedOut)
            .await;
        self.ctx
            .stats
            .log_event(StoredEvent::new(kind, EventAction::Logged));

        Ok(json!({"action": "logged"}))
    }

    fn handle_presence(&self, kind: &str) -> anyhow::Result<Value> {
        if !self.ctx.options.log_presence {
            return Ok(json!({"action": "ignored"}));
        }
        message::log_only(&self.ctx, kind)
    }

    fn handle_generic(&self, kind: &str) -> anyhow::Result<Value> {
        // total counter was already created lazily by route_event
        message::log_only(&self.ctx, kind)
    }
}
