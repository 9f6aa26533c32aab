#![recursion_limit = "256"]

pub mod adapter;
pub mod api;
pub mod config;
pub mod consts;
pub mod identity;
pub mod logger;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod utils;
pub mod webhook;

use crate::adapter::session::{ClientAdapter, SessionSupervisor};
use crate::adapter::{AdapterState, ImplWaAdapter};
use crate::api::AppState;
use crate::router::connection::ConnectionTracker;
use crate::router::{EventRouter, RouterContext, RouterOptions};
use crate::services::alerts::AlertSink;
use crate::services::dispatcher::WebhookDispatcher;
use crate::services::{ImplHttpPoster, ReqwestPoster};
use crate::store::config::ConfigStore;
use crate::store::media::MediaStore;
use crate::store::messages::MessageStore;
use crate::store::stats::StatsStore;
use anyhow::anyhow;
use log::{info, warn};
use ntex::web;
use ntex_cors::Cors;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[ntex::main]
async fn main() -> anyhow::Result<()> {
    let app_config = &*config::APP_CONFIG;
    logger::setup_simple_logger(&app_config.log_level)?;

    // Durable stores, loaded before anything can serve.
    let config_store = Arc::new(ConfigStore::new(
        app_config.data_file(consts::CONTACTS_FILE),
        app_config.webhook_url.clone(),
    ));
    if let Err(e) = config_store.load().await {
        warn!("could not load configuration file: {:#}", e);
    }

    app_config.validate(config_store.has_persisted_default())?;

    let stats = Arc::new(StatsStore::new(
        app_config.data_file(consts::STATS_FILE),
        app_config.recent_events_limit,
    ));
    if let Err(e) = stats.load().await {
        warn!("could not load stats file: {:#}", e);
    }

    let messages = Arc::new(MessageStore::new(
        app_config.data_file(consts::MESSAGES_FILE),
        app_config.max_messages_per_source,
        app_config.max_total_messages,
    ));
    if let Err(e) = messages.load().await {
        warn!("could not load message history: {:#}", e);
    }

    let media = Arc::new(MediaStore::new(
        app_config.data_file(consts::MEDIA_SUBDIR),
        app_config.data_file(consts::MEDIA_INDEX_FILE),
        app_config.max_media_files,
        app_config.max_media_size_bytes,
    ));
    if let Err(e) = media.load().await {
        warn!("could not load media index: {:#}", e);
    }

    // Pipeline wiring.
    let poster: ImplHttpPoster = Arc::new(ReqwestPoster::new());
    let dispatcher = Arc::new(WebhookDispatcher::new(
        poster.clone(),
        config_store.clone(),
        app_config.secondary_webhook_url.clone(),
        app_config.instance_name.clone(),
    ));
    let alerts = Arc::new(AlertSink::new(
        poster.clone(),
        stats.clone(),
        app_config.alert_webhook_url.clone(),
        app_config.slack_webhook_url.clone(),
        app_config.instance_name.clone(),
    ));
    let connection = Arc::new(ConnectionTracker::new(alerts.clone()));
    let adapter_state = Arc::new(AdapterState::new());

    let options = RouterOptions {
        mention_enabled: app_config.mention_enabled,
        mention_webhook_url: app_config.mention_webhook_url.clone(),
        mention_webhook_token: app_config.mention_webhook_token.clone(),
        mention_keywords: app_config.mention_keyword_list(),
        mention_only: app_config.mention_only_to_mention_webhook,
        forward_outgoing: app_config.forward_outgoing,
        forward_message_updates: app_config.forward_message_updates,
        log_presence: app_config.log_presence,
    };

    let router = Arc::new(EventRouter::new(RouterContext {
        config: config_store.clone(),
        stats: stats.clone(),
        messages: messages.clone(),
        dispatcher: dispatcher.clone(),
        alerts: alerts.clone(),
        connection: connection.clone(),
        adapter_state: adapter_state.clone(),
        poster: poster.clone(),
        options,
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(256);
    let consumer = tokio::spawn(router.clone().consume(events_rx));

    // Direct client, when enabled. Without a compiled-in transport the
    // flag is a startup error rather than a silent no-op.
    let mut wa_adapter: Option<ImplWaAdapter> = None;
    let mut supervisor_task = None;
    if app_config.whatsapp_client_enabled {
        let factory = adapter::session::builtin_transport().ok_or_else(|| {
            anyhow!(
                "WHATSAPP_CLIENT_ENABLED is set but this build carries no session \
                 transport; run in webhook ingress mode instead"
            )
        })?;

        let client = ClientAdapter::new();
        let supervisor = SessionSupervisor::new(
            factory,
            adapter_state.clone(),
            connection.clone(),
            media.clone(),
            client.clone(),
            events_tx.clone(),
            PathBuf::from(&app_config.whatsapp_auth_dir),
        );
        supervisor_task = Some(tokio::spawn(supervisor.run(shutdown_rx.clone())));
        wa_adapter = Some(client);
    }

    // Periodic persistence, stopped before the final flush.
    let stats_saver = {
        let stats = stats.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticks =
                tokio::time::interval(Duration::from_secs(consts::STATS_SAVE_INTERVAL_SECS));
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = ticks.tick() => stats.persist().await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    };
    let messages_saver = {
        let messages = messages.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticks =
                tokio::time::interval(Duration::from_secs(consts::MESSAGES_FLUSH_INTERVAL_SECS));
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = ticks.tick() => messages.flush_if_dirty().await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    let state = AppState {
        config: config_store.clone(),
        stats: stats.clone(),
        messages: messages.clone(),
        media: media.clone(),
        dispatcher: dispatcher.clone(),
        router: router.clone(),
        connection: connection.clone(),
        adapter: wa_adapter,
        ingress_events: Arc::new(AtomicU64::new(0)),
    };

    info!(
        "starting {} on port {}",
        app_config.instance_name, app_config.port
    );

    web::server(move || {
        web::App::new()
            .wrap(Cors::new().finish())
            .wrap(web::middleware::Logger::default())
            .wrap(web::middleware::Compress::default())
            .state(state.clone())
            .configure(webhook::routes::ingress)
            .configure(api::routes::admin)
    })
    .bind(("0.0.0.0", app_config.port))?
    .run()
    .await?;

    // Ordered shutdown: the server already stopped accepting; close the
    // adapter and drain, then flush every store.
    info!("shutting down, flushing state");
    let _ = shutdown_tx.send(true);
    drop(events_tx);

    if let Some(task) = supervisor_task {
        let _ = task.await;
    }
    let _ = consumer.await;
    let _ = stats_saver.await;
    let _ = messages_saver.await;

    if let Err(e) = config_store.save().await {
        warn!("final config save failed: {:#}", e);
    }
    stats.persist().await;
    messages.flush().await;

    info!("shutdown complete");
    Ok(())
}
