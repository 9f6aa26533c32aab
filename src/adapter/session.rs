//! Session lifecycle around the WhatsApp wire transport.
//!
//! The transport itself sits behind [`Session`]/[`SessionFactory`]; this
//! module owns everything that does not depend on the protocol: reconnect
//! with capped backoff, self-echo deduplication, linked-identifier
//! surfacing, thumbnail/media handling and auth-material wipe on a
//! terminal logout.

use crate::adapter::{AdapterState, EventEnvelope, WaAdapter, media};
use crate::consts;
use crate::identity::normalize_phone;
use crate::models::event::EventOrigin;
use crate::models::message;
use crate::router::connection::ConnectionTracker;
use crate::store::media::MediaStore;
use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// What a live session surfaces to the supervisor.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Pairing completed; the session knows its owner phone.
    Ready { phone: String },
    /// A pairing artifact is waiting to be scanned.
    Qr { code: String },
    /// A protocol event, already shaped like the webhook ingress payloads.
    Event { kind: String, payload: Value },
    Disconnected { reason: String },
    LoggedOut,
}

/// One connected WhatsApp session. Protocol internals live behind this
/// trait; the supervisor only consumes its event stream and send surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Session: Send + Sync {
    /// Next event, or `None` once the underlying stream ended.
    async fn next_event(&self) -> Option<SessionEvent>;

    async fn send_text(&self, to: &str, body: &str) -> anyhow::Result<String>;

    async fn send_media(
        &self,
        to: &str,
        bytes: Vec<u8>,
        mime_type: &str,
        caption: Option<String>,
    ) -> anyhow::Result<String>;

    /// Full media download for a message payload; returns bytes and MIME.
    async fn download_media(&self, payload: Value) -> anyhow::Result<(Vec<u8>, String)>;

    async fn close(&self);
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, auth_dir: PathBuf) -> anyhow::Result<Arc<dyn Session>>;
}

/// Send surface handed to the admin API; backed by whatever session the
/// supervisor currently holds.
pub struct ClientAdapter {
    session: RwLock<Option<Arc<dyn Session>>>,
}

impl ClientAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            session: RwLock::new(None),
        })
    }

    fn current(&self) -> anyhow::Result<Arc<dyn Session>> {
        self.session
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("whatsapp session is not connected"))
    }

    fn attach(&self, session: Arc<dyn Session>) {
        *self.session.write().unwrap() = Some(session);
    }

    fn detach(&self) {
        *self.session.write().unwrap() = None;
    }
}

#[async_trait]
impl WaAdapter for ClientAdapter {
    async fn send_text(&self, to: &str, body: &str) -> anyhow::Result<String> {
        self.current()?.send_text(to, body).await
    }

    async fn send_media(
        &self,
        to: &str,
        bytes: Vec<u8>,
        mime_type: &str,
        caption: Option<String>,
    ) -> anyhow::Result<String> {
        self.current()?.send_media(to, bytes, mime_type, caption).await
    }

    fn connected(&self) -> bool {
        self.session.read().unwrap().is_some()
    }
}

/// Transport backend compiled into this build, if any. The wire protocol
/// is intentionally out of tree; deployments without a backend run in
/// webhook ingress mode and enabling the client is a startup error.
pub fn builtin_transport() -> Option<Box<dyn SessionFactory>> {
    None
}

/// Doubling delay from one second, capped.
pub fn reconnect_delay_secs(attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(31);
    (consts::RECONNECT_BASE_DELAY_SECS << exp).min(consts::RECONNECT_MAX_DELAY_SECS)
}

pub struct SessionSupervisor {
    factory: Box<dyn SessionFactory>,
    state: Arc<AdapterState>,
    connection: Arc<ConnectionTracker>,
    media_store: Arc<MediaStore>,
    adapter: Arc<ClientAdapter>,
    events_tx: mpsc::Sender<EventEnvelope>,
    auth_dir: PathBuf,
}

impl SessionSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Box<dyn SessionFactory>,
        state: Arc<AdapterState>,
        connection: Arc<ConnectionTracker>,
        media_store: Arc<MediaStore>,
        adapter: Arc<ClientAdapter>,
        events_tx: mpsc::Sender<EventEnvelope>,
        auth_dir: PathBuf,
    ) -> Self {
        Self {
            factory,
            state,
            connection,
            media_store,
            adapter,
            events_tx,
            auth_dir,
        }
    }

    /// Connect/consume/reconnect loop. Ends on shutdown signal, terminal
    /// logout, or after the reconnect budget is exhausted.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.connection
                .apply_status(crate::models::connection::ConnectionStatus::Connecting)
                .await;

            let session = match self.factory.connect(self.auth_dir.clone()).await {
                Ok(session) => session,
                Err(e) => {
                    attempt += 1;
                    if attempt >= consts::RECONNECT_MAX_ATTEMPTS {
                        error!("giving up on WhatsApp session after {} attempts: {:#}", attempt, e);
                        self.connection
                            .apply_status(crate::models::connection::ConnectionStatus::Disconnected)
                            .await;
                        break;
                    }

                    let delay = reconnect_delay_secs(attempt);
                    warn!(
                        "session connect failed (attempt {}): {:#}; retrying in {}s",
                        attempt, e, delay
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            };

            attempt = 0;
            self.adapter.attach(session.clone());

            let ended = self.consume_session(session.clone(), &mut shutdown).await;
            self.adapter.detach();
            session.close().await;

            match ended {
                SessionEnd::Shutdown => break,
                SessionEnd::LoggedOut => {
                    self.wipe_auth_material().await;
                    break;
                }
                SessionEnd::Dropped => {
                    attempt += 1;
                    if attempt >= consts::RECONNECT_MAX_ATTEMPTS {
                        error!("reconnect budget exhausted after {} attempts", attempt);
                        break;
                    }
                    let delay = reconnect_delay_secs(attempt);
                    info!("session dropped; reconnecting in {}s", delay);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        info!("session supervisor stopped");
    }

    async fn consume_session(
        &self,
        session: Arc<dyn Session>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            let event = tokio::select! {
                event = session.next_event() => event,
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            };

            match event {
                Some(SessionEvent::Ready { phone }) => {
                    self.state.set_self_phone(&phone);
                    self.connection.set_phone_owner(&phone);
                    self.connection
                        .apply_status(crate::models::connection::ConnectionStatus::Connected)
                        .await;
                }
                Some(SessionEvent::Qr { code }) => {
                    self.connection.set_qr(&code).await;
                }
                Some(SessionEvent::Event { kind, payload }) => {
                    self.emit_event(&session, kind, payload).await;
                }
                Some(SessionEvent::Disconnected { reason }) => {
                    warn!("session disconnected: {}", reason);
                    self.connection
                        .apply_status(crate::models::connection::ConnectionStatus::Disconnected)
                        .await;
                    return SessionEnd::Dropped;
                }
                Some(SessionEvent::LoggedOut) => {
                    self.connection
                        .apply_status(crate::models::connection::ConnectionStatus::LoggedOut)
                        .await;
                    return SessionEnd::LoggedOut;
                }
                None => {
                    self.connection
                        .apply_status(crate::models::connection::ConnectionStatus::Disconnected)
                        .await;
                    return SessionEnd::Dropped;
                }
            }
        }
    }

    /// Applies the interface guarantees before an envelope reaches the
    /// router: self-echo drop, linked-identifier surfacing, thumbnail
    /// extraction and the async media download.
    async fn emit_event(&self, session: &Arc<dyn Session>, kind: String, mut payload: Value) {
        let data = message::event_data(&payload);
        let remote = message::remote_jid(data).to_string();

        if let Some(self_phone) = self.state.self_phone() {
            if normalize_phone(&remote) == self_phone {
                debug!("dropping self-echo event for {}", remote);
                return;
            }
        }

        let content = message::unwrap_content(message::message_content(data)).clone();

        if remote.contains("@broadcast") && message::is_protocol_only(&content) {
            debug!("dropping protocol-only broadcast envelope");
            return;
        }

        // Surface a resolved phone for linked identifiers so the handler
        // can authorize without asking us back.
        let lid_source = if remote.contains("@lid") {
            Some(normalize_phone(&remote))
        } else {
            message::participant(data)
                .filter(|p| p.contains("@lid"))
                .map(normalize_phone)
        };
        if let Some(lid) = lid_source {
            if message::sender_pn(data).is_none() {
                if let Some(phone) = self.state.resolve_lid(&lid) {
                    if let Some(obj) = payload.as_object_mut() {
                        obj.insert("senderPn".to_string(), Value::String(phone));
                    }
                }
            }
        }

        if let Some(uri) = message::inline_thumbnail(&content) {
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("thumbnail".to_string(), Value::String(uri));
            }
        }

        if message::has_media(&content) {
            tokio::spawn(media::download_with_fallback(
                session.clone(),
                self.media_store.clone(),
                payload.clone(),
            ));
        }

        let envelope = EventEnvelope {
            kind,
            payload,
            origin: EventOrigin::Client,
        };

        if self.events_tx.send(envelope).await.is_err() {
            warn!("event channel closed; dropping client event");
        }
    }

    async fn wipe_auth_material(&self) {
        match tokio::fs::remove_dir_all(&self.auth_dir).await {
            Ok(()) => info!("auth material wiped after logout"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!("failed to wipe auth material: {:#}", e),
        }
    }
}

enum SessionEnd {
    Shutdown,
    LoggedOut,
    Dropped,
}
