//! Connection-state tracking and transition alerts.

use crate::models::connection::{ConnectionState, ConnectionStatus, QrInfo};
use crate::services::alerts::{Alert, AlertSink};
use crate::store::stats::AlertLevel;
use base64::Engine as _;
use fast_qr::convert::Builder;
use fast_qr::convert::image::ImageBuilder;
use fast_qr::qr::QRBuilder;
use log::{error, info};
use std::sync::{Arc, RwLock};

pub struct ConnectionTracker {
    state: RwLock<ConnectionState>,
    /// Set after the first successful connect so re-entry produces the
    /// "restored" notice instead of a plain connect.
    was_connected: RwLock<bool>,
    alerts: Arc<AlertSink>,
}

/// Renders pairing data into a PNG data URI.
fn qr_data_uri(data: &str) -> Option<String> {
    let code = QRBuilder::new(data)
        .build()
        .map_err(|e| error!("failed to build pairing QR: {:?}", e))
        .ok()?;

    let png = ImageBuilder::default()
        .fit_width(360)
        .to_bytes(&code)
        .map_err(|e| error!("failed to render pairing QR: {:?}", e))
        .ok()?;

    Some(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

impl ConnectionTracker {
    pub fn new(alerts: Arc<AlertSink>) -> Self {
        Self {
            state: RwLock::new(ConnectionState::default()),
            was_connected: RwLock::new(false),
            alerts,
        }
    }

    pub fn snapshot(&self) -> ConnectionState {
        self.state.read().unwrap().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.read().unwrap().status
    }

    pub fn qr(&self) -> Option<QrInfo> {
        self.state.read().unwrap().qr.clone()
    }

    pub fn set_phone_owner(&self, phone: &str) {
        let digits = crate::identity::normalize_phone(phone);
        self.state.write().unwrap().phone_owner = (!digits.is_empty()).then_some(digits);
    }

    /// Maps a raw upstream state onto the canonical set and records the
    /// transition. Same-state updates are ignored; each real transition
    /// emits exactly one alert of the specified level.
    pub async fn apply_raw_state(&self, raw: &str) -> (ConnectionStatus, ConnectionStatus) {
        let next = ConnectionStatus::from_raw(raw);
        self.apply_status(next).await
    }

    pub async fn apply_status(
        &self,
        next: ConnectionStatus,
    ) -> (ConnectionStatus, ConnectionStatus) {
        let (previous, reconnected) = {
            let mut state = self.state.write().unwrap();
            let previous = state.status;
            if previous == next || next == ConnectionStatus::Unknown {
                return (previous, previous);
            }

            state.transition_to(next);

            let mut was_connected = self.was_connected.write().unwrap();
            let reconnected = next == ConnectionStatus::Connected && *was_connected;
            if next == ConnectionStatus::Connected {
                *was_connected = true;
            }
            (previous, reconnected)
        };

        info!("connection state {} -> {}", previous, next);

        match next {
            ConnectionStatus::Disconnected => {
                self.alerts
                    .send(
                        Alert::new(
                            AlertLevel::Critical,
                            "CONNECTION_LOST",
                            "WhatsApp connection lost",
                            "The session dropped and the gateway is no longer receiving events.",
                        )
                        .detail("current", next.to_string())
                        .detail("previous", previous.to_string()),
                    )
                    .await;
            }
            ConnectionStatus::Connecting => {
                self.alerts
                    .send(
                        Alert::new(
                            AlertLevel::Warning,
                            "CONNECTION_RECONNECTING",
                            "WhatsApp reconnecting",
                            "The session is attempting to re-establish the connection.",
                        )
                        .detail("previous", previous.to_string()),
                    )
                    .await;
            }
            ConnectionStatus::LoggedOut => {
                self.alerts
                    .send(
                        Alert::new(
                            AlertLevel::Critical,
                            "SESSION_LOGGED_OUT",
                            "WhatsApp session logged out",
                            "The session was terminated remotely; a new pairing is required.",
                        )
                        .detail("previous", previous.to_string()),
                    )
                    .await;
            }
            ConnectionStatus::Connected if reconnected => {
                self.alerts
                    .send(Alert::new(
                        AlertLevel::Info,
                        "CONNECTION_RESTORED",
                        "WhatsApp connection restored",
                        "The session reconnected and event delivery resumed.",
                    ))
                    .await;
            }
            _ => {}
        }

        (previous, next)
    }

    /// Stores a fresh pairing artifact and raises the scan-required alert.
    /// Upstreams sometimes deliver an already-rendered data URI; anything
    /// else is rendered here.
    pub async fn set_qr(&self, data: &str) {
        let data_uri = if data.starts_with("data:image/") {
            data.to_string()
        } else {
            qr_data_uri(data).unwrap_or_default()
        };

        let qr = QrInfo {
            data: data.to_string(),
            data_uri,
            generated_at: crate::utils::now_iso(),
        };

        {
            let mut state = self.state.write().unwrap();
            state.qr = Some(qr);
            if state.status != ConnectionStatus::WaitingForPairing {
                state.transition_to(ConnectionStatus::WaitingForPairing);
            }
        }

        self.alerts
            .send(Alert::new(
                AlertLevel::Critical,
                "QR_SCAN_REQUIRED",
                "WhatsApp pairing required",
                "A new QR code is waiting to be scanned to link the session.",
            ))
            .await;
    }
}
