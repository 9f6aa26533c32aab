use crate::consts;
use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, Default)]
pub enum ConnectionStatus {
    #[default]
    #[display("unknown")]
    #[serde(rename = "unknown")]
    Unknown,
    #[display("connecting")]
    #[serde(rename = "connecting")]
    Connecting,
    #[display("connected")]
    #[serde(rename = "connected")]
    Connected,
    #[display("disconnected")]
    #[serde(rename = "disconnected")]
    Disconnected,
    #[display("loggedOut")]
    #[serde(rename = "loggedOut")]
    LoggedOut,
    #[display("waitingForPairing")]
    #[serde(rename = "waitingForPairing")]
    WaitingForPairing,
}

impl ConnectionStatus {
    /// Maps the raw state strings different upstreams emit onto the
    /// canonical set.
    pub fn from_raw(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "open" | "connected" => Self::Connected,
            "connecting" => Self::Connecting,
            "close" | "disconnected" => Self::Disconnected,
            "logged_out" | "logout" => Self::LoggedOut,
            _ => Self::Unknown,
        }
    }
}

/// Pairing artifact exposed while the session waits for a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QrInfo {
    pub data: String,
    #[serde(rename = "dataUri")]
    pub data_uri: String,
    #[serde(rename = "generatedAt")]
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionRecord {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
    pub at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    #[serde(rename = "statusSince")]
    pub status_since: String,
    #[serde(rename = "phoneOwner", skip_serializing_if = "Option::is_none", default)]
    pub phone_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub qr: Option<QrInfo>,
    pub history: Vec<TransitionRecord>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Unknown,
            status_since: crate::utils::now_iso(),
            phone_owner: None,
            qr: None,
            history: Vec::new(),
        }
    }
}

impl ConnectionState {
    /// Records a transition; callers only invoke this when the canonical
    /// status actually changed.
    pub fn transition_to(&mut self, next: ConnectionStatus) {
        let at = crate::utils::now_iso();

        self.history.insert(
            0,
            TransitionRecord {
                from: self.status,
                to: next,
                at: at.clone(),
            },
        );
        self.history.truncate(consts::CONNECTION_HISTORY_LIMIT);

        self.status = next;
        self.status_since = at;

        if next == ConnectionStatus::Connected {
            self.qr = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_states_map_to_canonical() {
        assert_eq!(ConnectionStatus::from_raw("open"), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::from_raw("Connected"), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::from_raw("close"), ConnectionStatus::Disconnected);
        assert_eq!(ConnectionStatus::from_raw("logout"), ConnectionStatus::LoggedOut);
        assert_eq!(ConnectionStatus::from_raw("???"), ConnectionStatus::Unknown);
    }

    #[test]
    fn transition_clears_qr_on_connected_and_bounds_history() {
        let mut state = ConnectionState::default();
        state.qr = Some(QrInfo {
            data: "ref".into(),
            data_uri: "data:image/png;base64,AA==".into(),
            generated_at: crate::utils::now_iso(),
        });

        for _ in 0..15 {
            state.transition_to(ConnectionStatus::Connecting);
            state.transition_to(ConnectionStatus::Connected);
        }

        assert_eq!(state.status, ConnectionStatus::Connected);
        assert!(state.qr.is_none());
        assert_eq!(state.history.len(), consts::CONNECTION_HISTORY_LIMIT);
        assert_eq!(state.history[0].to, ConnectionStatus::Connected);
    }
}
