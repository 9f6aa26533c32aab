//! Direct WhatsApp client adapter.
//!
//! The pipeline consumes the adapter through two narrow surfaces: the
//! [`AdapterState`] snapshot (owner phone, linked-identifier map) and the
//! envelope channel the session supervisor produces into. The wire
//! protocol itself sits behind the [`session::Session`] seam.

pub mod media;
pub mod resolver;
pub mod session;

use crate::models::event::EventOrigin;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Normalized event produced into the router's consumer loop.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub kind: String,
    pub payload: Value,
    pub origin: EventOrigin,
}

/// Live-session facts the handler reads while classifying messages.
#[derive(Default)]
pub struct AdapterState {
    self_phone: RwLock<Option<String>>,
    lid_map: RwLock<HashMap<String, String>>,
}

impl AdapterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn self_phone(&self) -> Option<String> {
        self.self_phone.read().unwrap().clone()
    }

    pub fn set_self_phone(&self, phone: &str) {
        let digits = crate::identity::normalize_phone(phone);
        *self.self_phone.write().unwrap() = (!digits.is_empty()).then_some(digits);
    }

    pub fn clear_self_phone(&self) {
        *self.self_phone.write().unwrap() = None;
    }

    /// Linked identifier → phone, both digits-only.
    pub fn resolve_lid(&self, lid: &str) -> Option<String> {
        self.lid_map.read().unwrap().get(lid).cloned()
    }

    pub fn learn_lid(&self, lid: &str, phone: &str) {
        let lid = crate::identity::normalize_phone(lid);
        let phone = crate::identity::normalize_phone(phone);
        if !lid.is_empty() && !phone.is_empty() {
            self.lid_map.write().unwrap().insert(lid, phone);
        }
    }
}

/// Send-side operations the admin surface uses in adapter mode.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WaAdapter: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> anyhow::Result<String>;

    async fn send_media(
        &self,
        to: &str,
        bytes: Vec<u8>,
        mime_type: &str,
        caption: Option<String>,
    ) -> anyhow::Result<String>;

    fn connected(&self) -> bool;
}

pub type ImplWaAdapter = Arc<dyn WaAdapter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_state_normalizes_and_resolves() {
        let state = AdapterState::new();
        state.set_self_phone("+972 50-000-0099");
        assert_eq!(state.self_phone().as_deref(), Some("972500000099"));

        state.learn_lid("84455217701112@lid", "972500000002");
        assert_eq!(
            state.resolve_lid("84455217701112").as_deref(),
            Some("972500000002")
        );
        assert_eq!(state.resolve_lid("123"), None);

        state.clear_self_phone();
        assert_eq!(state.self_phone(), None);
    }
}
