//! Linked-identifier resolution.
//!
//! A linked identifier aliases a real phone number and must be resolved
//! before authorization. Four strategies run in priority order (the
//! per-message payload hint, the session's identifier map, the contact
//! list's linked-identifier index, and finally the raw identifier itself),
//! each returning an optional; the composite takes the first hit.

use crate::adapter::AdapterState;
use crate::identity::normalize_phone;
use crate::store::config::ConfigStore;
use std::sync::Arc;

pub struct LidResolver {
    adapter_state: Arc<AdapterState>,
    config: Arc<ConfigStore>,
}

impl LidResolver {
    pub fn new(adapter_state: Arc<AdapterState>, config: Arc<ConfigStore>) -> Self {
        Self {
            adapter_state,
            config,
        }
    }

    fn from_hint(&self, payload_hint: Option<&str>) -> Option<String> {
        let digits = normalize_phone(payload_hint?);
        (!digits.is_empty()).then_some(digits)
    }

    fn from_session(&self, lid: &str) -> Option<String> {
        self.adapter_state.resolve_lid(lid)
    }

    fn from_contacts(&self, lid: &str) -> Option<String> {
        let contact = self.config.find_contact(lid)?;
        (contact.linked_identifier.as_deref() == Some(lid)).then(|| contact.phone)
    }

    /// Resolves a digits-only linked identifier to a phone; the raw
    /// identifier is the terminal fallback so authorization can still
    /// match contacts stored under it.
    pub fn resolve(&self, lid: &str, payload_hint: Option<&str>) -> String {
        self.from_hint(payload_hint)
            .or_else(|| self.from_session(lid))
            .or_else(|| self.from_contacts(lid))
            .unwrap_or_else(|| lid.to_string())
    }
}
