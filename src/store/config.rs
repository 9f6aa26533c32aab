//! Mutable gateway configuration with JSON-file persistence.
//!
//! Holds the authorization lists (contacts, groups), the destination URLs
//! and the custom entity-type vocabularies. An environment-provided default
//! destination wins over the persisted one; while it is set, mutations of
//! the persisted field are rejected, so the override is never written back.

use crate::models::contact::{Contact, Group};
use crate::store::MutationError;
use crate::{identity, utils};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// On-disk shape of `contacts.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigData {
    #[serde(rename = "allowedNumbers", default)]
    pub contacts: Vec<Contact>,
    #[serde(rename = "allowedGroups", default)]
    pub groups: Vec<Group>,
    #[serde(rename = "webhookUrl", skip_serializing_if = "Option::is_none", default)]
    pub webhook_url: Option<String>,
    #[serde(rename = "typeWebhooks", default)]
    pub type_webhooks: HashMap<String, String>,
    #[serde(rename = "customContactTypes", default)]
    pub custom_contact_types: Vec<String>,
    #[serde(rename = "customGroupTypes", default)]
    pub custom_group_types: Vec<String>,
    /// Legacy counter blob older deployments kept in this file; preserved
    /// verbatim across load/save cycles.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub stats: Value,
}

pub struct ConfigStore {
    path: PathBuf,
    env_webhook_url: Option<String>,
    inner: RwLock<ConfigData>,
}

fn valid_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

impl ConfigStore {
    pub fn new(path: PathBuf, env_webhook_url: Option<String>) -> Self {
        Self {
            path,
            env_webhook_url,
            inner: RwLock::new(ConfigData::default()),
        }
    }

    /// Best-effort load; a missing file leaves the defaults in place.
    pub async fn load(&self) -> anyhow::Result<()> {
        if let Some(data) = utils::read_json_file::<ConfigData>(&self.path).await? {
            info!(
                "loaded configuration: {} contacts, {} groups",
                data.contacts.len(),
                data.groups.len()
            );
            *self.inner.write().unwrap() = data;
        }
        Ok(())
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let snapshot = self.inner.read().unwrap().clone();
        utils::atomic_write_json(&self.path, &snapshot).await
    }

    async fn persist(&self) {
        if let Err(e) = self.save().await {
            error!("failed to persist configuration: {:#}", e);
        }
    }

    pub fn snapshot(&self) -> ConfigData {
        self.inner.read().unwrap().clone()
    }

    pub fn has_persisted_default(&self) -> bool {
        self.inner.read().unwrap().webhook_url.is_some()
    }

    /// Effective default destination: environment first, then persisted.
    pub fn default_webhook(&self) -> Option<String> {
        self.env_webhook_url
            .clone()
            .or_else(|| self.inner.read().unwrap().webhook_url.clone())
    }

    /// Destination registered for an entity type, when non-empty.
    pub fn type_webhook_for(&self, entity_type: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .type_webhooks
            .get(entity_type)
            .filter(|url| !url.is_empty())
            .cloned()
    }

    pub fn find_contact(&self, normalized_source: &str) -> Option<Contact> {
        self.inner
            .read()
            .unwrap()
            .contacts
            .iter()
            .find(|c| {
                identity::normalize_phone(&c.phone) == normalized_source
                    || c.linked_identifier.as_deref() == Some(normalized_source)
            })
            .cloned()
    }

    pub fn find_group(&self, group_id: &str) -> Option<Group> {
        let normalized = identity::normalize_group_id(group_id);
        self.inner
            .read()
            .unwrap()
            .groups
            .iter()
            .find(|g| identity::normalize_group_id(&g.group_id) == normalized)
            .cloned()
    }

    pub async fn add_contact(&self, contact: Contact) -> Result<Contact, MutationError> {
        let stored = {
            let mut data = self.inner.write().unwrap();
            let stored = contact
                .normalized(&data.custom_contact_types)
                .map_err(MutationError::Invalid)?;

            if data.contacts.iter().any(|c| c.phone == stored.phone) {
                return Err(MutationError::Duplicate(stored.phone));
            }

            data.contacts.push(stored.clone());
            stored
        };

        self.persist().await;
        Ok(stored)
    }

    pub async fn update_contact(&self, phone: &str, update: Contact) -> Result<Contact, MutationError> {
        let key = identity::normalize_phone(phone);

        let stored = {
            let mut data = self.inner.write().unwrap();
            let stored = update
                .normalized(&data.custom_contact_types)
                .map_err(MutationError::Invalid)?;

            if stored.phone != key && data.contacts.iter().any(|c| c.phone == stored.phone) {
                return Err(MutationError::Duplicate(stored.phone));
            }

            let slot = data
                .contacts
                .iter_mut()
                .find(|c| c.phone == key)
                .ok_or_else(|| MutationError::NotFound(key.clone()))?;
            *slot = stored.clone();
            stored
        };

        self.persist().await;
        Ok(stored)
    }

    pub async fn delete_contact(&self, phone: &str) -> Result<(), MutationError> {
        let key = identity::normalize_phone(phone);

        {
            let mut data = self.inner.write().unwrap();
            let before = data.contacts.len();
            data.contacts.retain(|c| c.phone != key);
            if data.contacts.len() == before {
                return Err(MutationError::NotFound(key));
            }
        }

        self.persist().await;
        Ok(())
    }

    pub async fn add_group(&self, group: Group) -> Result<Group, MutationError> {
        let stored = {
            let mut data = self.inner.write().unwrap();
            let stored = group
                .normalized(&data.custom_group_types)
                .map_err(MutationError::Invalid)?;

            if data
                .groups
                .iter()
                .any(|g| identity::normalize_group_id(&g.group_id) == stored.group_id)
            {
                return Err(MutationError::Duplicate(stored.group_id));
            }

            data.groups.push(stored.clone());
            stored
        };

        self.persist().await;
        Ok(stored)
    }

    pub async fn update_group(&self, group_id: &str, update: Group) -> Result<Group, MutationError> {
        let key = identity::normalize_group_id(group_id);

        let stored = {
            let mut data = self.inner.write().unwrap();
            let stored = update
                .normalized(&data.custom_group_types)
                .map_err(MutationError::Invalid)?;

            if stored.group_id != key
                && data
                    .groups
                    .iter()
                    .any(|g| identity::normalize_group_id(&g.group_id) == stored.group_id)
            {
                return Err(MutationError::Duplicate(stored.group_id));
            }

            let slot = data
                .groups
                .iter_mut()
                .find(|g| identity::normalize_group_id(&g.group_id) == key)
                .ok_or_else(|| MutationError::NotFound(key.clone()))?;
            *slot = stored.clone();
            stored
        };

        self.persist().await;
        Ok(stored)
    }

    pub async fn delete_group(&self, group_id: &str) -> Result<(), MutationError> {
        let key = identity::normalize_group_id(group_id);

        {
            let mut data = self.inner.write().unwrap();
            let before = data.groups.len();
            data.groups
                .retain(|g| identity::normalize_group_id(&g.group_id) != key);
            if data.groups.len() == before {
                return Err(MutationError::NotFound(key));
            }
        }

        self.persist().await;
        Ok(())
    }

    /// Updates the persisted default destination. Rejected while the
    /// environment override is active so the persisted field is never
    /// written back under it.
    pub async fn set_default_webhook(&self, url: Option<String>) -> Result<(), MutationError> {
        if self.env_webhook_url.is_some() {
            return Err(MutationError::Invalid(
                "default webhook is fixed by the environment and cannot be changed here"
                    .to_string(),
            ));
        }

        if let Some(url) = &url {
            if !valid_url(url) {
                return Err(MutationError::Invalid(format!("invalid URL: {}", url)));
            }
        }

        self.inner.write().unwrap().webhook_url = url;
        self.persist().await;
        Ok(())
    }

    pub async fn set_type_webhooks(
        &self,
        webhooks: HashMap<String, String>,
    ) -> Result<(), MutationError> {
        for (entity_type, url) in &webhooks {
            if entity_type.trim().is_empty() {
                return Err(MutationError::Invalid("empty entity type".to_string()));
            }
            if !url.is_empty() && !valid_url(url) {
                return Err(MutationError::Invalid(format!("invalid URL: {}", url)));
            }
        }

        self.inner.write().unwrap().type_webhooks = webhooks;
        self.persist().await;
        Ok(())
    }

    pub async fn set_custom_types(
        &self,
        contact_types: Vec<String>,
        group_types: Vec<String>,
    ) -> Result<(), MutationError> {
        let normalize = |types: Vec<String>| -> Result<Vec<String>, MutationError> {
            types
                .into_iter()
                .map(|t| {
                    let t = t.trim().to_uppercase();
                    if t.is_empty() || !t.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        Err(MutationError::Invalid(format!("invalid type name: {}", t)))
                    } else {
                        Ok(t)
                    }
                })
                .collect()
        };

        let contact_types = normalize(contact_types)?;
        let group_types = normalize(group_types)?;

        {
            let mut data = self.inner.write().unwrap();
            data.custom_contact_types = contact_types;
            data.custom_group_types = group_types;
        }

        self.persist().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> ConfigStore {
        let path = std::env::temp_dir().join(format!("wa-gateway-cfg-{}.json", uuid::Uuid::new_v4()));
        ConfigStore::new(path, None)
    }

    fn contact(phone: &str) -> Contact {
        Contact {
            phone: phone.to_string(),
            name: "Dana Levi".to_string(),
            entity_type: "VIP".to_string(),
            linked_identifier: None,
        }
    }

    #[tokio::test]
    async fn add_rejects_duplicates_across_formats() {
        let store = temp_store();
        store.add_contact(contact("972500000002")).await.unwrap();

        let err = store
            .add_contact(contact("+972 50-000-0002"))
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Duplicate(_)));
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_keys() {
        let store = temp_store();
        assert!(matches!(
            store
                .update_contact("972500000009", contact("972500000009"))
                .await,
            Err(MutationError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_contact("972500000009").await,
            Err(MutationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn groups_collide_with_and_without_suffix() {
        let store = temp_store();
        store
            .add_group(Group {
                group_id: "120363111111111111".to_string(),
                name: "Ops".to_string(),
                entity_type: "WORK".to_string(),
            })
            .await
            .unwrap();

        let err = store
            .add_group(Group {
                group_id: "120363111111111111@g.us".to_string(),
                name: "Ops again".to_string(),
                entity_type: "WORK".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Duplicate(_)));

        assert!(store.find_group("120363111111111111@g.us").is_some());
    }

    #[tokio::test]
    async fn env_webhook_wins_and_blocks_write_back() {
        let path = std::env::temp_dir().join(format!("wa-gateway-cfg-{}.json", uuid::Uuid::new_v4()));

        // persisted before the override existed
        {
            let store = ConfigStore::new(path.clone(), None);
            store
                .set_default_webhook(Some("https://disk.example/hook".to_string()))
                .await
                .unwrap();
        }

        let store = ConfigStore::new(path.clone(), Some("https://env.example/hook".to_string()));
        store.load().await.unwrap();

        assert_eq!(
            store.default_webhook().as_deref(),
            Some("https://env.example/hook")
        );
        assert!(store.has_persisted_default());

        // mutating the persisted default under the override is rejected
        // and leaves both memory and disk untouched
        let err = store
            .set_default_webhook(Some("https://other.example/hook".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Invalid(_)));
        assert_eq!(
            store.snapshot().webhook_url.as_deref(),
            Some("https://disk.example/hook")
        );

        let reloaded = ConfigStore::new(path, None);
        reloaded.load().await.unwrap();
        assert_eq!(
            reloaded.snapshot().webhook_url.as_deref(),
            Some("https://disk.example/hook")
        );
    }

    #[tokio::test]
    async fn contact_matches_by_linked_identifier() {
        let store = temp_store();
        let mut c = contact("972500000002");
        c.linked_identifier = Some("84455217701112".to_string());
        store.add_contact(c).await.unwrap();

        assert!(store.find_contact("84455217701112").is_some());
        assert!(store.find_contact("972500000002").is_some());
        assert!(store.find_contact("000000").is_none());
    }

    #[tokio::test]
    async fn persistence_round_trip() {
        let path = std::env::temp_dir().join(format!("wa-gateway-cfg-{}.json", uuid::Uuid::new_v4()));
        {
            let store = ConfigStore::new(path.clone(), None);
            store.add_contact(contact("972500000002")).await.unwrap();
            store
                .set_type_webhooks(HashMap::from([(
                    "VIP".to_string(),
                    "https://ex.example/vip".to_string(),
                )]))
                .await
                .unwrap();
        }

        let reloaded = ConfigStore::new(path, None);
        reloaded.load().await.unwrap();
        assert!(reloaded.find_contact("972500000002").is_some());
        assert_eq!(
            reloaded.type_webhook_for("VIP").as_deref(),
            Some("https://ex.example/vip")
        );
        assert_eq!(reloaded.type_webhook_for("TEAM"), None);
    }

    #[tokio::test]
    async fn custom_types_are_uppercased_and_validated() {
        let store = temp_store();
        store
            .set_custom_types(vec!["lawyer".to_string()], vec![])
            .await
            .unwrap();

        let mut c = contact("972500000003");
        c.entity_type = "LAWYER".to_string();
        assert!(store.add_contact(c).await.is_ok());

        assert!(matches!(
            store.set_custom_types(vec!["bad type!".to_string()], vec![]).await,
            Err(MutationError::Invalid(_))
        ));
    }
}
