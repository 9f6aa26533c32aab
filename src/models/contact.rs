use crate::{consts, identity};
use serde::{Deserialize, Serialize};

/// An allowed sender. The phone is stored digits-only and is the key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    pub phone: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Upstream-internal alias of the phone; matched during
    /// authorization when the sender arrives under a linked identifier.
    #[serde(rename = "linkedIdentifier", skip_serializing_if = "Option::is_none", default)]
    pub linked_identifier: Option<String>,
}

/// An allowed group, keyed by the normalized (suffix-stripped) group id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

fn valid_name(name: &str) -> bool {
    let len = name.trim().chars().count();
    (consts::NAME_MIN_CHARS..=consts::NAME_MAX_CHARS).contains(&len)
}

pub fn is_known_contact_type(entity_type: &str, custom_types: &[String]) -> bool {
    consts::DEFAULT_CONTACT_TYPES.contains(&entity_type)
        || custom_types.iter().any(|t| t == entity_type)
}

pub fn is_known_group_type(entity_type: &str, custom_types: &[String]) -> bool {
    consts::DEFAULT_GROUP_TYPES.contains(&entity_type)
        || custom_types.iter().any(|t| t == entity_type)
}

impl Contact {
    /// Validates and normalizes into the stored form.
    pub fn normalized(self, custom_types: &[String]) -> Result<Self, String> {
        if !identity::is_valid_phone(&self.phone) {
            return Err(format!("invalid phone number: {}", self.phone));
        }
        if !valid_name(&self.name) {
            return Err("contact name must be 2-50 characters".to_string());
        }
        if !is_known_contact_type(&self.entity_type, custom_types) {
            return Err(format!("unknown contact type: {}", self.entity_type));
        }

        let linked_identifier = self
            .linked_identifier
            .map(|lid| identity::normalize_phone(&lid))
            .filter(|lid| !lid.is_empty());

        Ok(Self {
            phone: identity::normalize_phone(&self.phone),
            name: self.name.trim().to_string(),
            entity_type: self.entity_type,
            linked_identifier,
        })
    }
}

impl Group {
    pub fn normalized(self, custom_types: &[String]) -> Result<Self, String> {
        if !identity::is_valid_group_id(&self.group_id) {
            return Err(format!("invalid group id: {}", self.group_id));
        }
        if !valid_name(&self.name) {
            return Err("group name must be 2-50 characters".to_string());
        }
        if !is_known_group_type(&self.entity_type, custom_types) {
            return Err(format!("unknown group type: {}", self.entity_type));
        }

        Ok(Self {
            group_id: identity::normalize_group_id(&self.group_id),
            name: self.name.trim().to_string(),
            entity_type: self.entity_type,
        })
    }
}
