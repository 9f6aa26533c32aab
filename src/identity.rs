//! Parsing and normalization of upstream chat identifiers.
//!
//! WhatsApp addresses arrive in several shapes (`<phone>@s.whatsapp.net`,
//! `<id>@g.us`, `<lid>@lid`, `status@broadcast`). Authorization, routing
//! and storage keys all work on the normalized forms produced here, so
//! both sides of every comparison must go through [`normalize_phone`] /
//! [`normalize_group_id`].

use crate::consts;
use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum SourceType {
    #[display("contact")]
    #[serde(rename = "contact")]
    Contact,
    #[display("group")]
    #[serde(rename = "group")]
    Group,
    #[display("status")]
    #[serde(rename = "status")]
    Status,
    #[display("unknown")]
    #[serde(rename = "unknown")]
    Unknown,
}

/// Result of classifying a raw remote address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSource {
    pub source_id: String,
    pub source_type: SourceType,
    pub is_status_broadcast: bool,
    pub is_linked_identifier: bool,
}

impl ParsedSource {
    fn unknown() -> Self {
        Self {
            source_id: String::new(),
            source_type: SourceType::Unknown,
            is_status_broadcast: false,
            is_linked_identifier: false,
        }
    }
}

/// Classifies a remote address. Rules apply in order: empty input,
/// status broadcast, group suffix, linked identifier, plain contact.
pub fn parse_remote_address(remote: &str) -> ParsedSource {
    if remote.is_empty() {
        return ParsedSource::unknown();
    }

    if remote.contains("status@broadcast") {
        return ParsedSource {
            source_id: String::new(),
            source_type: SourceType::Status,
            is_status_broadcast: true,
            is_linked_identifier: false,
        };
    }

    if remote.contains("@g.us") {
        return ParsedSource {
            source_id: normalize_group_id(remote),
            source_type: SourceType::Group,
            is_status_broadcast: false,
            is_linked_identifier: false,
        };
    }

    if remote.contains("@lid") {
        return ParsedSource {
            source_id: remote.replace("@lid", ""),
            source_type: SourceType::Contact,
            is_status_broadcast: false,
            is_linked_identifier: true,
        };
    }

    ParsedSource {
        source_id: remote.replace("@s.whatsapp.net", ""),
        source_type: SourceType::Contact,
        is_status_broadcast: false,
        is_linked_identifier: false,
    }
}

/// Strips everything that is not a digit.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Strips a trailing `@g.us` only; the digits are left as-is.
pub fn normalize_group_id(group_id: &str) -> String {
    group_id
        .strip_suffix("@g.us")
        .unwrap_or(group_id)
        .to_string()
}

pub fn is_valid_phone(phone: &str) -> bool {
    let digits = normalize_phone(phone);
    digits.len() >= consts::PHONE_MIN_DIGITS && digits.len() <= consts::PHONE_MAX_DIGITS
}

pub fn is_valid_group_id(group_id: &str) -> bool {
    let normalized = normalize_group_id(group_id);
    normalized.len() >= consts::GROUP_ID_MIN_DIGITS
        && normalized.len() <= consts::GROUP_ID_MAX_DIGITS
        && normalized.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_unknown() {
        let parsed = parse_remote_address("");
        assert_eq!(parsed.source_type, SourceType::Unknown);
        assert!(parsed.source_id.is_empty());
    }

    #[test]
    fn status_broadcast_is_classified_with_empty_id() {
        let parsed = parse_remote_address("status@broadcast");
        assert_eq!(parsed.source_type, SourceType::Status);
        assert!(parsed.is_status_broadcast);
        assert!(parsed.source_id.is_empty());
    }

    #[test]
    fn group_suffix_is_stripped() {
        let parsed = parse_remote_address("120363111111111111@g.us");
        assert_eq!(parsed.source_type, SourceType::Group);
        assert_eq!(parsed.source_id, "120363111111111111");
    }

    #[test]
    fn linked_identifier_is_flagged() {
        let parsed = parse_remote_address("84455217701112@lid");
        assert_eq!(parsed.source_type, SourceType::Contact);
        assert!(parsed.is_linked_identifier);
        assert_eq!(parsed.source_id, "84455217701112");
    }

    #[test]
    fn plain_contact_strips_server_suffix() {
        let parsed = parse_remote_address("972500000002@s.whatsapp.net");
        assert_eq!(parsed.source_type, SourceType::Contact);
        assert!(!parsed.is_linked_identifier);
        assert_eq!(parsed.source_id, "972500000002");
    }

    #[test]
    fn phone_normalization_is_idempotent_and_format_independent() {
        let variants = [
            "+972 50-000-0001",
            "(972) 50 000 0001",
            "972500000001",
            "972-50-000-0001",
        ];

        for v in variants {
            let once = normalize_phone(v);
            assert_eq!(once, "972500000001");
            assert_eq!(normalize_phone(&once), once);
        }
    }

    #[test]
    fn group_id_with_and_without_suffix_collide() {
        assert_eq!(
            normalize_group_id("120363111111111111"),
            normalize_group_id("120363111111111111@g.us"),
        );
    }

    #[test]
    fn phone_validity_bounds() {
        assert!(is_valid_phone("0501234567"));
        assert!(is_valid_phone("+972 50-123-4567"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("1234567890123456"));
    }

    #[test]
    fn group_validity_bounds() {
        assert!(is_valid_group_id("120363000000000000@g.us"));
        assert!(!is_valid_group_id("123"));
        assert!(!is_valid_group_id("not-a-group-id"));
    }
}
