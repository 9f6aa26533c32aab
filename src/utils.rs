//! Helper functions shared across api/, router/, store/, ...

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::LazyLock;

/// Client to make http requests
pub static REQUEST_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(reqwest::Client::new);

/// ISO-8601 timestamp with millisecond precision, the format every
/// persisted record and outbound payload carries.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Writes `value` as pretty JSON through a temp file plus rename, so a
/// crash mid-write leaves either the previous or the new file.
pub async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes).await
}

pub async fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;

    Ok(())
}

/// Best-effort JSON load; a missing file is `None`, not an error.
pub async fn read_json_file<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Truncated body used in the recent-events feed.
pub fn message_preview(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(50).collect();

    if chars.next().is_none() {
        head
    } else {
        format!("{}...", head)
    }
}

/// Matches a client address against an allow-list entry: exact IP,
/// prefix ending with `.`, or an IPv4 CIDR block.
fn ip_matches_entry(client: &str, entry: &str) -> bool {
    if entry == client {
        return true;
    }

    if entry.ends_with('.') {
        return client.starts_with(entry);
    }

    if let Some((network, bits)) = entry.split_once('/') {
        let (Ok(network), Ok(bits), Ok(client)) = (
            network.parse::<Ipv4Addr>(),
            bits.parse::<u32>(),
            client.parse::<Ipv4Addr>(),
        ) else {
            return false;
        };

        if bits > 32 {
            return false;
        }

        let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
        return (u32::from(client) & mask) == (u32::from(network) & mask);
    }

    false
}

/// Empty allow-list admits everyone.
pub fn ip_allowed(client: &str, entries: &[String]) -> bool {
    entries.is_empty() || entries.iter().any(|entry| ip_matches_entry(client, entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_short_bodies_untouched() {
        assert_eq!(message_preview("hello"), "hello");
        let body: String = "x".repeat(50);
        assert_eq!(message_preview(&body), body);
    }

    #[test]
    fn preview_truncates_to_fifty_chars_plus_ellipsis() {
        let body: String = "y".repeat(80);
        let preview = message_preview(&body);
        assert_eq!(preview.chars().count(), 53);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn preview_respects_multibyte_boundaries() {
        let body: String = "ש".repeat(60);
        let preview = message_preview(&body);
        assert_eq!(preview.chars().count(), 53);
    }

    #[test]
    fn ip_exact_and_prefix_matching() {
        let entries = vec!["10.0.0.5".to_string(), "192.168.1.".to_string()];
        assert!(ip_allowed("10.0.0.5", &entries));
        assert!(ip_allowed("192.168.1.77", &entries));
        assert!(!ip_allowed("10.0.0.6", &entries));
    }

    #[test]
    fn ip_cidr_matching() {
        let entries = vec!["172.16.0.0/12".to_string()];
        assert!(ip_allowed("172.20.3.4", &entries));
        assert!(!ip_allowed("172.32.0.1", &entries));
    }

    #[test]
    fn empty_allow_list_admits_everyone() {
        assert!(ip_allowed("8.8.8.8", &[]));
    }

    #[tokio::test]
    async fn atomic_write_round_trip() {
        let path = std::env::temp_dir().join(format!("wa-gateway-{}.json", uuid::Uuid::new_v4()));
        let value = serde_json::json!({"a": 1, "b": ["x", "y"]});

        atomic_write_json(&path, &value).await.unwrap();
        let loaded: Option<serde_json::Value> = read_json_file(&path).await.unwrap();
        assert_eq!(loaded, Some(value.clone()));

        // Overwrite lands fully or not at all; after a second write the
        // file must parse as exactly one of the two states.
        let next = serde_json::json!({"a": 2});
        atomic_write_json(&path, &next).await.unwrap();
        let loaded: Option<serde_json::Value> = read_json_file(&path).await.unwrap();
        assert_eq!(loaded, Some(next));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn read_missing_file_is_none() {
        let path = std::env::temp_dir().join(format!("wa-gateway-{}.json", uuid::Uuid::new_v4()));
        let loaded: Option<serde_json::Value> = read_json_file(&path).await.unwrap();
        assert!(loaded.is_none());
    }
}
