//! Bounded per-source message history with global LRU eviction.
//!
//! Lists are newest-first and capped per source; when the global cap is
//! crossed the globally oldest messages go first. Mutations flip a dirty
//! flag that a once-a-minute loop flushes to `messages.json`.

use crate::models::message::NormalizedMessage;
use crate::{consts, utils};
use log::error;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    #[serde(rename = "sourceId")]
    pub source_id: String,
    #[serde(rename = "messageCount")]
    pub message_count: usize,
    #[serde(rename = "lastTimestamp")]
    pub last_timestamp: String,
}

struct Inner {
    by_source: HashMap<String, Vec<NormalizedMessage>>,
    /// Ids of messages this instance sent, kept for the reply-mention
    /// check. Bounded, in-memory only.
    outgoing_ids: VecDeque<String>,
}

pub struct MessageStore {
    path: PathBuf,
    max_per_source: usize,
    max_total: usize,
    inner: RwLock<Inner>,
    dirty: AtomicBool,
}

impl MessageStore {
    pub fn new(path: PathBuf, max_per_source: usize, max_total: usize) -> Self {
        Self {
            path,
            max_per_source,
            max_total,
            inner: RwLock::new(Inner {
                by_source: HashMap::new(),
                outgoing_ids: VecDeque::new(),
            }),
            dirty: AtomicBool::new(false),
        }
    }

    pub async fn load(&self) -> anyhow::Result<()> {
        if let Some(by_source) =
            utils::read_json_file::<HashMap<String, Vec<NormalizedMessage>>>(&self.path).await?
        {
            self.inner.write().unwrap().by_source = by_source;
        }
        Ok(())
    }

    /// Persists only when something changed since the last flush. The
    /// dirty flag is restored on write failure so the next tick retries.
    pub async fn flush_if_dirty(&self) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }

        let snapshot = self.inner.read().unwrap().by_source.clone();
        if let Err(e) = utils::atomic_write_json(&self.path, &snapshot).await {
            error!("failed to persist message history: {:#}", e);
            self.dirty.store(true, Ordering::Release);
        }
    }

    pub async fn flush(&self) {
        self.dirty.store(true, Ordering::Release);
        self.flush_if_dirty().await;
    }

    pub fn store(&self, source_id: &str, message: NormalizedMessage) {
        let mut inner = self.inner.write().unwrap();

        if message.from_self && !message.id.is_empty() {
            inner.outgoing_ids.push_front(message.id.clone());
            inner.outgoing_ids.truncate(consts::OUTGOING_IDS_LIMIT);
        }

        let list = inner.by_source.entry(source_id.to_string()).or_default();
        list.insert(0, message);
        list.truncate(self.max_per_source);

        self.evict_to_cap(&mut inner);
        self.dirty.store(true, Ordering::Release);
    }

    /// Drops globally-oldest messages (per-source lists are newest-first,
    /// so each source's candidate is its last element) until the total is
    /// back under the cap. Emptied sources are removed.
    fn evict_to_cap(&self, inner: &mut Inner) {
        let mut total: usize = inner.by_source.values().map(Vec::len).sum();

        while total > self.max_total {
            let Some(oldest_source) = inner
                .by_source
                .iter()
                .filter_map(|(source, list)| {
                    list.last().map(|m| (source.clone(), m.timestamp.clone()))
                })
                .min_by(|a, b| a.1.cmp(&b.1))
                .map(|(source, _)| source)
            else {
                break;
            };

            if let Some(list) = inner.by_source.get_mut(&oldest_source) {
                list.pop();
                if list.is_empty() {
                    inner.by_source.remove(&oldest_source);
                }
            }
            total -= 1;
        }
    }

    pub fn get(
        &self,
        source_id: &str,
        limit: usize,
        offset: usize,
    ) -> (Vec<NormalizedMessage>, bool) {
        let inner = self.inner.read().unwrap();
        let Some(list) = inner.by_source.get(source_id) else {
            return (Vec::new(), false);
        };

        let page: Vec<NormalizedMessage> =
            list.iter().skip(offset).take(limit).cloned().collect();
        let has_more = offset + page.len() < list.len();

        (page, has_more)
    }

    pub fn sources_with_messages(&self) -> Vec<SourceSummary> {
        let inner = self.inner.read().unwrap();
        let mut summaries: Vec<SourceSummary> = inner
            .by_source
            .iter()
            .map(|(source_id, list)| SourceSummary {
                source_id: source_id.clone(),
                message_count: list.len(),
                last_timestamp: list
                    .first()
                    .map(|m| m.timestamp.clone())
                    .unwrap_or_default(),
            })
            .collect();

        summaries.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
        summaries
    }

    pub fn delete(&self, source_id: &str) -> usize {
        let removed = self
            .inner
            .write()
            .unwrap()
            .by_source
            .remove(source_id)
            .map(|list| list.len())
            .unwrap_or(0);

        if removed > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    pub fn total_count(&self) -> usize {
        self.inner.read().unwrap().by_source.values().map(Vec::len).sum()
    }

    pub fn record_outgoing_id(&self, message_id: &str) {
        if message_id.is_empty() {
            return;
        }
        let mut inner = self.inner.write().unwrap();
        inner.outgoing_ids.push_front(message_id.to_string());
        inner.outgoing_ids.truncate(consts::OUTGOING_IDS_LIMIT);
    }

    /// Whether a message id belongs to something this instance sent.
    pub fn is_our_message(&self, message_id: &str) -> bool {
        !message_id.is_empty()
            && self
                .inner
                .read()
                .unwrap()
                .outgoing_ids
                .iter()
                .any(|id| id == message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(max_per_source: usize, max_total: usize) -> MessageStore {
        let path = std::env::temp_dir().join(format!("wa-gateway-msgs-{}.json", uuid::Uuid::new_v4()));
        MessageStore::new(path, max_per_source, max_total)
    }

    fn message(id: &str, timestamp: &str) -> NormalizedMessage {
        NormalizedMessage {
            id: id.to_string(),
            body: format!("body of {}", id),
            msg_type: "text".to_string(),
            has_media: false,
            media_type: None,
            media_handle: None,
            thumbnail: None,
            from_self: false,
            timestamp: timestamp.to_string(),
            quoted_body: None,
            stored_at: crate::utils::now_iso(),
        }
    }

    fn ts(i: usize) -> String {
        format!("2026-01-01T00:00:{:02}.000Z", i)
    }

    #[test]
    fn per_source_lists_are_newest_first_and_capped() {
        let store = temp_store(3, 100);
        for i in 0..5 {
            store.store("alice", message(&format!("m{}", i), &ts(i)));
        }

        let (page, has_more) = store.get("alice", 10, 0);
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].id, "m4");
        assert_eq!(page[2].id, "m2");
        assert!(!has_more);
    }

    #[test]
    fn global_cap_evicts_globally_oldest() {
        let store = temp_store(10, 6);
        for i in 0..4 {
            store.store("old", message(&format!("old{}", i), &ts(i)));
        }
        for i in 10..14 {
            store.store("new", message(&format!("new{}", i), &ts(i)));
        }

        assert_eq!(store.total_count(), 6);
        // the two oldest entries of "old" are gone
        let (page, _) = store.get("old", 10, 0);
        assert_eq!(page.len(), 2);
        assert_eq!(page.last().unwrap().id, "old2");
    }

    #[test]
    fn eviction_removes_emptied_sources() {
        let store = temp_store(10, 3);
        store.store("gone", message("g0", &ts(0)));
        for i in 1..=3 {
            store.store("kept", message(&format!("k{}", i), &ts(i)));
        }

        assert_eq!(store.total_count(), 3);
        assert!(store.get("gone", 10, 0).0.is_empty());
        assert!(
            store
                .sources_with_messages()
                .iter()
                .all(|s| s.source_id != "gone")
        );
    }

    #[test]
    fn paging_reports_has_more() {
        let store = temp_store(10, 100);
        for i in 0..5 {
            store.store("alice", message(&format!("m{}", i), &ts(i)));
        }

        let (page, has_more) = store.get("alice", 2, 2);
        assert_eq!(page.len(), 2);
        assert!(has_more);

        let (page, has_more) = store.get("alice", 2, 4);
        assert_eq!(page.len(), 1);
        assert!(!has_more);
    }

    #[test]
    fn delete_returns_removed_count() {
        let store = temp_store(10, 100);
        store.store("alice", message("m0", &ts(0)));
        store.store("alice", message("m1", &ts(1)));

        assert_eq!(store.delete("alice"), 2);
        assert_eq!(store.delete("alice"), 0);
    }

    #[test]
    fn outgoing_ids_answer_is_our_message() {
        let store = temp_store(10, 100);
        let mut sent = message("OUT1", &ts(0));
        sent.from_self = true;
        store.store("alice", sent);
        store.record_outgoing_id("OUT2");

        assert!(store.is_our_message("OUT1"));
        assert!(store.is_our_message("OUT2"));
        assert!(!store.is_our_message("OTHER"));
    }

    #[tokio::test]
    async fn flush_and_reload_round_trip() {
        let path = std::env::temp_dir().join(format!("wa-gateway-msgs-{}.json", uuid::Uuid::new_v4()));

        {
            let store = MessageStore::new(path.clone(), 10, 100);
            store.store("alice", message("m0", &ts(0)));
            store.flush_if_dirty().await;
        }

        let store = MessageStore::new(path, 10, 100);
        store.load().await.unwrap();
        let (page, _) = store.get("alice", 10, 0);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "m0");
    }
}
