//! Per-event-kind counters, alert counters and the bounded recent-events
//! ring, persisted to `stats.json` every five minutes and on shutdown.

use crate::models::event::StoredEvent;
use crate::utils;
use log::error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    Total,
    Filtered,
    Forwarded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, Serialize, Deserialize)]
pub enum AlertLevel {
    #[display("critical")]
    #[serde(rename = "critical")]
    Critical,
    #[display("warning")]
    #[serde(rename = "warning")]
    Warning,
    #[display("info")]
    #[serde(rename = "info")]
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventCounters {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub filtered: u64,
    #[serde(default)]
    pub forwarded: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(rename = "lastReceived", skip_serializing_if = "Option::is_none", default)]
    pub last_received: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlertsByLevel {
    #[serde(default)]
    pub critical: u64,
    #[serde(default)]
    pub warning: u64,
    #[serde(default)]
    pub info: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlertCounters {
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(rename = "byLevel", default)]
    pub by_level: AlertsByLevel,
}

/// Counters kept for dashboards that predate per-kind tracking.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LegacyCounters {
    #[serde(rename = "totalMessages", default)]
    pub total_messages: u64,
    #[serde(rename = "filteredMessages", default)]
    pub filtered_messages: u64,
    #[serde(rename = "allowedMessages", default)]
    pub allowed_messages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "lastSaved", skip_serializing_if = "Option::is_none", default)]
    pub last_saved: Option<String>,
}

/// On-disk shape of `stats.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsData {
    #[serde(default)]
    pub events: HashMap<String, EventCounters>,
    #[serde(default)]
    pub alerts: AlertCounters,
    #[serde(rename = "recentEvents", default)]
    pub recent_events: Vec<StoredEvent>,
    pub session: SessionInfo,
    #[serde(default)]
    pub legacy: LegacyCounters,
}

impl Default for StatsData {
    fn default() -> Self {
        Self {
            events: HashMap::new(),
            alerts: AlertCounters::default(),
            recent_events: Vec::new(),
            session: SessionInfo {
                started_at: utils::now_iso(),
                last_saved: None,
            },
            legacy: LegacyCounters::default(),
        }
    }
}

/// Aggregate view for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    #[serde(rename = "totalEvents")]
    pub total_events: u64,
    pub forwarded: u64,
    pub filtered: u64,
    pub failed: u64,
    pub events: HashMap<String, EventCounters>,
    pub alerts: AlertCounters,
    pub legacy: LegacyCounters,
    pub session: SessionInfo,
}

pub struct StatsStore {
    path: PathBuf,
    recent_limit: usize,
    inner: RwLock<StatsData>,
}

impl StatsStore {
    pub fn new(path: PathBuf, recent_limit: usize) -> Self {
        Self {
            path,
            recent_limit,
            inner: RwLock::new(StatsData::default()),
        }
    }

    /// Merges the on-disk state over a fresh default so fields added since
    /// the file was written still appear.
    pub async fn load(&self) -> anyhow::Result<()> {
        if let Some(disk) = utils::read_json_file::<StatsData>(&self.path).await? {
            let mut data = self.inner.write().unwrap();
            data.events = disk.events;
            data.alerts = disk.alerts;
            data.recent_events = disk.recent_events;
            data.legacy = disk.legacy;
            // session.started_at stays at process start
        }
        Ok(())
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let snapshot = {
            let mut data = self.inner.write().unwrap();
            data.session.last_saved = Some(utils::now_iso());
            data.clone()
        };
        utils::atomic_write_json(&self.path, &snapshot).await
    }

    pub async fn persist(&self) {
        if let Err(e) = self.save().await {
            error!("failed to persist stats: {:#}", e);
        }
    }

    /// Unknown event kinds get their counter row on first sight.
    pub fn increment(&self, event_kind: &str, field: CounterField) {
        let mut data = self.inner.write().unwrap();
        let counters = data.events.entry(event_kind.to_string()).or_default();

        match field {
            CounterField::Total => counters.total += 1,
            CounterField::Filtered => counters.filtered += 1,
            CounterField::Forwarded => counters.forwarded += 1,
            CounterField::Failed => counters.failed += 1,
        }
        counters.last_received = Some(utils::now_iso());

        if event_kind == "MESSAGES_UPSERT" {
            match field {
                CounterField::Total => data.legacy.total_messages += 1,
                CounterField::Filtered => data.legacy.filtered_messages += 1,
                CounterField::Forwarded => data.legacy.allowed_messages += 1,
                CounterField::Failed => {}
            }
        }
    }

    pub fn increment_alert(&self, level: AlertLevel, success: bool) {
        let mut data = self.inner.write().unwrap();

        if success {
            data.alerts.sent += 1;
        } else {
            data.alerts.failed += 1;
        }

        match level {
            AlertLevel::Critical => data.alerts.by_level.critical += 1,
            AlertLevel::Warning => data.alerts.by_level.warning += 1,
            AlertLevel::Info => data.alerts.by_level.info += 1,
        }
    }

    /// Unshifts into the ring, newest first, trimmed to the limit.
    pub fn log_event(&self, event: StoredEvent) {
        let mut data = self.inner.write().unwrap();
        data.recent_events.insert(0, event);
        data.recent_events.truncate(self.recent_limit);
    }

    /// Paged slice of the ring, optionally filtered by event kind.
    /// Returns the page plus the total matching count.
    pub fn recent(
        &self,
        limit: usize,
        event_kind: Option<&str>,
        offset: usize,
    ) -> (Vec<StoredEvent>, usize) {
        let data = self.inner.read().unwrap();
        let matching: Vec<&StoredEvent> = data
            .recent_events
            .iter()
            .filter(|e| event_kind.is_none_or(|kind| e.event == kind))
            .collect();

        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        (page, total)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let data = self.inner.read().unwrap();

        let mut total_events = 0;
        let mut forwarded = 0;
        let mut filtered = 0;
        let mut failed = 0;
        for counters in data.events.values() {
            total_events += counters.total;
            forwarded += counters.forwarded;
            filtered += counters.filtered;
            failed += counters.failed;
        }

        StatsSnapshot {
            total_events,
            forwarded,
            filtered,
            failed,
            events: data.events.clone(),
            alerts: data.alerts.clone(),
            legacy: data.legacy.clone(),
            session: data.session.clone(),
        }
    }

    pub fn counters_for(&self, event_kind: &str) -> EventCounters {
        self.inner
            .read()
            .unwrap()
            .events
            .get(event_kind)
            .cloned()
            .unwrap_or_default()
    }
}
