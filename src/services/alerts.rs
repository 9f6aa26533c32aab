//! Operational alert fan-out.
//!
//! Alerts go to a generic notification endpoint (single JSON POST) and,
//! for critical/warning levels, to a rich block-formatted endpoint. Both
//! channels are best-effort: a failed alert is logged and counted, never
//! propagated.

use crate::services::ImplHttpPoster;
use crate::store::stats::{AlertLevel, StatsStore};
use crate::{consts, utils};
use log::warn;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct AlertAction {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    pub event: String,
    pub title: String,
    pub message: String,
    pub details: Vec<(String, String)>,
    pub actions: Vec<AlertAction>,
}

impl Alert {
    pub fn new(level: AlertLevel, event: &str, title: &str, message: &str) -> Self {
        Self {
            level,
            event: event.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            details: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.push((key.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AlertOutcome {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct AlertSink {
    poster: ImplHttpPoster,
    stats: Arc<StatsStore>,
    generic_url: Option<String>,
    rich_url: Option<String>,
    instance_name: String,
}

fn level_emoji(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Critical => "🚨",
        AlertLevel::Warning => "⚠️",
        AlertLevel::Info => "ℹ️",
    }
}

impl AlertSink {
    pub fn new(
        poster: ImplHttpPoster,
        stats: Arc<StatsStore>,
        generic_url: Option<String>,
        rich_url: Option<String>,
        instance_name: String,
    ) -> Self {
        Self {
            poster,
            stats,
            generic_url,
            rich_url,
            instance_name,
        }
    }

    fn generic_payload(&self, alert: &Alert) -> Value {
        let details: serde_json::Map<String, Value> = alert
            .details
            .iter()
            .take(consts::ALERT_MAX_DETAIL_FIELDS)
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "timestamp": utils::now_iso(),
            "source": "wa-gateway",
            "instance": self.instance_name,
            "level": alert.level,
            "event": alert.event,
            "title": alert.title,
            "message": alert.message,
            "details": details,
            "actions": alert.actions.iter().take(consts::ALERT_MAX_ACTIONS).collect::<Vec<_>>(),
        })
    }

    fn rich_payload(&self, alert: &Alert) -> Value {
        let mut blocks = vec![
            json!({
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": format!("{} {}", level_emoji(alert.level), alert.title),
                    "emoji": true,
                }
            }),
            json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": alert.message}
            }),
        ];

        if !alert.details.is_empty() {
            let fields: Vec<Value> = alert
                .details
                .iter()
                .take(consts::ALERT_MAX_DETAIL_FIELDS)
                .map(|(k, v)| json!({"type": "mrkdwn", "text": format!("*{}:*\n{}", k, v)}))
                .collect();
            blocks.push(json!({"type": "section", "fields": fields}));
        }

        if !alert.actions.is_empty() {
            let elements: Vec<Value> = alert
                .actions
                .iter()
                .take(consts::ALERT_MAX_ACTIONS)
                .map(|action| {
                    json!({
                        "type": "button",
                        "text": {"type": "plain_text", "text": action.label, "emoji": true},
                        "url": action.url,
                    })
                })
                .collect();
            blocks.push(json!({"type": "actions", "elements": elements}));
        }

        json!({"blocks": blocks})
    }

    /// Fans the alert out to every configured channel. Returns whether at
    /// least one channel accepted it; the level is always counted.
    pub async fn send(&self, alert: Alert) -> AlertOutcome {
        if self.generic_url.is_none() && self.rich_url.is_none() {
            self.stats.increment_alert(alert.level, false);
            return AlertOutcome {
                sent: false,
                reason: Some("no_channels".to_string()),
            };
        }

        let mut delivered = false;

        if let Some(url) = &self.generic_url {
            let headers = vec![(
                consts::HEADER_ALERT_LEVEL.to_string(),
                alert.level.to_string(),
            )];
            match self
                .poster
                .post_json(
                    url.clone(),
                    headers,
                    self.generic_payload(&alert),
                    consts::ALERT_TIMEOUT_SECS,
                )
                .await
            {
                Ok(response) if response.status < 400 => delivered = true,
                Ok(response) => warn!(
                    "alert channel {} returned status {}",
                    url, response.status
                ),
                Err(e) => warn!("alert channel {} failed: {}", url, e),
            }
        }

        let rich_eligible = matches!(alert.level, AlertLevel::Critical | AlertLevel::Warning);
        if let Some(url) = self.rich_url.as_ref().filter(|_| rich_eligible) {
            match self
                .poster
                .post_json(
                    url.clone(),
                    Vec::new(),
                    self.rich_payload(&alert),
                    consts::ALERT_TIMEOUT_SECS,
                )
                .await
            {
                Ok(response) if response.status < 400 => delivered = true,
                Ok(response) => warn!(
                    "rich alert channel {} returned status {}",
                    url, response.status
                ),
                Err(e) => warn!("rich alert channel {} failed: {}", url, e),
            }
        }

        self.stats.increment_alert(alert.level, delivered);
        AlertOutcome {
            sent: delivered,
            reason: (!delivered).then(|| "delivery_failed".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockHttpPoster, PostError, PostResponse};

    fn stats() -> Arc<StatsStore> {
        let path = std::env::temp_dir().join(format!("wa-gw-alerts-{}.json", uuid::Uuid::new_v4()));
        Arc::new(StatsStore::new(path, 10))
    }

    fn ok() -> Result<PostResponse, PostError> {
        Ok(PostResponse {
            status: 200,
            body: String::new(),
        })
    }

    #[tokio::test]
    async fn no_channels_reports_reason() {
        let sink = AlertSink::new(
            Arc::new(MockHttpPoster::new()),
            stats(),
            None,
            None,
            "gw".to_string(),
        );

        let outcome = sink
            .send(Alert::new(AlertLevel::Info, "TEST", "t", "m"))
            .await;
        assert_eq!(outcome.reason.as_deref(), Some("no_channels"));
        assert!(!outcome.sent);
    }

    #[tokio::test]
    async fn generic_channel_gets_level_header_and_payload() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|url, headers, body, timeout| {
                url == "https://alerts.example/in"
                    && headers
                        .iter()
                        .any(|(n, v)| n == consts::HEADER_ALERT_LEVEL && v == "critical")
                    && body["level"] == serde_json::json!("critical")
                    && body["instance"] == serde_json::json!("gw")
                    && *timeout == consts::ALERT_TIMEOUT_SECS
            })
            .times(1)
            .returning(|_, _, _, _| ok());

        let stats = stats();
        let sink = AlertSink::new(
            Arc::new(poster),
            stats.clone(),
            Some("https://alerts.example/in".to_string()),
            None,
            "gw".to_string(),
        );

        let outcome = sink
            .send(Alert::new(AlertLevel::Critical, "CONN_LOST", "lost", "gone"))
            .await;
        assert!(outcome.sent);
        assert_eq!(stats.snapshot().alerts.sent, 1);
        assert_eq!(stats.snapshot().alerts.by_level.critical, 1);
    }

    #[tokio::test]
    async fn rich_channel_skips_info_level() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|url, _, _, _| url == "https://hooks.example/rich")
            .times(1)
            .returning(|_, _, _, _| ok());

        let sink = AlertSink::new(
            Arc::new(poster),
            stats(),
            None,
            Some("https://hooks.example/rich".to_string()),
            "gw".to_string(),
        );

        // info never reaches the rich channel
        let outcome = sink
            .send(Alert::new(AlertLevel::Info, "RESTORED", "back", "ok"))
            .await;
        assert!(!outcome.sent);

        let outcome = sink
            .send(Alert::new(AlertLevel::Warning, "SLOW", "slow", "hmm"))
            .await;
        assert!(outcome.sent);
    }

    #[tokio::test]
    async fn failures_are_swallowed_and_counted() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .times(1)
            .returning(|_, _, _, _| Err(PostError::Timeout));

        let stats = stats();
        let sink = AlertSink::new(
            Arc::new(poster),
            stats.clone(),
            Some("https://alerts.example/in".to_string()),
            None,
            "gw".to_string(),
        );

        let outcome = sink
            .send(Alert::new(AlertLevel::Warning, "X", "x", "x"))
            .await;
        assert!(!outcome.sent);
        assert_eq!(stats.snapshot().alerts.failed, 1);
    }

    #[test]
    fn rich_payload_caps_details_and_actions() {
        let sink = AlertSink::new(
            Arc::new(MockHttpPoster::new()),
            stats(),
            None,
            Some("https://hooks.example/rich".to_string()),
            "gw".to_string(),
        );

        let mut alert = Alert::new(AlertLevel::Critical, "X", "title", "msg");
        for i in 0..15 {
            alert = alert.detail(&format!("k{}", i), format!("v{}", i));
        }
        for i in 0..8 {
            alert.actions.push(AlertAction {
                label: format!("a{}", i),
                url: "https://ex.example".to_string(),
            });
        }

        let payload = sink.rich_payload(&alert);
        let blocks = payload["blocks"].as_array().unwrap();
        let fields = blocks[2]["fields"].as_array().unwrap();
        let elements = blocks[3]["elements"].as_array().unwrap();
        assert_eq!(fields.len(), consts::ALERT_MAX_DETAIL_FIELDS);
        assert_eq!(elements.len(), consts::ALERT_MAX_ACTIONS);
    }
}
