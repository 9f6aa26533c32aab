//! Outbound webhook delivery: destination resolution, retry with backoff,
//! secondary fan-out and per-destination health bookkeeping.

use crate::services::{ImplHttpPoster, PostResponse};
use crate::store::config::ConfigStore;
use crate::{consts, utils};
use derive_more::{Display, Error};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Routing facts the handler attaches to a forward.
#[derive(Debug, Clone)]
pub struct ForwardMeta {
    pub source_id: String,
    pub source_type: String,
    pub entity_type: Option<String>,
    pub event_kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForwardOutcome {
    pub destination: String,
    pub attempt: u32,
}

#[derive(Debug, Display, Error)]
pub enum ForwardError {
    #[display("no destination configured")]
    NoDestination,
    /// Destination answered with a non-retryable 4xx.
    #[display("destination {destination} rejected the payload with status {status}")]
    Rejected {
        destination: String,
        status: u16,
        consecutive_failures: u32,
    },
    #[display("delivery to {destination} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        destination: String,
        attempts: u32,
        last_error: String,
        consecutive_failures: u32,
    },
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct LastError {
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DestinationHealth {
    #[serde(rename = "lastSuccess", skip_serializing_if = "Option::is_none")]
    pub last_success: Option<String>,
    #[serde(rename = "lastError", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(rename = "consecutiveFailures")]
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DeliveryCounter {
    pub success: u64,
    pub failure: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub destinations: HashMap<String, DestinationHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<DestinationHealth>,
    #[serde(rename = "byEntityType")]
    pub by_entity_type: HashMap<String, DeliveryCounter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub success: bool,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct WebhookDispatcher {
    poster: ImplHttpPoster,
    config_store: Arc<ConfigStore>,
    secondary_url: Option<String>,
    instance_name: String,
    health: RwLock<HashMap<String, DestinationHealth>>,
    type_counters: RwLock<HashMap<String, DeliveryCounter>>,
}

fn retryable(response: &PostResponse) -> bool {
    response.status >= 500
}

impl WebhookDispatcher {
    pub fn new(
        poster: ImplHttpPoster,
        config_store: Arc<ConfigStore>,
        secondary_url: Option<String>,
        instance_name: String,
    ) -> Self {
        Self {
            poster,
            config_store,
            secondary_url,
            instance_name,
            health: RwLock::new(HashMap::new()),
            type_counters: RwLock::new(HashMap::new()),
        }
    }

    /// Type-specific route first, default second. Pure over the current
    /// configuration snapshot.
    pub fn resolve_destination(&self, entity_type: Option<&str>) -> Option<String> {
        entity_type
            .and_then(|t| self.config_store.type_webhook_for(t))
            .or_else(|| self.config_store.default_webhook())
    }

    pub fn has_destination_for(&self, entity_type: Option<&str>) -> bool {
        self.resolve_destination(entity_type).is_some()
    }

    fn delivery_headers(&self, meta: &ForwardMeta) -> Vec<(String, String)> {
        vec![
            (
                consts::HEADER_FILTER_SOURCE.to_string(),
                self.instance_name.clone(),
            ),
            (consts::HEADER_SOURCE_ID.to_string(), meta.source_id.clone()),
            (
                consts::HEADER_SOURCE_TYPE.to_string(),
                meta.source_type.clone(),
            ),
            (
                consts::HEADER_ENTITY_TYPE.to_string(),
                meta.entity_type.clone().unwrap_or_default(),
            ),
            (
                consts::HEADER_EVENT_TYPE.to_string(),
                meta.event_kind.clone(),
            ),
        ]
    }

    fn record_success(&self, destination: &str) {
        let mut health = self.health.write().unwrap();
        let entry = health.entry(destination.to_string()).or_default();
        entry.last_success = Some(utils::now_iso());
        entry.consecutive_failures = 0;
    }

    fn record_failure(&self, destination: &str, message: &str, code: Option<u16>) -> u32 {
        let mut health = self.health.write().unwrap();
        let entry = health.entry(destination.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.last_error = Some(LastError {
            message: message.to_string(),
            timestamp: utils::now_iso(),
            code,
        });
        entry.consecutive_failures
    }

    fn count_delivery(&self, entity_type: Option<&str>, success: bool) {
        let key = entity_type.unwrap_or("default").to_string();
        let mut counters = self.type_counters.write().unwrap();
        let entry = counters.entry(key).or_default();
        if success {
            entry.success += 1;
        } else {
            entry.failure += 1;
        }
    }

    fn fan_out_secondary(&self, payload: &Value, meta: &ForwardMeta) {
        let Some(secondary) = self.secondary_url.clone() else {
            return;
        };

        let poster = self.poster.clone();
        let headers = self.delivery_headers(meta);
        let payload = payload.clone();

        // Fire-and-forget: failures are logged, never surfaced.
        tokio::spawn(async move {
            let result = poster
                .post_json(
                    secondary.clone(),
                    headers,
                    payload,
                    consts::SECONDARY_WEBHOOK_TIMEOUT_SECS,
                )
                .await;

            match result {
                Ok(response) if response.status < 400 => {
                    debug!("secondary delivery to {} ok", secondary);
                }
                Ok(response) => {
                    warn!(
                        "secondary delivery to {} returned status {}",
                        secondary, response.status
                    );
                }
                Err(e) => warn!("secondary delivery to {} failed: {}", secondary, e),
            }
        });
    }

    /// Delivers a payload, retrying transient failures. Terminal 4xx and
    /// exhausted retries both surface as errors after health bookkeeping.
    pub async fn forward(
        &self,
        payload: &Value,
        meta: &ForwardMeta,
    ) -> Result<ForwardOutcome, ForwardError> {
        let destination = self
            .resolve_destination(meta.entity_type.as_deref())
            .ok_or(ForwardError::NoDestination)?;

        self.fan_out_secondary(payload, meta);

        let headers = self.delivery_headers(meta);
        let mut last_error = String::new();

        for attempt in 1..=consts::WEBHOOK_MAX_ATTEMPTS {
            let timeout_secs = if attempt == 1 {
                consts::WEBHOOK_FIRST_TIMEOUT_SECS
            } else {
                consts::WEBHOOK_RETRY_TIMEOUT_SECS
            };

            let result = self
                .poster
                .post_json(
                    destination.clone(),
                    headers.clone(),
                    payload.clone(),
                    timeout_secs,
                )
                .await;

            match result {
                Ok(response) if response.status < 400 => {
                    self.record_success(&destination);
                    self.count_delivery(meta.entity_type.as_deref(), true);
                    info!(
                        "forwarded {} event to {} (attempt {})",
                        meta.event_kind, destination, attempt
                    );
                    return Ok(ForwardOutcome {
                        destination,
                        attempt,
                    });
                }
                Ok(response) if !retryable(&response) => {
                    let message = format!("status {}: {}", response.status, response.body);
                    let consecutive_failures =
                        self.record_failure(&destination, &message, Some(response.status));
                    self.count_delivery(meta.entity_type.as_deref(), false);
                    return Err(ForwardError::Rejected {
                        destination,
                        status: response.status,
                        consecutive_failures,
                    });
                }
                Ok(response) => {
                    last_error = format!("status {}: {}", response.status, response.body);
                    warn!(
                        "delivery to {} attempt {} got {}",
                        destination, attempt, last_error
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "delivery to {} attempt {} failed: {}",
                        destination, attempt, last_error
                    );
                }
            }

            if (attempt as usize) <= consts::WEBHOOK_BACKOFF_DELAYS_MS.len()
                && attempt < consts::WEBHOOK_MAX_ATTEMPTS
            {
                let delay = consts::WEBHOOK_BACKOFF_DELAYS_MS[(attempt - 1) as usize];
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        let consecutive_failures = self.record_failure(&destination, &last_error, None);
        self.count_delivery(meta.entity_type.as_deref(), false);

        Err(ForwardError::Exhausted {
            destination,
            attempts: consts::WEBHOOK_MAX_ATTEMPTS,
            last_error,
            consecutive_failures,
        })
    }

    /// Single synthetic delivery used from the admin surface.
    pub async fn test(&self, entity_type: Option<&str>) -> TestOutcome {
        let Some(destination) = self.resolve_destination(entity_type) else {
            return TestOutcome {
                success: false,
                destination: String::new(),
                status: None,
                error: Some("no destination configured".to_string()),
            };
        };

        let payload = json!({
            "test": true,
            "timestamp": utils::now_iso(),
            "message": "connectivity test",
            "source": self.instance_name,
            "entityType": entity_type,
        });

        let result = self
            .poster
            .post_json(
                destination.clone(),
                Vec::new(),
                payload,
                consts::TEST_WEBHOOK_TIMEOUT_SECS,
            )
            .await;

        match result {
            Ok(response) if response.status < 400 => {
                self.record_success(&destination);
                TestOutcome {
                    success: true,
                    destination,
                    status: Some(response.status),
                    error: None,
                }
            }
            Ok(response) => {
                let message = format!("status {}: {}", response.status, response.body);
                self.record_failure(&destination, &message, Some(response.status));
                TestOutcome {
                    success: false,
                    destination,
                    status: Some(response.status),
                    error: Some(message),
                }
            }
            Err(e) => {
                self.record_failure(&destination, &e.to_string(), None);
                TestOutcome {
                    success: false,
                    destination,
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn health(&self) -> HealthReport {
        let destinations = self.health.read().unwrap().clone();
        let secondary = self
            .secondary_url
            .as_ref()
            .map(|url| destinations.get(url).cloned().unwrap_or_default());

        HealthReport {
            destinations,
            secondary,
            by_entity_type: self.type_counters.read().unwrap().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockHttpPoster, PostError};
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn config_with(default: Option<&str>, vip: Option<&str>) -> Arc<ConfigStore> {
        let path = std::env::temp_dir().join(format!("wa-gw-disp-{}.json", uuid::Uuid::new_v4()));
        let store = Arc::new(ConfigStore::new(path, default.map(str::to_string)));
        if let Some(vip) = vip {
            store
                .set_type_webhooks(HashMap::from([("VIP".to_string(), vip.to_string())]))
                .await
                .unwrap();
        }
        store
    }

    fn meta(entity_type: Option<&str>) -> ForwardMeta {
        ForwardMeta {
            source_id: "972500000002".to_string(),
            source_type: "contact".to_string(),
            entity_type: entity_type.map(str::to_string),
            event_kind: "MESSAGES_UPSERT".to_string(),
        }
    }

    fn ok_response(status: u16) -> PostResponse {
        PostResponse {
            status,
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn resolution_prefers_type_route_over_default() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|url, _, _, _| url == "https://ex.example/vip")
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let dispatcher = WebhookDispatcher::new(
            Arc::new(poster),
            config_with(Some("https://ex.example/d"), Some("https://ex.example/vip")).await,
            None,
            "gw".to_string(),
        );

        let outcome = dispatcher
            .forward(&json!({"x": 1}), &meta(Some("VIP")))
            .await
            .unwrap();
        assert_eq!(outcome.destination, "https://ex.example/vip");
        assert_eq!(outcome.attempt, 1);
    }

    #[tokio::test]
    async fn missing_destination_is_an_explicit_error() {
        let dispatcher = WebhookDispatcher::new(
            Arc::new(MockHttpPoster::new()),
            config_with(None, None).await,
            None,
            "gw".to_string(),
        );

        let err = dispatcher
            .forward(&json!({}), &meta(Some("TEAM")))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::NoDestination));
    }

    #[tokio::test]
    async fn transient_failures_retry_three_times_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_mock = calls.clone();

        let mut poster = MockHttpPoster::new();
        poster.expect_post_json().times(3).returning(move |_, _, _, timeout| {
            let call = calls_in_mock.fetch_add(1, Ordering::SeqCst);
            // first attempt uses the short timeout, retries the long one
            if call == 0 {
                assert_eq!(timeout, consts::WEBHOOK_FIRST_TIMEOUT_SECS);
            } else {
                assert_eq!(timeout, consts::WEBHOOK_RETRY_TIMEOUT_SECS);
            }
            if call < 2 {
                Ok(ok_response(503))
            } else {
                Ok(ok_response(200))
            }
        });

        let dispatcher = WebhookDispatcher::new(
            Arc::new(poster),
            config_with(Some("https://ex.example/w"), None).await,
            None,
            "gw".to_string(),
        );

        let started = std::time::Instant::now();
        let outcome = dispatcher.forward(&json!({}), &meta(None)).await.unwrap();
        assert_eq!(outcome.attempt, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // backoff slept 1s then 2s between attempts
        assert!(started.elapsed() >= Duration::from_millis(2900));

        let health = dispatcher.health();
        let entry = &health.destinations["https://ex.example/w"];
        assert_eq!(entry.consecutive_failures, 0);
        assert!(entry.last_success.is_some());
    }

    #[tokio::test]
    async fn four_xx_is_terminal_without_retry() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(404)));

        let dispatcher = WebhookDispatcher::new(
            Arc::new(poster),
            config_with(Some("https://ex.example/w"), None).await,
            None,
            "gw".to_string(),
        );

        let err = dispatcher.forward(&json!({}), &meta(None)).await.unwrap_err();
        assert!(matches!(err, ForwardError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn exhausted_retries_track_consecutive_failures() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .times(6)
            .returning(|_, _, _, _| Err(PostError::Network("connection refused".to_string())));

        let dispatcher = WebhookDispatcher::new(
            Arc::new(poster),
            config_with(Some("https://ex.example/w"), None).await,
            None,
            "gw".to_string(),
        );

        for expected in 1..=2 {
            let err = dispatcher.forward(&json!({}), &meta(None)).await.unwrap_err();
            match err {
                ForwardError::Exhausted {
                    attempts,
                    consecutive_failures,
                    ..
                } => {
                    assert_eq!(attempts, 3);
                    assert_eq!(consecutive_failures, expected);
                }
                other => panic!("unexpected error: {}", other),
            }
        }

        let health = dispatcher.health();
        let entry = &health.destinations["https://ex.example/w"];
        assert_eq!(entry.consecutive_failures, 2);
        assert!(entry.last_error.is_some());
    }

    #[tokio::test]
    async fn delivery_headers_carry_routing_facts() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|_, headers, _, _| {
                let get = |name: &str| {
                    headers
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.as_str())
                };
                get(consts::HEADER_SOURCE_ID) == Some("972500000002")
                    && get(consts::HEADER_SOURCE_TYPE) == Some("contact")
                    && get(consts::HEADER_ENTITY_TYPE) == Some("VIP")
                    && get(consts::HEADER_EVENT_TYPE) == Some("MESSAGES_UPSERT")
                    && get(consts::HEADER_FILTER_SOURCE) == Some("gw")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let dispatcher = WebhookDispatcher::new(
            Arc::new(poster),
            config_with(Some("https://ex.example/w"), None).await,
            None,
            "gw".to_string(),
        );

        dispatcher
            .forward(&json!({}), &meta(Some("VIP")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn secondary_failure_never_blocks_primary() {
        let mut poster = MockHttpPoster::new();
        // secondary may or may not land before the assertion; primary must
        // succeed exactly once regardless
        poster
            .expect_post_json()
            .withf(|url, _, _, _| url == "https://ex.example/second")
            .times(0..=1)
            .returning(|_, _, _, _| Err(PostError::Timeout));
        poster
            .expect_post_json()
            .withf(|url, _, _, _| url == "https://ex.example/w")
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let dispatcher = WebhookDispatcher::new(
            Arc::new(poster),
            config_with(Some("https://ex.example/w"), None).await,
            Some("https://ex.example/second".to_string()),
            "gw".to_string(),
        );

        let outcome = dispatcher.forward(&json!({}), &meta(None)).await.unwrap();
        assert_eq!(outcome.attempt, 1);
        assert_eq!(outcome.destination, "https://ex.example/w");
    }

    #[tokio::test]
    async fn test_endpoint_reports_failure_without_retry() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|_, _, body, timeout| {
                body["test"] == json!(true) && *timeout == consts::TEST_WEBHOOK_TIMEOUT_SECS
            })
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(500)));

        let dispatcher = WebhookDispatcher::new(
            Arc::new(poster),
            config_with(Some("https://ex.example/w"), None).await,
            None,
            "gw".to_string(),
        );

        let outcome = dispatcher.test(None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status, Some(500));
    }
}
