pub mod alerts;
pub mod dispatcher;
pub mod mention;

use async_trait::async_trait;
use derive_more::{Display, Error};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Response of an outbound POST that reached the destination.
#[derive(Debug, Clone)]
pub struct PostResponse {
    pub status: u16,
    pub body: String,
}

/// Failure before any HTTP response was received.
#[derive(Debug, Display, Error, Clone)]
pub enum PostError {
    #[display("request timed out")]
    Timeout,
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
}

/// Seam over the HTTP client so delivery logic is testable without a
/// network. The real implementation wraps `reqwest`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpPoster: Send + Sync {
    async fn post_json(
        &self,
        url: String,
        headers: Vec<(String, String)>,
        body: Value,
        timeout_secs: u64,
    ) -> Result<PostResponse, PostError>;
}

pub struct ReqwestPoster {
    client: reqwest::Client,
}

impl ReqwestPoster {
    pub fn new() -> Self {
        Self {
            client: crate::utils::REQUEST_CLIENT.clone(),
        }
    }
}

impl Default for ReqwestPoster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpPoster for ReqwestPoster {
    async fn post_json(
        &self,
        url: String,
        headers: Vec<(String, String)>,
        body: Value,
        timeout_secs: u64,
    ) -> Result<PostResponse, PostError> {
        let mut request = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(timeout_secs))
            .json(&body);

        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PostError::Timeout
            } else {
                PostError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        Ok(PostResponse { status, body })
    }
}

pub type ImplHttpPoster = Arc<dyn HttpPoster>;
