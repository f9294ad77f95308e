//! Snapshot fetching over HTTP via reqwest.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::PipescopeConfig;
use crate::error::FetchError;
use crate::snapshot::SnapshotSource;
use crate::types::SnapshotPayload;

/// `GET <url>` returning the dashboard snapshot JSON.
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            token: None,
            timeout,
        })
    }

    pub fn from_config(config: &PipescopeConfig) -> Result<Self, FetchError> {
        let source = Self::new(config.snapshot.url.clone(), config.fetch_timeout())?;
        Ok(match config.auth.resolve_token() {
            Some(token) => source.with_token(token),
            None => source,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_send_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Request {
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<SnapshotPayload, FetchError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| {
            tracing::debug!(url = %self.url, error = %e, "Snapshot request failed");
            self.map_send_error(e)
        })?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, status = %status, "Snapshot endpoint returned an error status");
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(|e| self.map_send_error(e))?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Parse {
            message: e.to_string(),
        })
    }
}
