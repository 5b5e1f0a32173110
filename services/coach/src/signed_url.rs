//! Client for the signed-URL issuer.
//!
//! Connection URLs are time-limited and single-use, so a fresh one is fetched
//! before every open.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum SignedUrlError {
    #[error("signed URL request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("signed URL issuer answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("signed URL issuer returned an empty URL")]
    Empty,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignedUrlIssuer: Send + Sync {
    async fn signed_url(&self, agent_id: &str) -> anyhow::Result<String>;
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// Fetches signed URLs over HTTP with the account's API key.
#[derive(Clone)]
pub struct HttpSignedUrlIssuer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSignedUrlIssuer {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn fetch(&self, agent_id: &str) -> Result<String, SignedUrlError> {
        let url = format!("{}/v1/convai/conversation/get_signed_url", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("agent_id", agent_id)])
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Signed URL request rejected");
            return Err(SignedUrlError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let SignedUrlResponse { signed_url } = response.json().await?;
        if signed_url.is_empty() {
            return Err(SignedUrlError::Empty);
        }
        debug!(agent_id, "Fetched signed URL");
        Ok(signed_url)
    }
}

#[async_trait]
impl SignedUrlIssuer for HttpSignedUrlIssuer {
    async fn signed_url(&self, agent_id: &str) -> anyhow::Result<String> {
        self.fetch(agent_id)
            .await
            .with_context(|| format!("Failed to get signed URL for agent {agent_id}"))
    }
}

/// Issuer that always hands out the same URL. Useful against local servers
/// that accept unsigned connections.
pub struct StaticUrl(pub String);

#[async_trait]
impl SignedUrlIssuer for StaticUrl {
    async fn signed_url(&self, _agent_id: &str) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}
