// HTTP delivery through a per-platform publishing endpoint

use super::{PlatformTransport, RemotePost};
use crate::credentials::Credential;
use crate::errors::TransportError;
use crate::transform::PlatformPayload;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Longest error body kept in a rejection message
const MAX_ERROR_BODY: usize = 512;

/// Posts the payload as JSON with the credential as a bearer token
///
/// The endpoint answers 2xx with `{"remote_id": ..., "permalink": ...}`.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: Client,
    endpoint: String,
}

impl WebhookTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[async_trait]
impl PlatformTransport for WebhookTransport {
    #[instrument(skip(self, payload, credential), fields(
        content_id = %payload.content_id,
        platform = %payload.platform,
        endpoint = %self.endpoint
    ))]
    async fn publish(
        &self,
        payload: &PlatformPayload,
        credential: &Credential,
    ) -> Result<RemotePost, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&credential.token)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        debug!(status = status.as_u16(), "Publishing endpoint responded");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Unauthorized(truncate_body(&body)));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_seconds = retry_after_seconds(&response);
                warn!(?retry_after_seconds, "Rate limited by platform");
                return Err(TransportError::RateLimited {
                    retry_after_seconds,
                });
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Rejected {
                    status: s.as_u16(),
                    message: truncate_body(&body),
                });
            }
            _ => {}
        }

        let post: RemotePost = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        if post.remote_id.trim().is_empty() {
            return Err(TransportError::InvalidResponse(
                "Response has an empty remote_id".to_string(),
            ));
        }
        Ok(post)
    }
}

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");
        let long = "x".repeat(MAX_ERROR_BODY + 10);
        let cut = truncate_body(&long);
        assert_eq!(cut.len(), MAX_ERROR_BODY + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_remote_post_tolerates_missing_permalink() {
        let post: RemotePost = serde_json::from_str(r#"{"remote_id":"7"}"#).unwrap();
        assert_eq!(post.permalink, "");
    }
}
