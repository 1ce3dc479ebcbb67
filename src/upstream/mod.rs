use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::{ChatRequest, Credential};

/// Client for the upstream chat service.
///
/// One call opens exactly one streamed request. The timeout bounds connecting
/// and waiting for response headers only; the body may stream for as long as
/// the model keeps generating.
#[derive(Clone)]
pub struct UpstreamChatClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl UpstreamChatClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AppError::Unexpected(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn stream_url(&self, request: &ChatRequest) -> String {
        format!("{}/topics/{}/chat/stream", self.base_url, request.topic_id())
    }

    /// Sends the prompt upstream and returns the raw body stream once the
    /// service has answered with a success status.
    pub async fn open_stream(
        &self,
        request: &ChatRequest,
        credential: &Credential,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static, AppError> {
        let url = self.stream_url(request);
        debug!("Opening upstream stream for topic {}", request.topic_id());

        let send = self
            .http
            .post(&url)
            .bearer_auth(credential.token())
            .json(&json!({ "message": request.prompt() }))
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| {
                error!("Upstream did not answer within {:?} ({url})", self.timeout);
                AppError::UpstreamTimeout { after_ms: self.timeout.as_millis() as u64 }
            })?
            .map_err(|e| {
                error!("Upstream request to {url} failed: {e}");
                AppError::UpstreamUnavailable { host: self.base_url.clone(), source: e }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::CredentialRejected { service: "chat service".to_string() });
        }
        if !status.is_success() {
            // The error body gets the same bound as the headers did.
            let body = match tokio::time::timeout(self.timeout, response.text()).await {
                Ok(Ok(body)) => body,
                _ => format!("no readable error body within {:?}", self.timeout),
            };
            error!("Upstream responded with {status}: {body}");
            return Err(AppError::UpstreamStatus { status: status.as_u16(), body });
        }

        Ok(response.bytes_stream())
    }
}
