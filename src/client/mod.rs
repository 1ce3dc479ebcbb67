//! Client entry point: one [`ChatSession`] per signed-in user.
//!
//! The session runs an exchange end to end: it posts the prompt to the relay,
//! feeds the response body through a [`StreamConsumer`], and commits the
//! finished turn through a [`ConversationRecorder`]. Everything it needs is
//! handed in at construction.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::consumer::{AccumulatedResponse, ResponseSink, StreamConsumer, StreamFailure};
use crate::errors::AppError;
use crate::models::{ChatRequest, ConversationTurn, Credential};
use crate::persistence::{CommitReport, ConversationRecorder, HttpMessageStore, MessageStore};

/// A finished exchange and what was saved of it.
#[derive(Debug)]
pub struct ExchangeOutcome {
    pub response: AccumulatedResponse,
    pub persistence: CommitReport,
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The relay refused or could not start the exchange; nothing streamed.
    #[error("{0}")]
    Request(AppError),

    /// The stream started and then failed or was cancelled.
    #[error(transparent)]
    Stream(StreamFailure),
}

impl ExchangeError {
    pub fn error(&self) -> &AppError {
        match self {
            ExchangeError::Request(err) => err,
            ExchangeError::Stream(failure) => &failure.error,
        }
    }

    /// Text rendered before the failure, if the stream had started.
    pub fn partial(&self) -> Option<&AccumulatedResponse> {
        match self {
            ExchangeError::Request(_) => None,
            ExchangeError::Stream(failure) => Some(&failure.partial),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct ChatSession<S> {
    http: reqwest::Client,
    config: SessionConfig,
    credential: Credential,
    recorder: ConversationRecorder<S>,
    current: Mutex<Option<CancellationToken>>,
}

impl ChatSession<HttpMessageStore> {
    /// Session that stores history through the backend message API.
    pub fn connect(config: SessionConfig, credential: Credential) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Unexpected(format!("Failed to build HTTP client: {e}")))?;
        let store = HttpMessageStore::new(
            http.clone(),
            &config.api_base_url,
            credential.clone(),
            config.timeout,
        );
        Ok(Self::with_store(http, config, credential, store))
    }
}

impl<S: MessageStore> ChatSession<S> {
    pub fn with_store(
        http: reqwest::Client,
        config: SessionConfig,
        credential: Credential,
        store: S,
    ) -> Self {
        Self {
            http,
            config,
            credential,
            recorder: ConversationRecorder::new(store),
            current: Mutex::new(None),
        }
    }

    pub fn recorder(&self) -> &ConversationRecorder<S> {
        &self.recorder
    }

    /// Abandons the in-flight exchange, if any. Its sink gets no more calls.
    pub async fn reset(&self) {
        if let Some(token) = self.current.lock().await.take() {
            info!("Resetting chat session, cancelling in-flight exchange");
            token.cancel();
        }
    }

    /// Runs one exchange. Starting it cancels whatever exchange was running.
    ///
    /// History is committed only after a clean end of stream; a persistence
    /// failure is reported in the outcome, not as an error.
    pub async fn send<K>(
        &self,
        request: &ChatRequest,
        sink: &mut K,
    ) -> Result<ExchangeOutcome, ExchangeError>
    where
        K: ResponseSink + ?Sized,
    {
        let cancel = self.begin().await;
        info!("Exchange started for topic {}", request.topic_id());

        let response = self.open(request, &cancel).await.map_err(ExchangeError::Request)?;

        let consumer = StreamConsumer::new(cancel)
            .with_parse_failure_limit(self.config.parse_failure_limit);
        let response = consumer
            .consume(response.bytes_stream(), sink)
            .await
            .map_err(|failure| {
                if !failure.error.is_cancelled() {
                    warn!("Exchange for topic {} failed: {}", request.topic_id(), failure.error);
                }
                ExchangeError::Stream(failure)
            })?;
        info!(
            "Exchange completed for topic {} ({} answer chars)",
            request.topic_id(),
            response.answer_text().chars().count()
        );

        let turn = ConversationTurn::new(request.topic_id(), request.prompt(), response.answer_text());
        let persistence = self.recorder.commit(&turn).await;
        for warning in &persistence.warnings {
            warn!("Conversation history may be incomplete: {warning}");
        }

        Ok(ExchangeOutcome { response, persistence })
    }

    async fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.current.lock().await.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    async fn open(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, AppError> {
        let url = &self.config.completion_url;
        let send = self
            .http
            .post(url)
            .bearer_auth(self.credential.token())
            .json(request)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            response = tokio::time::timeout(self.config.timeout, send) => response,
        };
        let response = response
            .map_err(|_| AppError::UpstreamTimeout {
                after_ms: self.config.timeout.as_millis() as u64,
            })?
            .map_err(|e| AppError::UpstreamUnavailable { host: url.clone(), source: e })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            body = tokio::time::timeout(self.config.timeout, response.json::<ErrorBody>()) => body,
        };
        let message = match body {
            Ok(Ok(body)) => body.message,
            _ => format!("relay responded with {status}"),
        };
        Err(match status {
            StatusCode::UNAUTHORIZED => AppError::CredentialRejected { service: "chat relay".to_string() },
            StatusCode::BAD_REQUEST => AppError::RequestRejected { status: status.as_u16(), message },
            _ => AppError::UpstreamStatus { status: status.as_u16(), body: message },
        })
    }
}
