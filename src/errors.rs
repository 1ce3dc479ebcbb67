use thiserror::Error;

/// Top-level error for the chat pipeline.
/// Every variant carries a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Authentication errors ────────────────────────────────────────────────
    #[error("Missing bearer credential, please sign in")]
    MissingCredential,

    #[error("Malformed authorization header")]
    MalformedCredential,

    #[error("Credential rejected by {service}")]
    CredentialRejected { service: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' is required")]
    MissingField { field_name: String },

    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    #[error("Invalid request body: {message}")]
    InvalidBody { message: String },

    #[error("Request rejected ({status}): {message}")]
    RequestRejected { status: u16, message: String },

    // ── Upstream transport errors ────────────────────────────────────────────
    #[error("Chat service unavailable at {host}")]
    UpstreamUnavailable {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Chat service did not respond within {after_ms} ms")]
    UpstreamTimeout { after_ms: u64 },

    #[error("Chat service responded with status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Stream interrupted: {message}")]
    StreamInterrupted { message: String },

    #[error("Stream is malformed: {consecutive_failures} consecutive unparseable lines")]
    MalformedStream { consecutive_failures: usize },

    #[error("Stream line exceeds {limit} bytes without a line break")]
    FrameTooLong { limit: usize },

    #[error("Exchange cancelled")]
    Cancelled,

    // ── Persistence errors ───────────────────────────────────────────────────
    #[error("Message store unavailable at {host}")]
    StoreUnavailable {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Message store responded with status {status}: {body}")]
    StoreStatus { status: u16, body: String },

    /// The store acknowledged the write but its reply could not be read.
    #[error("Message store returned an unreadable record (status {status}): {message}")]
    StoreResponseInvalid { status: u16, message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn missing(field_name: impl Into<String>) -> Self {
        AppError::MissingField { field_name: field_name.into() }
    }

    pub fn empty(field_name: impl Into<String>) -> Self {
        AppError::EmptyField { field_name: field_name.into() }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            AppError::MissingCredential
                | AppError::MalformedCredential
                | AppError::CredentialRejected { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::MissingField { .. }
                | AppError::EmptyField { .. }
                | AppError::FieldTooLong { .. }
                | AppError::InvalidBody { .. }
                | AppError::RequestRejected { .. }
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::UpstreamUnavailable { .. }
                | AppError::UpstreamTimeout { .. }
                | AppError::UpstreamStatus { .. }
                | AppError::StreamInterrupted { .. }
                | AppError::MalformedStream { .. }
                | AppError::FrameTooLong { .. }
        )
    }

    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AppError::StoreUnavailable { .. }
                | AppError::StoreStatus { .. }
                | AppError::StoreResponseInvalid { .. }
        )
    }

    /// A persistence failure after which the record exists anyway.
    pub fn was_stored(&self) -> bool {
        matches!(self, AppError::StoreResponseInvalid { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
