use std::time::Duration;

use anyhow::Context;

use crate::consumer::DEFAULT_PARSE_FAILURE_LIMIT;

/// Default bound on connecting and waiting for response headers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(15_000);

const DEFAULT_UPSTREAM_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_PORT: u16 = 3000;

/// Relay server configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let upstream_base_url = lookup("UPSTREAM_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string());

        let upstream_timeout = match lookup("UPSTREAM_TIMEOUT_MS") {
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .with_context(|| format!("UPSTREAM_TIMEOUT_MS is not a number: {ms:?}"))?,
            ),
            None => DEFAULT_TIMEOUT,
        };

        let port = match lookup("PORT") {
            Some(port) => port
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port: {port:?}"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self { upstream_base_url, upstream_timeout, port })
    }
}

/// Settings for a client-side [`ChatSession`](crate::client::ChatSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Full URL of the relay endpoint, e.g. `http://localhost:3000/api/completion`.
    pub completion_url: String,
    /// Base URL of the backend API that stores messages.
    pub api_base_url: String,
    pub timeout: Duration,
    pub parse_failure_limit: Option<usize>,
}

impl SessionConfig {
    pub fn new(completion_url: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            completion_url: completion_url.into(),
            api_base_url: api_base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            parse_failure_limit: Some(DEFAULT_PARSE_FAILURE_LIMIT),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
