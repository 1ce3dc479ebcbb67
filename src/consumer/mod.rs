//! Client side of the chat stream.
//!
//! [`StreamConsumer`] reads the relay's newline-delimited events one chunk at
//! a time, folds them into an [`AccumulatedResponse`] and reports every step
//! to a [`ResponseSink`].

pub mod reducer;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::AppError;
use crate::framing::{parse_event_line, LineDecoder, DEFAULT_MAX_LINE_LENGTH};

pub use reducer::AccumulatedResponse;

/// Consecutive unparseable lines tolerated before a stream counts as malformed.
pub const DEFAULT_PARSE_FAILURE_LIMIT: usize = 64;

/// UI callbacks driven by the consumer.
pub trait ResponseSink {
    /// Called after every applied event, and once more after the stream ends
    /// with `is_typing() == false`.
    fn on_update(&mut self, snapshot: &AccumulatedResponse);

    /// Called once, after the final update, when the stream ended cleanly.
    fn on_complete(&mut self, response: &AccumulatedResponse);
}

/// Adapts a pair of closures to [`ResponseSink`].
pub struct CallbackSink<U, C> {
    on_update: U,
    on_complete: C,
}

impl<U, C> CallbackSink<U, C>
where
    U: FnMut(&AccumulatedResponse),
    C: FnMut(&AccumulatedResponse),
{
    pub fn new(on_update: U, on_complete: C) -> Self {
        Self { on_update, on_complete }
    }
}

impl<U, C> ResponseSink for CallbackSink<U, C>
where
    U: FnMut(&AccumulatedResponse),
    C: FnMut(&AccumulatedResponse),
{
    fn on_update(&mut self, snapshot: &AccumulatedResponse) {
        (self.on_update)(snapshot)
    }

    fn on_complete(&mut self, response: &AccumulatedResponse) {
        (self.on_complete)(response)
    }
}

/// Terminal failure of a stream. `partial` holds everything applied before
/// the failure, already marked as no longer typing; keeping or discarding it
/// is the caller's decision.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct StreamFailure {
    #[source]
    pub error: AppError,
    pub partial: AccumulatedResponse,
}

impl StreamFailure {
    fn new(error: AppError, mut partial: AccumulatedResponse) -> Self {
        partial.finish();
        Self { error, partial }
    }
}

pub struct StreamConsumer {
    cancel: CancellationToken,
    parse_failure_limit: Option<usize>,
    max_line_length: usize,
}

impl StreamConsumer {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            parse_failure_limit: Some(DEFAULT_PARSE_FAILURE_LIMIT),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Longer unterminated text ends the stream as `FrameTooLong`.
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// `None` tolerates any number of consecutive malformed lines.
    pub fn with_parse_failure_limit(mut self, limit: Option<usize>) -> Self {
        self.parse_failure_limit = limit;
        self
    }

    /// Reads `stream` to the end, one chunk at a time.
    ///
    /// Cancellation is checked before every read and before every sink call;
    /// once the token fires no further callbacks are made.
    pub async fn consume<S, E, K>(
        &self,
        stream: S,
        sink: &mut K,
    ) -> Result<AccumulatedResponse, StreamFailure>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
        K: ResponseSink + ?Sized,
    {
        let mut stream = std::pin::pin!(stream);
        let mut state = AccumulatedResponse::new();
        let mut lines = LineDecoder::with_max_length(self.max_line_length);
        let mut failures = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Exchange {} cancelled while reading", state.id());
                    return Err(StreamFailure::new(AppError::Cancelled, state));
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    let complete = match lines.push(&chunk) {
                        Ok(complete) => complete,
                        Err(e) => {
                            warn!("Abandoning stream {}: {e}", state.id());
                            let err = AppError::FrameTooLong { limit: e.limit };
                            return Err(StreamFailure::new(err, state));
                        }
                    };
                    for line in complete {
                        if let Err(err) = self.apply_line(&line, &mut state, &mut failures, sink) {
                            return Err(StreamFailure::new(err, state));
                        }
                    }
                }
                Some(Err(e)) => {
                    error!("Chat stream failed for {}: {e}", state.id());
                    let err = AppError::StreamInterrupted { message: e.to_string() };
                    return Err(StreamFailure::new(err, state));
                }
                None => break,
            }
        }

        if let Some(line) = lines.finish() {
            if let Err(err) = self.apply_line(&line, &mut state, &mut failures, sink) {
                return Err(StreamFailure::new(err, state));
            }
        }
        if self.cancel.is_cancelled() {
            return Err(StreamFailure::new(AppError::Cancelled, state));
        }

        state.finish();
        info!(
            "Exchange {} complete: {} reasoning chars, {} answer chars",
            state.id(),
            state.reasoning_text().chars().count(),
            state.answer_text().chars().count()
        );
        sink.on_update(&state);
        sink.on_complete(&state);
        Ok(state)
    }

    fn apply_line<K>(
        &self,
        line: &str,
        state: &mut AccumulatedResponse,
        failures: &mut usize,
        sink: &mut K,
    ) -> Result<(), AppError>
    where
        K: ResponseSink + ?Sized,
    {
        if line.trim().is_empty() {
            return Ok(());
        }
        match parse_event_line(line) {
            Ok(event) => {
                *failures = 0;
                if self.cancel.is_cancelled() {
                    return Err(AppError::Cancelled);
                }
                debug!("Applying {} event to {}", event.kind, state.id());
                state.apply(&event);
                sink.on_update(state);
            }
            Err(e) => {
                *failures += 1;
                warn!("Skipping event line: {e}");
                if let Some(limit) = self.parse_failure_limit {
                    if *failures > limit {
                        return Err(AppError::MalformedStream { consecutive_failures: *failures });
                    }
                }
            }
        }
        Ok(())
    }
}
