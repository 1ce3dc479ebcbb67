use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::errors::AppError;
use crate::framing::{encode_event, parse_upstream_line, LineDecoder};
use crate::models::{ChatRequest, Credential};
use crate::upstream::UpstreamChatClient;

/// Stateless relay between the caller and the upstream chat service.
/// Each call is independent; nothing is kept between requests.
#[derive(Clone)]
pub struct CompletionRelay {
    upstream: UpstreamChatClient,
}

impl CompletionRelay {
    pub fn new(upstream: UpstreamChatClient) -> Self {
        Self { upstream }
    }

    /// Opens the upstream stream and returns the re-framed body.
    ///
    /// Errors returned here happen before any byte is relayed; errors inside
    /// the returned stream abort the response after it has started.
    pub async fn relay(
        &self,
        request: &ChatRequest,
        credential: &Credential,
    ) -> Result<impl Stream<Item = Result<Bytes, AppError>> + Send + 'static, AppError> {
        let upstream = self.upstream.open_stream(request, credential).await?;
        info!("Relaying chat stream for topic {}", request.topic_id());
        Ok(transcode(upstream))
    }
}

/// Converts upstream `data: {...}` frames into newline-delimited events.
///
/// Blank and marker-less lines are ignored, malformed frames are dropped, and
/// an upstream read error ends the output with a terminal error item.
pub fn transcode<S, E>(upstream: S) -> impl Stream<Item = Result<Bytes, AppError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut lines = LineDecoder::new();
        let mut relayed = 0usize;

        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!("Upstream stream failed after {relayed} events: {e}");
                    yield Err(AppError::StreamInterrupted { message: e.to_string() });
                    return;
                }
            };
            let complete = match lines.push(&chunk) {
                Ok(complete) => complete,
                Err(e) => {
                    error!("Upstream stream abandoned after {relayed} events: {e}");
                    yield Err(AppError::FrameTooLong { limit: e.limit });
                    return;
                }
            };
            for line in complete {
                if let Some(frame) = transcode_line(&line) {
                    relayed += 1;
                    yield Ok(frame);
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(frame) = transcode_line(&line) {
                relayed += 1;
                yield Ok(frame);
            }
        }
        debug!("Upstream stream finished, {relayed} events relayed");
    }
}

fn transcode_line(line: &str) -> Option<Bytes> {
    match parse_upstream_line(line) {
        Ok(Some(event)) => Some(encode_event(&event)),
        Ok(None) => None,
        Err(e) => {
            warn!("Dropping upstream frame: {e}");
            None
        }
    }
}
