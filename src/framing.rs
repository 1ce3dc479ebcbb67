//! Line framing shared by the relay and the client.
//!
//! Upstream frames look like `data: {"type":"answer","content":"..."}` and are
//! separated by newlines (usually blank-line separated, SSE style). The relay
//! re-emits each event as one bare JSON object per line. Both sides read
//! bytes whose chunk boundaries can fall anywhere, including inside a
//! multi-byte character, so decoding and line splitting keep state across
//! chunks.

use bytes::Bytes;
use thiserror::Error;

use crate::models::ChatEvent;

/// Prefix marking a data line in the upstream stream.
pub const UPSTREAM_EVENT_MARKER: &str = "data: ";

/// A single line that could not be turned into a [`ChatEvent`].
/// Always recovered locally by skipping the line.
#[derive(Debug, Error)]
#[error("unparseable frame {line:?}: {source}")]
pub struct FrameParseError {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Resumable UTF-8 decoder. Bytes of a character split across chunks are held
/// back until the rest arrives; invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let end = start + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..end]));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = end + len;
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            start = end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        text
    }

    /// Flushes at end of stream. Dangling bytes decode to U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }
}

/// Longest line either side buffers before giving up on the stream.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Buffered text grew past the line-length cap without a terminator.
#[derive(Debug, Error)]
#[error("line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Turns an arbitrarily chunked byte stream into complete lines.
///
/// Text after the last terminator of a chunk is kept as a prefix of the next
/// line. Lines end at `\n`, `\r\n` or a lone `\r`; terminators are not
/// included in returned lines.
#[derive(Debug)]
pub struct LineDecoder {
    utf8: Utf8Decoder,
    partial: String,
    after_cr: bool,
    max_length: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            utf8: Utf8Decoder::new(),
            partial: String::new(),
            after_cr: false,
            max_length,
        }
    }

    /// Decodes `chunk` and returns the lines it completes. Only the new text
    /// is scanned for terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, LineTooLong> {
        let text = self.utf8.decode(chunk);
        let mut rest = text.as_str();
        if rest.is_empty() {
            return Ok(Vec::new());
        }
        // `\r` ended the previous chunk; a leading `\n` belongs to it.
        if std::mem::take(&mut self.after_cr) {
            rest = rest.strip_prefix('\n').unwrap_or(rest);
        }

        let mut lines = Vec::new();
        while let Some(pos) = rest.find(|c: char| c == '\r' || c == '\n') {
            self.partial.push_str(&rest[..pos]);
            self.check_length()?;
            lines.push(std::mem::take(&mut self.partial));

            let terminator = rest.as_bytes()[pos];
            rest = &rest[pos + 1..];
            if terminator == b'\r' {
                match rest.strip_prefix('\n') {
                    Some(after) => rest = after,
                    None => self.after_cr = rest.is_empty(),
                }
            }
        }
        self.partial.push_str(rest);
        self.check_length()?;
        Ok(lines)
    }

    /// Returns the unterminated tail, if any, once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let tail = self.utf8.finish();
        self.partial.push_str(&tail);
        self.after_cr = false;
        let line = std::mem::take(&mut self.partial);
        (!line.is_empty()).then_some(line)
    }

    fn check_length(&mut self) -> Result<(), LineTooLong> {
        if self.partial.len() > self.max_length {
            self.partial.clear();
            return Err(LineTooLong { limit: self.max_length });
        }
        Ok(())
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// Parses one upstream line.
///
/// `Ok(None)` for lines that carry no event (blank lines, SSE comments,
/// `event:` fields); `Err` for a data line whose payload is not a valid event.
pub fn parse_upstream_line(line: &str) -> Result<Option<ChatEvent>, FrameParseError> {
    let Some(payload) = line.strip_prefix(UPSTREAM_EVENT_MARKER) else {
        return Ok(None);
    };
    serde_json::from_str(payload)
        .map(Some)
        .map_err(|source| FrameParseError { line: line.to_string(), source })
}

/// Parses one line of the relay's output stream.
pub fn parse_event_line(line: &str) -> Result<ChatEvent, FrameParseError> {
    serde_json::from_str(line).map_err(|source| FrameParseError { line: line.to_string(), source })
}

/// Serialises an event as a newline-terminated JSON line.
pub fn encode_event(event: &ChatEvent) -> Bytes {
    let mut line = serde_json::to_vec(event).unwrap_or_default();
    line.push(b'\n');
    Bytes::from(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;

    #[test]
    fn decoder_resumes_inside_multibyte_character() {
        let bytes = "思考".as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut text = String::new();
        for byte in bytes {
            text.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        text.push_str(&decoder.finish());
        assert_eq!(text, "思考");
    }

    #[test]
    fn decoder_replaces_invalid_and_dangling_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(&"é".as_bytes()[..1]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn lines_split_across_chunks_are_joined() {
        let mut lines = LineDecoder::new();
        assert!(lines.push(b"{\"type\":\"ans").unwrap().is_empty());
        assert_eq!(lines.push(b"wer\"}\r\nnext").unwrap(), vec!["{\"type\":\"answer\"}"]);
        assert_eq!(lines.push(b"\n\nlast").unwrap(), vec!["next", ""]);
        assert_eq!(lines.finish().as_deref(), Some("last"));
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn lone_carriage_return_ends_a_line() {
        let mut lines = LineDecoder::new();
        assert_eq!(lines.push(b"a\rb\r").unwrap(), vec!["a", "b"]);
        // CRLF split across chunks is a single terminator.
        assert_eq!(lines.push(b"\nc\r\r").unwrap(), vec!["c", ""]);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn unterminated_text_is_capped() {
        let mut lines = LineDecoder::with_max_length(8);
        assert!(lines.push(b"12345").unwrap().is_empty());
        let err = lines.push(b"6789").unwrap_err();
        assert_eq!(err.limit, 8);

        let mut lines = LineDecoder::with_max_length(8);
        assert!(lines.push(b"0123456789\nok\n").is_err());
        let mut lines = LineDecoder::with_max_length(8);
        assert_eq!(lines.push(b"01234567\nok\n").unwrap(), vec!["01234567", "ok"]);
    }

    #[test]
    fn upstream_lines_without_marker_are_ignored() {
        assert!(parse_upstream_line("").unwrap().is_none());
        assert!(parse_upstream_line(": keep-alive").unwrap().is_none());
        assert!(parse_upstream_line("event: message").unwrap().is_none());
    }

    #[test]
    fn upstream_data_line_parses_or_fails() {
        let event = parse_upstream_line(r#"data: {"content":"你好","type":"answer"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Answer);
        assert_eq!(event.content, "你好");

        let err = parse_upstream_line("data: {broken").unwrap_err();
        assert_eq!(err.line, "data: {broken");
    }

    #[test]
    fn encoded_event_is_one_terminated_json_line() {
        let encoded = encode_event(&ChatEvent::reasoning("a\nb"));
        let text = std::str::from_utf8(&encoded).unwrap();
        assert_eq!(text.matches('\n').count(), 1);
        assert!(text.ends_with('\n'));
        assert_eq!(parse_event_line(text.trim_end()).unwrap(), ChatEvent::reasoning("a\nb"));
    }
}
