use serde::Serialize;
use tracing::warn;

use crate::models::{ChatEvent, EventKind};

/// Running state of one in-flight exchange.
///
/// Both text fields only ever grow while `is_typing` is true. Once
/// [`finish`](Self::finish) has been called the value is frozen and further
/// events are refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccumulatedResponse {
    id: String,
    reasoning_text: String,
    answer_text: String,
    is_typing: bool,
}

impl AccumulatedResponse {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reasoning_text: String::new(),
            answer_text: String::new(),
            is_typing: true,
        }
    }

    /// Appends the event's content to the matching channel.
    /// Returns `false` if the response is already finished.
    pub fn apply(&mut self, event: &ChatEvent) -> bool {
        if !self.is_typing {
            warn!("Ignoring {} event for finished response {}", event.kind, self.id);
            return false;
        }
        match event.kind {
            EventKind::Reasoning => self.reasoning_text.push_str(&event.content),
            EventKind::Answer => self.answer_text.push_str(&event.content),
        }
        true
    }

    pub fn finish(&mut self) {
        self.is_typing = false;
    }

    /// Opaque display key for the UI.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn reasoning_text(&self) -> &str {
        &self.reasoning_text
    }

    pub fn answer_text(&self) -> &str {
        &self.answer_text
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }
}

impl Default for AccumulatedResponse {
    fn default() -> Self {
        Self::new()
    }
}
