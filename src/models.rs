use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Longest prompt accepted by the relay and the client session.
pub const MAX_PROMPT_LENGTH: usize = 8000;

/// Identifier of a conversation topic owned by the backend.
pub type TopicId = i64;

// ── Credential ────────────────────────────────────────────────────────────────

/// Bearer credential of the signed-in user.
///
/// Passed explicitly into every component that talks to the backend; nothing
/// in the pipeline looks a token up from ambient storage.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self, AppError> {
        let token = token.into();
        if token.trim().is_empty() || token.chars().any(char::is_whitespace) {
            return Err(AppError::MalformedCredential);
        }
        Ok(Self(token))
    }

    /// Parses the value of an `Authorization` header (`Bearer <token>`).
    pub fn from_authorization(header: Option<&str>) -> Result<Self, AppError> {
        let header = header.ok_or(AppError::MissingCredential)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::MalformedCredential)?;
        Self::new(token)
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ── Chat request ──────────────────────────────────────────────────────────────

/// One user submission. Validated on construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    #[serde(rename = "topicId")]
    topic_id: TopicId,
    prompt: String,
}

impl ChatRequest {
    pub fn new(topic_id: TopicId, prompt: impl Into<String>) -> Result<Self, AppError> {
        if topic_id <= 0 {
            return Err(AppError::InvalidBody {
                message: format!("topicId must be a positive integer, got {topic_id}"),
            });
        }
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(AppError::empty("prompt"));
        }
        let length = prompt.chars().count();
        if length > MAX_PROMPT_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "prompt".to_string(),
                max_length: MAX_PROMPT_LENGTH,
                actual_length: length,
            });
        }
        Ok(Self { topic_id, prompt })
    }

    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// Raw JSON body of `POST /api/completion`, before validation.
#[derive(Debug, Default, Deserialize)]
pub struct CompletionBody {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, rename = "topicId")]
    pub topic_id: Option<serde_json::Value>,
}

impl CompletionBody {
    /// Validates the body in a fixed order: `topicId` first, then `prompt`.
    pub fn into_request(self) -> Result<ChatRequest, AppError> {
        let topic_id = match self.topic_id {
            None | Some(serde_json::Value::Null) => return Err(AppError::missing("topicId")),
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<TopicId>().ok(),
            Some(_) => None,
        }
        .ok_or_else(|| AppError::InvalidBody {
            message: "topicId must be an integer".to_string(),
        })?;

        let prompt = self.prompt.ok_or_else(|| AppError::missing("prompt"))?;
        ChatRequest::new(topic_id, prompt)
    }
}

// ── Chat events ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reasoning,
    Answer,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Reasoning => "reasoning",
            EventKind::Answer => "answer",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised unit of the relay's output stream: one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: String,
}

impl ChatEvent {
    pub fn reasoning(content: impl Into<String>) -> Self {
        Self { kind: EventKind::Reasoning, content: content.into() }
    }

    pub fn answer(content: impl Into<String>) -> Self {
        Self { kind: EventKind::Answer, content: content.into() }
    }
}

// ── Conversation history ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Ai,
}

/// A finished exchange, ready to be committed as history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub topic_id: TopicId,
    pub prompt: String,
    pub answer: String,
    pub completed_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(topic_id: TopicId, prompt: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            topic_id,
            prompt: prompt.into(),
            answer: answer.into(),
            completed_at: Utc::now(),
        }
    }

    /// Whitespace-only answers are not worth recording.
    pub fn has_answer(&self) -> bool {
        !self.answer.trim().is_empty()
    }
}

/// A message record as returned by the backend message API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: i64,
    pub topic_id: TopicId,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}
