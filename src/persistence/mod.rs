pub mod http_store;

use async_trait::async_trait;
use tracing::{error, info};

use crate::errors::AppError;
use crate::models::{ConversationTurn, StoredMessage, TopicId};

pub use http_store::HttpMessageStore;

/// Backend that records conversation history.
///
/// Neither call is idempotent: calling twice creates two records.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_user_message(
        &self,
        topic_id: TopicId,
        content: &str,
    ) -> Result<StoredMessage, AppError>;

    async fn create_ai_message(
        &self,
        topic_id: TopicId,
        content: &str,
    ) -> Result<StoredMessage, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStep {
    UserMessage,
    AiMessage,
}

impl std::fmt::Display for PersistStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistStep::UserMessage => f.write_str("user message"),
            PersistStep::AiMessage => f.write_str("ai message"),
        }
    }
}

/// Advisory: the history for this exchange may be incomplete.
#[derive(Debug, thiserror::Error)]
#[error("Could not save {step} to history: {error}")]
pub struct PersistenceWarning {
    pub step: PersistStep,
    #[source]
    pub error: AppError,
}

/// What a commit managed to store.
#[derive(Debug, Default)]
pub struct CommitReport {
    pub user_message: Option<StoredMessage>,
    pub ai_message: Option<StoredMessage>,
    /// The answer was empty, so no AI record was attempted.
    pub ai_skipped: bool,
    /// One entry per step that failed, in step order.
    pub warnings: Vec<PersistenceWarning>,
}

impl CommitReport {
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Commits finished exchanges, user message strictly before AI message.
#[derive(Clone)]
pub struct ConversationRecorder<S> {
    store: S,
}

impl<S: MessageStore> ConversationRecorder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stores the prompt, then (only if the store acknowledged it and the
    /// answer is not blank) the answer. Failures are reported, never retried
    /// or rolled back.
    pub async fn commit(&self, turn: &ConversationTurn) -> CommitReport {
        let mut report = CommitReport::default();

        match self.store.create_user_message(turn.topic_id, &turn.prompt).await {
            Ok(message) => report.user_message = Some(message),
            Err(error) => {
                error!("Failed to save user message for topic {}: {error}", turn.topic_id);
                let stored = error.was_stored();
                report.warnings.push(PersistenceWarning { step: PersistStep::UserMessage, error });
                if !stored {
                    return report;
                }
            }
        }

        if !turn.has_answer() {
            info!("Answer for topic {} is empty, skipping ai message", turn.topic_id);
            report.ai_skipped = true;
            return report;
        }

        match self.store.create_ai_message(turn.topic_id, &turn.answer).await {
            Ok(message) => report.ai_message = Some(message),
            Err(error) => {
                error!("Failed to save ai message for topic {}: {error}", turn.topic_id);
                report.warnings.push(PersistenceWarning { step: PersistStep::AiMessage, error });
            }
        }
        report
    }
}
