use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::{Credential, MessageType, StoredMessage, TopicId};
use crate::persistence::MessageStore;

#[derive(Serialize)]
struct NewMessage<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_type: Option<MessageType>,
}

/// [`MessageStore`] backed by the backend's topic message API
/// (`POST /topics/{topic_id}/messages`).
#[derive(Clone)]
pub struct HttpMessageStore {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
    timeout: Duration,
}

impl HttpMessageStore {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        credential: Credential,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            timeout,
        }
    }

    async fn create(
        &self,
        topic_id: TopicId,
        content: &str,
        message_type: Option<MessageType>,
    ) -> Result<StoredMessage, AppError> {
        let url = format!("{}/topics/{topic_id}/messages", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.credential.token())
            .timeout(self.timeout)
            .json(&NewMessage { content, message_type })
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach message store at {url}: {e}");
                AppError::StoreUnavailable { host: self.base_url.clone(), source: e }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::CredentialRejected { service: "message store".to_string() });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Message store responded with {status} for topic {topic_id}: {body}");
            return Err(AppError::StoreStatus { status: status.as_u16(), body });
        }

        let message = response.json::<StoredMessage>().await.map_err(|e| {
            error!("Failed to read stored message for topic {topic_id}: {e}");
            AppError::StoreResponseInvalid { status: status.as_u16(), message: e.to_string() }
        })?;
        debug!("Stored {:?} message {} for topic {topic_id}", message.message_type, message.message_id);
        Ok(message)
    }
}

#[async_trait]
impl MessageStore for HttpMessageStore {
    async fn create_user_message(
        &self,
        topic_id: TopicId,
        content: &str,
    ) -> Result<StoredMessage, AppError> {
        self.create(topic_id, content, None).await
    }

    async fn create_ai_message(
        &self,
        topic_id: TopicId,
        content: &str,
    ) -> Result<StoredMessage, AppError> {
        self.create(topic_id, content, Some(MessageType::Ai)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ai_messages_carry_their_type() {
        let user = serde_json::to_value(NewMessage { content: "q", message_type: None }).unwrap();
        let ai = serde_json::to_value(NewMessage { content: "a", message_type: Some(MessageType::Ai) })
            .unwrap();
        assert_eq!(user, json!({"content": "q"}));
        assert_eq!(ai, json!({"content": "a", "message_type": "ai"}));
    }
}
