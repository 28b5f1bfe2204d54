use crate::api::ApiClient;
use crate::config::ServiceType;
use crate::error::ApiError;
use crate::models::chat::{Conversation, HistoryMessage};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct ConversationService {
    api: Arc<ApiClient>,
}

impl ConversationService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub async fn list(&self, kind: Option<&str>, page: u32, size: u32) -> Result<Vec<Conversation>, ApiError> {
        let mut query = vec![("page", page.to_string()), ("size", size.to_string())];
        if let Some(kind) = kind {
            query.push(("type", kind.to_string()));
        }
        self.api.get(ServiceType::Ai, "conversations", &query).await
    }

    /// Creates a conversation and returns its id, 0 when the service did not
    /// report one.
    pub async fn create(&self, kind: &str, title: Option<&str>) -> Result<i64, ApiError> {
        let mut query = vec![("type", kind.to_string())];
        if let Some(title) = title {
            query.push(("title", title.to_string()));
        }
        let created: Value = self.api.post::<Value, ()>(ServiceType::Ai, "conversations", &query, None).await?;
        Ok(created.get("conversationId").and_then(Value::as_i64).unwrap_or(0))
    }

    pub async fn messages(&self, id: i64, page: u32, size: u32) -> Result<Vec<HistoryMessage>, ApiError> {
        let query = [("page", page.to_string()), ("size", size.to_string())];
        self.api.get(ServiceType::Ai, &format!("conversations/{}/messages", id), &query).await
    }

    pub async fn rename(&self, id: i64, title: &str) -> Result<(), ApiError> {
        let query = [("title", title.to_string())];
        self.api
            .put::<Value, ()>(ServiceType::Ai, &format!("conversations/{}/rename", id), &query, None)
            .await
            .map(|_| ())
    }

    pub async fn archive(&self, id: i64) -> Result<(), ApiError> {
        self.api
            .put::<Value, ()>(ServiceType::Ai, &format!("conversations/{}/archive", id), &[], None)
            .await
            .map(|_| ())
    }

    pub async fn remove(&self, id: i64) -> Result<(), ApiError> {
        self.api
            .delete::<Value>(ServiceType::Ai, &format!("conversations/{}", id))
            .await
            .map(|_| ())
    }
}
