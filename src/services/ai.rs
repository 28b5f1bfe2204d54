use crate::api::ApiClient;
use crate::config::ServiceType;
use crate::error::ApiError;
use crate::models::chat::{ChatHistoryResponse, ChatMode, ChatRequest, ChatResponse};
use std::sync::Arc;

/// Non-streaming endpoints of the AI service.
#[derive(Clone)]
pub struct AiService {
    api: Arc<ApiClient>,
}

impl AiService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub async fn status(&self) -> Result<ChatResponse, ApiError> {
        self.api.get(ServiceType::Ai, "status", &[]).await
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let mut body = request.clone();
        body.mode = Some(ChatMode::Normal);
        self.api.post(ServiceType::Ai, "chat", &[], Some(&body)).await
    }

    pub async fn chat_history(&self, page: u32, size: u32) -> Result<ChatHistoryResponse, ApiError> {
        let query = [("page", page.to_string()), ("size", size.to_string())];
        self.api.get(ServiceType::Ai, "chat/history", &query).await
    }
}
