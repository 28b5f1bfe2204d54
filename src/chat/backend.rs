use crate::error::{ApiError, StreamError};
use crate::models::chat::{ChatRequest, ChatResponse};
use crate::services::AiService;
use crate::stream::{ChatStream, StreamingChatClient};
use async_trait::async_trait;

/// What the chat session needs from the AI service.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, StreamError>;

    /// Stops the in-flight stream, if any.
    fn cancel(&self);

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError>;
}

pub struct AiChatBackend {
    streaming: StreamingChatClient,
    ai: AiService,
}

impl AiChatBackend {
    pub fn new(streaming: StreamingChatClient, ai: AiService) -> Self {
        Self { streaming, ai }
    }
}

#[async_trait]
impl ChatBackend for AiChatBackend {
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, StreamError> {
        self.streaming.stream_chat(request)
    }

    fn cancel(&self) {
        self.streaming.cancel();
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.ai.chat(request).await
    }
}
