//! Chat session state machine.
//!
//! A [`ChatSession`] owns the local transcript of one user's conversation
//! with the AI service. Sending is single-flight: while a reply is loading
//! further sends are rejected. In stream mode the assistant reply is a
//! message that starts empty with `is_streaming` set, grows chunk by chunk
//! and is either settled on completion or removed and replaced by an error
//! message on failure.
//!
//! The transcript is persisted through a [`KeyValueStore`] after every
//! settled change and hydrated when the session is created.

mod backend;

pub use backend::{AiChatBackend, ChatBackend};

use crate::error::{ApiError, StorageError};
use crate::models::chat::{ChatMessage, ChatMode, ChatRequest, ChatSnapshot, Role};
use crate::storage::KeyValueStore;
use crate::stream::StreamEvent;
use chrono::Utc;
use futures::StreamExt;
use log::{error, info, warn};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

pub const HISTORY_KEY: &str = "liutech-chat-history";
pub const CONVERSATION_ID_KEY: &str = "liutech-chat-conversation-id";
pub const MODE_KEY: &str = "liutech-chat-mode";

/// Change notifications for front ends that render the transcript live.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    MessageAdded(ChatMessage),
    Chunk { id: u64, text: String },
    Settled { id: u64 },
    Removed { id: u64 },
    Cleared,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Mode used when nothing was persisted.
    pub default_mode: ChatMode,
    pub model: Option<String>,
}

#[derive(Default)]
struct ChatState {
    messages: Vec<ChatMessage>,
    conversation_id: Option<i64>,
    is_loading: bool,
    is_streaming: bool,
    mode: ChatMode,
    error_message: String,
    last_id: u64,
    /// Bumped by `clear_history` so replies to an older send are dropped.
    epoch: u64,
}

impl ChatState {
    fn push(&mut self, role: Role, content: String, is_streaming: bool, is_error: bool) -> ChatMessage {
        self.last_id += 1;
        let message = ChatMessage {
            id: self.last_id,
            role,
            content,
            timestamp: Utc::now(),
            is_streaming,
            is_error,
            conversation_id: if is_error { None } else { self.conversation_id },
        };
        self.messages.push(message.clone());
        message
    }

    fn find_mut(&mut self, id: u64) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn record_conversation(&mut self, id: Option<i64>) {
        if self.conversation_id.is_none() {
            if let Some(id) = id {
                info!("Conversation id set to {}", id);
                self.conversation_id = Some(id);
            }
        }
    }
}

enum StreamOutcome {
    Completed(Value),
    Failed(String),
    /// The body ended without a terminal event, e.g. after a cancel.
    Closed,
}

pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn KeyValueStore>,
    model: Option<String>,
    state: Mutex<ChatState>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, store: Arc<dyn KeyValueStore>, options: SessionOptions) -> Self {
        let state = hydrate(store.as_ref(), options.default_mode);
        let (updates, _) = broadcast::channel(256);
        Self {
            backend,
            store,
            model: options.model,
            state: Mutex::new(state),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state().messages.clone()
    }

    pub fn conversation_id(&self) -> Option<i64> {
        self.state().conversation_id
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_loading
    }

    pub fn is_streaming(&self) -> bool {
        self.state().is_streaming
    }

    pub fn mode(&self) -> ChatMode {
        self.state().mode
    }

    pub fn error_message(&self) -> String {
        self.state().error_message.clone()
    }

    pub fn has_messages(&self) -> bool {
        !self.state().messages.is_empty()
    }

    pub fn last_message(&self) -> Option<ChatMessage> {
        self.state().messages.last().cloned()
    }

    pub fn streaming_message(&self) -> Option<ChatMessage> {
        self.state().messages.iter().find(|m| m.is_streaming).cloned()
    }

    /// Sends `content` and waits for the whole reply. Returns false without
    /// doing anything when the trimmed input is empty or a send is already
    /// in progress. Failures end up in the transcript, not in the return
    /// value.
    pub async fn send_message(&self, content: &str, context: Option<Map<String, Value>>) -> bool {
        let text = content.trim();
        let (request, mode, epoch) = {
            let mut state = self.state();
            if text.is_empty() || state.is_loading {
                return false;
            }
            state.error_message.clear();
            let user = state.push(Role::User, text.to_string(), false, false);
            self.notify(SessionUpdate::MessageAdded(user));
            state.is_loading = true;

            let request = ChatRequest {
                message: text.to_string(),
                context,
                conversation_id: state.conversation_id,
                model: self.model.clone(),
                mode: None,
            };
            (request, state.mode, state.epoch)
        };
        self.persist();

        match mode {
            ChatMode::Stream => self.send_stream(&request, epoch).await,
            ChatMode::Normal => self.send_normal(&request, epoch).await,
        }

        self.state().is_loading = false;
        self.persist();
        true
    }

    async fn send_stream(&self, request: &ChatRequest, epoch: u64) {
        let reply_id = {
            let mut state = self.state();
            state.is_streaming = true;
            let reply = state.push(Role::Assistant, String::new(), true, false);
            let id = reply.id;
            self.notify(SessionUpdate::MessageAdded(reply));
            id
        };

        let outcome = match self.backend.stream(request).await {
            Ok(mut stream) => {
                let mut outcome = StreamOutcome::Closed;
                while let Some(event) = stream.next().await {
                    match event {
                        StreamEvent::Start(_) => {}
                        StreamEvent::Chunk(text) => self.append(reply_id, text),
                        StreamEvent::Complete(payload) => {
                            outcome = StreamOutcome::Completed(payload);
                            break;
                        }
                        StreamEvent::Error(e) => {
                            outcome = StreamOutcome::Failed(e.to_string());
                            break;
                        }
                    }
                }
                outcome
            }
            Err(e) => StreamOutcome::Failed(e.to_string()),
        };

        let mut state = self.state();
        state.is_streaming = false;
        if state.epoch != epoch {
            return;
        }
        match outcome {
            StreamOutcome::Completed(payload) => {
                self.settle(&mut state, reply_id);
                state.record_conversation(conversation_id_of(&payload));
            }
            StreamOutcome::Closed => {
                warn!("Chat stream ended without a completion event");
                self.settle(&mut state, reply_id);
            }
            StreamOutcome::Failed(message) => {
                error!("Chat stream failed: {}", message);
                if let Some(pos) = state.messages.iter().position(|m| m.id == reply_id) {
                    state.messages.remove(pos);
                    self.notify(SessionUpdate::Removed { id: reply_id });
                }
                let notice = state.push(Role::Assistant, message.clone(), false, true);
                self.notify(SessionUpdate::MessageAdded(notice));
                state.error_message = message;
            }
        }
    }

    async fn send_normal(&self, request: &ChatRequest, epoch: u64) {
        let result = self.backend.chat(request).await;

        let mut state = self.state();
        if state.epoch != epoch {
            return;
        }
        match result {
            Ok(response) => {
                state.record_conversation(response.conversation_id);
                let mut reply = state.push(Role::Assistant, response.message, false, false);
                if response.conversation_id.is_some() {
                    reply.conversation_id = response.conversation_id;
                    if let Some(stored) = state.find_mut(reply.id) {
                        stored.conversation_id = response.conversation_id;
                    }
                }
                self.notify(SessionUpdate::MessageAdded(reply));
            }
            Err(e) => {
                error!("Chat request failed: {}", e);
                let message = describe_failure(&e);
                let notice = state.push(Role::Assistant, message.clone(), false, true);
                self.notify(SessionUpdate::MessageAdded(notice));
                state.error_message = message;
            }
        }
    }

    /// Drops the transcript, forgets the conversation and stops any stream
    /// in flight.
    pub fn clear_history(&self) {
        {
            let mut state = self.state();
            state.messages.clear();
            state.conversation_id = None;
            state.error_message.clear();
            state.last_id = 0;
            state.epoch += 1;
        }
        self.backend.cancel();

        for key in [HISTORY_KEY, CONVERSATION_ID_KEY, MODE_KEY] {
            if let Err(e) = self.store.remove(key) {
                error!("Failed to remove {}: {}", key, e);
            }
        }
        self.notify(SessionUpdate::Cleared);
        info!("Chat history cleared");
    }

    /// Stops the reply being streamed. What arrived so far is kept.
    pub fn cancel_stream(&self) {
        if self.is_streaming() {
            info!("Cancelling chat stream");
            self.backend.cancel();
        }
    }

    pub fn set_mode(&self, mode: ChatMode) {
        self.state().mode = mode;
        if let Err(e) = self.store.set(MODE_KEY, mode.as_str()) {
            error!("Failed to save chat mode: {}", e);
        }
        self.persist();
    }

    fn append(&self, id: u64, text: String) {
        let mut state = self.state();
        if let Some(message) = state.find_mut(id).filter(|m| m.is_streaming) {
            message.content.push_str(&text);
            self.notify(SessionUpdate::Chunk { id, text });
        }
    }

    fn settle(&self, state: &mut ChatState, id: u64) {
        if let Some(message) = state.find_mut(id) {
            message.is_streaming = false;
            self.notify(SessionUpdate::Settled { id });
        }
    }

    /// Writes the settled transcript. An empty session leaves no snapshot
    /// behind.
    fn persist(&self) {
        let (snapshot, conversation_id) = {
            let state = self.state();
            if state.messages.is_empty() && state.conversation_id.is_none() {
                (None, None)
            } else {
                let snapshot = ChatSnapshot {
                    messages: state.messages.iter().filter(|m| !m.is_streaming).cloned().collect(),
                    conversation_id: state.conversation_id,
                    mode: state.mode,
                };
                (Some(snapshot), state.conversation_id)
            }
        };

        let result = match snapshot {
            Some(snapshot) => serde_json::to_string(&snapshot)
                .map_err(StorageError::from)
                .and_then(|json| self.store.set(HISTORY_KEY, &json)),
            None => self.store.remove(HISTORY_KEY),
        };
        if let Err(e) = result {
            error!("Failed to save chat history: {}", e);
        }

        let result = match conversation_id {
            Some(id) => self.store.set(CONVERSATION_ID_KEY, &id.to_string()),
            None => self.store.remove(CONVERSATION_ID_KEY),
        };
        if let Err(e) = result {
            error!("Failed to save conversation id: {}", e);
        }
    }

    fn notify(&self, update: SessionUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn hydrate(store: &dyn KeyValueStore, default_mode: ChatMode) -> ChatState {
    let mut state = ChatState {
        mode: default_mode,
        ..ChatState::default()
    };

    match store.get(HISTORY_KEY) {
        Ok(Some(raw)) => match serde_json::from_str::<ChatSnapshot>(&raw) {
            Ok(snapshot) => {
                state.messages = snapshot.messages;
                state.conversation_id = snapshot.conversation_id;
                state.mode = snapshot.mode;
            }
            Err(e) => {
                error!("Discarding unreadable chat history: {}", e);
                for key in [HISTORY_KEY, CONVERSATION_ID_KEY, MODE_KEY] {
                    let _ = store.remove(key);
                }
            }
        },
        Ok(None) => {}
        Err(e) => error!("Failed to load chat history: {}", e),
    }

    if let Ok(Some(saved)) = store.get(MODE_KEY) {
        match saved.parse() {
            Ok(mode) => state.mode = mode,
            Err(e) => warn!("{}", e),
        }
    }

    for message in &mut state.messages {
        message.is_streaming = false;
    }
    state.last_id = state.messages.iter().map(|m| m.id).max().unwrap_or(0);
    state
}

fn conversation_id_of(payload: &Value) -> Option<i64> {
    match payload.get("conversationId")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn describe_failure(err: &ApiError) -> String {
    match err.status() {
        Some(429) => "Too many requests, please try again later".to_string(),
        Some(500) => "Internal server error, please retry later".to_string(),
        Some(503) => "Service temporarily unavailable, please retry later".to_string(),
        _ => err.to_string(),
    }
}

#[cfg(test)]
mod tests;
