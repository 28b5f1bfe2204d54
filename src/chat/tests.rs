use super::*;
use crate::error::StreamError;
use crate::models::chat::ChatResponse;
use crate::storage::MemoryStore;
use crate::stream::ChatStream;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Backend double. Streams replay a queued script when one is available,
/// otherwise they stay open and are fed through `emit`.
#[derive(Default)]
struct FakeBackend {
    scripts: Mutex<VecDeque<Result<Vec<StreamEvent>, StreamError>>>,
    replies: Mutex<VecDeque<Result<ChatResponse, ApiError>>>,
    live: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    requests: Mutex<Vec<ChatRequest>>,
    cancels: AtomicUsize,
}

impl FakeBackend {
    fn script(&self, events: Vec<StreamEvent>) {
        self.scripts.lock().unwrap().push_back(Ok(events));
    }

    fn fail_open(&self, err: StreamError) {
        self.scripts.lock().unwrap().push_back(Err(err));
    }

    fn reply(&self, reply: Result<ChatResponse, ApiError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    async fn emit(&self, event: StreamEvent) {
        let tx = self.live.lock().unwrap().clone().expect("no live stream");
        tx.send(event).await.unwrap();
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, StreamError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.scripts.lock().unwrap().pop_front() {
            Some(Ok(events)) => Ok(Box::pin(futures::stream::iter(events))),
            Some(Err(e)) => Err(e),
            None => {
                let (tx, rx) = mpsc::channel(8);
                *self.live.lock().unwrap() = Some(tx);
                Ok(Box::pin(ReceiverStream::new(rx)))
            }
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().take();
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Status { status: 500, message: "no scripted reply".into() }))
    }
}

fn session_with(backend: Arc<FakeBackend>, store: Arc<MemoryStore>) -> ChatSession {
    ChatSession::new(backend, store, SessionOptions::default())
}

fn setup() -> (Arc<FakeBackend>, Arc<MemoryStore>, ChatSession) {
    let backend = Arc::new(FakeBackend::default());
    let store = Arc::new(MemoryStore::new());
    let session = session_with(backend.clone(), store.clone());
    (backend, store, session)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn streamed_reply_is_settled_and_conversation_recorded() {
    let (backend, store, session) = setup();
    backend.script(vec![
        StreamEvent::Start(json!({})),
        StreamEvent::Chunk("Hi".into()),
        StreamEvent::Complete(json!({"conversationId": 7})),
    ]);

    assert!(session.send_message("hello", None).await);

    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hi");
    assert!(!messages[1].is_streaming);
    assert!(messages[1].id > messages[0].id);
    assert_eq!(session.conversation_id(), Some(7));
    assert!(!session.is_loading());
    assert!(!session.is_streaming());

    let saved = store.get(HISTORY_KEY).unwrap().unwrap();
    let snapshot: ChatSnapshot = serde_json::from_str(&saved).unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.conversation_id, Some(7));
    assert_eq!(store.get(CONVERSATION_ID_KEY).unwrap().as_deref(), Some("7"));
}

#[tokio::test]
async fn chunks_are_appended_in_order() {
    let (backend, _store, session) = setup();
    backend.script(vec![
        StreamEvent::Chunk("Hel".into()),
        StreamEvent::Chunk("lo, ".into()),
        StreamEvent::Chunk("world".into()),
        StreamEvent::Complete(json!({})),
    ]);

    session.send_message("greet me", None).await;
    assert_eq!(session.last_message().unwrap().content, "Hello, world");
    assert_eq!(session.conversation_id(), None);
}

#[tokio::test]
async fn blank_input_is_rejected() {
    let (backend, _store, session) = setup();
    assert!(!session.send_message("   \n", None).await);
    assert!(!session.has_messages());
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn second_send_is_rejected_while_loading() {
    let (backend, _store, session) = setup();
    let session = Arc::new(session);

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("one", None).await })
    };
    wait_until(|| session.is_streaming()).await;

    assert!(session.is_loading());
    assert!(!session.send_message("two", None).await);
    let streaming = session.streaming_message().unwrap();
    assert_eq!(streaming.content, "");

    backend.emit(StreamEvent::Chunk("partial".into())).await;
    wait_until(|| session.streaming_message().map(|m| m.content) == Some("partial".into())).await;
    backend.emit(StreamEvent::Complete(json!({}))).await;

    assert!(first.await.unwrap());
    assert_eq!(session.messages().len(), 2);
    assert_eq!(backend.requests().len(), 1);
    assert!(session.streaming_message().is_none());
}

#[tokio::test]
async fn stream_error_replaces_partial_reply() {
    let (backend, _store, session) = setup();
    backend.script(vec![
        StreamEvent::Chunk("half an ans".into()),
        StreamEvent::Error(StreamError::Event("model overloaded".into())),
        StreamEvent::Chunk("ignored".into()),
    ]);

    assert!(session.send_message("question", None).await);

    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].is_error);
    assert_eq!(messages[1].content, "model overloaded");
    assert!(messages.iter().all(|m| !m.is_streaming));
    assert_eq!(session.error_message(), "model overloaded");
    assert!(!session.is_loading());
}

#[tokio::test]
async fn missing_token_surfaces_as_error_message() {
    let (backend, _store, session) = setup();
    backend.fail_open(StreamError::AuthMissing);

    session.send_message("hello", None).await;
    let last = session.last_message().unwrap();
    assert!(last.is_error);
    assert_eq!(last.content, "no auth token found");
    assert!(!session.is_streaming());
}

#[tokio::test]
async fn stream_without_completion_keeps_partial_reply() {
    let (backend, _store, session) = setup();
    backend.script(vec![StreamEvent::Chunk("cut".into())]);

    session.send_message("hello", None).await;
    let last = session.last_message().unwrap();
    assert_eq!(last.content, "cut");
    assert!(!last.is_streaming);
    assert!(!last.is_error);
}

#[tokio::test]
async fn conversation_id_is_only_set_once() {
    let (backend, _store, session) = setup();
    backend.script(vec![StreamEvent::Complete(json!({"conversationId": "7"}))]);
    backend.script(vec![StreamEvent::Complete(json!({"conversationId": 9}))]);

    session.send_message("first", None).await;
    session.send_message("second", None).await;

    assert_eq!(session.conversation_id(), Some(7));
    let requests = backend.requests();
    assert_eq!(requests[0].conversation_id, None);
    assert_eq!(requests[1].conversation_id, Some(7));
}

#[tokio::test]
async fn normal_mode_appends_reply() {
    let (backend, _store, session) = setup();
    session.set_mode(ChatMode::Normal);
    backend.reply(Ok(ChatResponse {
        success: Some(true),
        message: "Hello there".into(),
        conversation_id: Some(3),
        ..ChatResponse::default()
    }));

    let mut context = Map::new();
    context.insert("page".into(), json!("blog"));
    session.send_message("hi", Some(context)).await;

    let last = session.last_message().unwrap();
    assert_eq!(last.content, "Hello there");
    assert_eq!(last.conversation_id, Some(3));
    assert_eq!(session.conversation_id(), Some(3));
    assert!(!session.is_streaming());
    assert_eq!(backend.requests()[0].context.as_ref().unwrap()["page"], json!("blog"));
}

#[tokio::test]
async fn normal_mode_failure_uses_friendly_message() {
    let (backend, _store, session) = setup();
    session.set_mode(ChatMode::Normal);
    backend.reply(Err(ApiError::Server { status: 503, message: "busy".into() }));

    session.send_message("hi", None).await;
    let last = session.last_message().unwrap();
    assert!(last.is_error);
    assert_eq!(last.content, "Service temporarily unavailable, please retry later");
    assert_eq!(session.error_message(), last.content);
    assert!(!session.is_loading());
}

#[tokio::test]
async fn clear_history_drops_everything() {
    let (backend, store, session) = setup();
    backend.script(vec![
        StreamEvent::Chunk("Hi".into()),
        StreamEvent::Complete(json!({"conversationId": 7})),
    ]);
    session.send_message("hello", None).await;
    session.set_mode(ChatMode::Normal);
    let mut updates = session.subscribe();

    session.clear_history();

    assert!(!session.has_messages());
    assert_eq!(session.conversation_id(), None);
    assert_eq!(backend.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(updates.try_recv().unwrap(), SessionUpdate::Cleared);
    for key in [HISTORY_KEY, CONVERSATION_ID_KEY, MODE_KEY] {
        assert_eq!(store.get(key).unwrap(), None, "{} still stored", key);
    }
}

#[tokio::test]
async fn clear_during_stream_discards_the_reply() {
    let (backend, store, session) = setup();
    let session = Arc::new(session);

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("long answer please", None).await })
    };
    wait_until(|| session.is_streaming()).await;
    backend.emit(StreamEvent::Chunk("Once upon".into())).await;

    session.clear_history();
    assert!(pending.await.unwrap());

    assert!(!session.has_messages());
    assert!(!session.is_loading());
    assert!(!session.is_streaming());
    assert_eq!(store.get(HISTORY_KEY).unwrap(), None);
}

#[tokio::test]
async fn cancel_stream_keeps_what_arrived() {
    let (backend, store, session) = setup();
    let session = Arc::new(session);

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("tell me a story", None).await })
    };
    wait_until(|| session.is_streaming()).await;
    backend.emit(StreamEvent::Chunk("part".into())).await;
    wait_until(|| session.streaming_message().map(|m| m.content) == Some("part".into())).await;

    session.cancel_stream();
    assert!(pending.await.unwrap());

    assert_eq!(backend.cancels.load(Ordering::SeqCst), 1);
    let last = session.last_message().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "part");
    assert!(!last.is_streaming);
    assert!(!last.is_error);
    assert!(!session.is_loading());
    assert!(!session.is_streaming());
    assert_eq!(session.error_message(), "");

    let snapshot: ChatSnapshot = serde_json::from_str(&store.get(HISTORY_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(snapshot.messages.len(), 2);

    // Nothing in flight any more, so a second cancel is a no-op.
    session.cancel_stream();
    assert_eq!(backend.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn updates_follow_the_stream() {
    let (backend, _store, session) = setup();
    let mut updates = session.subscribe();
    backend.script(vec![StreamEvent::Chunk("Hi".into()), StreamEvent::Complete(json!({}))]);

    session.send_message("hello", None).await;

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update);
    }
    assert!(matches!(&seen[0], SessionUpdate::MessageAdded(m) if m.role == Role::User));
    assert!(matches!(&seen[1], SessionUpdate::MessageAdded(m) if m.is_streaming));
    assert_eq!(seen[2], SessionUpdate::Chunk { id: 2, text: "Hi".into() });
    assert_eq!(seen[3], SessionUpdate::Settled { id: 2 });
}

#[tokio::test]
async fn hydrates_settles_and_continues_ids() {
    let store = Arc::new(MemoryStore::new());
    let saved = json!({
        "messages": [
            {"id": 4, "role": "user", "content": "hello", "timestamp": "2025-01-27T10:00:00Z"},
            {"id": 5, "role": "assistant", "content": "Hi", "timestamp": "2025-01-27T10:00:01Z", "isStreaming": true}
        ],
        "conversationId": 7,
        "mode": "stream"
    });
    store.set(HISTORY_KEY, &saved.to_string()).unwrap();
    store.set(MODE_KEY, "normal").unwrap();

    let backend = Arc::new(FakeBackend::default());
    let session = session_with(backend.clone(), store);

    assert_eq!(session.messages().len(), 2);
    assert!(session.streaming_message().is_none());
    assert_eq!(session.conversation_id(), Some(7));
    assert_eq!(session.mode(), ChatMode::Normal);

    backend.reply(Ok(ChatResponse { success: Some(true), message: "again".into(), ..ChatResponse::default() }));
    session.send_message("next", None).await;
    let ids: Vec<u64> = session.messages().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![4, 5, 6, 7]);
    assert_eq!(backend.requests()[0].conversation_id, Some(7));
}

#[tokio::test]
async fn corrupt_snapshot_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    store.set(HISTORY_KEY, "{not json").unwrap();
    store.set(CONVERSATION_ID_KEY, "7").unwrap();

    let session = session_with(Arc::new(FakeBackend::default()), store.clone());

    assert!(!session.has_messages());
    assert_eq!(session.conversation_id(), None);
    assert_eq!(store.get(HISTORY_KEY).unwrap(), None);
    assert_eq!(store.get(CONVERSATION_ID_KEY).unwrap(), None);
}

#[tokio::test]
async fn default_mode_applies_only_without_saved_mode() {
    let store = Arc::new(MemoryStore::new());
    let options = SessionOptions { default_mode: ChatMode::Normal, model: Some("deepseek-chat".into()) };
    let backend = Arc::new(FakeBackend::default());
    let session = ChatSession::new(backend.clone(), store.clone(), options.clone());
    assert_eq!(session.mode(), ChatMode::Normal);

    session.set_mode(ChatMode::Stream);
    let reloaded = ChatSession::new(backend.clone(), store, options);
    assert_eq!(reloaded.mode(), ChatMode::Stream);

    backend.script(vec![StreamEvent::Complete(json!({}))]);
    reloaded.send_message("which model", None).await;
    assert_eq!(backend.requests()[0].model.as_deref(), Some("deepseek-chat"));
}
