pub mod event;
pub mod sse;

pub use event::StreamEvent;
pub use sse::{SseDecoder, SseFrame};

use crate::auth::AuthGuard;
use crate::config::ServiceConfig;
use crate::error::StreamError;
use crate::models::chat::{ChatMode, ChatRequest};
use futures::{Stream, StreamExt};
use log::{debug, error, info};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client as HttpClient, RequestBuilder, StatusCode};
use serde_json::Value;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::ReceiverStream;

pub type ChatStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Client for the AI service's `chat/stream` endpoint.
///
/// Owns the single in-flight stream: starting a new one aborts the previous
/// reader task first, so at most one body is being consumed at a time.
pub struct StreamingChatClient {
    http: HttpClient,
    stream_url: String,
    guard: AuthGuard,
    current: Mutex<Option<AbortHandle>>,
}

impl StreamingChatClient {
    pub fn new(config: &ServiceConfig, guard: AuthGuard) -> Result<Self, reqwest::Error> {
        // The body stays open for as long as the model keeps talking, so only
        // the connect phase is bounded.
        let http = HttpClient::builder()
            .connect_timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            stream_url: config.url("chat/stream"),
            guard,
            current: Mutex::new(None),
        })
    }

    /// Opens a stream for `request`. Fails fast without touching the network
    /// when no token is stored; every later failure arrives as a terminal
    /// [`StreamEvent::Error`].
    pub fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, StreamError> {
        self.cancel();

        let token = self.guard.credentials().token().ok_or(StreamError::AuthMissing)?;

        let mut body = request.clone();
        body.mode = Some(ChatMode::Stream);

        let req = self.http
            .post(&self.stream_url)
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .json(&body);

        let (tx, rx) = mpsc::channel(32);
        let guard = self.guard.clone();
        let handle = tokio::spawn(async move {
            pump(req, tx, guard).await;
        });
        *self.current() = Some(handle.abort_handle());

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Callback form of [`stream_chat`](Self::stream_chat). Chunks go to
    /// `on_chunk` in order; exactly one of `on_complete` or `on_error` runs
    /// unless the stream is cancelled or closes early.
    pub async fn stream_chat_with<C, D, E>(
        &self,
        request: &ChatRequest,
        mut on_chunk: C,
        on_complete: D,
        on_error: E
    )
    where
        C: FnMut(String),
        D: FnOnce(Value),
        E: FnOnce(StreamError),
    {
        let mut stream = match self.stream_chat(request) {
            Ok(stream) => stream,
            Err(e) => {
                on_error(e);
                return;
            }
        };

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Start(_) => {}
                StreamEvent::Chunk(text) => on_chunk(text),
                StreamEvent::Complete(payload) => {
                    on_complete(payload);
                    return;
                }
                StreamEvent::Error(e) => {
                    on_error(e);
                    return;
                }
            }
        }
    }

    /// Stops the in-flight stream, if any. Safe to call repeatedly.
    pub fn cancel(&self) {
        if let Some(handle) = self.current().take() {
            if !handle.is_finished() {
                info!("Cancelling in-flight chat stream");
            }
            handle.abort();
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.current().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn current(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for StreamingChatClient {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn pump(req: RequestBuilder, tx: mpsc::Sender<StreamEvent>, guard: AuthGuard) {
    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            error!("Chat stream request failed: {}", e);
            let _ = tx.send(StreamEvent::Error(StreamError::Transport(e.to_string()))).await;
            return;
        }
    };

    let status = resp.status();
    if !status.is_success() {
        if status == StatusCode::UNAUTHORIZED {
            guard.on_unauthorized();
        }
        let err = StreamError::Http {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        };
        error!("Chat stream rejected: {}", err);
        let _ = tx.send(StreamEvent::Error(err)).await;
        return;
    }

    let mut decoder = SseDecoder::new();
    let mut body = resp.bytes_stream();

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for frame in decoder.feed(&bytes) {
                    if !forward(&tx, &frame).await {
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Chat stream read failed: {}", e);
                let _ = tx.send(StreamEvent::Error(StreamError::Read(e.to_string()))).await;
                return;
            }
        }
    }

    if let Some(frame) = decoder.finish() {
        forward(&tx, &frame).await;
    }
    debug!("Chat stream body finished");
}

/// Sends the event for `frame`. Returns false once the stream is over,
/// either because the event was terminal or the receiver is gone.
async fn forward(tx: &mpsc::Sender<StreamEvent>, frame: &SseFrame) -> bool {
    let event = match StreamEvent::from_frame(frame) {
        Ok(Some(event)) => event,
        Ok(None) => return true,
        Err(e) => {
            error!("Dropping malformed SSE frame {:?}: {}", frame, e);
            let _ = tx.send(StreamEvent::Error(e)).await;
            return false;
        }
    };

    match &event {
        StreamEvent::Start(payload) => info!("Chat stream started: {}", payload),
        StreamEvent::Complete(payload) => info!("Chat stream complete: {}", payload),
        StreamEvent::Error(e) => error!("Chat stream error event: {}", e),
        StreamEvent::Chunk(_) => {}
    }

    let terminal = event.is_terminal();
    tx.send(event).await.is_ok() && !terminal
}
