use super::sse::SseFrame;
use crate::error::StreamError;
use serde_json::Value;

/// What the streaming chat endpoint tells its consumer, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The server accepted the request. Payload usually carries the
    /// conversation id and model name.
    Start(Value),
    /// A piece of assistant text to append.
    Chunk(String),
    /// Final payload; no events follow.
    Complete(Value),
    /// Terminal failure; no events follow.
    Error(StreamError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete(_) | StreamEvent::Error(_))
    }

    /// Maps a decoded frame onto an event. `Ok(None)` means the frame carried
    /// nothing to surface, such as a `data` event with empty content.
    pub fn from_frame(frame: &SseFrame) -> Result<Option<Self>, StreamError> {
        let event = frame.event.as_deref().unwrap_or("");
        match event {
            "start" => Ok(Some(StreamEvent::Start(parse_payload(&frame.data)?))),
            "data" => Ok(content_of(&parse_payload(&frame.data)?).map(StreamEvent::Chunk)),
            "complete" => Ok(Some(StreamEvent::Complete(parse_payload(&frame.data)?))),
            "error" => {
                let payload = parse_payload(&frame.data)?;
                let message = payload
                    .get("error")
                    .and_then(Value::as_str)
                    .filter(|m| !m.is_empty())
                    .unwrap_or("the stream reported an error")
                    .to_string();
                Ok(Some(StreamEvent::Error(StreamError::Event(message))))
            }
            // Untyped or unknown frames are treated as raw content.
            _ => match serde_json::from_str::<Value>(&frame.data) {
                Ok(payload) => Ok(content_of(&payload).map(StreamEvent::Chunk)),
                Err(_) => Ok(Some(StreamEvent::Chunk(frame.data.clone()))),
            },
        }
    }
}

fn parse_payload(data: &str) -> Result<Value, StreamError> {
    serde_json::from_str(data).map_err(|e| StreamError::Parse(e.to_string()))
}

fn content_of(payload: &Value) -> Option<String> {
    let text = match payload {
        Value::String(s) => s.as_str(),
        other => other.get("content")?.as_str()?,
    };
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
