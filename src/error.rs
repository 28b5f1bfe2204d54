use log::warn;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Broad classes used to decide how a failure is surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Auth,
    Validation,
    Business,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Business => "business",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Failures of a single REST call against either backend service.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network connection failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("session expired, please log in again")]
    Unauthorized,

    #[error("permission denied")]
    Forbidden,

    #[error("{message}")]
    Validation {
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },

    #[error("{message}")]
    Business { code: Option<i64>, message: String },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request failed ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) => ErrorKind::Network,
            ApiError::Unauthorized | ApiError::Forbidden => ErrorKind::Auth,
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::Business { .. } | ApiError::Server { .. } => ErrorKind::Business,
            ApiError::Status { .. } | ApiError::Decode(_) => ErrorKind::Unknown,
        }
    }

    /// HTTP status behind the error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Forbidden => Some(403),
            ApiError::Validation { .. } => Some(422),
            ApiError::Server { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Failures of the streaming chat endpoint. Each variant has a stable code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("no auth token found")]
    AuthMissing,

    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("failed to read response stream: {0}")]
    Read(String),

    #[error("{0}")]
    Event(String),

    #[error("failed to parse SSE event: {0}")]
    Parse(String),

    #[error("stream request failed: {0}")]
    Transport(String),
}

impl StreamError {
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::AuthMissing => "AUTH_MISSING",
            StreamError::Http { .. } => "HTTP_ERROR",
            StreamError::Read(_) => "STREAM_READ_ERROR",
            StreamError::Event(_) => "STREAM_EVENT_ERROR",
            StreamError::Parse(_) => "SSE_PARSE_ERROR",
            StreamError::Transport(_) => "STREAM_ERROR",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// User-facing description of a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl From<&ApiError> for ErrorInfo {
    fn from(err: &ApiError) -> Self {
        let message = match err {
            ApiError::Validation { message, fields } if !fields.is_empty() => {
                let lines: Vec<String> = fields
                    .iter()
                    .map(|(field, msgs)| format!("{}: {}", field, msgs.join(", ")))
                    .collect();
                format!("{}\n{}", message, lines.join("\n"))
            }
            ApiError::Status { status: 404, .. } => "the requested resource does not exist".to_string(),
            ApiError::Server { status: 500, .. } => "internal server error, please retry later".to_string(),
            other => other.to_string(),
        };
        ErrorInfo {
            kind: err.kind(),
            message,
            status: err.status(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Logs a failed call and returns what should be shown at the call site.
pub fn report(err: &ApiError) -> ErrorInfo {
    let info = ErrorInfo::from(err);
    warn!("{}", info);
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_api_errors() {
        assert_eq!(ApiError::Unauthorized.kind(), ErrorKind::Auth);
        assert_eq!(ApiError::Forbidden.kind(), ErrorKind::Auth);
        assert_eq!(
            ApiError::Server { status: 503, message: "down".into() }.kind(),
            ErrorKind::Business
        );
        assert_eq!(
            ApiError::Business { code: Some(500), message: "nope".into() }.kind(),
            ErrorKind::Business
        );
        assert_eq!(
            ApiError::Status { status: 404, message: "missing".into() }.kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn validation_info_lists_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), vec!["required".to_string(), "too short".to_string()]);
        fields.insert("slug".to_string(), vec!["taken".to_string()]);
        let err = ApiError::Validation { message: "form validation failed".into(), fields };

        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, ErrorKind::Validation);
        assert_eq!(info.status, Some(422));
        assert_eq!(info.message, "form validation failed\nslug: taken\ntitle: required, too short");
    }

    #[test]
    fn stream_error_codes_are_stable() {
        assert_eq!(StreamError::AuthMissing.code(), "AUTH_MISSING");
        let http = StreamError::Http { status: 502, reason: "Bad Gateway".into() };
        assert_eq!(http.code(), "HTTP_ERROR");
        assert_eq!(http.status(), Some(502));
        assert_eq!(http.to_string(), "HTTP 502: Bad Gateway");
        assert_eq!(StreamError::Parse("x".into()).code(), "SSE_PARSE_ERROR");
    }
}
