use reqwest::StatusCode;
use thiserror::Error;

/// Failures surfaced by an [`EventSource`](crate::sse::EventSource).
#[derive(Debug, Error)]
pub enum SseError {
    #[error("failed to serialize request payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("failed to connect: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(StatusCode),

    #[error("response has no body")]
    NoBody,

    #[error("stream read failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl SseError {
    /// True when the request never produced a readable stream.
    pub fn is_setup(&self) -> bool {
        !matches!(self, SseError::Transport(_))
    }
}
