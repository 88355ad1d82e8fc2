pub mod app;
pub mod completions;
pub mod config;
pub mod csrf;
pub mod error;
pub mod sse;
pub mod state;

// Re-export main types for convenience
pub use app::{App, InputMode, Status, StreamUpdate};
pub use completions::{CompletionsClient, DONE_SENTINEL};
pub use config::Config;
pub use error::SseError;
pub use sse::{EventSource, SseDecoder, SseEvent, SseRequest};
pub use state::{ChatMessage, ChatRole};
