use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::SseError;
use crate::sse::{EventSource, SseRequest};
use crate::state::ChatMessage;

/// Payload that marks the end of a completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Text delta carried by one streamed chunk, if any.
///
/// Only the first choice is read; chunks without `delta.content` (role
/// announcements, finish markers) yield `None`.
pub fn parse_delta(data: &str) -> Result<Option<String>, serde_json::Error> {
    let chunk: CompletionChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content))
}

/// Opens streaming chat completions against one endpoint.
#[derive(Clone)]
pub struct CompletionsClient {
    client: Client,
    url: String,
    model: String,
    csrf_token: Option<String>,
}

impl CompletionsClient {
    pub fn new(url: &str, model: &str, csrf_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
            model: model.to_string(),
            csrf_token,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn has_csrf_token(&self) -> bool {
        self.csrf_token.is_some()
    }

    /// Send the whole conversation and start streaming the reply.
    pub fn stream_chat(&self, messages: &[ChatMessage]) -> Result<EventSource, SseError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let request = SseRequest::post_json(&self.url, &request)?.csrf_token(self.csrf_token.clone());
        Ok(EventSource::connect(&self.client, request))
    }
}
