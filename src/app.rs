use tracing::{debug, info, trace, warn};

use crate::completions::{parse_delta, CompletionsClient, DONE_SENTINEL};
use crate::error::SseError;
use crate::sse::{EventSource, SseEvent};
use crate::state::{ChatMessage, ChatRole};

pub const CONNECT_ERROR: &str = "Failed to connect to backend";
pub const STREAM_ERROR: &str = "Streaming connection error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Streaming,
    Error,
}

/// What the stream side of the event loop produced.
#[derive(Debug)]
pub enum StreamUpdate {
    Event(SseEvent),
    Ended,
}

/// One request/response cycle.
struct StreamSession {
    source: Option<EventSource>,
    buffer: String,
}

impl StreamSession {
    fn close(mut self) {
        if let Some(source) = self.source.as_mut() {
            source.close();
        }
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Conversation
    pub messages: Vec<ChatMessage>,
    pub loading: bool,
    pub error: Option<String>,

    // Input box
    pub input: String,
    pub cursor: usize,

    // Chat view
    pub scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub animation_frame: u8,

    client: CompletionsClient,
    session: Option<StreamSession>,
}

impl App {
    pub fn new(client: CompletionsClient) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            messages: Vec::new(),
            loading: false,
            error: None,
            input: String::new(),
            cursor: 0,
            scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
            client,
            session: None,
        }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn status(&self) -> Status {
        if self.loading {
            Status::Streaming
        } else if self.error.is_some() {
            Status::Error
        } else {
            Status::Idle
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.session.is_some()
    }

    /// Accept the current input as a user turn.
    ///
    /// Returns the conversation to send, or `None` when the input is blank or
    /// a reply is still streaming. A `None` leaves every field untouched.
    pub fn submit(&mut self) -> Option<Vec<ChatMessage>> {
        if self.input.trim().is_empty() || self.loading || self.session.is_some() {
            return None;
        }

        let content = std::mem::take(&mut self.input);
        self.cursor = 0;
        self.messages.push(ChatMessage::user(content));
        self.error = None;
        self.loading = true;
        self.session = Some(StreamSession {
            source: None,
            buffer: String::new(),
        });
        self.scroll_to_bottom();

        Some(self.messages.clone())
    }

    /// Submit the input and open the stream for it.
    pub fn send(&mut self) {
        let Some(history) = self.submit() else {
            return;
        };

        info!(turns = history.len(), model = self.client.model(), "sending chat request");
        match self.client.stream_chat(&history) {
            Ok(source) => self.attach(source),
            Err(e) => self.handle_event(SseEvent::Error(e)),
        }
    }

    /// Bind an opened stream to the pending session.
    pub fn attach(&mut self, source: EventSource) {
        match self.session.as_mut() {
            Some(session) => session.source = Some(source),
            None => {
                let mut source = source;
                source.close();
            }
        }
    }

    /// Wait for the active stream. Never resolves while no stream is attached.
    pub async fn next_stream_update(&mut self) -> StreamUpdate {
        let Some(source) = self.session.as_mut().and_then(|s| s.source.as_mut()) else {
            return std::future::pending().await;
        };

        match source.next().await {
            Some(event) => StreamUpdate::Event(event),
            None => StreamUpdate::Ended,
        }
    }

    pub fn apply_stream_update(&mut self, update: StreamUpdate) {
        match update {
            StreamUpdate::Event(event) => self.handle_event(event),
            StreamUpdate::Ended => {
                if self.session.is_some() {
                    debug!("stream ended without sentinel");
                    self.finish_stream();
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: SseEvent) {
        if self.session.is_none() {
            trace!(?event, "dropping event for closed session");
            return;
        }

        match event {
            SseEvent::Message(data) => self.on_message(&data),
            SseEvent::Error(err) => self.on_error(err),
        }
    }

    /// Abort the in-flight reply, keeping whatever text already arrived.
    pub fn cancel(&mut self) {
        if let Some(session) = self.session.take() {
            info!(received = session.buffer.len(), "stream cancelled");
            session.close();
            self.loading = false;
        }
    }

    fn on_message(&mut self, data: &str) {
        if data == DONE_SENTINEL {
            debug!("received done sentinel");
            self.finish_stream();
            return;
        }

        let delta = match parse_delta(data) {
            Ok(Some(delta)) => delta,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, data, "ignoring malformed frame");
                return;
            }
        };

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.buffer.push_str(&delta);
        let content = session.buffer.clone();

        match self.messages.last_mut() {
            Some(last) if last.role == ChatRole::Assistant => last.content = content,
            _ => self.messages.push(ChatMessage::assistant(content)),
        }
        self.scroll_to_bottom();
    }

    fn on_error(&mut self, err: SseError) {
        warn!(error = %err, "chat stream failed");
        let message = if err.is_setup() { CONNECT_ERROR } else { STREAM_ERROR };
        self.error = Some(message.to_string());
        self.loading = false;
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    fn finish_stream(&mut self) {
        self.loading = false;
        if let Some(session) = self.session.take() {
            info!(received = session.buffer.len(), "assistant reply complete");
            session.close();
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self) {
        self.scroll = self.scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_add(1);
    }

    /// Scroll chat to bottom so the newest text and the typing indicator are visible
    pub fn scroll_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in &self.messages {
            total_lines = total_lines.saturating_add(1); // Role line
            for line in msg.content.lines() {
                // Character count, not byte length
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 { 1 } else { char_count.div_ceil(wrap_width) };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        if self.loading {
            total_lines = total_lines.saturating_add(1);
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        self.scroll = total_lines.saturating_sub(visible_height);
    }

    pub fn clear_conversation(&mut self) {
        if self.loading {
            return;
        }
        self.messages.clear();
        self.error = None;
        self.scroll = 0;
    }
}
