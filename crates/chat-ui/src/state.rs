//! UI-level state that drives rendering.
//! This is a read-only projection of the controller, updated by the
//! events it publishes on the EventBus.

use chat_core::controls::ControlState;
use chat_core::health::Connectivity;
use chat_types::event::ChatEvent;

/// Reply being streamed into a session
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingReply {
    pub session_id: String,
    pub text: String,
}

/// Inline error shown under a session's history until the next prompt
#[derive(Debug, Clone, PartialEq)]
pub struct InlineError {
    pub session_id: String,
    pub message: String,
}

/// Which parts of the page need redrawing after an event
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Redraw {
    pub sessions: bool,
    pub messages: bool,
    pub streaming: bool,
    pub controls: bool,
}

impl Redraw {
    pub fn any(&self) -> bool {
        self.sessions || self.messages || self.streaming || self.controls
    }

    fn merge(&mut self, other: Redraw) {
        self.sessions |= other.sessions;
        self.messages |= other.messages;
        self.streaming |= other.streaming;
        self.controls |= other.controls;
    }
}

/// State visible to the view
pub struct UiState {
    pub active_session: Option<String>,
    pub connectivity: Connectivity,
    pub generating: bool,
    pub streaming: Option<StreamingReply>,
    pub inline_error: Option<InlineError>,
    /// Sidebar filter
    pub search_query: String,
    /// Session whose context menu is open
    pub open_menu: Option<String>,
    /// Status line text
    pub status_text: String,
}

impl UiState {
    pub fn new() -> Self {
        Self {
            active_session: None,
            connectivity: Connectivity::Online,
            generating: false,
            streaming: None,
            inline_error: None,
            search_query: String::new(),
            open_menu: None,
            status_text: status_for(Connectivity::Online, false),
        }
    }

    /// Process events from the EventBus and update UI state
    pub fn process_events(&mut self, events: Vec<ChatEvent>) -> Redraw {
        let mut redraw = Redraw::default();
        for event in &events {
            redraw.merge(self.process_event(event));
        }
        redraw
    }

    pub fn process_event(&mut self, event: &ChatEvent) -> Redraw {
        let mut redraw = Redraw::default();
        match event {
            ChatEvent::SessionsChanged => {
                redraw.sessions = true;
            }
            ChatEvent::ActiveSessionChanged { session_id } => {
                self.active_session = Some(session_id.clone());
                self.open_menu = None;
                redraw.sessions = true;
                redraw.messages = true;
                redraw.streaming = true;
                redraw.controls = true;
            }
            ChatEvent::MessageAppended { session_id } => {
                if self.inline_error.as_ref().is_some_and(|e| &e.session_id == session_id) {
                    self.inline_error = None;
                }
                redraw.messages = self.is_active(session_id);
            }
            ChatEvent::GenerationStarted { session_id } => {
                self.generating = true;
                self.streaming = Some(StreamingReply {
                    session_id: session_id.clone(),
                    text: String::new(),
                });
                redraw.streaming = true;
                redraw.controls = true;
            }
            ChatEvent::StreamDelta { session_id, text } => {
                if let Some(reply) = self.streaming.as_mut().filter(|r| &r.session_id == session_id) {
                    reply.text.clone_from(text);
                    redraw.streaming = self.is_active(session_id);
                }
            }
            ChatEvent::GenerationCompleted { session_id, .. }
            | ChatEvent::GenerationStopped { session_id } => {
                self.end_generation();
                redraw.messages = self.is_active(session_id);
                redraw.streaming = true;
                redraw.controls = true;
            }
            ChatEvent::GenerationFailed { session_id, message } => {
                self.end_generation();
                self.inline_error = Some(InlineError {
                    session_id: session_id.clone(),
                    message: message.clone(),
                });
                redraw.messages = self.is_active(session_id);
                redraw.streaming = true;
                redraw.controls = true;
            }
            ChatEvent::ConnectivityChanged { online } => {
                self.connectivity = if *online {
                    Connectivity::Online
                } else {
                    Connectivity::Offline
                };
                redraw.controls = true;
            }
        }
        self.status_text = status_for(self.connectivity, self.generating);
        redraw
    }

    fn end_generation(&mut self) {
        self.generating = false;
        self.streaming = None;
    }

    fn is_active(&self, session_id: &str) -> bool {
        self.active_session.as_deref() == Some(session_id)
    }

    /// Streamed text to show under the active session, if it is the one generating.
    pub fn visible_stream(&self) -> Option<&str> {
        self.streaming
            .as_ref()
            .filter(|r| self.is_active(&r.session_id))
            .map(|r| r.text.as_str())
    }

    pub fn visible_error(&self) -> Option<&str> {
        self.inline_error
            .as_ref()
            .filter(|e| self.is_active(&e.session_id))
            .map(|e| e.message.as_str())
    }

    pub fn controls(&self) -> ControlState {
        ControlState::derive(self.connectivity, self.generating)
    }

    /// Open `id`'s menu, or close it if it is already open. Returns whether it is now open.
    pub fn toggle_menu(&mut self, id: &str) -> bool {
        if self.open_menu.as_deref() == Some(id) {
            self.open_menu = None;
            false
        } else {
            self.open_menu = Some(id.to_string());
            true
        }
    }

    pub fn close_menu(&mut self) {
        self.open_menu = None;
    }

    pub fn is_busy(&self) -> bool {
        self.generating
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

fn status_for(connectivity: Connectivity, generating: bool) -> String {
    match (connectivity, generating) {
        (Connectivity::Offline, _) => "Backend Offline".to_string(),
        (Connectivity::Online, true) => "Generating...".to_string(),
        (Connectivity::Online, false) => "Backend Online".to_string(),
    }
}
