use serde::{Deserialize, Serialize};
use crate::message::Message;

pub const DEFAULT_TITLE: &str = "New Conversation";

/// Number of characters of the first prompt used as an automatic title.
pub const TITLE_PREFIX_CHARS: usize = 30;

const TITLE_ELLIPSIS: &str = "...";

/// Assistant message persisted when the user stops a generation.
pub const STOPPED_BY_USER: &str = "[Generation stopped by user]";

/// A persisted conversation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub persona: String,
}

impl ChatSession {
    pub fn new(id: String, persona: impl Into<String>) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            pinned: false,
            messages: Vec::new(),
            persona: persona.into(),
        }
    }

    /// The persona can only be edited before the first message is sent.
    pub fn is_persona_locked(&self) -> bool {
        !self.messages.is_empty()
    }

    /// Case-insensitive match on the title or any message body.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(needle)
            || self
                .messages
                .iter()
                .any(|m| m.content.to_lowercase().contains(needle))
    }
}

/// Title derived from the first prompt of a session.
pub fn title_from_prompt(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > TITLE_PREFIX_CHARS {
        let prefix: String = text.chars().take(TITLE_PREFIX_CHARS).collect();
        format!("{}{}", prefix, TITLE_ELLIPSIS)
    } else {
        text.to_string()
    }
}

/// Opaque time-derived session id. Callers must check for collisions.
pub fn new_session_id() -> String {
    format!("chat-{}", chrono::Utc::now().timestamp_millis())
}
