//! Request body of the chat-completion endpoint.

use serde::{Deserialize, Serialize};
use crate::message::Message;

/// Body of `POST /chat`.
///
/// `temperature` travels as a string; the endpoint parses it itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatWireRequest {
    pub message: String,
    pub persona: String,
    pub history: Vec<Message>,
    pub temperature: String,
}

impl ChatWireRequest {
    pub fn new(
        message: impl Into<String>,
        persona: impl Into<String>,
        history: Vec<Message>,
        temperature: f32,
    ) -> Self {
        Self {
            message: message.into(),
            persona: persona.into(),
            history,
            temperature: temperature.to_string(),
        }
    }
}
