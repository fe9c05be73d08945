use serde::{Deserialize, Serialize};

pub const DEFAULT_PERSONA: &str = "You are a helpful AI assistant.";

/// Static client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Prefix for endpoint paths; empty means same origin
    pub api_base: String,
    pub health_path: String,
    pub chat_path: String,
    pub probe_timeout_ms: u64,
    pub probe_interval_ms: u32,
    pub storage: StorageKeys,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            health_path: "/health".to_string(),
            chat_path: "/chat".to_string(),
            probe_timeout_ms: 3000,
            probe_interval_ms: 5000,
            storage: StorageKeys::default(),
        }
    }
}

impl ClientConfig {
    pub fn health_url(&self) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), self.health_path)
    }

    pub fn chat_url(&self) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), self.chat_path)
    }
}

/// Keys used in the browser-local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageKeys {
    pub sessions: String,
    pub current: String,
    pub settings: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            sessions: "chat:sessions".to_string(),
            current: "chat:current".to_string(),
            settings: "chat:settings".to_string(),
        }
    }
}

/// User-adjustable settings, persisted alongside the sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub temperature: f32,
    pub default_persona: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            default_persona: DEFAULT_PERSONA.to_string(),
        }
    }
}

impl ChatSettings {
    /// Clamp to the range the endpoint accepts.
    pub fn set_temperature(&mut self, value: f32) {
        self.temperature = if value.is_finite() { value.clamp(0.0, 2.0) } else { 0.7 };
    }
}
