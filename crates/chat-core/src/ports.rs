//! Port traits at the hexagonal architecture boundary.
//!
//! These traits are defined here in `chat-core` (pure Rust).
//! Implementations live in `chat-platform` (browser adapters).
//! The core never imports platform code; it only depends on these traits.

use std::pin::Pin;
use async_trait::async_trait;
use futures::Stream;
use chat_types::{Result, wire::ChatWireRequest};

// ─── Storage Port ────────────────────────────────────────────

/// Browser-local key/value store holding string blobs.
pub trait StoragePort {
    /// Get a value by key
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value
    fn remove(&self, key: &str) -> Result<()>;

    /// Name of this backend (for logging/debug)
    fn backend_name(&self) -> &str;
}

// ─── Chat Backend Port ───────────────────────────────────────

/// Raw response body of a chat request, chunk by chunk.
///
/// A non-success HTTP status surfaces as a single `Err` item.
/// Dropping the stream must abort the underlying request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>>>>;

#[async_trait(?Send)]
pub trait ChatBackendPort {
    /// Probe the liveness endpoint. Returns the HTTP status of any response;
    /// `Err` on network failure or when `timeout_ms` elapses first.
    async fn health(&self, timeout_ms: u64) -> Result<u16>;

    /// Open a streaming chat completion.
    fn open_chat(&self, req: ChatWireRequest) -> ByteStream;
}

// ─── Highlighter Port ────────────────────────────────────────

/// Syntax highlighter producing HTML for a code block body.
pub trait Highlighter {
    /// Whether `lang` is a language the highlighter knows by name
    fn supports(&self, lang: &str) -> bool;

    /// Highlight with an explicit language
    fn highlight(&self, code: &str, lang: &str) -> Result<String>;

    /// Highlight with automatic language detection
    fn highlight_auto(&self, code: &str) -> Result<String>;
}
