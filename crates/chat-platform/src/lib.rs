//! Browser adapters for the chat-core ports.

pub mod storage;
pub mod backend;
pub mod highlight;

pub use backend::HttpChatBackend;
pub use highlight::HljsHighlighter;
