//! Rendering bridge: turns sessions and messages into HTML fragments and
//! keeps the view-side projection of controller events. No DOM access here;
//! `chat-app` owns the document.

pub mod markdown;
pub mod render;
pub mod state;
