//! View nodes for messages and the session sidebar.

use chat_core::ports::Highlighter;
use chat_core::store::SessionStore;
use chat_types::message::{Message, Role};
use crate::markdown::{escape_html, render_markdown};

pub const COPY_LABEL: &str = "Copy";
pub const COPIED_LABEL: &str = "Copied!";
/// How long a copy button shows its confirmation before reverting
pub const COPY_FEEDBACK_MS: u32 = 2000;

pub const EMPTY_CHAT_HTML: &str = "<div class=\"empty-chat\">Start chatting...</div>";

/// A rendered chat bubble
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    /// CSS class list for the bubble
    pub class: &'static str,
    pub html: String,
}

/// Escaped plain text with line breaks preserved. Never markdown.
pub fn render_user_text(text: &str) -> String {
    escape_html(text).replace('\n', "<br>")
}

pub fn render_message(message: &Message, highlighter: &dyn Highlighter) -> MessageView {
    match message.role {
        Role::User => MessageView {
            class: "message user",
            html: render_user_text(&message.content),
        },
        Role::Assistant => MessageView {
            class: "message assistant",
            html: render_markdown(&message.content, highlighter),
        },
    }
}

pub fn render_messages(messages: &[Message], highlighter: &dyn Highlighter) -> Vec<MessageView> {
    messages
        .iter()
        .map(|m| render_message(m, highlighter))
        .collect()
}

/// The in-progress assistant bubble, re-rendered from the accumulated text.
pub fn render_streaming(text: &str, highlighter: &dyn Highlighter) -> MessageView {
    MessageView {
        class: "message assistant streaming",
        html: render_markdown(text, highlighter),
    }
}

/// Inline error shown in place of a failed reply. Not persisted.
pub fn render_error(message: &str) -> MessageView {
    MessageView {
        class: "message assistant error",
        html: format!("<span class=\"error-text\">Error: {}</span>", escape_html(message)),
    }
}

/// One entry of the sidebar list
#[derive(Debug, Clone, PartialEq)]
pub struct SessionListItem {
    pub id: String,
    pub title: String,
    pub pinned: bool,
    pub active: bool,
    /// Drag-and-drop is only offered on the unfiltered list
    pub draggable: bool,
}

/// Sidebar entries matching `query`, in collection order.
pub fn session_list(store: &SessionStore, query: &str) -> Vec<SessionListItem> {
    let current = store.current_id();
    let draggable = query.trim().is_empty();
    store
        .search(query)
        .into_iter()
        .map(|s| SessionListItem {
            id: s.id.clone(),
            title: s.title.clone(),
            pinned: s.pinned,
            active: current == Some(s.id.as_str()),
            draggable,
        })
        .collect()
}

/// Split list items into the pinned and unpinned groups.
pub fn partition_pinned(items: Vec<SessionListItem>) -> (Vec<SessionListItem>, Vec<SessionListItem>) {
    items.into_iter().partition(|item| item.pinned)
}

/// Inner markup of a sidebar tab: title, menu button and the context menu.
/// Actions are tagged with `data-action` for delegated click handling.
pub fn session_item_html(item: &SessionListItem, menu_open: bool) -> String {
    let pin_icon = if item.pinned {
        "<span class=\"pinned-icon\">📌</span>"
    } else {
        ""
    };
    let pin_label = if item.pinned { "Unpin Chat" } else { "Pin Chat" };
    let menu_class = if menu_open {
        "dropdown-menu show"
    } else {
        "dropdown-menu"
    };
    format!(
        "<div class=\"chat-title-wrapper\">{}<span class=\"chat-title\">{}</span></div>\
         <button class=\"menu-btn\" type=\"button\" data-action=\"menu\">⋮</button>\
         <div class=\"{}\">\
         <div class=\"dropdown-item\" data-action=\"rename\">Rename</div>\
         <div class=\"dropdown-item\" data-action=\"pin\">{}</div>\
         <div class=\"dropdown-item delete\" data-action=\"delete\">Delete</div>\
         </div>",
        pin_icon,
        escape_html(&item.title),
        menu_class,
        pin_label
    )
}
