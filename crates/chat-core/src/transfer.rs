//! Export and import of the session collection as JSON.

use std::collections::HashSet;
use chrono::NaiveDate;
use serde_json::Value;
use chat_types::{ChatError, Result, session::ChatSession};

/// Pretty-printed JSON array of sessions.
pub fn export_json(sessions: &[ChatSession]) -> Result<String> {
    Ok(serde_json::to_string_pretty(sessions)?)
}

pub fn export_filename(date: NaiveDate) -> String {
    format!("chat-history-{}.json", date.format("%Y-%m-%d"))
}

pub fn export_filename_today() -> String {
    export_filename(chrono::Local::now().date_naive())
}

/// Validate an import document. Nothing is mutated here.
pub fn parse_import(json: &str) -> Result<Vec<ChatSession>> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| ChatError::Import(format!("invalid JSON: {}", e)))?;

    let Value::Array(items) = value else {
        return Err(ChatError::Import("expected an array of sessions".to_string()));
    };
    if items.is_empty() {
        return Err(ChatError::Import("the file contains no sessions".to_string()));
    }

    let sessions = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<ChatSession>(item)
                .map_err(|e| ChatError::Import(format!("record {}: {}", i, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    if let Some(dup) = sessions.iter().find(|s| !seen.insert(s.id.as_str())) {
        return Err(ChatError::Import(format!("duplicate session id {}", dup.id)));
    }

    Ok(sessions)
}
