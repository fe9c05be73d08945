//! Session store: the ordered collection of chat sessions.
//!
//! Owns the sessions and the active-session pointer and writes both through
//! the [`StoragePort`] after every mutation. Invariants kept here:
//! - pinned sessions sort before unpinned ones, stable within each group;
//! - ids are unique;
//! - after `load()` the collection is never empty.

use std::rc::Rc;
use chat_types::{
    config::StorageKeys,
    message::{Message, Role},
    session::{self, ChatSession},
};
use crate::ports::StoragePort;

pub struct SessionStore {
    sessions: Vec<ChatSession>,
    current: Option<String>,
    storage: Rc<dyn StoragePort>,
    keys: StorageKeys,
    default_persona: String,
}

/// Outcome of recording a user prompt into a session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPrompt {
    /// Messages preceding the new prompt
    pub history: Vec<Message>,
    /// Persona in effect for the session
    pub persona: String,
    /// The prompt was the first message and titled the session
    pub first_message: bool,
}

impl SessionStore {
    pub fn new(storage: Rc<dyn StoragePort>, keys: StorageKeys, default_persona: impl Into<String>) -> Self {
        Self {
            sessions: Vec::new(),
            current: None,
            storage,
            keys,
            default_persona: default_persona.into(),
        }
    }

    /// Read the persisted collection. Missing or corrupt data yields a fresh session.
    pub fn load(&mut self) {
        let mut sessions = self.read_sessions();
        let before = sessions.len();
        let mut seen = std::collections::HashSet::new();
        sessions.retain(|s| seen.insert(s.id.clone()));
        if sessions.len() != before {
            log::warn!("Dropped {} sessions with duplicate ids", before - sessions.len());
        }
        self.sessions = sessions;
        self.sort();

        if self.sessions.is_empty() {
            self.create();
            return;
        }

        let persisted = match self.storage.get(&self.keys.current) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Could not read active session: {}", e);
                None
            }
        };
        self.current = persisted
            .filter(|id| self.contains(id))
            .or_else(|| self.sessions.first().map(|s| s.id.clone()));
        log::info!(
            "Loaded {} sessions from {}",
            self.sessions.len(),
            self.storage.backend_name()
        );
    }

    fn read_sessions(&self) -> Vec<ChatSession> {
        let raw = match self.storage.get(&self.keys.sessions) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("Could not read sessions: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<ChatSession>>(&raw) {
            Ok(sessions) => sessions,
            Err(e) => {
                log::warn!("Persisted sessions are unreadable, starting fresh: {}", e);
                Vec::new()
            }
        }
    }

    // ─── Accessors ───────────────────────────────────────────

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&ChatSession> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    /// Sessions whose title or any message contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<&ChatSession> {
        let needle = query.trim().to_lowercase();
        self.sessions.iter().filter(|s| s.matches(&needle)).collect()
    }

    // ─── Mutations ───────────────────────────────────────────

    /// Insert a fresh session, make it current and return its id.
    pub fn create(&mut self) -> String {
        let id = self.unique_id();
        self.sessions
            .insert(0, ChatSession::new(id.clone(), self.default_persona.clone()));
        self.current = Some(id.clone());
        self.persist();
        id
    }

    fn unique_id(&self) -> String {
        let base = session::new_session_id();
        let mut candidate = base.clone();
        let mut n = 0u32;
        while self.contains(&candidate) {
            n += 1;
            candidate = format!("{}-{}", base, n);
        }
        candidate
    }

    pub fn select(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.current = Some(id.to_string());
        self.persist();
        true
    }

    pub fn rename(&mut self, id: &str, new_title: &str) -> bool {
        let title = new_title.trim();
        if title.is_empty() {
            return false;
        }
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        session.title = title.to_string();
        self.persist();
        true
    }

    pub fn toggle_pin(&mut self, id: &str) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        session.pinned = !session.pinned;
        self.persist();
        true
    }

    /// Remove a session. The last session is immediately replaced by a fresh one.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        self.sessions.remove(index);

        if self.sessions.is_empty() {
            self.create();
            return true;
        }
        if self.current.as_deref() == Some(id) {
            self.current = self.sessions.first().map(|s| s.id.clone());
        }
        self.persist();
        true
    }

    /// Move the session at `from` to `to`. Rejected across the pinned boundary.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        let len = self.sessions.len();
        if from >= len || to >= len || from == to {
            return false;
        }
        if self.sessions[from].pinned != self.sessions[to].pinned {
            return false;
        }
        let moved = self.sessions.remove(from);
        self.sessions.insert(to, moved);
        self.persist();
        true
    }

    /// Change the persona of a session that has no messages yet.
    pub fn set_persona(&mut self, id: &str, persona: &str) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        if session.is_persona_locked() {
            return false;
        }
        session.persona = persona.to_string();
        self.persist();
        true
    }

    /// Append to a session's history. Silently ignored when the session is gone.
    pub fn append_message(&mut self, id: &str, role: Role, content: &str) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) else {
            log::debug!("Dropping {} message for missing session {}", role.as_str(), id);
            return false;
        };
        session.messages.push(Message::new(role, content));
        self.persist();
        true
    }

    /// Record a user prompt: the first prompt titles the session and locks
    /// its persona, then the prompt is appended and persisted.
    pub fn record_prompt(&mut self, id: &str, text: &str, persona: &str) -> Option<RecordedPrompt> {
        let session = self.sessions.iter_mut().find(|s| s.id == id)?;
        let history = session.messages.clone();
        let first_message = history.is_empty();
        if first_message {
            session.title = session::title_from_prompt(text);
            session.persona = persona.to_string();
        }
        session.messages.push(Message::user(text));
        let persona = session.persona.clone();
        self.persist();
        Some(RecordedPrompt {
            history,
            persona,
            first_message,
        })
    }

    /// Replace the whole collection. `sessions` must be non-empty with unique ids.
    /// The first session in sorted order becomes current.
    pub fn replace_all(&mut self, sessions: Vec<ChatSession>) {
        self.sessions = sessions;
        if self.sessions.is_empty() {
            self.create();
            return;
        }
        self.sort();
        self.current = self.sessions.first().map(|s| s.id.clone());
        self.persist();
    }

    // ─── Persistence ─────────────────────────────────────────

    /// Stable partition: pinned first, original order otherwise.
    pub fn sort(&mut self) {
        self.sessions.sort_by_key(|s| !s.pinned);
    }

    pub fn to_json(&self) -> chat_types::Result<String> {
        Ok(serde_json::to_string(&self.sessions)?)
    }

    fn persist(&mut self) {
        self.sort();
        match self.to_json() {
            Ok(json) => {
                if let Err(e) = self.storage.set(&self.keys.sessions, &json) {
                    log::warn!("Failed to persist sessions: {}", e);
                }
            }
            Err(e) => log::warn!("Failed to serialize sessions: {}", e),
        }
        let result = match &self.current {
            Some(id) => self.storage.set(&self.keys.current, id),
            None => self.storage.remove(&self.keys.current),
        };
        if let Err(e) = result {
            log::warn!("Failed to persist active session: {}", e);
        }
    }
}
