//! Chat controller, the command interface of the client.
//!
//! Owns the session store, health monitor, generation guard and backend.
//! Every user action is a method call here; results come back as return
//! values and as [`ChatEvent`]s on the bus. Store borrows never span an
//! await point, and events are emitted only after borrows are released, so
//! listeners may call back into the controller.

use std::cell::RefCell;
use std::rc::Rc;
use chat_types::{
    ChatError, Result,
    config::{ChatSettings, ClientConfig},
    event::ChatEvent,
    message::Role,
    session::{ChatSession, STOPPED_BY_USER},
    wire::ChatWireRequest,
};
use crate::controls::ControlState;
use crate::event_bus::EventBus;
use crate::generation::{consume_stream, GenerationGuard, StreamOutcome};
use crate::health::{Connectivity, HealthMonitor};
use crate::ports::{ChatBackendPort, StoragePort};
use crate::store::SessionStore;
use crate::transfer;

/// A user prompt to send
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub session_id: String,
    pub text: String,
    /// Persona to lock in if this is the session's first message
    pub persona: String,
    pub temperature: f32,
}

/// How a send finished
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Completed { text: String },
    Stopped,
    Failed { message: String },
}

pub struct ChatController {
    config: ClientConfig,
    settings: RefCell<ChatSettings>,
    store: RefCell<SessionStore>,
    health: HealthMonitor,
    generation: GenerationGuard,
    storage: Rc<dyn StoragePort>,
    backend: Rc<dyn ChatBackendPort>,
    bus: EventBus,
}

impl ChatController {
    pub fn new(
        config: ClientConfig,
        storage: Rc<dyn StoragePort>,
        backend: Rc<dyn ChatBackendPort>,
        bus: EventBus,
    ) -> Self {
        let settings = restore_settings(storage.as_ref(), &config.storage.settings);
        let store = SessionStore::new(
            storage.clone(),
            config.storage.clone(),
            settings.default_persona.clone(),
        );
        Self {
            health: HealthMonitor::new(config.probe_timeout_ms),
            config,
            settings: RefCell::new(settings),
            store: RefCell::new(store),
            generation: GenerationGuard::new(),
            storage,
            backend,
            bus,
        }
    }

    /// Load persisted sessions and announce the initial state.
    pub fn load(&self) {
        let current = {
            let mut store = self.store.borrow_mut();
            store.load();
            store.current_id().map(String::from)
        };
        self.bus.emit(ChatEvent::SessionsChanged);
        if let Some(session_id) = current {
            self.bus.emit(ChatEvent::ActiveSessionChanged { session_id });
        }
    }

    // ─── Accessors ───────────────────────────────────────────

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn settings(&self) -> ChatSettings {
        self.settings.borrow().clone()
    }

    /// Read access to the store for rendering.
    pub fn with_store<R>(&self, f: impl FnOnce(&SessionStore) -> R) -> R {
        f(&self.store.borrow())
    }

    pub fn current_session(&self) -> Option<ChatSession> {
        self.store.borrow().current().cloned()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.health.state()
    }

    pub fn is_generating(&self) -> bool {
        self.generation.is_generating()
    }

    pub fn controls(&self) -> ControlState {
        ControlState::derive(self.health.state(), self.generation.is_generating())
    }

    // ─── Session commands ────────────────────────────────────

    pub fn new_chat(&self) -> String {
        let id = self.store.borrow_mut().create();
        self.bus.emit(ChatEvent::SessionsChanged);
        self.bus.emit(ChatEvent::ActiveSessionChanged { session_id: id.clone() });
        id
    }

    pub fn select(&self, id: &str) -> bool {
        let changed = self.store.borrow_mut().select(id);
        if changed {
            self.bus.emit(ChatEvent::ActiveSessionChanged { session_id: id.to_string() });
        }
        changed
    }

    pub fn rename(&self, id: &str, title: &str) -> bool {
        let changed = self.store.borrow_mut().rename(id, title);
        if changed {
            self.bus.emit(ChatEvent::SessionsChanged);
        }
        changed
    }

    pub fn toggle_pin(&self, id: &str) -> bool {
        let changed = self.store.borrow_mut().toggle_pin(id);
        if changed {
            self.bus.emit(ChatEvent::SessionsChanged);
        }
        changed
    }

    pub fn delete(&self, id: &str) -> bool {
        let (changed, before, after) = {
            let mut store = self.store.borrow_mut();
            let before = store.current_id().map(String::from);
            let changed = store.delete(id);
            (changed, before, store.current_id().map(String::from))
        };
        if !changed {
            return false;
        }
        self.bus.emit(ChatEvent::SessionsChanged);
        if before != after {
            if let Some(session_id) = after {
                self.bus.emit(ChatEvent::ActiveSessionChanged { session_id });
            }
        }
        true
    }

    pub fn reorder(&self, from: usize, to: usize) -> bool {
        let changed = self.store.borrow_mut().reorder(from, to);
        if changed {
            self.bus.emit(ChatEvent::SessionsChanged);
        }
        changed
    }

    /// Drag-and-drop form of `reorder`: move `dragged` onto `target`'s slot.
    pub fn reorder_by_id(&self, dragged: &str, target: &str) -> bool {
        let indices = {
            let store = self.store.borrow();
            store.index_of(dragged).zip(store.index_of(target))
        };
        match indices {
            Some((from, to)) => self.reorder(from, to),
            None => false,
        }
    }

    pub fn search(&self, query: &str) -> Vec<ChatSession> {
        self.store.borrow().search(query).into_iter().cloned().collect()
    }

    pub fn set_persona(&self, id: &str, persona: &str) -> bool {
        self.store.borrow_mut().set_persona(id, persona)
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut ChatSettings)) {
        let json = {
            let mut settings = self.settings.borrow_mut();
            f(&mut settings);
            serde_json::to_string(&*settings)
        };
        match json {
            Ok(json) => {
                if let Err(e) = self.storage.set(&self.config.storage.settings, &json) {
                    log::warn!("Failed to persist settings: {}", e);
                }
            }
            Err(e) => log::warn!("Failed to serialize settings: {}", e),
        }
    }

    // ─── Health ──────────────────────────────────────────────

    /// Run one liveness probe and publish a transition if the state flipped.
    pub async fn probe_health(&self) -> Connectivity {
        let next = self.health.check(self.backend.as_ref()).await;
        if self.health.record(next) {
            log::info!("Connectivity changed: {:?}", next);
            self.bus.emit(ChatEvent::ConnectivityChanged { online: next.is_online() });
        }
        next
    }

    fn mark_offline(&self) {
        if self.health.mark_offline() {
            log::info!("Connectivity changed: {:?}", Connectivity::Offline);
            self.bus.emit(ChatEvent::ConnectivityChanged { online: false });
        }
    }

    // ─── Generation ──────────────────────────────────────────

    /// Stop the in-flight generation, if any.
    pub fn stop(&self) -> bool {
        self.generation.cancel()
    }

    /// Send a prompt and stream the reply into the session.
    ///
    /// The prompt is persisted before the request opens. The reply is
    /// persisted as one message when the stream ends; a stop persists the
    /// stop marker instead; a failure persists nothing and marks the client
    /// offline until the next successful probe.
    pub async fn send(&self, req: SendRequest) -> Result<SendOutcome> {
        let text = req.text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !self.store.borrow().contains(&req.session_id) {
            return Err(ChatError::SessionNotFound(req.session_id));
        }

        let ticket = self.generation.begin(&req.session_id)?;
        let session_id = req.session_id.clone();

        let recorded = self
            .store
            .borrow_mut()
            .record_prompt(&session_id, text, &req.persona)
            .ok_or_else(|| ChatError::SessionNotFound(session_id.clone()))?;

        if recorded.first_message {
            self.bus.emit(ChatEvent::SessionsChanged);
        }
        self.bus.emit(ChatEvent::MessageAppended { session_id: session_id.clone() });
        self.bus.emit(ChatEvent::GenerationStarted { session_id: session_id.clone() });

        let wire = ChatWireRequest::new(text, recorded.persona, recorded.history, req.temperature);
        let stream = self.backend.open_chat(wire);

        let bus = self.bus.clone();
        let outcome = consume_stream(stream, &ticket, |accumulated| {
            bus.emit(ChatEvent::StreamDelta {
                session_id: session_id.clone(),
                text: accumulated.to_string(),
            });
        })
        .await;

        match outcome {
            StreamOutcome::Completed(reply) => {
                self.store
                    .borrow_mut()
                    .append_message(&session_id, Role::Assistant, &reply);
                drop(ticket);
                self.bus.emit(ChatEvent::GenerationCompleted {
                    session_id,
                    text: reply.clone(),
                });
                Ok(SendOutcome::Completed { text: reply })
            }
            StreamOutcome::Cancelled => {
                self.store
                    .borrow_mut()
                    .append_message(&session_id, Role::Assistant, STOPPED_BY_USER);
                drop(ticket);
                log::info!("Generation stopped by user");
                self.bus.emit(ChatEvent::GenerationStopped { session_id });
                Ok(SendOutcome::Stopped)
            }
            StreamOutcome::Failed(e) => {
                drop(ticket);
                log::error!("Generation failed: {}", e);
                self.mark_offline();
                let message = e.to_string();
                self.bus.emit(ChatEvent::GenerationFailed {
                    session_id,
                    message: message.clone(),
                });
                Ok(SendOutcome::Failed { message })
            }
        }
    }

    // ─── Import / export ─────────────────────────────────────

    pub fn export_json(&self) -> Result<String> {
        transfer::export_json(self.store.borrow().sessions())
    }

    pub fn export_filename(&self) -> String {
        transfer::export_filename_today()
    }

    /// Validate an import document without touching state.
    pub fn parse_import(&self, json: &str) -> Result<Vec<ChatSession>> {
        transfer::parse_import(json)
    }

    /// Replace the collection with validated sessions and switch to the first one.
    pub fn import_sessions(&self, sessions: Vec<ChatSession>) {
        let count = sessions.len();
        let current = {
            let mut store = self.store.borrow_mut();
            store.replace_all(sessions);
            store.current_id().map(String::from)
        };
        log::info!("Imported {} sessions", count);
        self.bus.emit(ChatEvent::SessionsChanged);
        if let Some(session_id) = current {
            self.bus.emit(ChatEvent::ActiveSessionChanged { session_id });
        }
    }

    /// Parse and apply in one step. Returns the number of imported sessions.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let sessions = self.parse_import(json)?;
        let count = sessions.len();
        self.import_sessions(sessions);
        Ok(count)
    }
}

fn restore_settings(storage: &dyn StoragePort, key: &str) -> ChatSettings {
    match storage.get(key) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable settings: {}", e);
            ChatSettings::default()
        }),
        Ok(None) => ChatSettings::default(),
        Err(e) => {
            log::warn!("Could not read settings: {}", e);
            ChatSettings::default()
        }
    }
}
