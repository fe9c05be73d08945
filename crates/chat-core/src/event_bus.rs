//! Simple event bus for decoupled communication between the controller and the view.
//!
//! The bus is single-threaded (WASM constraint) and uses interior mutability
//! via RefCell. Subscribed listeners are called synchronously on `emit`, so a
//! stream chunk is rendered before the controller reads the next one. With no
//! listener attached, events are buffered until drained.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use chat_types::event::ChatEvent;

type Listener = Box<dyn Fn(&ChatEvent)>;

/// Shared event bus, cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Rc<Inner>,
}

struct Inner {
    pending: RefCell<VecDeque<ChatEvent>>,
    listeners: RefCell<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                pending: RefCell::new(VecDeque::new()),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Attach a listener. Must not be called from inside a listener.
    pub fn subscribe(&self, listener: impl Fn(&ChatEvent) + 'static) {
        self.inner.listeners.borrow_mut().push(Box::new(listener));
    }

    /// Publish an event. Called by the controller.
    pub fn emit(&self, event: ChatEvent) {
        let listeners = self.inner.listeners.borrow();
        if listeners.is_empty() {
            self.inner.pending.borrow_mut().push_back(event);
            return;
        }
        for listener in listeners.iter() {
            listener(&event);
        }
    }

    /// Drain all buffered events.
    pub fn drain(&self) -> Vec<ChatEvent> {
        self.inner.pending.borrow_mut().drain(..).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.pending.borrow().is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
