//! Streaming generation: single-flight guard and stream consumption.
//!
//! At most one generation is in flight. `GenerationGuard::begin` checks and
//! sets the state in one step (single-threaded, no await in between) and
//! hands out a [`GenerationTicket`]; dropping the ticket returns the guard
//! to idle on every terminal path.
//!
//! Cancellation is cooperative: `cancel()` trips the ticket's abort handle,
//! and the wrapped stream yields nothing further, even chunks the transport
//! already buffered.

use std::cell::{Cell, RefCell};
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use futures::StreamExt;
use chat_types::{ChatError, Result};
use crate::decode::Utf8ChunkDecoder;
use crate::ports::ByteStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Generating { session_id: String },
}

pub struct GenerationGuard {
    state: RefCell<GenerationState>,
    abort: RefCell<Option<AbortHandle>>,
    cancelled: Cell<bool>,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(GenerationState::Idle),
            abort: RefCell::new(None),
            cancelled: Cell::new(false),
        }
    }

    pub fn state(&self) -> GenerationState {
        self.state.borrow().clone()
    }

    pub fn is_generating(&self) -> bool {
        !matches!(*self.state.borrow(), GenerationState::Idle)
    }

    /// Claim the guard for `session_id`. Fails with `Busy` if a generation is running.
    pub fn begin(&self, session_id: &str) -> Result<GenerationTicket<'_>> {
        if self.is_generating() {
            return Err(ChatError::Busy);
        }
        let (handle, registration) = AbortHandle::new_pair();
        *self.state.borrow_mut() = GenerationState::Generating {
            session_id: session_id.to_string(),
        };
        *self.abort.borrow_mut() = Some(handle);
        self.cancelled.set(false);
        Ok(GenerationTicket {
            guard: self,
            registration: RefCell::new(Some(registration)),
        })
    }

    /// Cancel the in-flight generation. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match self.abort.borrow().as_ref() {
            Some(handle) => {
                self.cancelled.set(true);
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn finish(&self) {
        *self.abort.borrow_mut() = None;
        *self.state.borrow_mut() = GenerationState::Idle;
    }
}

impl Default for GenerationGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of an in-flight generation. Resets the guard when dropped.
pub struct GenerationTicket<'a> {
    guard: &'a GenerationGuard,
    registration: RefCell<Option<AbortRegistration>>,
}

impl GenerationTicket<'_> {
    pub fn was_cancelled(&self) -> bool {
        self.guard.cancelled.get()
    }

    /// Wrap `stream` so that cancelling this ticket ends it. A ticket
    /// governs exactly one stream; a second call fails.
    fn abortable(&self, stream: ByteStream) -> Result<Abortable<ByteStream>> {
        let registration = self.registration.borrow_mut().take().ok_or_else(|| {
            ChatError::Other("generation ticket already attached to a stream".to_string())
        })?;
        Ok(Abortable::new(stream, registration))
    }
}

impl Drop for GenerationTicket<'_> {
    fn drop(&mut self) {
        self.guard.finish();
    }
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Stream reached its end; holds the full decoded text
    Completed(String),
    /// The ticket was cancelled before the end
    Cancelled,
    /// Transport failure, possibly after some text was received
    Failed(ChatError),
}

/// Consume `stream` chunk by chunk. `on_text` receives the accumulated text
/// after every chunk that decoded to at least one character, before the
/// next chunk is requested.
pub async fn consume_stream(
    stream: ByteStream,
    ticket: &GenerationTicket<'_>,
    mut on_text: impl FnMut(&str),
) -> StreamOutcome {
    let mut stream = match ticket.abortable(stream) {
        Ok(stream) => stream,
        Err(e) => return StreamOutcome::Failed(e),
    };
    let mut decoder = Utf8ChunkDecoder::new();
    let mut text = String::new();
    let mut chunks = 0usize;

    while let Some(item) = stream.next().await {
        match item {
            Ok(bytes) => {
                chunks += 1;
                let piece = decoder.decode(&bytes);
                if piece.is_empty() {
                    continue;
                }
                text.push_str(&piece);
                on_text(&text);
            }
            Err(e) => {
                log::debug!("Stream failed after {} chunks", chunks);
                return StreamOutcome::Failed(e);
            }
        }
    }

    if ticket.was_cancelled() {
        log::debug!("Stream cancelled after {} chunks", chunks);
        return StreamOutcome::Cancelled;
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        text.push_str(&tail);
        on_text(&text);
    }
    log::debug!("Stream completed: {} chunks, {} bytes", chunks, text.len());
    StreamOutcome::Completed(text)
}
