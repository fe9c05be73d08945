//! Health monitor: `Online ⇄ Offline` driven by a liveness probe.
//!
//! Starts Online so the page does not flash an offline banner before the
//! first probe resolves. State writes are last-write-wins.

use std::cell::Cell;
use std::future::Future;
use futures::future::{self, Either};
use chat_types::{ChatError, Result};
use crate::ports::ChatBackendPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    /// Any 2xx status is healthy; other statuses, errors and timeouts are not.
    pub fn from_probe(result: &Result<u16>) -> Self {
        match result {
            Ok(status) if (200..300).contains(status) => Connectivity::Online,
            _ => Connectivity::Offline,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

pub struct HealthMonitor {
    state: Cell<Connectivity>,
    timeout_ms: u64,
}

impl HealthMonitor {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            state: Cell::new(Connectivity::Online),
            timeout_ms,
        }
    }

    pub fn state(&self) -> Connectivity {
        self.state.get()
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Store a new state. Returns true when it differs from the previous one.
    pub fn record(&self, next: Connectivity) -> bool {
        self.state.replace(next) != next
    }

    pub fn mark_offline(&self) -> bool {
        self.record(Connectivity::Offline)
    }

    /// Run one probe against the backend and classify the result.
    pub async fn check(&self, backend: &dyn ChatBackendPort) -> Connectivity {
        let result = backend.health(self.timeout_ms).await;
        if let Err(e) = &result {
            log::warn!("Health probe failed: {}", e);
        }
        Connectivity::from_probe(&result)
    }
}

/// Resolve `request`, or fail with `Timeout(timeout_ms)` if `timer` fires
/// first. The losing future is dropped.
pub async fn race_timeout<T>(
    request: impl Future<Output = Result<T>>,
    timer: impl Future<Output = ()>,
    timeout_ms: u64,
) -> Result<T> {
    futures::pin_mut!(request);
    futures::pin_mut!(timer);
    match future::select(request, timer).await {
        Either::Left((result, _)) => result,
        Either::Right(((), _)) => Err(ChatError::Timeout(timeout_ms)),
    }
}
