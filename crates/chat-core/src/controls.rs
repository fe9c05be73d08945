//! Which input affordances are enabled.
//!
//! Offline always locks input and send. Online unlocks them unless a
//! generation is running. Stop is available exactly while generating.

use crate::health::Connectivity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub input_enabled: bool,
    pub send_enabled: bool,
    pub stop_enabled: bool,
}

impl ControlState {
    pub fn derive(connectivity: Connectivity, generating: bool) -> Self {
        let unlocked = connectivity.is_online() && !generating;
        Self {
            input_enabled: unlocked,
            send_enabled: unlocked,
            stop_enabled: generating,
        }
    }
}
