//! Chat client core.
//!
//! Everything here is platform-agnostic: browser adapters plug in through
//! the traits in [`ports`], and the view listens on the [`event_bus`].

pub mod ports;
pub mod event_bus;
pub mod store;
pub mod health;
pub mod decode;
pub mod generation;
pub mod controls;
pub mod transfer;
pub mod controller;

#[cfg(test)]
mod tests;
