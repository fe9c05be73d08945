//! Chat App, the WASM entry point.
//!
//! This crate is the composition root (DI wiring layer).
//! It assembles the platform adapters, hands them to the controller and
//! binds the page's DOM to it.

mod app;
mod dom;

use wasm_bindgen::prelude::*;

use chat_types::config::ClientConfig;

/// Runs when index.html loads the module
#[wasm_bindgen(start)]
pub fn main() -> Result<(), JsValue> {
    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Chat client starting...");

    app::ChatApp::start(ClientConfig::default())?;
    Ok(())
}
