//! Hearth gateway -- the agent runtime behind the WebSocket channel.
//!
//! Wires the Store, config registry, model router, tool invoker,
//! session layer, and the turn runtime together. `main.rs` is the
//! thin binary over [`bootstrap`] + axum.

pub mod bootstrap;
pub mod plugins;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod state;
