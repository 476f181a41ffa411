//! Engine lifecycle orchestration.
//!
//! This module owns the start/stop handshake with the engine, the shared
//! execution state, and the callback pump that feeds engine callbacks into the
//! connect handshake and the dispatcher. CLI layers call into it.

mod controller;
mod handshake;
mod state;

pub use controller::{build_connect_config, ExecutionOrchestrator};
pub use handshake::ConnectHandshake;
pub use state::ExecutionStateCell;
