//! Supervisor for an external task-chain automation engine.
//!
//! The engine is reached through the [`engine::RemoteService`] seam and
//! reports progress as integer-coded JSON callbacks. This crate drives its
//! start/stop handshakes ([`orchestrator`]), turns callbacks into state
//! changes and log lines ([`callback`]) and keeps a bounded,
//! session-bracketed log ([`logs`], [`storage`]).

pub mod callback;
pub mod engine;
pub mod error;
pub mod health;
pub mod logs;
pub mod model;
pub mod orchestrator;
pub mod resource;
pub mod storage;
