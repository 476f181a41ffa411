use std::time::Duration;
use thiserror::Error;

/// Failures reaching the remote service that hosts the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("remote service unavailable: {0}")]
    Unavailable(String),
    #[error("timed out after {0:?} waiting for the remote service")]
    Timeout(Duration),
    #[error("remote service call failed: {0}")]
    Call(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("failed to load engine resources")]
    LoadFailed,
    /// Last recorded failure, reported while another load is in flight.
    #[error("{0}")]
    Failed(String),
    #[error("engine resources are not loaded")]
    NotLoaded,
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("no session log named {0}")]
    NotFound(String),
    #[error("invalid session log name: {0}")]
    InvalidName(String),
}
