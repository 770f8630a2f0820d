//! Error types for the focus_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for focus_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cycle configuration rejected (non-positive duration or cycle count)
    #[error("Invalid cycle configuration: {0}")]
    InvalidConfig(String),

    /// Action not permitted in the engine's current state
    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    /// Durable snapshot slot is unreadable or malformed
    #[error("Snapshot storage corrupt: {0}")]
    StorageCorrupt(String),

    /// Recording sink call failed or timed out
    #[error("Session submission failed: {0}")]
    SinkSubmission(String),
}
