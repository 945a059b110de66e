//! Crate-wide error types

use thiserror::Error;

/// Errors surfaced by training, data loading and persistence.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration. Always fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The training loss became NaN or infinite. Fatal, never retried.
    #[error("Loss is {value} at step {step}, stopping training")]
    NonFiniteLoss { value: f32, step: usize },

    /// Dataset problems: empty folder, unreadable image, ...
    #[error("Data error: {0}")]
    Data(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
