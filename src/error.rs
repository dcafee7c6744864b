//! Error types for the keyecho pipeline

use thiserror::Error;

/// Main error type for the decoding pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad format: {0}")]
    BadFormat(String),

    #[error("no key presses detected in the recording")]
    NoPresses,

    #[error("recording too short to decode: {have} presses, need at least {need}")]
    Degenerate { have: usize, need: usize },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// True for errors that abort the pipeline rather than propagate a
    /// caller-requested stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Cancelled)
    }
}
