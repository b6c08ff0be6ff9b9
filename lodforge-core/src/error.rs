//! Error types for lodforge

use thiserror::Error;

/// Main error type for lodforge operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error(
        "Atlas overflow: {charts} charts do not fit at {resolution}px, try {suggested_resolution}px"
    )]
    AtlasOverflow {
        resolution: u32,
        suggested_resolution: u32,
        charts: usize,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Algorithm error: {0}")]
    Algorithm(String),
}

impl Error {
    /// True for the cooperative cancellation status
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias for lodforge operations
pub type Result<T> = std::result::Result<T, Error>;
