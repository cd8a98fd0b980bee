//! Error types for the core bridge pipeline.

use thiserror::Error;

/// Top-level error type for core bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The log stream became unreadable and stayed that way past the
    /// reopen deadline. Recoverable reads never surface here.
    #[error("Log stream I/O failure on {path}: {source}")]
    StreamIo {
        /// Path of the log file being tailed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A user's short-term memory exceeded its configured capacity.
    /// Structurally impossible with FIFO eviction; observing it means a
    /// programming invariant was violated.
    #[error("Short-term memory capacity violated for {user}: {len} > {capacity}")]
    CapacityViolation {
        /// User identity whose session overflowed.
        user: String,
        /// Observed short-term length.
        len: usize,
        /// Configured capacity.
        capacity: usize,
    },

    /// Durable memory record could not be encoded or decoded.
    #[error("Memory record serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, BridgeError>;
