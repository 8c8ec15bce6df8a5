//! Error types for console operations

use thiserror::Error;

/// Result type alias for console operations
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Errors that can occur while driving the DSP console
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Missing or contradictory configuration, reported before any hardware access
    #[error("Configuration error: {reason}")]
    Config {
        /// What is missing or wrong
        reason: String,
    },

    /// Access past the end of a memory window
    #[error("Window access out of range: offset {offset:#x} + {len} exceeds {size:#x}")]
    OutOfRange {
        /// Requested offset
        offset: usize,
        /// Requested length
        len: usize,
        /// Window size
        size: usize,
    },

    /// Register name was never declared
    #[error("Unknown register: {name}")]
    UnknownRegister {
        /// Name that failed to resolve
        name: String,
    },

    /// I/O error talking to the device or reading image files
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Firmware loading did not complete in time
    #[error("Firmware load timeout after {duration_ms}ms")]
    LoadTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Firmware loading failed outright
    #[error("Firmware load failed: {reason}")]
    LoadFailed {
        /// Reason for failure
        reason: String,
    },
}

impl ConsoleError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create an unknown-register error
    pub fn unknown_register(name: impl Into<String>) -> Self {
        Self::UnknownRegister { name: name.into() }
    }

    /// Create a load-failed error
    pub fn load_failed(reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            reason: reason.into(),
        }
    }
}
