//! Error types for unify-status-core.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HID channel communication failure.
    #[error("HID error: {0}")]
    Hid(String),

    /// Receiver endpoint not found during enumeration.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Response did not start with the expected prefix.
    #[error("unexpected response: expected prefix {expected:02X?}, got {actual:02X?}")]
    PrefixMismatch { expected: Vec<u8>, actual: Vec<u8> },

    /// A blocking read was interrupted through its cancel token.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration file could not be read, parsed, or created.
    #[error("config error: {0}")]
    Config(String),

    /// Status sink rejected a publication.
    #[error("sink error: {0}")]
    Sink(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
