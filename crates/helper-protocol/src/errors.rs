//! Helper protocol error types.

use std::time::Duration;
use thiserror::Error;

/// Helper protocol errors
#[derive(Error, Debug)]
pub enum HelperProtocolError {
    #[error("Connection to helper at {path} failed: {reason}")]
    ConnectionFailed { path: String, reason: String },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Response id {actual} does not match request id {expected}")]
    IdMismatch { expected: String, actual: String },

    #[error("Helper rejected {method}: {message}")]
    Rejected { method: String, message: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
