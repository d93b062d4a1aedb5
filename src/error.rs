//! Error types for atchannel
//!
//! Provides a unified error type for channel operations.
//!
//! Ordinary protocol outcomes (a final `ERROR` line, a command timeout, the
//! channel closing under a waiting caller) are reported through
//! [`Response`](crate::protocol::Response) status, not through this type.

use thiserror::Error;

/// Result type alias using AtError
pub type Result<T> = std::result::Result<T, AtError>;

/// Unified error type for atchannel operations
#[derive(Debug, Error)]
pub enum AtError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("Timed out waiting for data")]
    Timeout,

    #[error("Read cancelled")]
    Cancelled,

    #[error("Malformed line: {0}")]
    MalformedLine(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Channel read loop not started")]
    NotStarted,

    #[error("Channel read loop already started")]
    AlreadyStarted,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
