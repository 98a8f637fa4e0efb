//! Error types for the protocol layer.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or framing protocol messages.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying pipe.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame declared a length above the hard limit.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u32, max: u32 },

    /// The stream ended in the middle of a frame.
    #[error("truncated frame: stream ended mid-message")]
    Truncated,

    /// A frame payload was not valid UTF-8.
    #[error("frame payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
