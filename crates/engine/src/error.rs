//! Error types for engine adapters.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors an engine adapter can surface.
///
/// The tab controller treats everything except [`Error::Launch`] as
/// transient: the operation is dropped and the tab stays usable.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine process could not be started.
    #[error("engine launch failed: {0}")]
    Launch(String),

    /// An operation exceeded its deadline.
    #[error("engine operation timed out: {0}")]
    Timeout(String),

    /// The target page or engine is already closed.
    #[error("target closed: {0}")]
    TargetClosed(String),

    /// The engine reported a protocol-level failure.
    #[error("engine protocol error: {0}")]
    Protocol(String),

    /// I/O error talking to the engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
