//! Error types for the replay engine.

use thiserror::Error;
use vellum_codec::CodecError;
use vellum_core::CoreError;

/// Result type for replay operations.
pub type ReplResult<T> = Result<T, ReplError>;

/// Errors that can occur during replication replay.
#[derive(Debug, Error)]
pub enum ReplError {
    /// Failure reported by a core collaborator.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The stream could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    /// I/O failure while reading the replication source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A custom record arrived but no transaction handler is
    /// installed.
    #[error("custom transaction handler is not installed")]
    HandlerMissing,
}

impl ReplError {
    /// Whether this error is the recoverable closed-index condition.
    #[must_use]
    pub fn is_closed_index(&self) -> bool {
        matches!(self, Self::Core(CoreError::ClosedIndex))
    }

    /// Whether this error is the unmodifiable replica condition.
    #[must_use]
    pub fn is_unmodifiable_replica(&self) -> bool {
        matches!(self, Self::Core(core) if core.is_unmodifiable_replica())
    }
}
