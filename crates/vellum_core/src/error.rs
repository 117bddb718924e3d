//! Error types for VellumDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] vellum_storage::StorageError),

    /// The redo stream belongs to a replica and cannot be written.
    ///
    /// Treated as a terminal signal during writer switching: buffered
    /// redo is discarded and the switch proceeds quietly.
    #[error("replica is unmodifiable")]
    UnmodifiableReplica,

    /// The index was concurrently closed.
    ///
    /// Recoverable on the replay path by reopening the index.
    #[error("index is closed")]
    ClosedIndex,

    /// Generic database failure.
    #[error("database error: {message}")]
    Database {
        /// Description of the failure.
        message: String,
    },

    /// API misuse.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },

    /// A write failed after the writer latched a close cause; the
    /// original cause is preserved so the first root cause survives
    /// retries.
    #[error("redo writer closed ({cause}): {source}")]
    WriterClosed {
        /// The latched close cause.
        cause: String,
        /// The write failure that surfaced it.
        source: Box<CoreError>,
    },

    /// The database was forced closed by an unrecoverable failure.
    #[error("database panic: {message}")]
    Panicked {
        /// Description of the failure that caused the panic.
        message: String,
    },
}

impl CoreError {
    /// Creates a generic database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a database panic error.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    /// Whether this error is, or wraps, the unmodifiable replica
    /// condition.
    #[must_use]
    pub fn is_unmodifiable_replica(&self) -> bool {
        match self {
            Self::UnmodifiableReplica => true,
            Self::WriterClosed { source, .. } => source.is_unmodifiable_replica(),
            _ => false,
        }
    }
}
