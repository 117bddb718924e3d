//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended in the middle of an encoded value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// An opcode byte that is not part of the redo alphabet.
    #[error("unknown redo opcode: {op:#04x}")]
    UnknownOpcode {
        /// The offending byte.
        op: u8,
    },

    /// A record terminator did not match the expected hash.
    #[error("record terminator mismatch: expected {expected:#010x}, got {actual:#010x}")]
    TerminatorMismatch {
        /// Hash derived from the decoded stream state.
        expected: u32,
        /// Hash read from the stream.
        actual: u32,
    },
}
