//! # VellumDB Core
//!
//! The durability core of the VellumDB storage engine.
//!
//! This crate provides:
//! - Transaction contexts: sharded redo buffers, transaction id
//!   minting, and undo log registration
//! - The redo writer seam over file or replicated streams
//! - The confirmed-commit watermark used by replication
//! - A durability-override cursor wrapper for ephemeral trees
//!
//! All redo actions performed by transactions flow through a
//! [`TransactionContext`]. Contention is reduced by creating several
//! context instances (see [`ContextPool`]) and distributing
//! transactions among them; each context owns a private redo buffer
//! that it drains into the shared, latched [`RedoWriter`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod redo;
mod temp;
mod types;
mod undo;

pub use config::ContextConfig;
pub use error::{CoreError, CoreResult};
pub use redo::{
    ContextPool, ContextStats, FileRedoSink, RedoSink, RedoWriter, TransactionContext,
};
pub use temp::{RedoCursor, TempCursor};
pub use types::{DurabilityMode, IndexId, LockMode, TxnId, MAX_KEY_LENGTH};
pub use vellum_codec::RedoOp;
pub use undo::{MasterUndoLog, UndoEntry, UndoHandle, UndoLog};
