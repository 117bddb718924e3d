//! The redo pipeline.
//!
//! Transactions append encoded operation records to their context's
//! private buffer; the buffer drains into the bound [`RedoWriter`] when
//! full, on commit, or on explicit flush. Transaction ids are encoded
//! as signed varlong deltas from the writer's last-seen id, which keeps
//! sequential ids to a byte or two on the wire.
//!
//! ## Latching order
//!
//! Context redo latch, then writer latch. Never the reverse.

mod context;
mod pool;
mod writer;

pub use context::{ContextStats, TransactionContext};
pub use pool::ContextPool;
pub use writer::{FileRedoSink, RedoSink, RedoWriter};
