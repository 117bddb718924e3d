//! # VellumDB Replication
//!
//! The replay side of the redo stream.
//!
//! A single decoder thread pulls records from a [`ReplicationSource`],
//! acquires the locks each operation requires synchronously, and hands
//! the operation body to a bounded worker pool. Operations on the same
//! transaction always run on the same worker, preserving program
//! order; operations on distinct transactions may run concurrently.
//!
//! The engine drives narrow collaborator contracts
//! ([`ReplDatabase`], [`ReplTransaction`], [`ReplicationManager`], ...)
//! so the surrounding storage engine stays out of this crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod decoder;
mod engine;
mod error;
pub mod mock;
mod source;
mod traits;
mod visitor;
mod worker;

pub use cache::IndexCache;
pub use config::EngineConfig;
pub use decoder::RedoDecoder;
pub use engine::{ReplEngine, SuspendedEngine};
pub use error::{ReplError, ReplResult};
pub use source::{MemorySource, ReplicationSource};
pub use traits::{
    EventListener, EventType, ReplDatabase, ReplIndex, ReplLocker, ReplTransaction,
    ReplicationManager, TransactionHandler,
};
pub use visitor::RedoVisitor;
pub use worker::{Countdown, Task, WorkerGroup, WorkerId};
