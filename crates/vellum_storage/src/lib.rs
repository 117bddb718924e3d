//! # VellumDB Storage
//!
//! Append-only byte store backends for the redo log.
//!
//! A backend is an opaque byte sink plus positioned reads. It knows
//! nothing about redo records, transaction ids, or terminators; the
//! redo writer owns all format interpretation. Offsets returned by
//! `append` are the positions the engine reports as commit positions.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - for tests and ephemeral streams
//! - [`FileBackend`] - persistent storage over OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use vellum_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"redo bytes").unwrap();
//! assert_eq!(offset, 0);
//! assert_eq!(backend.read_at(0, 10).unwrap(), b"redo bytes");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
