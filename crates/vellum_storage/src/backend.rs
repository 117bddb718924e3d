//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Backends are opaque: the redo writer owns all format interpretation.
///
/// # Invariants
///
/// - `append` returns the offset at which the data starts; the next
///   append continues where the previous one ended
/// - `read_at` returns exactly the bytes previously appended there
/// - after `flush`, appended data has been handed to the OS
/// - after `sync`, appended data and metadata survive power loss
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] for tests
/// - [`super::FileBackend`] for persistent redo logs
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends
    /// beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data, returning the offset where it was written.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces data and metadata to durable storage.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes, which is also the offset the
    /// next `append` will return.
    fn size(&self) -> StorageResult<u64>;

    /// Discards all data at and beyond `new_size`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `new_size`
    /// exceeds the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
