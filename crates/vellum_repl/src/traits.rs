//! Collaborator contracts consumed by the replay engine.
//!
//! The engine never sees B-trees, lock-wait graphs, or the public
//! database API; it drives these narrow traits. Mock implementations
//! for tests live in [`crate::mock`].

use crate::error::ReplResult;
use std::sync::Arc;
use vellum_core::{IndexId, TxnId};

/// Lock acquisition against index keys, with infinite timeout.
pub trait ReplLocker: Send + Sync {
    /// Acquires a shared lock on the key.
    fn lock_shared(&self, index_id: IndexId, key: &[u8]) -> ReplResult<()>;

    /// Acquires an upgradable lock on the key.
    fn lock_upgradable(&self, index_id: IndexId, key: &[u8]) -> ReplResult<()>;

    /// Acquires an exclusive lock on the key, promoting an upgradable
    /// lock if one is held.
    fn lock_exclusive(&self, index_id: IndexId, key: &[u8]) -> ReplResult<()>;
}

/// A transaction as the replay engine drives it.
pub trait ReplTransaction: ReplLocker {
    /// Enters a nested scope.
    fn enter(&self) -> ReplResult<()>;

    /// Exits the current scope, rolling it back.
    fn exit(&self) -> ReplResult<()>;

    /// Commits the current scope.
    fn commit(&self) -> ReplResult<()>;

    /// Commits all scopes and finishes the transaction.
    fn commit_all(&self) -> ReplResult<()>;

    /// Resets the transaction, rolling back all scopes.
    fn reset(&self) -> ReplResult<()>;

    /// Cleans up after recovery. With `rollback` the transaction is
    /// rolled back; returns true when the transaction held no state
    /// worth keeping in the replay table.
    fn recovery_cleanup(&self, rollback: bool) -> ReplResult<bool>;

    /// Attaches a diagnostic tag.
    fn attach(&self, tag: &str);
}

/// An open index as the replay engine drives it.
pub trait ReplIndex: Send + Sync {
    /// The index id.
    fn id(&self) -> IndexId;

    /// The index name, if named.
    fn name(&self) -> Option<Vec<u8>>;

    /// Stores a value, `None` deleting the key. A `txn` of `None`
    /// applies the change outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns [`vellum_core::CoreError::ClosedIndex`] when the index
    /// handle was concurrently closed; the engine reopens and retries.
    fn store(
        &self,
        txn: Option<&dyn ReplTransaction>,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> ReplResult<()>;

    /// Closes this handle.
    fn close(&self) -> ReplResult<()>;
}

/// Handler for application-defined transactional payloads.
pub trait TransactionHandler: Send + Sync {
    /// Applies a custom redo message.
    fn redo(&self, txn: &dyn ReplTransaction, message: &[u8]) -> ReplResult<()>;

    /// Applies a custom redo message that references an index key. The
    /// engine has already locked the key exclusively.
    fn redo_lock(
        &self,
        txn: &dyn ReplTransaction,
        message: &[u8],
        index_id: IndexId,
        key: &[u8],
    ) -> ReplResult<()>;
}

/// Categories of events the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Replay hit an unrecoverable failure; the database is closing.
    ReplicationPanic,
    /// Replay hit a failure it can continue past.
    ReplicationWarning,
    /// A notification hook failed; replay continues.
    UncaughtException,
}

/// Receiver for engine events.
pub trait EventListener: Send + Sync {
    /// Reports one event.
    fn notify(&self, event: EventType, message: &str);
}

/// The local database as the replay engine drives it.
pub trait ReplDatabase: Send + Sync {
    /// Creates a replay transaction with the given id, configured for
    /// upgradable-read locking with infinite timeouts.
    fn new_transaction(&self, txn_id: TxnId) -> Arc<dyn ReplTransaction>;

    /// Opens any index by id, including internal ones. `txn` scopes the
    /// open so an on-demand load cannot deadlock against the caller's
    /// own locks.
    fn any_index_by_id(
        &self,
        txn: Option<&dyn ReplTransaction>,
        index_id: IndexId,
    ) -> ReplResult<Option<Arc<dyn ReplIndex>>>;

    /// Renames an index on behalf of the given transaction.
    fn rename_index(
        &self,
        index: &Arc<dyn ReplIndex>,
        new_name: &[u8],
        txn_id: TxnId,
    ) -> ReplResult<()>;

    /// Returns the deferred deletion task for an index tree, if any.
    /// The task may be expensive; callers run it off the replay path.
    fn replica_delete_tree(&self, index_id: IndexId) -> ReplResult<Option<Box<dyn FnOnce() + Send>>>;

    /// The installed custom transaction handler, if any.
    fn custom_handler(&self) -> Option<Arc<dyn TransactionHandler>>;

    /// The installed event listener, if any.
    fn event_listener(&self) -> Option<Arc<dyn EventListener>>;

    /// A locker for non-transactional replay operations.
    fn local_locker(&self) -> Arc<dyn ReplLocker>;

    /// Whether the database has been closed.
    fn is_closed(&self) -> bool;

    /// Closes the database quietly, recording the cause. Used when
    /// replay panics.
    fn force_close(&self, cause: &str);
}

/// The replication service feeding and observing the engine.
pub trait ReplicationManager: Send + Sync {
    /// The stream position replay should start reading from.
    fn read_position(&self) -> u64;

    /// Called after a store or delete has been applied to a
    /// non-internal index.
    fn notify_store(
        &self,
        index: &Arc<dyn ReplIndex>,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> ReplResult<()>;

    /// Called after an index rename has been applied.
    fn notify_rename(
        &self,
        index: &Arc<dyn ReplIndex>,
        old_name: Option<&[u8]>,
        new_name: &[u8],
    ) -> ReplResult<()>;

    /// Called after an index has been dropped.
    fn notify_drop(&self, index: &Arc<dyn ReplIndex>) -> ReplResult<()>;

    /// Called when the stream ends and the local instance becomes the
    /// leader.
    ///
    /// # Errors
    ///
    /// [`vellum_core::CoreError::UnmodifiableReplica`] is silently
    /// tolerated; any other failure closes the database.
    fn leader_notify(&self) -> ReplResult<()>;
}
