//! The redo stream visitor contract.

use crate::error::ReplResult;
use vellum_core::{IndexId, TxnId};

/// Receiver of decoded redo operations.
///
/// The decoder invokes exactly one method per record and then returns
/// control to its caller. Every method returns `false` to keep the
/// stream going; `true` is reserved for stream-terminating events.
///
/// Delete records arrive through the store methods with a `value` of
/// `None`.
pub trait RedoVisitor {
    /// Stream reset: the running transaction id has been zeroed.
    fn reset(&mut self) -> ReplResult<bool>;

    /// Wall-clock marker.
    fn timestamp(&mut self, timestamp_millis: u64) -> ReplResult<bool>;

    /// Clean shutdown marker.
    fn shutdown(&mut self, timestamp_millis: u64) -> ReplResult<bool>;

    /// Database close marker.
    fn close(&mut self, timestamp_millis: u64) -> ReplResult<bool>;

    /// End of a redo log file.
    fn end_file(&mut self, timestamp_millis: u64) -> ReplResult<bool>;

    /// Non-transactional store or delete.
    fn store(&mut self, index_id: IndexId, key: Vec<u8>, value: Option<Vec<u8>>)
        -> ReplResult<bool>;

    /// Non-transactional store or delete for which the application
    /// arranged its own locking.
    fn store_no_lock(
        &mut self,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool>;

    /// Index rename under an implicit transaction.
    fn rename_index(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        new_name: Vec<u8>,
    ) -> ReplResult<bool>;

    /// Index deletion under the given transaction.
    fn delete_index(&mut self, txn_id: TxnId, index_id: IndexId) -> ReplResult<bool>;

    /// Transaction scope entry.
    fn txn_enter(&mut self, txn_id: TxnId) -> ReplResult<bool>;

    /// Scope rollback.
    fn txn_rollback(&mut self, txn_id: TxnId) -> ReplResult<bool>;

    /// Full rollback, finishing the transaction.
    fn txn_rollback_final(&mut self, txn_id: TxnId) -> ReplResult<bool>;

    /// Scope commit.
    fn txn_commit(&mut self, txn_id: TxnId) -> ReplResult<bool>;

    /// Full commit, finishing the transaction.
    fn txn_commit_final(&mut self, txn_id: TxnId) -> ReplResult<bool>;

    /// Scope entry combined with a store or delete.
    fn txn_enter_store(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool>;

    /// Transactional store or delete.
    fn txn_store(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool>;

    /// Store or delete combined with a scope commit.
    fn txn_store_commit(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool>;

    /// Store or delete combined with a full commit.
    fn txn_store_commit_final(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool>;

    /// Shared lock acquisition.
    fn txn_lock_shared(&mut self, txn_id: TxnId, index_id: IndexId, key: Vec<u8>)
        -> ReplResult<bool>;

    /// Upgradable lock acquisition.
    fn txn_lock_upgradable(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
    ) -> ReplResult<bool>;

    /// Exclusive lock acquisition.
    fn txn_lock_exclusive(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
    ) -> ReplResult<bool>;

    /// Application-defined payload.
    fn txn_custom(&mut self, txn_id: TxnId, message: Vec<u8>) -> ReplResult<bool>;

    /// Application-defined payload referencing an index key.
    fn txn_custom_lock(
        &mut self,
        txn_id: TxnId,
        message: Vec<u8>,
        index_id: IndexId,
        key: Vec<u8>,
    ) -> ReplResult<bool>;
}
