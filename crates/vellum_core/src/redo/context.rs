//! Transaction contexts: shared state for groups of transactions.

use crate::error::{CoreError, CoreResult};
use crate::redo::writer::{RedoWriter, WriterGuard};
use crate::types::{DurabilityMode, IndexId, TxnId, MAX_KEY_LENGTH};
use crate::undo::{MasterUndoLog, UndoHandle, UndoLog, UndoRegistry};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use vellum_codec::{
    calc_unsigned_var_long_length, convert_signed_var_long, encode_int_le, encode_long_le,
    encode_signed_var_long, encode_unsigned_var_int, encode_unsigned_var_long, nz_hash, RedoOp,
    TERMINATOR_LEN,
};

/// Sentinel stored in the confirmed-position word while it is latched.
const CONFIRMED_LOCKED: i64 = -1;

/// Smallest usable redo buffer. A transactional opcode plus its
/// reserved first delta plus a terminator must always fit.
const MIN_REDO_BUFFER: usize = 32;

/// Reservation for the first transactional record of a buffer:
/// one opcode byte plus the worst-case varlong delta.
const FIRST_TXN_RESERVE: usize = 1 + 9;

/// Counters a context contributes to database statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Transactions currently holding registered undo logs.
    pub txn_count: u64,
    /// Transactions minted over the context's lifetime.
    pub txns_created: u64,
}

/// State shared by multiple transactions.
///
/// Contention is reduced by creating many context instances and
/// distributing them among the transactions. The context vends out
/// transaction ids, supports undo log registration, and buffers redo
/// records. All redo actions performed by transactions flow through a
/// context, to reduce contention on the redo writer.
///
/// Two disjoint locks govern a context: the monitor (undo registry and
/// id reseeding) and the redo latch (buffer fields and writer binding).
/// The redo latch may be held across a writer I/O; the monitor is
/// always short.
pub struct TransactionContext {
    txn_stride: i64,
    high_txn_id: AtomicI64,
    monitor: Mutex<Monitor>,
    redo: Mutex<RedoState>,

    // Highest confirmed commit, used by replication. Guarded by
    // spinning on `confirmed_pos` with the -1 sentinel.
    confirmed_pos: AtomicI64,
    confirmed_txn_id: AtomicI64,

    spin_limit: usize,
}

struct Monitor {
    initial_txn_id: i64,
    undo: UndoRegistry,
}

struct RedoState {
    buffer: Box<[u8]>,
    pos: usize,
    /// First transaction id encoded into the current buffer; `NONE`
    /// when the buffer holds no transactional prefix.
    first_txn_id: TxnId,
    /// Last transaction id encoded so far.
    last_txn_id: TxnId,
    writer: Option<Arc<RedoWriter>>,
    /// `Some` while this context holds the writer latch.
    writer_guard: Option<WriterGuard>,
}

impl TransactionContext {
    /// Creates a context minting ids that stride by `txn_stride`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stride is not positive.
    pub fn new(txn_stride: i64, redo_buffer_size: usize) -> CoreResult<Self> {
        if txn_stride <= 0 {
            return Err(CoreError::invalid_argument("transaction stride must be positive"));
        }
        let spin_limit = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);

        Ok(Self {
            txn_stride,
            high_txn_id: AtomicI64::new(0),
            monitor: Mutex::new(Monitor {
                initial_txn_id: 0,
                undo: UndoRegistry::default(),
            }),
            redo: Mutex::new(RedoState {
                buffer: vec![0u8; redo_buffer_size.max(MIN_REDO_BUFFER)].into_boxed_slice(),
                pos: 0,
                first_txn_id: TxnId::NONE,
                last_txn_id: TxnId::NONE,
                writer: None,
                writer_guard: None,
            }),
            confirmed_pos: AtomicI64::new(0),
            confirmed_txn_id: AtomicI64::new(0),
            spin_limit,
        })
    }

    /// Adds this context's counters into `stats`.
    pub fn add_stats(&self, stats: &mut ContextStats) {
        let monitor = self.monitor.lock();
        stats.txn_count += monitor.undo.len() as u64;
        stats.txns_created +=
            (self.high_txn_id.load(Ordering::Relaxed) / self.txn_stride).max(0) as u64;
    }

    // --- Transaction id minting -----------------------------------------

    /// Sets the previously vended transaction id. A later call to
    /// [`Self::next_transaction_id`] returns a higher one.
    ///
    /// # Errors
    ///
    /// Returns an error if `txn_id` is negative.
    pub fn reset_transaction_id(&self, txn_id: TxnId) -> CoreResult<()> {
        if txn_id.value() < 0 {
            return Err(CoreError::invalid_argument("transaction id must not be negative"));
        }
        let mut monitor = self.monitor.lock();
        monitor.initial_txn_id = txn_id.value();
        self.high_txn_id.store(txn_id.value(), Ordering::Relaxed);
        Ok(())
    }

    /// Mints the next transaction id.
    ///
    /// Every returned id is positive and strictly greater than the
    /// previous return from this context. When the id space wraps, the
    /// context reseeds from its initial id under the monitor.
    pub fn next_transaction_id(&self) -> TxnId {
        loop {
            let txn_id = self
                .high_txn_id
                .fetch_add(self.txn_stride, Ordering::Relaxed)
                .wrapping_add(self.txn_stride);
            if txn_id > 0 {
                return TxnId::new(txn_id);
            }

            // Improbably, the id has wrapped around. Only positive ids
            // may be vended; negative ids belong to non-replicated
            // transactions.
            let monitor = self.monitor.lock();
            if self.high_txn_id.load(Ordering::Relaxed) <= 0 {
                let mut id = txn_id;
                if id <= 0 {
                    id = monitor.initial_txn_id % self.txn_stride;
                    if id <= 0 {
                        id += self.txn_stride;
                    }
                }
                self.high_txn_id.store(id, Ordering::Relaxed);
                return TxnId::new(id);
            }
            // Another thread reseeded first; mint again.
        }
    }

    /// Returns the higher of the context's current id and `txn_id`.
    #[must_use]
    pub fn higher_transaction_id(&self, txn_id: TxnId) -> TxnId {
        TxnId::new(self.high_txn_id.load(Ordering::Relaxed).max(txn_id.value()))
    }

    // --- Redo operations -------------------------------------------------

    /// Auto-commit store or delete, with locking replayed.
    ///
    /// `value` of `None` encodes the delete opcode. Returns a non-zero
    /// commit position if the caller must await a sync.
    pub fn redo_store_auto_commit(
        &self,
        writer: &Arc<RedoWriter>,
        index_id: IndexId,
        key: &[u8],
        value: Option<&[u8]>,
        mode: DurabilityMode,
    ) -> CoreResult<u64> {
        self.store_auto_commit(writer, RedoOp::Store, RedoOp::Delete, index_id, key, value, mode)
    }

    /// Auto-commit store or delete for which the application performs
    /// its own locking.
    pub fn redo_store_no_lock_auto_commit(
        &self,
        writer: &Arc<RedoWriter>,
        index_id: IndexId,
        key: &[u8],
        value: Option<&[u8]>,
        mode: DurabilityMode,
    ) -> CoreResult<u64> {
        self.store_auto_commit(
            writer,
            RedoOp::StoreNoLock,
            RedoOp::DeleteNoLock,
            index_id,
            key,
            value,
            mode,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn store_auto_commit(
        &self,
        writer: &Arc<RedoWriter>,
        store_op: RedoOp,
        delete_op: RedoOp,
        index_id: IndexId,
        key: &[u8],
        value: Option<&[u8]>,
        mode: DurabilityMode,
    ) -> CoreResult<u64> {
        key_check(key)?;
        let mode = writer.check_write(mode)?;

        let mut redo = self.redo.lock();
        let result = (|| {
            match value {
                None => {
                    redo.write_op_with_operand(writer, delete_op, index_id.value())?;
                    redo.write_unsigned_var_int(key.len() as u32)?;
                    redo.write_bytes(key)?;
                }
                Some(value) => {
                    redo.write_op_with_operand(writer, store_op, index_id.value())?;
                    redo.write_unsigned_var_int(key.len() as u32)?;
                    redo.write_bytes(key)?;
                    redo.write_unsigned_var_int(value.len() as u32)?;
                    redo.write_bytes(value)?;
                }
            }
            redo.non_txn_terminate_commit(mode)
        })();
        redo.release(result)
    }

    /// Auto-commit index rename.
    pub fn redo_rename_index_commit_final(
        &self,
        writer: &Arc<RedoWriter>,
        txn_id: TxnId,
        index_id: IndexId,
        new_name: &[u8],
        mode: DurabilityMode,
    ) -> CoreResult<u64> {
        let mode = writer.check_write(mode)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_txn_op(writer, RedoOp::RenameIndex, txn_id)?;
            redo.write_long_le(index_id.value())?;
            redo.write_unsigned_var_int(new_name.len() as u32)?;
            redo.write_bytes(new_name)?;
            redo.write_terminator()?;
            redo.flush_commit(mode)
        })();
        redo.release(result)
    }

    /// Auto-commit index delete.
    pub fn redo_delete_index_commit_final(
        &self,
        writer: &Arc<RedoWriter>,
        txn_id: TxnId,
        index_id: IndexId,
        mode: DurabilityMode,
    ) -> CoreResult<u64> {
        let mode = writer.check_write(mode)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_txn_op(writer, RedoOp::DeleteIndex, txn_id)?;
            redo.write_long_le(index_id.value())?;
            redo.write_terminator()?;
            redo.flush_commit(mode)
        })();
        redo.release(result)
    }

    /// Opens a transaction scope.
    pub fn redo_enter(&self, writer: &Arc<RedoWriter>, txn_id: TxnId) -> CoreResult<()> {
        writer.check_write(DurabilityMode::NoFlush)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_txn_op(writer, RedoOp::TxnEnter, txn_id)?;
            redo.write_terminator()
        })();
        redo.release(result)
    }

    /// Rolls back the current scope.
    pub fn redo_rollback(&self, writer: &Arc<RedoWriter>, txn_id: TxnId) -> CoreResult<()> {
        self.rollback(writer, RedoOp::TxnRollback, txn_id)
    }

    /// Rolls back all scopes and finishes the transaction.
    pub fn redo_rollback_final(&self, writer: &Arc<RedoWriter>, txn_id: TxnId) -> CoreResult<()> {
        self.rollback(writer, RedoOp::TxnRollbackFinal, txn_id)
    }

    fn rollback(&self, writer: &Arc<RedoWriter>, op: RedoOp, txn_id: TxnId) -> CoreResult<()> {
        // Rollback releases locks, so it must always be flushed like a
        // commit. Otherwise recovery can deadlock or time out when
        // acquiring the released locks: releases must be logged before
        // any subsequent acquires.
        let mode = writer.check_write(DurabilityMode::NoFlush)?;

        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_txn_op(writer, op, txn_id)?;
            redo.write_terminator()?;
            redo.flush_commit(mode).map(|_| ())
        })();
        redo.release(result)
    }

    /// Commits the current scope.
    pub fn redo_commit(&self, writer: &Arc<RedoWriter>, txn_id: TxnId) -> CoreResult<()> {
        writer.check_write(DurabilityMode::NoFlush)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_txn_op(writer, RedoOp::TxnCommit, txn_id)?;
            redo.write_terminator()
        })();
        redo.release(result)
    }

    /// Commits all scopes and finishes the transaction.
    ///
    /// Returns a non-zero commit position if the caller must await a
    /// sync.
    pub fn redo_commit_final(
        &self,
        writer: &Arc<RedoWriter>,
        txn_id: TxnId,
        mode: DurabilityMode,
    ) -> CoreResult<u64> {
        let mode = writer.check_write(mode)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_txn_op(writer, RedoOp::TxnCommitFinal, txn_id)?;
            redo.write_terminator()?;
            redo.flush_commit(mode)
        })();
        redo.release(result)
    }

    /// Transactional store. `op` selects the scope behavior:
    /// [`RedoOp::TxnStore`], [`RedoOp::TxnEnterStore`], or
    /// [`RedoOp::TxnStoreCommit`].
    pub fn redo_store(
        &self,
        writer: &Arc<RedoWriter>,
        op: RedoOp,
        txn_id: TxnId,
        index_id: IndexId,
        key: &[u8],
        value: &[u8],
    ) -> CoreResult<()> {
        key_check(key)?;
        writer.check_write(DurabilityMode::NoFlush)?;
        let mut redo = self.redo.lock();
        let result = Self::do_redo_store(&mut redo, writer, op, txn_id, index_id, key, value);
        redo.release(result)
    }

    /// Transactional store that commits all scopes.
    pub fn redo_store_commit_final(
        &self,
        writer: &Arc<RedoWriter>,
        txn_id: TxnId,
        index_id: IndexId,
        key: &[u8],
        value: &[u8],
        mode: DurabilityMode,
    ) -> CoreResult<u64> {
        key_check(key)?;
        let mode = writer.check_write(mode)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            Self::do_redo_store(
                &mut redo,
                writer,
                RedoOp::TxnStoreCommitFinal,
                txn_id,
                index_id,
                key,
                value,
            )?;
            redo.flush_commit(mode)
        })();
        redo.release(result)
    }

    fn do_redo_store(
        redo: &mut RedoState,
        writer: &Arc<RedoWriter>,
        op: RedoOp,
        txn_id: TxnId,
        index_id: IndexId,
        key: &[u8],
        value: &[u8],
    ) -> CoreResult<()> {
        redo.write_txn_op(writer, op, txn_id)?;
        redo.write_long_le(index_id.value())?;
        redo.write_unsigned_var_int(key.len() as u32)?;
        redo.write_bytes(key)?;
        redo.write_unsigned_var_int(value.len() as u32)?;
        redo.write_bytes(value)?;
        redo.write_terminator()
    }

    /// Transactional delete. `op` selects the scope behavior:
    /// [`RedoOp::TxnDelete`], [`RedoOp::TxnEnterDelete`], or
    /// [`RedoOp::TxnDeleteCommit`].
    pub fn redo_delete(
        &self,
        writer: &Arc<RedoWriter>,
        op: RedoOp,
        txn_id: TxnId,
        index_id: IndexId,
        key: &[u8],
    ) -> CoreResult<()> {
        key_check(key)?;
        writer.check_write(DurabilityMode::NoFlush)?;
        let mut redo = self.redo.lock();
        let result = Self::do_redo_delete(&mut redo, writer, op, txn_id, index_id, key);
        redo.release(result)
    }

    /// Transactional delete that commits all scopes.
    pub fn redo_delete_commit_final(
        &self,
        writer: &Arc<RedoWriter>,
        txn_id: TxnId,
        index_id: IndexId,
        key: &[u8],
        mode: DurabilityMode,
    ) -> CoreResult<u64> {
        key_check(key)?;
        let mode = writer.check_write(mode)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            Self::do_redo_delete(
                &mut redo,
                writer,
                RedoOp::TxnDeleteCommitFinal,
                txn_id,
                index_id,
                key,
            )?;
            redo.flush_commit(mode)
        })();
        redo.release(result)
    }

    fn do_redo_delete(
        redo: &mut RedoState,
        writer: &Arc<RedoWriter>,
        op: RedoOp,
        txn_id: TxnId,
        index_id: IndexId,
        key: &[u8],
    ) -> CoreResult<()> {
        redo.write_txn_op(writer, op, txn_id)?;
        redo.write_long_le(index_id.value())?;
        redo.write_unsigned_var_int(key.len() as u32)?;
        redo.write_bytes(key)?;
        redo.write_terminator()
    }

    /// Records a lock acquisition so replay observes the same lock
    /// order. `op` selects the strength: [`RedoOp::TxnLockShared`],
    /// [`RedoOp::TxnLockUpgradable`], or [`RedoOp::TxnLockExclusive`].
    pub fn redo_lock(
        &self,
        writer: &Arc<RedoWriter>,
        op: RedoOp,
        txn_id: TxnId,
        index_id: IndexId,
        key: &[u8],
    ) -> CoreResult<()> {
        debug_assert!(matches!(
            op,
            RedoOp::TxnLockShared | RedoOp::TxnLockUpgradable | RedoOp::TxnLockExclusive
        ));
        key_check(key)?;
        writer.check_write(DurabilityMode::NoFlush)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_txn_op(writer, op, txn_id)?;
            redo.write_long_le(index_id.value())?;
            redo.write_unsigned_var_int(key.len() as u32)?;
            redo.write_bytes(key)?;
            redo.write_terminator()
        })();
        redo.release(result)
    }

    /// Application-defined transactional payload.
    pub fn redo_custom(
        &self,
        writer: &Arc<RedoWriter>,
        txn_id: TxnId,
        message: &[u8],
    ) -> CoreResult<()> {
        writer.check_write(DurabilityMode::NoFlush)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_txn_op(writer, RedoOp::TxnCustom, txn_id)?;
            redo.write_unsigned_var_int(message.len() as u32)?;
            redo.write_bytes(message)?;
            redo.write_terminator()
        })();
        redo.release(result)
    }

    /// Application-defined transactional payload referencing an index
    /// key, which replay locks before applying.
    pub fn redo_custom_lock(
        &self,
        writer: &Arc<RedoWriter>,
        txn_id: TxnId,
        message: &[u8],
        index_id: IndexId,
        key: &[u8],
    ) -> CoreResult<()> {
        key_check(key)?;
        writer.check_write(DurabilityMode::NoFlush)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_txn_op(writer, RedoOp::TxnCustomLock, txn_id)?;
            redo.write_long_le(index_id.value())?;
            redo.write_unsigned_var_int(key.len() as u32)?;
            redo.write_bytes(key)?;
            redo.write_unsigned_var_int(message.len() as u32)?;
            redo.write_bytes(message)?;
            redo.write_terminator()
        })();
        redo.release(result)
    }

    /// Writes a stream marker carrying the current wall-clock time.
    ///
    /// `op` must be one of [`RedoOp::Timestamp`], [`RedoOp::Shutdown`],
    /// [`RedoOp::Close`], or [`RedoOp::EndFile`].
    pub fn redo_timestamp(&self, writer: &Arc<RedoWriter>, op: RedoOp) -> CoreResult<()> {
        debug_assert!(matches!(
            op,
            RedoOp::Timestamp | RedoOp::Shutdown | RedoOp::Close | RedoOp::EndFile
        ));
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.redo_marker(writer, op, millis)
    }

    /// Writes a random non-zero padding record.
    pub fn redo_nop_random(&self, writer: &Arc<RedoWriter>) -> CoreResult<()> {
        self.redo_marker(writer, RedoOp::NopRandom, rand::random::<u64>())
    }

    fn redo_marker(&self, writer: &Arc<RedoWriter>, op: RedoOp, operand: u64) -> CoreResult<()> {
        writer.check_write(DurabilityMode::NoFlush)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_op_with_operand(writer, op, operand)?;
            redo.non_txn_terminate_commit(DurabilityMode::NoFlush).map(|_| ())
        })();
        redo.release(result)
    }

    /// Writes a reset record and zeroes the writer's last-seen
    /// transaction id, so the stream restarts delta encoding.
    pub fn redo_reset(&self, writer: &Arc<RedoWriter>) -> CoreResult<()> {
        writer.check_write(DurabilityMode::NoFlush)?;
        let mut redo = self.redo.lock();
        let result = (|| {
            redo.write_op(writer, RedoOp::Reset)?;
            redo.non_txn_terminate_commit(DurabilityMode::NoFlush)?;
            redo.reset_writer_txn_id();
            Ok(())
        })();
        redo.release(result)
    }

    /// Drains the redo buffer to the bound writer.
    pub fn flush(&self) -> CoreResult<()> {
        let mut redo = self.redo.lock();
        if redo.writer.is_none() {
            return Ok(());
        }
        let result = redo.flush(false).map(|_| ());
        redo.release(result)
    }

    // --- Confirmed commit tracking --------------------------------------

    /// Records a durably accepted commit position.
    ///
    /// Idempotent update-if-greater; linearizable across concurrent
    /// callers via a CAS sentinel on the position word.
    ///
    /// # Panics
    ///
    /// Panics if `commit_pos` is the reserved sentinel value −1.
    pub fn confirmed(&self, commit_pos: i64, txn_id: TxnId) {
        assert_ne!(commit_pos, CONFIRMED_LOCKED, "invalid commit position");

        let mut confirmed_pos = self.confirmed_pos.load(Ordering::Acquire);

        'latched: {
            if confirmed_pos != CONFIRMED_LOCKED {
                if commit_pos <= confirmed_pos {
                    return;
                }
                if self
                    .confirmed_pos
                    .compare_exchange(
                        confirmed_pos,
                        CONFIRMED_LOCKED,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break 'latched;
                }
            }

            confirmed_pos = self.latch_confirmed();

            if commit_pos <= confirmed_pos {
                // Release the latch.
                self.confirmed_pos.store(confirmed_pos, Ordering::Release);
                return;
            }
        }

        self.confirmed_txn_id.store(txn_id.value(), Ordering::Relaxed);
        // Storing the position releases the latch; it must come last.
        self.confirmed_pos.store(commit_pos, Ordering::Release);
    }

    /// Returns whichever of the two contexts holds the higher confirmed
    /// position.
    #[must_use]
    pub fn higher_confirmed<'a>(&'a self, other: &'a Self) -> &'a Self {
        if self.confirmed_pos.load(Ordering::Relaxed) >= other.confirmed_pos.load(Ordering::Relaxed)
        {
            self
        } else {
            other
        }
    }

    /// Returns a consistent snapshot of the confirmed pair.
    #[must_use]
    pub fn copy_confirmed(&self) -> (i64, TxnId) {
        let confirmed_pos = self.latch_confirmed();
        let txn_id = TxnId::new(self.confirmed_txn_id.load(Ordering::Relaxed));
        // Release the latch.
        self.confirmed_pos.store(confirmed_pos, Ordering::Release);
        (confirmed_pos, txn_id)
    }

    /// Spins until the confirmed-position word is latched, returning
    /// the value to store to release it.
    fn latch_confirmed(&self) -> i64 {
        let mut trials = 0;
        loop {
            let pos = self.confirmed_pos.load(Ordering::Acquire);
            if pos != CONFIRMED_LOCKED
                && self
                    .confirmed_pos
                    .compare_exchange(pos, CONFIRMED_LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return pos;
            }
            trials += 1;
            if trials >= self.spin_limit {
                std::thread::yield_now();
                trials = 0;
            }
        }
    }

    // --- Undo log registry ----------------------------------------------

    /// Registers a transaction's undo log. Caller must hold the commit
    /// lock so checkpoint observes a consistent registry.
    pub fn register(&self, log: UndoLog) -> UndoHandle {
        self.monitor.lock().undo.register(log)
    }

    /// Unregisters an undo log once its entries have been truncated or
    /// rolled back, returning it. `None` for stale handles.
    pub fn unregister(&self, handle: UndoHandle) -> Option<UndoLog> {
        self.monitor.lock().undo.unregister(handle)
    }

    /// Runs `f` against a registered undo log.
    pub fn with_undo<R>(&self, handle: UndoHandle, f: impl FnOnce(&mut UndoLog) -> R) -> Option<R> {
        self.monitor.lock().undo.get_mut(handle).map(f)
    }

    /// Whether any undo logs are registered.
    #[must_use]
    pub fn has_undo_logs(&self) -> bool {
        !self.monitor.lock().undo.is_empty()
    }

    /// Writes all registered undo logs to the checkpoint master log,
    /// most recently registered first. Caller must hold the commit
    /// lock.
    pub fn write_to_master(&self, master: &mut dyn MasterUndoLog) -> CoreResult<()> {
        self.monitor.lock().undo.for_each(|log| master.write_log(log))
    }

    /// Discards all undo logs, as part of database close.
    pub fn delete_undo_logs(&self) {
        self.monitor.lock().undo.clear();
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("txn_stride", &self.txn_stride)
            .field("high_txn_id", &self.high_txn_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn key_check(key: &[u8]) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_argument("key is empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CoreError::invalid_argument(format!(
            "key length {} exceeds maximum of {MAX_KEY_LENGTH}",
            key.len()
        )));
    }
    Ok(())
}

impl RedoState {
    /// Binds `writer`, flushing and unbinding any previous writer
    /// first.
    fn ensure_writer(&mut self, writer: &Arc<RedoWriter>) -> CoreResult<()> {
        match &self.writer {
            Some(current) if Arc::ptr_eq(current, writer) => Ok(()),
            _ => self.switch_writer(writer),
        }
    }

    fn switch_writer(&mut self, writer: &Arc<RedoWriter>) -> CoreResult<()> {
        let result = if self.writer.is_some() {
            self.flush(false).map(|_| ())
        } else {
            Ok(())
        };
        // The old writer latch is released in all cases.
        self.writer_guard = None;

        match result {
            Ok(()) => {}
            Err(err) if err.is_unmodifiable_replica() => {
                // Terminal state for the old stream; safe to discard.
                tracing::debug!("discarding redo buffer on unmodifiable replica");
                self.pos = 0;
                self.first_txn_id = TxnId::NONE;
            }
            Err(err) => return Err(err),
        }

        self.writer = Some(Arc::clone(writer));
        Ok(())
    }

    /// Latches the bound writer if not already latched.
    fn latch_writer(&mut self) -> CoreResult<()> {
        if self.writer_guard.is_none() {
            let writer = self
                .writer
                .as_ref()
                .ok_or_else(|| CoreError::database("no redo writer bound"))?;
            self.writer_guard = Some(writer.latch());
        }
        Ok(())
    }

    fn latched(&mut self) -> CoreResult<&mut WriterGuard> {
        self.latch_writer()?;
        self.writer_guard
            .as_mut()
            .ok_or_else(|| CoreError::database("no redo writer bound"))
    }

    /// Zeroes the latched writer's last-seen transaction id.
    fn reset_writer_txn_id(&mut self) {
        debug_assert!(self.writer_guard.is_some());
        if let Some(guard) = self.writer_guard.as_mut() {
            guard.last_txn_id = TxnId::NONE;
        }
    }

    /// Tail-flushes non-transactional residue and releases the writer
    /// latch. A tail-flush failure replaces `result`.
    fn release<T>(&mut self, result: CoreResult<T>) -> CoreResult<T> {
        if self.writer_guard.is_some() {
            let tail: CoreResult<()> = if self.first_txn_id.is_none() && self.pos != 0 {
                // Flush out the remaining non-transactional messages;
                // their encodings rely on contiguous delivery.
                let pos = self.pos;
                match self.writer_guard.as_mut() {
                    Some(guard) => match guard.write(&self.buffer[..pos], None) {
                        Ok(_) => {
                            self.pos = 0;
                            Ok(())
                        }
                        Err(err) => Err(err),
                    },
                    None => Ok(()),
                }
            } else {
                Ok(())
            };

            self.writer_guard = None;

            tail?;
        }
        result
    }

    /// Writes a non-transactional opcode with no operand. The caller
    /// always flushes the operation so that transactional operations
    /// that follow can encode their id deltas correctly.
    fn write_op(&mut self, writer: &Arc<RedoWriter>, op: RedoOp) -> CoreResult<()> {
        self.ensure_writer(writer)?;
        if self.pos > self.buffer.len() - 1 {
            self.flush(false)?;
        }
        self.buffer[self.pos] = op.as_byte();
        self.pos += 1;
        Ok(())
    }

    /// Writes a non-transactional opcode with an 8-byte operand.
    fn write_op_with_operand(
        &mut self,
        writer: &Arc<RedoWriter>,
        op: RedoOp,
        operand: u64,
    ) -> CoreResult<()> {
        self.ensure_writer(writer)?;
        if self.pos > self.buffer.len() - 9 {
            self.flush(false)?;
        }
        self.buffer[self.pos] = op.as_byte();
        self.pos = encode_long_le(&mut self.buffer, self.pos + 1, operand);
        Ok(())
    }

    /// Writes a transactional opcode and its id delta.
    ///
    /// The first transactional record of an empty buffer reserves the
    /// worst-case delta length; the flush backfills it relative to the
    /// writer's last-seen id and shifts the opcode to abut the delta.
    fn write_txn_op(
        &mut self,
        writer: &Arc<RedoWriter>,
        op: RedoOp,
        txn_id: TxnId,
    ) -> CoreResult<()> {
        self.ensure_writer(writer)?;

        let pos = self.pos;
        if pos > self.buffer.len() - FIRST_TXN_RESERVE {
            self.flush(false)?;
            self.begin_txn_epoch(op, txn_id);
        } else if pos != 0 {
            self.buffer[pos] = op.as_byte();
            let delta = txn_id.value().wrapping_sub(self.last_txn_id.value());
            self.pos = encode_signed_var_long(&mut self.buffer, pos + 1, delta);
        } else {
            self.begin_txn_epoch(op, txn_id);
        }

        self.last_txn_id = txn_id;
        Ok(())
    }

    fn begin_txn_epoch(&mut self, op: RedoOp, txn_id: TxnId) {
        self.first_txn_id = txn_id;
        self.buffer[0] = op.as_byte();
        self.pos = FIRST_TXN_RESERVE;
    }

    fn write_int_le(&mut self, v: u32) -> CoreResult<()> {
        if self.pos > self.buffer.len() - 4 {
            self.flush(false)?;
        }
        self.pos = encode_int_le(&mut self.buffer, self.pos, v);
        Ok(())
    }

    fn write_long_le(&mut self, v: u64) -> CoreResult<()> {
        if self.pos > self.buffer.len() - 8 {
            self.flush(false)?;
        }
        self.pos = encode_long_le(&mut self.buffer, self.pos, v);
        Ok(())
    }

    fn write_unsigned_var_int(&mut self, v: u32) -> CoreResult<()> {
        if self.pos > self.buffer.len() - 5 {
            self.flush(false)?;
        }
        self.pos = encode_unsigned_var_int(&mut self.buffer, self.pos, v);
        Ok(())
    }

    /// Writes a byte slice, spanning buffer boundaries with
    /// intermediate flushes. The result on the wire is byte-identical
    /// to a single contiguous write.
    fn write_bytes(&mut self, bytes: &[u8]) -> CoreResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let buffer_len = self.buffer.len();
        let avail = buffer_len - self.pos;

        if avail >= bytes.len() {
            if self.pos == 0 && avail == bytes.len() {
                // Exactly buffer-sized: write through without copying.
                let guard = self.latched()?;
                guard.write(bytes, None)?;
            } else {
                self.buffer[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
                self.pos += bytes.len();
            }
            return Ok(());
        }

        // Fill the remainder of the buffer and flush it. The flush
        // latches the writer as a side effect.
        self.buffer[self.pos..].copy_from_slice(&bytes[..avail]);
        self.pos = buffer_len;
        self.flush(false)?;

        let rest = &bytes[avail..];
        if rest.len() >= buffer_len {
            match self.writer_guard.as_mut() {
                Some(guard) => {
                    guard.write(rest, None)?;
                }
                None => return Err(CoreError::database("no redo writer bound")),
            }
        } else {
            self.buffer[..rest.len()].copy_from_slice(rest);
            self.pos = rest.len();
        }
        Ok(())
    }

    /// Appends the record terminator when the bound writer uses them.
    fn write_terminator(&mut self) -> CoreResult<()> {
        let terminators = self
            .writer
            .as_ref()
            .is_some_and(|writer| writer.should_write_terminators());
        if terminators {
            self.write_int_le(nz_hash(self.last_txn_id.value()))?;
        }
        Ok(())
    }

    /// Terminates and commits a non-transactional operation.
    ///
    /// Returns a non-zero position if a sync is required.
    fn non_txn_terminate_commit(&mut self, mode: DurabilityMode) -> CoreResult<u64> {
        let terminators = self
            .writer
            .as_ref()
            .is_some_and(|writer| writer.should_write_terminators());

        if !terminators {
            // Commit the normal way.
            return self.flush_commit(mode);
        }

        if !self.first_txn_id.is_none() {
            // Terminate and commit the normal way.
            self.write_int_le(nz_hash(self.last_txn_id.value()))?;
            return self.flush_commit(mode);
        }

        let commit = mode.is_commit();
        let buffer_len = self.buffer.len();

        self.latch_writer()?;

        if self.pos > buffer_len - TERMINATOR_LEN {
            // Flush to make room for the terminator.
            let pos = self.pos;
            match self.writer_guard.as_mut() {
                Some(guard) => {
                    guard.write(&self.buffer[..pos], None)?;
                }
                None => return Err(CoreError::database("no redo writer bound")),
            }
            self.pos = 0;
        }

        // Encode the terminator using the writer's true last id.
        let commit_pos = match self.writer_guard.as_mut() {
            Some(guard) => {
                let length = encode_int_le(
                    &mut self.buffer,
                    self.pos,
                    nz_hash(guard.last_txn_id.value()),
                );
                guard.write(&self.buffer[..length], commit.then_some(length))?
            }
            None => return Err(CoreError::database("no redo writer bound")),
        };

        self.pos = 0;

        Ok(if mode == DurabilityMode::Sync {
            commit_pos
        } else {
            0
        })
    }

    /// Flushes as appropriate for the durability mode.
    ///
    /// Returns a non-zero position if a sync is required.
    fn flush_commit(&mut self, mode: DurabilityMode) -> CoreResult<u64> {
        if mode == DurabilityMode::Sync {
            self.flush(true)
        } else {
            // Commit hint only for NoSync; NoFlush and NoRedo leave the
            // buffer in place when possible.
            self.flush(mode == DurabilityMode::NoSync)?;
            Ok(0)
        }
    }

    /// Drains the buffer to the bound writer.
    ///
    /// With a transactional prefix pending, the reserved first-delta
    /// slot is backfilled relative to the writer's last-seen id, the
    /// opcode byte is shifted to abut it, and the writer's id advances
    /// before the write so the sink observes a consistent view. The id
    /// is rolled back if the write fails.
    fn flush(&mut self, commit: bool) -> CoreResult<u64> {
        let end = self.pos;
        if end == 0 {
            return Ok(0);
        }

        self.latch_writer()?;
        let Some(guard) = self.writer_guard.as_mut() else {
            return Err(CoreError::database("no redo writer bound"));
        };

        let writer_last_txn_id = guard.last_txn_id;
        let mut offset = 0usize;

        if !self.first_txn_id.is_none() {
            // Encode the first transaction delta and shift the opcode.
            let delta =
                convert_signed_var_long(self.first_txn_id.value().wrapping_sub(writer_last_txn_id.value()));
            let var_len = calc_unsigned_var_long_length(delta);
            offset = FIRST_TXN_RESERVE - var_len;
            encode_unsigned_var_long(&mut self.buffer, offset, delta);
            offset -= 1;
            self.buffer[offset] = self.buffer[0];
            // Must be set before the write so the sink sees the update.
            guard.last_txn_id = self.last_txn_id;
        }

        let commit_len = if commit { Some(end - offset) } else { None };
        match guard.write(&self.buffer[offset..end], commit_len) {
            Ok(commit_pos) => {
                self.pos = 0;
                self.first_txn_id = TxnId::NONE;
                Ok(commit_pos)
            }
            Err(err) => {
                guard.last_txn_id = writer_last_txn_id;
                Err(err)
            }
        }
    }
}
