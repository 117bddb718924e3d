//! The replication replay engine.

use crate::cache::IndexCache;
use crate::config::EngineConfig;
use crate::decoder::RedoDecoder;
use crate::error::{ReplError, ReplResult};
use crate::source::ReplicationSource;
use crate::traits::{
    EventType, ReplDatabase, ReplIndex, ReplTransaction, ReplicationManager,
};
use crate::visitor::RedoVisitor;
use crate::worker::{Countdown, Task, WorkerGroup, WorkerId};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use vellum_codec::HASH_SPREAD;
use vellum_core::{IndexId, TxnId};

/// Scrambles a transaction id for the replay table, spreading ids
/// minted with a common stride across buckets.
fn mix(txn_id: TxnId) -> u64 {
    (txn_id.value() as u64).wrapping_mul(HASH_SPREAD)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Disabled,
    DoSuspend,
    Suspended,
    Running,
}

struct DecodeShared {
    state: DecodeState,
    decoder_running: bool,
    /// Stream position of the next record, captured before dispatch.
    position: u64,
    /// Running transaction id, captured before the next delta applies.
    txn_id: TxnId,
}

/// State shared between the engine handle, the decoder thread, and
/// worker tasks.
struct EngineShared {
    db: Arc<dyn ReplDatabase>,
    manager: Arc<dyn ReplicationManager>,
    workers: Option<WorkerGroup>,
    indexes: Mutex<IndexCache>,
    decode: Mutex<DecodeShared>,
    decode_cond: Condvar,
}

impl EngineShared {
    /// Returns the cached index, opening it on demand.
    fn get_index(
        &self,
        txn: Option<&dyn ReplTransaction>,
        index_id: IndexId,
    ) -> ReplResult<Option<Arc<dyn ReplIndex>>> {
        if let Some(index) = self.indexes.lock().get(index_id) {
            return Ok(Some(index));
        }
        self.open_index(txn, index_id)
    }

    /// Opens the index and caches it, replacing any stale entry.
    fn open_index(
        &self,
        txn: Option<&dyn ReplTransaction>,
        index_id: IndexId,
    ) -> ReplResult<Option<Arc<dyn ReplIndex>>> {
        let opened = self.db.any_index_by_id(txn, index_id)?;
        if let Some(index) = &opened {
            self.indexes.lock().insert(index_id, Arc::clone(index));
        }
        Ok(opened)
    }

    /// Stores through the index, reopening on the closed-index
    /// condition.
    fn apply_store(
        &self,
        txn: Option<&dyn ReplTransaction>,
        index_id: IndexId,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> ReplResult<Option<Arc<dyn ReplIndex>>> {
        loop {
            let Some(index) = self.get_index(txn, index_id)? else {
                return Ok(None);
            };
            match index.store(txn, key, value) {
                Ok(()) => return Ok(Some(index)),
                Err(err) if err.is_closed_index() => {
                    // The shared handle was closed by a user; reopen.
                    self.open_index(txn, index_id)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Change-notify after an applied store, skipping internal
    /// metadata indexes. Hook failures never abort replay.
    fn notify_store(&self, index: &Arc<dyn ReplIndex>, key: &[u8], value: Option<&[u8]>) {
        if index.id().is_internal() {
            return;
        }
        if let Err(err) = self.manager.notify_store(index, key, value) {
            self.uncaught(&err);
        }
    }

    fn uncaught(&self, err: &ReplError) {
        match self.db.event_listener() {
            Some(listener) => listener.notify(
                EventType::UncaughtException,
                &format!("exception in replication hook: {err}"),
            ),
            None => tracing::warn!(error = %err, "exception in replication hook"),
        }
    }

    fn warning(&self, message: &str) {
        match self.db.event_listener() {
            Some(listener) => listener.notify(EventType::ReplicationWarning, message),
            None => tracing::warn!("{message}"),
        }
    }

    /// Panics the database: anything unexpected on the replay path
    /// leaves the replica in an undefined state, so it must not limp
    /// on.
    fn fail(&self, err: &ReplError) {
        if !self.db.is_closed() {
            match self.db.event_listener() {
                Some(listener) => listener.notify(
                    EventType::ReplicationPanic,
                    &format!("unexpected replication failure: {err}"),
                ),
                None => tracing::error!(error = %err, "unexpected replication failure"),
            }
        }
        self.db.force_close(&err.to_string());
    }
}

/// Replay-side record of one open transaction.
struct TxnEntry {
    txn: Arc<dyn ReplTransaction>,
    /// Fixed at the first dispatch; every later task for the same
    /// transaction uses the same worker so operations run in program
    /// order.
    worker: Option<WorkerId>,
}

/// Dispatcher of decoded redo operations onto a worker pool.
///
/// A single decoder thread pulls records from the replication source
/// and calls the visitor methods; those acquire any locks the
/// operation requires synchronously, then enqueue the operation body.
/// Operations on distinct transactions may run concurrently on
/// different workers; operations on one transaction are serialized on
/// its bound worker.
pub struct ReplEngine {
    shared: Arc<EngineShared>,
    /// Transactions recovered before replay starts, consumed by the
    /// decoder thread.
    recovered: Mutex<Option<HashMap<u64, TxnEntry>>>,
}

impl ReplEngine {
    /// Creates an engine over the collaborators.
    ///
    /// `recovered` transactions are seeded into the replay table
    /// unless their recovery cleanup reports them finished.
    pub fn new(
        manager: Arc<dyn ReplicationManager>,
        db: Arc<dyn ReplDatabase>,
        config: &EngineConfig,
        recovered: Vec<(TxnId, Arc<dyn ReplTransaction>)>,
    ) -> ReplResult<Self> {
        let threads = config.resolved_threads();
        let workers = if threads <= 1 {
            // Work runs directly on the decoder thread.
            None
        } else {
            Some(WorkerGroup::new(threads - 1, config.max_queue_size))
        };

        let mut table = HashMap::new();
        for (txn_id, txn) in recovered {
            if !txn.recovery_cleanup(false)? {
                table.insert(mix(txn_id), TxnEntry { txn, worker: None });
            }
        }

        let read_position = manager.read_position();
        Ok(Self {
            shared: Arc::new(EngineShared {
                db,
                manager,
                workers,
                indexes: Mutex::new(IndexCache::new(config.index_cache_capacity)),
                decode: Mutex::new(DecodeShared {
                    state: DecodeState::Disabled,
                    decoder_running: false,
                    position: read_position,
                    txn_id: TxnId::NONE,
                }),
                decode_cond: Condvar::new(),
            }),
            recovered: Mutex::new(Some(table)),
        })
    }

    /// The stream position of the next record to be decoded.
    #[must_use]
    pub fn decode_position(&self) -> u64 {
        self.shared.decode.lock().position
    }

    /// The running transaction id at the decoder.
    #[must_use]
    pub fn decode_txn_id(&self) -> TxnId {
        self.shared.decode.lock().txn_id
    }

    /// Whether the decoder thread is active.
    #[must_use]
    pub fn is_receiving(&self) -> bool {
        self.shared.decode.lock().decoder_running
    }

    /// Spawns the decoder thread over `source`.
    ///
    /// Does nothing if the decoder is already running.
    pub fn start_receiving(
        self: &Arc<Self>,
        source: Box<dyn ReplicationSource>,
        initial_txn_id: TxnId,
    ) -> ReplResult<()> {
        {
            let mut decode = self.shared.decode.lock();
            if decode.decoder_running {
                return Ok(());
            }
            decode.decoder_running = true;
            decode.position = source.position();
            decode.txn_id = initial_txn_id;
        }

        let engine = Arc::clone(self);
        std::thread::Builder::new()
            .name("replication-receiver".into())
            .spawn(move || engine.decode_loop(source, initial_txn_id))?;
        Ok(())
    }

    /// Prevents new operations from starting and waits for in-flight
    /// operations to complete. The returned guard holds the decode
    /// latch, so the suspension is stable until
    /// [`SuspendedEngine::resume`].
    pub fn suspend(&self) -> SuspendedEngine<'_> {
        let mut guard = self.shared.decode.lock();
        if guard.state == DecodeState::Running {
            guard.state = DecodeState::DoSuspend;
            while guard.state == DecodeState::DoSuspend {
                self.shared.decode_cond.wait(&mut guard);
            }
        }

        // Wait for enqueued work to drain.
        if let Some(group) = self.shared.workers.as_ref() {
            group.join();
        }

        SuspendedEngine {
            shared: Arc::clone(&self.shared),
            guard,
        }
    }

    fn decode_loop(self: Arc<Self>, source: Box<dyn ReplicationSource>, initial_txn_id: TxnId) {
        let table = self.recovered.lock().take().unwrap_or_default();
        let mut visitor = EngineVisitor {
            shared: Arc::clone(&self.shared),
            txns: table,
        };
        let mut decoder = RedoDecoder::new(source, initial_txn_id);

        let result: ReplResult<()> = (|| {
            loop {
                {
                    let mut decode = self.shared.decode.lock();
                    match decode.state {
                        DecodeState::Running => {}
                        DecodeState::Disabled => decode.state = DecodeState::Running,
                        DecodeState::DoSuspend | DecodeState::Suspended => {
                            decode.state = DecodeState::Suspended;
                            self.shared.decode_cond.notify_all();
                            while decode.state != DecodeState::Running {
                                self.shared.decode_cond.wait(&mut decode);
                            }
                        }
                    }
                    // Capture the position of the next operation and
                    // the transaction id before its delta applies.
                    decode.position = decoder.position();
                    decode.txn_id = decoder.txn_id();
                }

                if decoder.decode_one(&mut visitor)? {
                    break;
                }
            }

            // End of stream. Wait for work to complete, then roll back
            // any lingering transactions.
            if let Some(group) = self.shared.workers.as_ref() {
                group.join();
            }
            visitor.reset()?;
            Ok(())
        })();

        let failed = result.is_err();
        if let Err(err) = result {
            self.shared.fail(&err);
        }

        {
            let mut decode = self.shared.decode.lock();
            decode.state = DecodeState::Disabled;
            decode.decoder_running = false;
            self.shared.decode_cond.notify_all();
        }

        if !failed {
            // The stream ended, so the local instance is now the
            // leader.
            match self.shared.manager.leader_notify() {
                Ok(()) => {}
                Err(err) if err.is_unmodifiable_replica() => {
                    // Already receiving again.
                }
                Err(err) => {
                    tracing::error!(error = %err, "leader notification failed");
                    self.shared.db.force_close(&err.to_string());
                }
            }
        }
    }
}

/// Witness that the engine is suspended; holds the decode latch.
pub struct SuspendedEngine<'a> {
    shared: Arc<EngineShared>,
    guard: MutexGuard<'a, DecodeShared>,
}

impl SuspendedEngine<'_> {
    /// Stream position of the next operation, stable while suspended.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.guard.position
    }

    /// Running transaction id, stable while suspended.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.guard.txn_id
    }

    /// Returns the decoder to the running state and releases the
    /// decode latch.
    pub fn resume(mut self) {
        if self.guard.state == DecodeState::Suspended {
            self.guard.state = DecodeState::Running;
            self.shared.decode_cond.notify_all();
        }
    }
}

/// Decoder-thread view of the engine: the transaction table is only
/// ever touched here.
struct EngineVisitor {
    shared: Arc<EngineShared>,
    txns: HashMap<u64, TxnEntry>,
}

impl EngineVisitor {
    fn new_transaction(&self, txn_id: TxnId) -> Arc<dyn ReplTransaction> {
        let txn = self.shared.db.new_transaction(txn_id);
        txn.attach("replication");
        txn
    }

    fn insert_new(&mut self, key: u64, txn_id: TxnId) -> Arc<dyn ReplTransaction> {
        let txn = self.new_transaction(txn_id);
        self.txns.insert(
            key,
            TxnEntry {
                txn: Arc::clone(&txn),
                worker: None,
            },
        );
        txn
    }

    /// Resolves the entry for a transaction, creating it on demand.
    /// Startup recovery only seeds transactions that generated undo
    /// entries, so mid-stream ids can be new.
    fn get_txn(&mut self, txn_id: TxnId) -> (u64, Arc<dyn ReplTransaction>) {
        let key = mix(txn_id);
        if let Some(entry) = self.txns.get(&key) {
            return (key, Arc::clone(&entry.txn));
        }
        let txn = self.insert_new(key, txn_id);
        (key, txn)
    }

    /// Runs a task with the given affinity, or inline when there is no
    /// worker group. Returns the worker that took it.
    fn dispatch(&self, binding: Option<WorkerId>, task: Task) -> Option<WorkerId> {
        match self.shared.workers.as_ref() {
            None => {
                task();
                None
            }
            Some(group) => Some(match binding {
                Some(id) => {
                    group.enqueue_to(id, task);
                    id
                }
                None => group.enqueue(task),
            }),
        }
    }

    /// Runs a task against a tabled transaction, binding its worker on
    /// first dispatch.
    fn run_task(&mut self, key: u64, task: Task) {
        let binding = self.txns.get(&key).and_then(|entry| entry.worker);
        let chosen = self.dispatch(binding, task);
        if let Some(entry) = self.txns.get_mut(&key) {
            entry.worker = chosen;
        }
    }

    /// Runs a task on any worker.
    fn run_anywhere(&self, task: Task) {
        self.dispatch(None, task);
    }
}

impl RedoVisitor for EngineVisitor {
    fn reset(&mut self) -> ReplResult<bool> {
        // Reset and discard all open transactions, waiting until every
        // worker has processed its rollback.
        let entries: Vec<TxnEntry> = self.txns.drain().map(|(_, entry)| entry).collect();
        let countdown = Arc::new(Countdown::new(entries.len()));

        for entry in entries {
            let txn = entry.txn;
            let shared = Arc::clone(&self.shared);
            let countdown = Arc::clone(&countdown);
            self.dispatch(
                entry.worker,
                Box::new(move || match txn.recovery_cleanup(true) {
                    Ok(_) => countdown.count_down(),
                    Err(err) => shared.fail(&err),
                }),
            );
        }

        countdown.wait();

        // Lingering fragmented trash is left alone: transactions that
        // are still active may need it to roll back.
        Ok(false)
    }

    fn timestamp(&mut self, _timestamp_millis: u64) -> ReplResult<bool> {
        Ok(false)
    }

    fn shutdown(&mut self, _timestamp_millis: u64) -> ReplResult<bool> {
        Ok(false)
    }

    fn close(&mut self, _timestamp_millis: u64) -> ReplResult<bool> {
        Ok(false)
    }

    fn end_file(&mut self, _timestamp_millis: u64) -> ReplResult<bool> {
        Ok(false)
    }

    fn store(
        &mut self,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        // The lock must be acquired before the task is enqueued; the
        // stream imposes a total order on lock operations.
        let locker = self.shared.db.local_locker();
        locker.lock_upgradable(index_id, &key)?;

        let shared = Arc::clone(&self.shared);
        self.run_anywhere(Box::new(move || {
            let result = (|| {
                // The store itself requires the full exclusive lock.
                locker.lock_exclusive(index_id, &key)?;
                shared.apply_store(None, index_id, &key, value.as_deref())
            })();
            match result {
                Ok(Some(index)) => shared.notify_store(&index, &key, value.as_deref()),
                Ok(None) => {}
                Err(err) => shared.fail(&err),
            }
        }));

        Ok(false)
    }

    fn store_no_lock(
        &mut self,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        // A no-lock record is produced by the unsafe lock mode. If the
        // application performed its own locking, locking the entry
        // here preserves consistency; otherwise the outcome is
        // unpredictable anyway.
        self.store(index_id, key, value)
    }

    fn rename_index(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        new_name: Vec<u8>,
    ) -> ReplResult<bool> {
        if let Some(index) = self.shared.get_index(None, index_id)? {
            let old_name = index.name();
            match self.shared.db.rename_index(&index, &new_name, txn_id) {
                Ok(()) => {
                    if let Err(err) =
                        self.shared
                            .manager
                            .notify_rename(&index, old_name.as_deref(), &new_name)
                    {
                        self.shared.uncaught(&err);
                    }
                }
                Err(err) => {
                    self.shared.warning(&format!("unable to rename index: {err}"));
                }
            }
        }
        Ok(false)
    }

    fn delete_index(&mut self, txn_id: TxnId, index_id: IndexId) -> ReplResult<bool> {
        let (key, txn) = self.get_txn(txn_id);
        let shared = Arc::clone(&self.shared);

        self.run_task(
            key,
            Box::new(move || {
                let result = (|| -> ReplResult<()> {
                    // Open with the transaction so an uncached load
                    // cannot deadlock against our own locks.
                    let index = shared.get_index(Some(&*txn), index_id)?;
                    shared.indexes.lock().remove(index_id);

                    let committed = txn.commit();
                    txn.exit()?;
                    committed?;

                    if let Some(index) = index {
                        index.close()?;
                        if let Err(err) = shared.manager.notify_drop(&index) {
                            shared.uncaught(&err);
                        }
                    }

                    if let Some(deletion) = shared.db.replica_delete_tree(index_id)? {
                        // The tree deletion may be expensive; run it
                        // off the replay path. Concurrent deletes mean
                        // the application deletes concurrently.
                        let spawned = std::thread::Builder::new()
                            .name(format!("index-deletion-{}", index_id.value()))
                            .spawn(deletion);
                        if let Err(err) = spawned {
                            // The tree is fully deleted when the
                            // database is next opened.
                            shared.warning(&format!(
                                "unable to immediately delete index: {err}"
                            ));
                        }
                    }
                    Ok(())
                })();
                if let Err(err) = result {
                    shared.fail(&err);
                }
            }),
        );

        Ok(false)
    }

    fn txn_enter(&mut self, txn_id: TxnId) -> ReplResult<bool> {
        let key = mix(txn_id);
        if self.txns.contains_key(&key) {
            // Nested scope of an existing transaction.
            let (_, txn) = self.get_txn(txn_id);
            let shared = Arc::clone(&self.shared);
            self.run_task(
                key,
                Box::new(move || {
                    if let Err(err) = txn.enter() {
                        shared.fail(&err);
                    }
                }),
            );
        } else {
            self.insert_new(key, txn_id);
        }
        Ok(false)
    }

    fn txn_rollback(&mut self, txn_id: TxnId) -> ReplResult<bool> {
        let (key, txn) = self.get_txn(txn_id);
        let shared = Arc::clone(&self.shared);
        self.run_task(
            key,
            Box::new(move || {
                if let Err(err) = txn.exit() {
                    shared.fail(&err);
                }
            }),
        );
        Ok(false)
    }

    fn txn_rollback_final(&mut self, txn_id: TxnId) -> ReplResult<bool> {
        if let Some(entry) = self.txns.remove(&mix(txn_id)) {
            let txn = entry.txn;
            let shared = Arc::clone(&self.shared);
            self.dispatch(
                entry.worker,
                Box::new(move || {
                    if let Err(err) = txn.reset() {
                        shared.fail(&err);
                    }
                }),
            );
        }
        Ok(false)
    }

    fn txn_commit(&mut self, txn_id: TxnId) -> ReplResult<bool> {
        let (key, txn) = self.get_txn(txn_id);
        let shared = Arc::clone(&self.shared);
        self.run_task(
            key,
            Box::new(move || {
                if let Err(err) = txn.commit() {
                    shared.fail(&err);
                }
            }),
        );
        Ok(false)
    }

    fn txn_commit_final(&mut self, txn_id: TxnId) -> ReplResult<bool> {
        if let Some(entry) = self.txns.remove(&mix(txn_id)) {
            let txn = entry.txn;
            let shared = Arc::clone(&self.shared);
            self.dispatch(
                entry.worker,
                Box::new(move || {
                    if let Err(err) = txn.commit_all() {
                        shared.fail(&err);
                    }
                }),
            );
        }
        Ok(false)
    }

    fn txn_enter_store(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        let scramble = mix(txn_id);
        let existing = self.txns.contains_key(&scramble);
        let (_, txn) = self.get_txn(txn_id);

        txn.lock_upgradable(index_id, &key)?;

        let shared = Arc::clone(&self.shared);
        let task_txn = Arc::clone(&txn);
        self.run_task(
            scramble,
            Box::new(move || {
                let result = (|| {
                    if existing {
                        // Nested scope of an existing transaction.
                        task_txn.enter()?;
                    }
                    shared.apply_store(Some(&*task_txn), index_id, &key, value.as_deref())
                })();
                match result {
                    Ok(Some(index)) => shared.notify_store(&index, &key, value.as_deref()),
                    Ok(None) => {}
                    Err(err) => shared.fail(&err),
                }
            }),
        );
        Ok(false)
    }

    fn txn_store(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        let (scramble, txn) = self.get_txn(txn_id);
        txn.lock_upgradable(index_id, &key)?;

        let shared = Arc::clone(&self.shared);
        self.run_task(
            scramble,
            Box::new(move || {
                let result = shared.apply_store(Some(&*txn), index_id, &key, value.as_deref());
                match result {
                    Ok(Some(index)) => shared.notify_store(&index, &key, value.as_deref()),
                    Ok(None) => {}
                    Err(err) => shared.fail(&err),
                }
            }),
        );
        Ok(false)
    }

    fn txn_store_commit(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        let (scramble, txn) = self.get_txn(txn_id);
        txn.lock_upgradable(index_id, &key)?;

        let shared = Arc::clone(&self.shared);
        self.run_task(
            scramble,
            Box::new(move || {
                let result = (|| {
                    let index =
                        shared.apply_store(Some(&*txn), index_id, &key, value.as_deref())?;
                    txn.commit()?;
                    Ok(index)
                })();
                match result {
                    Ok(Some(index)) => shared.notify_store(&index, &key, value.as_deref()),
                    Ok(None) => {}
                    Err(err) => shared.fail(&err),
                }
            }),
        );
        Ok(false)
    }

    fn txn_store_commit_final(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        let (txn, binding) = match self.txns.remove(&mix(txn_id)) {
            Some(entry) => (entry.txn, entry.worker),
            None => {
                // Commit writes are idempotent against duplicate
                // replay; the transaction is not tabled.
                (self.new_transaction(txn_id), None)
            }
        };

        txn.lock_upgradable(index_id, &key)?;

        let shared = Arc::clone(&self.shared);
        self.dispatch(
            binding,
            Box::new(move || {
                let result = (|| {
                    let index =
                        shared.apply_store(Some(&*txn), index_id, &key, value.as_deref())?;
                    txn.commit_all()?;
                    Ok(index)
                })();
                match result {
                    Ok(Some(index)) => shared.notify_store(&index, &key, value.as_deref()),
                    Ok(None) => {}
                    Err(err) => shared.fail(&err),
                }
            }),
        );
        Ok(false)
    }

    fn txn_lock_shared(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
    ) -> ReplResult<bool> {
        let (_, txn) = self.get_txn(txn_id);
        txn.lock_shared(index_id, &key)?;
        Ok(false)
    }

    fn txn_lock_upgradable(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
    ) -> ReplResult<bool> {
        let (_, txn) = self.get_txn(txn_id);
        txn.lock_upgradable(index_id, &key)?;
        Ok(false)
    }

    fn txn_lock_exclusive(
        &mut self,
        txn_id: TxnId,
        index_id: IndexId,
        key: Vec<u8>,
    ) -> ReplResult<bool> {
        let (_, txn) = self.get_txn(txn_id);
        txn.lock_exclusive(index_id, &key)?;
        Ok(false)
    }

    fn txn_custom(&mut self, txn_id: TxnId, message: Vec<u8>) -> ReplResult<bool> {
        let handler = self
            .shared
            .db
            .custom_handler()
            .ok_or(ReplError::HandlerMissing)?;
        let (key, txn) = self.get_txn(txn_id);

        let shared = Arc::clone(&self.shared);
        self.run_task(
            key,
            Box::new(move || {
                if let Err(err) = handler.redo(&*txn, &message) {
                    shared.fail(&err);
                }
            }),
        );
        Ok(false)
    }

    fn txn_custom_lock(
        &mut self,
        txn_id: TxnId,
        message: Vec<u8>,
        index_id: IndexId,
        key: Vec<u8>,
    ) -> ReplResult<bool> {
        let handler = self
            .shared
            .db
            .custom_handler()
            .ok_or(ReplError::HandlerMissing)?;
        let (scramble, txn) = self.get_txn(txn_id);

        txn.lock_upgradable(index_id, &key)?;

        let shared = Arc::clone(&self.shared);
        self.run_task(
            scramble,
            Box::new(move || {
                let result = (|| {
                    // The handler body requires the full exclusive
                    // lock.
                    txn.lock_exclusive(index_id, &key)?;
                    handler.redo_lock(&*txn, &message, index_id, &key)
                })();
                if let Err(err) = result {
                    shared.fail(&err);
                }
            }),
        );
        Ok(false)
    }
}
