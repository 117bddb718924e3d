//! Mock collaborators for exercising the replay engine.
//!
//! These doubles record everything the engine does to them, in a
//! single ordered event log per database, so tests can assert both
//! effects and ordering. They are public because integration tests and
//! downstream crates drive the engine with them.

use crate::error::{ReplResult, ReplError};
use crate::traits::{
    EventListener, EventType, ReplDatabase, ReplIndex, ReplLocker, ReplTransaction,
    ReplicationManager, TransactionHandler,
};
use crate::visitor::RedoVisitor;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use vellum_core::{CoreError, IndexId, TxnId};

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn hex_opt(bytes: Option<&[u8]>) -> String {
    bytes.map_or_else(|| "-".to_string(), hex)
}

/// Visitor that renders every decoded record into a line of text.
#[derive(Debug, Default)]
pub struct RecordingVisitor {
    /// One line per decoded record, in decode order.
    pub events: Vec<String>,
}

impl RecordingVisitor {
    fn push(&mut self, event: String) -> ReplResult<bool> {
        self.events.push(event);
        Ok(false)
    }
}

impl RedoVisitor for RecordingVisitor {
    fn reset(&mut self) -> ReplResult<bool> {
        self.push("reset".into())
    }
    fn timestamp(&mut self, ts: u64) -> ReplResult<bool> {
        self.push(format!("timestamp {ts}"))
    }
    fn shutdown(&mut self, ts: u64) -> ReplResult<bool> {
        self.push(format!("shutdown {ts}"))
    }
    fn close(&mut self, ts: u64) -> ReplResult<bool> {
        self.push(format!("close {ts}"))
    }
    fn end_file(&mut self, ts: u64) -> ReplResult<bool> {
        self.push(format!("end_file {ts}"))
    }
    fn store(&mut self, ix: IndexId, key: Vec<u8>, value: Option<Vec<u8>>) -> ReplResult<bool> {
        self.push(format!("store {ix} key={} value={}", hex(&key), hex_opt(value.as_deref())))
    }
    fn store_no_lock(
        &mut self,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push(format!(
            "store_no_lock {ix} key={} value={}",
            hex(&key),
            hex_opt(value.as_deref())
        ))
    }
    fn rename_index(&mut self, txn: TxnId, ix: IndexId, new_name: Vec<u8>) -> ReplResult<bool> {
        self.push(format!("rename_index {txn} {ix} name={}", hex(&new_name)))
    }
    fn delete_index(&mut self, txn: TxnId, ix: IndexId) -> ReplResult<bool> {
        self.push(format!("delete_index {txn} {ix}"))
    }
    fn txn_enter(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push(format!("txn_enter {txn}"))
    }
    fn txn_rollback(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push(format!("txn_rollback {txn}"))
    }
    fn txn_rollback_final(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push(format!("txn_rollback_final {txn}"))
    }
    fn txn_commit(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push(format!("txn_commit {txn}"))
    }
    fn txn_commit_final(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push(format!("txn_commit_final {txn}"))
    }
    fn txn_enter_store(
        &mut self,
        txn: TxnId,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push(format!(
            "txn_enter_store {txn} {ix} key={} value={}",
            hex(&key),
            hex_opt(value.as_deref())
        ))
    }
    fn txn_store(
        &mut self,
        txn: TxnId,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push(format!(
            "txn_store {txn} {ix} key={} value={}",
            hex(&key),
            hex_opt(value.as_deref())
        ))
    }
    fn txn_store_commit(
        &mut self,
        txn: TxnId,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push(format!(
            "txn_store_commit {txn} {ix} key={} value={}",
            hex(&key),
            hex_opt(value.as_deref())
        ))
    }
    fn txn_store_commit_final(
        &mut self,
        txn: TxnId,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push(format!(
            "txn_store_commit_final {txn} {ix} key={} value={}",
            hex(&key),
            hex_opt(value.as_deref())
        ))
    }
    fn txn_lock_shared(&mut self, txn: TxnId, ix: IndexId, key: Vec<u8>) -> ReplResult<bool> {
        self.push(format!("txn_lock_shared {txn} {ix} key={}", hex(&key)))
    }
    fn txn_lock_upgradable(&mut self, txn: TxnId, ix: IndexId, key: Vec<u8>) -> ReplResult<bool> {
        self.push(format!("txn_lock_upgradable {txn} {ix} key={}", hex(&key)))
    }
    fn txn_lock_exclusive(&mut self, txn: TxnId, ix: IndexId, key: Vec<u8>) -> ReplResult<bool> {
        self.push(format!("txn_lock_exclusive {txn} {ix} key={}", hex(&key)))
    }
    fn txn_custom(&mut self, txn: TxnId, message: Vec<u8>) -> ReplResult<bool> {
        self.push(format!("txn_custom {txn} message={}", hex(&message)))
    }
    fn txn_custom_lock(
        &mut self,
        txn: TxnId,
        message: Vec<u8>,
        ix: IndexId,
        key: Vec<u8>,
    ) -> ReplResult<bool> {
        self.push(format!(
            "txn_custom_lock {txn} {ix} key={} message={}",
            hex(&key),
            hex(&message)
        ))
    }
}

/// Shared ordered event log; every mock appends here so tests can
/// assert cross-collaborator ordering.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Mock transaction recording each call into the shared log.
pub struct MockTransaction {
    txn_id: TxnId,
    log: EventLog,
}

impl MockTransaction {
    /// The transaction's id.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }
}

impl ReplLocker for MockTransaction {
    fn lock_shared(&self, ix: IndexId, key: &[u8]) -> ReplResult<()> {
        self.log
            .lock()
            .push(format!("{}: lock_shared {ix} {}", self.txn_id, hex(key)));
        Ok(())
    }
    fn lock_upgradable(&self, ix: IndexId, key: &[u8]) -> ReplResult<()> {
        self.log
            .lock()
            .push(format!("{}: lock_upgradable {ix} {}", self.txn_id, hex(key)));
        Ok(())
    }
    fn lock_exclusive(&self, ix: IndexId, key: &[u8]) -> ReplResult<()> {
        self.log
            .lock()
            .push(format!("{}: lock_exclusive {ix} {}", self.txn_id, hex(key)));
        Ok(())
    }
}

impl ReplTransaction for MockTransaction {
    fn enter(&self) -> ReplResult<()> {
        self.log.lock().push(format!("{}: enter", self.txn_id));
        Ok(())
    }
    fn exit(&self) -> ReplResult<()> {
        self.log.lock().push(format!("{}: exit", self.txn_id));
        Ok(())
    }
    fn commit(&self) -> ReplResult<()> {
        self.log.lock().push(format!("{}: commit", self.txn_id));
        Ok(())
    }
    fn commit_all(&self) -> ReplResult<()> {
        self.log.lock().push(format!("{}: commit_all", self.txn_id));
        Ok(())
    }
    fn reset(&self) -> ReplResult<()> {
        self.log.lock().push(format!("{}: reset", self.txn_id));
        Ok(())
    }
    fn recovery_cleanup(&self, rollback: bool) -> ReplResult<bool> {
        self.log
            .lock()
            .push(format!("{}: recovery_cleanup rollback={rollback}", self.txn_id));
        Ok(rollback)
    }
    fn attach(&self, tag: &str) {
        self.log.lock().push(format!("{}: attach {tag}", self.txn_id));
    }
}

/// Mock index storing into a map and recording stores into the log.
pub struct MockIndex {
    id: IndexId,
    name: Mutex<Vec<u8>>,
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
    log: EventLog,
}

impl MockIndex {
    /// Current value for a key.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.lock().get(key).cloned()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Marks the handle closed; the next store reports `ClosedIndex`.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the handle is currently closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ReplIndex for MockIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn name(&self) -> Option<Vec<u8>> {
        Some(self.name.lock().clone())
    }

    fn store(
        &self,
        txn: Option<&dyn ReplTransaction>,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> ReplResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ReplError::Core(CoreError::ClosedIndex));
        }
        let _ = txn;
        let mut data = self.data.lock();
        match value {
            Some(value) => {
                data.insert(key.to_vec(), value.to_vec());
            }
            None => {
                data.remove(key);
            }
        }
        self.log.lock().push(format!(
            "{}: store {} value={}",
            self.id,
            hex(key),
            hex_opt(value)
        ));
        Ok(())
    }

    fn close(&self) -> ReplResult<()> {
        self.mark_closed();
        self.log.lock().push(format!("{}: close", self.id));
        Ok(())
    }
}

/// Mock locker used for non-transactional replay operations.
pub struct MockLocker {
    log: EventLog,
}

impl ReplLocker for MockLocker {
    fn lock_shared(&self, ix: IndexId, key: &[u8]) -> ReplResult<()> {
        self.log.lock().push(format!("locker: lock_shared {ix} {}", hex(key)));
        Ok(())
    }
    fn lock_upgradable(&self, ix: IndexId, key: &[u8]) -> ReplResult<()> {
        self.log
            .lock()
            .push(format!("locker: lock_upgradable {ix} {}", hex(key)));
        Ok(())
    }
    fn lock_exclusive(&self, ix: IndexId, key: &[u8]) -> ReplResult<()> {
        self.log
            .lock()
            .push(format!("locker: lock_exclusive {ix} {}", hex(key)));
        Ok(())
    }
}

/// Mock event listener collecting notifications.
#[derive(Default)]
pub struct MockListener {
    /// Recorded events.
    pub events: Mutex<Vec<(EventType, String)>>,
}

impl EventListener for MockListener {
    fn notify(&self, event: EventType, message: &str) {
        self.events.lock().push((event, message.to_string()));
    }
}

/// Mock database wiring all the doubles together.
pub struct MockDatabase {
    /// Shared ordered event log.
    pub log: EventLog,
    indexes: Mutex<HashMap<u64, Arc<MockIndex>>>,
    transactions: Mutex<Vec<Arc<MockTransaction>>>,
    locker: Arc<MockLocker>,
    handler: Mutex<Option<Arc<dyn TransactionHandler>>>,
    listener: Mutex<Option<Arc<MockListener>>>,
    closed: AtomicBool,
    close_cause: Mutex<Option<String>>,
    renames: Mutex<Vec<(u64, Vec<u8>)>>,
    delete_tree_requests: Mutex<Vec<u64>>,
}

impl Default for MockDatabase {
    fn default() -> Self {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            locker: Arc::new(MockLocker {
                log: Arc::clone(&log),
            }),
            log,
            indexes: Mutex::new(HashMap::new()),
            transactions: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
            close_cause: Mutex::new(None),
            renames: Mutex::new(Vec::new()),
            delete_tree_requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers an index so replay can open it.
    pub fn add_index(&self, index_id: IndexId) -> Arc<MockIndex> {
        let index = Arc::new(MockIndex {
            id: index_id,
            name: Mutex::new(format!("ix-{}", index_id.value()).into_bytes()),
            data: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            log: Arc::clone(&self.log),
        });
        self.indexes.lock().insert(index_id.value(), Arc::clone(&index));
        index
    }

    /// Looks up a registered index.
    #[must_use]
    pub fn index(&self, index_id: IndexId) -> Option<Arc<MockIndex>> {
        self.indexes.lock().get(&index_id.value()).cloned()
    }

    /// All transactions the engine created, in creation order.
    #[must_use]
    pub fn transactions(&self) -> Vec<Arc<MockTransaction>> {
        self.transactions.lock().clone()
    }

    /// Installs a custom transaction handler.
    pub fn set_handler(&self, handler: Arc<dyn TransactionHandler>) {
        *self.handler.lock() = Some(handler);
    }

    /// Installs an event listener.
    pub fn set_listener(&self, listener: Arc<MockListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// The recorded close cause, if the database was force-closed.
    #[must_use]
    pub fn close_cause(&self) -> Option<String> {
        self.close_cause.lock().clone()
    }

    /// Renames applied through the database, as (index id, new name).
    #[must_use]
    pub fn renames(&self) -> Vec<(u64, Vec<u8>)> {
        self.renames.lock().clone()
    }

    /// Index ids whose tree deletion was requested.
    #[must_use]
    pub fn delete_tree_requests(&self) -> Vec<u64> {
        self.delete_tree_requests.lock().clone()
    }

    /// A copy of the ordered event log.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl ReplDatabase for MockDatabase {
    fn new_transaction(&self, txn_id: TxnId) -> Arc<dyn ReplTransaction> {
        let txn = Arc::new(MockTransaction {
            txn_id,
            log: Arc::clone(&self.log),
        });
        self.transactions.lock().push(Arc::clone(&txn));
        txn
    }

    fn any_index_by_id(
        &self,
        _txn: Option<&dyn ReplTransaction>,
        index_id: IndexId,
    ) -> ReplResult<Option<Arc<dyn ReplIndex>>> {
        let index = self.indexes.lock().get(&index_id.value()).cloned();
        Ok(index.map(|index| {
            // Opening revives a closed handle.
            index.closed.store(false, Ordering::SeqCst);
            index as Arc<dyn ReplIndex>
        }))
    }

    fn rename_index(
        &self,
        index: &Arc<dyn ReplIndex>,
        new_name: &[u8],
        _txn_id: TxnId,
    ) -> ReplResult<()> {
        let id = index.id();
        self.renames.lock().push((id.value(), new_name.to_vec()));
        if let Some(mock) = self.indexes.lock().get(&id.value()) {
            *mock.name.lock() = new_name.to_vec();
        }
        Ok(())
    }

    fn replica_delete_tree(
        &self,
        index_id: IndexId,
    ) -> ReplResult<Option<Box<dyn FnOnce() + Send>>> {
        self.delete_tree_requests.lock().push(index_id.value());
        self.indexes.lock().remove(&index_id.value());
        Ok(None)
    }

    fn custom_handler(&self) -> Option<Arc<dyn TransactionHandler>> {
        self.handler.lock().clone()
    }

    fn event_listener(&self) -> Option<Arc<dyn EventListener>> {
        self.listener
            .lock()
            .clone()
            .map(|listener| listener as Arc<dyn EventListener>)
    }

    fn local_locker(&self) -> Arc<dyn ReplLocker> {
        Arc::clone(&self.locker) as Arc<dyn ReplLocker>
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn force_close(&self, cause: &str) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            *self.close_cause.lock() = Some(cause.to_string());
        }
    }
}

/// Mock replication manager counting notifications.
pub struct MockManager {
    /// Position replay starts from.
    pub start_position: u64,
    /// Count of store notifications.
    pub stores_notified: AtomicU64,
    /// Count of rename notifications.
    pub renames_notified: AtomicU64,
    /// Count of drop notifications.
    pub drops_notified: AtomicU64,
    /// Count of leader promotions.
    pub leader_notified: AtomicU64,
    /// Error the next notify hook returns, once.
    pub fail_next_notify: AtomicBool,
}

impl MockManager {
    /// Creates a manager reporting `start_position`.
    #[must_use]
    pub fn new(start_position: u64) -> Arc<Self> {
        Arc::new(Self {
            start_position,
            stores_notified: AtomicU64::new(0),
            renames_notified: AtomicU64::new(0),
            drops_notified: AtomicU64::new(0),
            leader_notified: AtomicU64::new(0),
            fail_next_notify: AtomicBool::new(false),
        })
    }
}

impl ReplicationManager for MockManager {
    fn read_position(&self) -> u64 {
        self.start_position
    }

    fn notify_store(
        &self,
        _index: &Arc<dyn ReplIndex>,
        _key: &[u8],
        _value: Option<&[u8]>,
    ) -> ReplResult<()> {
        if self.fail_next_notify.swap(false, Ordering::SeqCst) {
            return Err(ReplError::Core(CoreError::database("notify hook failed")));
        }
        self.stores_notified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn notify_rename(
        &self,
        _index: &Arc<dyn ReplIndex>,
        _old_name: Option<&[u8]>,
        _new_name: &[u8],
    ) -> ReplResult<()> {
        self.renames_notified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn notify_drop(&self, _index: &Arc<dyn ReplIndex>) -> ReplResult<()> {
        self.drops_notified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn leader_notify(&self) -> ReplResult<()> {
        self.leader_notified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
