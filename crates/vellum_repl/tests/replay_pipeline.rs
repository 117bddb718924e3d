//! End-to-end replay: encode through a transaction context, feed the
//! bytes to the engine, and observe the effects on mock collaborators.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vellum_codec::RedoOp;
use vellum_core::{CoreResult, DurabilityMode, IndexId, RedoSink, RedoWriter, TransactionContext, TxnId};
use vellum_repl::mock::{MockDatabase, MockListener, MockManager};
use vellum_repl::{
    EngineConfig, EventType, MemorySource, ReplDatabase, ReplEngine, ReplResult, ReplTransaction,
    TransactionHandler,
};

/// Sink capturing the replicated stream, terminators included.
struct StreamSink(Arc<Mutex<Vec<u8>>>);

impl RedoSink for StreamSink {
    fn check_write(&self, mode: DurabilityMode) -> CoreResult<DurabilityMode> {
        Ok(mode)
    }
    fn write(&mut self, data: &[u8], _commit: Option<usize>) -> CoreResult<u64> {
        let mut stream = self.0.lock();
        stream.extend_from_slice(data);
        Ok(stream.len() as u64)
    }
    fn sync(&mut self) -> CoreResult<()> {
        Ok(())
    }
    fn writes_terminators(&self) -> bool {
        true
    }
}

/// Encodes a stream through a real context.
fn encode(build: impl FnOnce(&TransactionContext, &Arc<RedoWriter>)) -> Vec<u8> {
    let context = TransactionContext::new(1, 4096).unwrap();
    let stream = Arc::new(Mutex::new(Vec::new()));
    let writer = RedoWriter::new(Box::new(StreamSink(Arc::clone(&stream))));
    build(&context, &writer);
    context.flush().unwrap();
    let bytes = stream.lock().clone();
    bytes
}

fn engine_with(
    db: &Arc<MockDatabase>,
    manager: &Arc<MockManager>,
    max_threads: i32,
) -> Arc<ReplEngine> {
    let config = EngineConfig::new().with_max_threads(max_threads);
    let manager: Arc<dyn vellum_repl::ReplicationManager> = Arc::clone(manager) as Arc<dyn vellum_repl::ReplicationManager>;
    let db: Arc<dyn vellum_repl::ReplDatabase> = Arc::clone(db) as Arc<dyn vellum_repl::ReplDatabase>;
    Arc::new(ReplEngine::new(manager, db, &config, Vec::new()).unwrap())
}

/// Runs a stream to completion on the engine.
fn replay(engine: &Arc<ReplEngine>, stream: Vec<u8>) {
    engine
        .start_receiving(Box::new(MemorySource::new(stream, 0)), TxnId::NONE)
        .unwrap();
    wait_until(|| !engine.is_receiving());
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn single_txn_store_commit() {
    let stream = encode(|context, writer| {
        let txn = TxnId::new(5);
        context.redo_enter(writer, txn).unwrap();
        context
            .redo_store(writer, RedoOp::TxnStore, txn, IndexId::new(0x200), b"k", b"v")
            .unwrap();
        context
            .redo_commit_final(writer, txn, DurabilityMode::Sync)
            .unwrap();
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0x200));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    replay(&engine, stream);

    assert_eq!(index.get(b"k"), Some(b"v".to_vec()));
    assert_eq!(
        manager
            .stores_notified
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert_eq!(
        manager
            .leader_notified
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    let events = db.events();
    // The upgradable lock is acquired before the store runs.
    let lock_at = events
        .iter()
        .position(|event| event == "txn:5: lock_upgradable index:512 6b")
        .expect("lock event");
    let store_at = events
        .iter()
        .position(|event| event.starts_with("index:512: store 6b"))
        .expect("store event");
    assert!(lock_at < store_at, "lock must precede the store: {events:?}");
    assert!(events.contains(&"txn:5: commit_all".to_string()));
}

#[test]
fn auto_commit_delete_replays_without_transaction() {
    let stream = encode(|context, writer| {
        context
            .redo_store_auto_commit(
                writer,
                IndexId::new(0x203),
                b"x",
                Some(b"1"),
                DurabilityMode::NoSync,
            )
            .unwrap();
        context
            .redo_store_auto_commit(writer, IndexId::new(0x203), b"x", None, DurabilityMode::NoSync)
            .unwrap();
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0x203));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 1);

    replay(&engine, stream);

    assert_eq!(index.get(b"x"), None);
    // The non-transactional locker acquired both lock strengths.
    let events = db.events();
    assert!(events.contains(&"locker: lock_upgradable index:515 78".to_string()));
    assert!(events.contains(&"locker: lock_exclusive index:515 78".to_string()));
}

#[test]
fn per_transaction_order_is_preserved() {
    let stream = encode(|context, writer| {
        let txn = TxnId::new(9);
        for i in 0..50u8 {
            context
                .redo_store(
                    writer,
                    RedoOp::TxnStore,
                    txn,
                    IndexId::new(0x300),
                    b"counter",
                    &[i],
                )
                .unwrap();
        }
        context
            .redo_commit_final(writer, txn, DurabilityMode::NoSync)
            .unwrap();
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0x300));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    replay(&engine, stream);

    // The decode-order last store wins.
    assert_eq!(index.get(b"counter"), Some(vec![49]));

    // Store events for the transaction appear in decode order.
    let events = db.events();
    let stores: Vec<String> = events
        .iter()
        .filter(|event| event.starts_with("index:768: store"))
        .cloned()
        .collect();
    let expected: Vec<String> = (0..50u8)
        .map(|i| format!("index:768: store 636f756e746572 value={i:02x}"))
        .collect();
    assert_eq!(stores, expected);
}

#[test]
fn distinct_transactions_both_apply() {
    let stream = encode(|context, writer| {
        let a = TxnId::new(11);
        let b = TxnId::new(12);
        context
            .redo_store(writer, RedoOp::TxnEnterStore, a, IndexId::new(0x400), b"a", b"1")
            .unwrap();
        context
            .redo_store(writer, RedoOp::TxnEnterStore, b, IndexId::new(0x400), b"b", b"2")
            .unwrap();
        context
            .redo_commit_final(writer, a, DurabilityMode::NoSync)
            .unwrap();
        context
            .redo_commit_final(writer, b, DurabilityMode::NoSync)
            .unwrap();
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0x400));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    replay(&engine, stream);

    assert_eq!(index.get(b"a"), Some(b"1".to_vec()));
    assert_eq!(index.get(b"b"), Some(b"2".to_vec()));
    let events = db.events();
    assert!(events.contains(&"txn:11: commit_all".to_string()));
    assert!(events.contains(&"txn:12: commit_all".to_string()));
}

#[test]
fn lock_record_applies_before_following_store() {
    let stream = encode(|context, writer| {
        let txn = TxnId::new(7);
        context.redo_enter(writer, txn).unwrap();
        // An exclusive lock record followed by a no-lock store on the
        // same key.
        context
            .redo_store(writer, RedoOp::TxnStore, txn, IndexId::new(0x500), b"k", b"v0")
            .unwrap();
        context
            .redo_store_no_lock_auto_commit(
                writer,
                IndexId::new(0x500),
                b"k",
                Some(b"v1"),
                DurabilityMode::NoSync,
            )
            .unwrap();
        context
            .redo_commit_final(writer, txn, DurabilityMode::NoSync)
            .unwrap();
    });

    let db = MockDatabase::new();
    db.add_index(IndexId::new(0x500));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    replay(&engine, stream);

    let events = db.events();
    // The transactional lock was taken on the decoder thread before
    // the no-lock store's own acquisition was even attempted.
    let txn_lock = events
        .iter()
        .position(|event| event == "txn:7: lock_upgradable index:1280 6b")
        .expect("transactional lock");
    let locker_lock = events
        .iter()
        .position(|event| event == "locker: lock_upgradable index:1280 6b")
        .expect("locker acquisition");
    assert!(txn_lock < locker_lock, "events: {events:?}");
}

#[test]
fn explicit_lock_records_acquire_synchronously() {
    let stream = encode(|context, writer| {
        let txn = TxnId::new(21);
        context.redo_enter(writer, txn).unwrap();
        context
            .redo_lock(
                writer,
                RedoOp::TxnLockExclusive,
                txn,
                IndexId::new(0x600),
                b"locked",
            )
            .unwrap();
        context
            .redo_store_no_lock_auto_commit(
                writer,
                IndexId::new(0x600),
                b"locked",
                Some(b"v"),
                DurabilityMode::NoSync,
            )
            .unwrap();
        context
            .redo_commit_final(writer, txn, DurabilityMode::NoSync)
            .unwrap();
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0x600));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    replay(&engine, stream);
    assert_eq!(index.get(b"locked"), Some(b"v".to_vec()));

    // The exclusive lock record was honored on the decoder thread
    // before the following store was even dispatched.
    let events = db.events();
    let lock_at = events
        .iter()
        .position(|event| event == "txn:21: lock_exclusive index:1536 6c6f636b6564")
        .expect("lock record event");
    let store_at = events
        .iter()
        .position(|event| event.starts_with("index:1536: store"))
        .expect("store event");
    assert!(lock_at < store_at, "events: {events:?}");
}

#[test]
fn closed_index_is_reopened_and_retried() {
    let stream = encode(|context, writer| {
        context
            .redo_store_auto_commit(
                writer,
                IndexId::new(0x700),
                b"k",
                Some(b"v"),
                DurabilityMode::NoSync,
            )
            .unwrap();
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0x700));
    index.mark_closed();
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 1);

    replay(&engine, stream);

    assert_eq!(index.get(b"k"), Some(b"v".to_vec()));
    assert!(db.close_cause().is_none());
}

#[test]
fn internal_index_changes_are_not_notified() {
    let stream = encode(|context, writer| {
        context
            .redo_store_auto_commit(
                writer,
                IndexId::new(0x10),
                b"meta",
                Some(b"v"),
                DurabilityMode::NoSync,
            )
            .unwrap();
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0x10));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 1);

    replay(&engine, stream);

    assert_eq!(index.get(b"meta"), Some(b"v".to_vec()));
    assert_eq!(
        manager
            .stores_notified
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[test]
fn notify_failure_does_not_abort_replay() {
    let stream = encode(|context, writer| {
        context
            .redo_store_auto_commit(
                writer,
                IndexId::new(0x800),
                b"a",
                Some(b"1"),
                DurabilityMode::NoSync,
            )
            .unwrap();
        context
            .redo_store_auto_commit(
                writer,
                IndexId::new(0x800),
                b"b",
                Some(b"2"),
                DurabilityMode::NoSync,
            )
            .unwrap();
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0x800));
    let listener = Arc::new(MockListener::default());
    db.set_listener(Arc::clone(&listener));
    let manager = MockManager::new(0);
    manager
        .fail_next_notify
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let engine = engine_with(&db, &manager, 1);

    replay(&engine, stream);

    // Both stores applied despite the failing hook.
    assert_eq!(index.get(b"a"), Some(b"1".to_vec()));
    assert_eq!(index.get(b"b"), Some(b"2".to_vec()));
    assert!(db.close_cause().is_none());

    let events = listener.events.lock();
    assert!(events
        .iter()
        .any(|(event, _)| *event == EventType::UncaughtException));
}

#[test]
fn rename_and_delete_index_replay() {
    let stream = encode(|context, writer| {
        context
            .redo_rename_index_commit_final(
                writer,
                TxnId::new(31),
                IndexId::new(0x900),
                b"renamed",
                DurabilityMode::NoSync,
            )
            .unwrap();
        context
            .redo_delete_index_commit_final(
                writer,
                TxnId::new(32),
                IndexId::new(0x901),
                DurabilityMode::NoSync,
            )
            .unwrap();
    });

    let db = MockDatabase::new();
    db.add_index(IndexId::new(0x900));
    let doomed = db.add_index(IndexId::new(0x901));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    replay(&engine, stream);

    assert_eq!(db.renames(), vec![(0x900, b"renamed".to_vec())]);
    assert_eq!(
        manager
            .renames_notified
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    assert!(doomed.is_closed());
    assert_eq!(
        manager
            .drops_notified
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert_eq!(db.delete_tree_requests(), vec![0x901]);
    let events = db.events();
    assert!(events.contains(&"txn:32: commit".to_string()));
    assert!(events.contains(&"txn:32: exit".to_string()));
}

#[test]
fn custom_records_require_handler() {
    let stream = encode(|context, writer| {
        context
            .redo_custom(writer, TxnId::new(41), b"payload")
            .unwrap();
        context.flush().unwrap();
    });

    let db = MockDatabase::new();
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 1);

    replay(&engine, stream);

    // Decoding failed and panicked the database.
    let cause = db.close_cause().expect("database must be closed");
    assert!(cause.contains("handler"), "cause: {cause}");
}

#[test]
fn custom_records_reach_handler_with_locks() {
    struct Recorder(Arc<Mutex<Vec<String>>>);
    impl TransactionHandler for Recorder {
        fn redo(&self, txn: &dyn ReplTransaction, message: &[u8]) -> ReplResult<()> {
            let _ = txn;
            self.0
                .lock()
                .push(format!("redo {}", String::from_utf8_lossy(message)));
            Ok(())
        }
        fn redo_lock(
            &self,
            txn: &dyn ReplTransaction,
            message: &[u8],
            index_id: IndexId,
            key: &[u8],
        ) -> ReplResult<()> {
            let _ = txn;
            self.0.lock().push(format!(
                "redo_lock {} {} {}",
                String::from_utf8_lossy(message),
                index_id,
                String::from_utf8_lossy(key)
            ));
            Ok(())
        }
    }

    let stream = encode(|context, writer| {
        let txn = TxnId::new(41);
        context.redo_custom(writer, txn, b"one").unwrap();
        context
            .redo_custom_lock(writer, txn, b"two", IndexId::new(0xa00), b"ck")
            .unwrap();
        context
            .redo_commit_final(writer, txn, DurabilityMode::NoSync)
            .unwrap();
    });

    let handled = Arc::new(Mutex::new(Vec::new()));
    let db = MockDatabase::new();
    db.set_handler(Arc::new(Recorder(Arc::clone(&handled))));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    replay(&engine, stream);

    assert_eq!(
        *handled.lock(),
        vec!["redo one".to_string(), "redo_lock two index:2560 ck".to_string()]
    );
    // The keyed variant promoted its lock to exclusive in the task.
    let events = db.events();
    assert!(events.contains(&"txn:41: lock_upgradable index:2560 636b".to_string()));
    assert!(events.contains(&"txn:41: lock_exclusive index:2560 636b".to_string()));
}

#[test]
fn rollbacks_replay_as_exit_and_reset() {
    let stream = encode(|context, writer| {
        let txn = TxnId::new(51);
        context.redo_enter(writer, txn).unwrap();
        context.redo_rollback(writer, txn).unwrap();
        context.redo_rollback_final(writer, txn).unwrap();
    });

    let db = MockDatabase::new();
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 1);

    replay(&engine, stream);

    let events = db.events();
    assert!(events.contains(&"txn:51: exit".to_string()));
    assert!(events.contains(&"txn:51: reset".to_string()));
    assert!(db.close_cause().is_none());
}

#[test]
fn end_of_stream_rolls_back_lingering_transactions() {
    let stream = encode(|context, writer| {
        let txn = TxnId::new(61);
        context
            .redo_store(writer, RedoOp::TxnEnterStore, txn, IndexId::new(0xb00), b"k", b"v")
            .unwrap();
        // No final commit or rollback: the transaction lingers.
    });

    let db = MockDatabase::new();
    db.add_index(IndexId::new(0xb00));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    replay(&engine, stream);

    let events = db.events();
    assert!(
        events.contains(&"txn:61: recovery_cleanup rollback=true".to_string()),
        "events: {events:?}"
    );
    assert_eq!(
        manager
            .leader_notified
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[test]
fn recovered_transactions_are_replayed_into() {
    let db = MockDatabase::new();
    db.add_index(IndexId::new(0xc00));
    let manager = MockManager::new(0);

    // A transaction recovered from the local redo log before replay
    // starts.
    let recovered_txn = db.new_transaction(TxnId::new(71));
    let config = EngineConfig::new().with_max_threads(1);
    let manager_dyn: Arc<dyn vellum_repl::ReplicationManager> =
        Arc::clone(&manager) as Arc<dyn vellum_repl::ReplicationManager>;
    let db_dyn: Arc<dyn vellum_repl::ReplDatabase> = Arc::clone(&db) as Arc<dyn vellum_repl::ReplDatabase>;
    let engine = Arc::new(
        ReplEngine::new(
            manager_dyn,
            db_dyn,
            &config,
            vec![(TxnId::new(71), recovered_txn)],
        )
        .unwrap(),
    );

    let stream = encode(|context, writer| {
        context
            .redo_commit_final(writer, TxnId::new(71), DurabilityMode::NoSync)
            .unwrap();
    });
    replay(&engine, stream);

    let events = db.events();
    assert!(events.contains(&"txn:71: recovery_cleanup rollback=false".to_string()));
    assert!(events.contains(&"txn:71: commit_all".to_string()));
    // The engine reused the recovered transaction rather than minting
    // a new one.
    assert_eq!(db.transactions().len(), 1);
}

/// Source delivering its chunks in order, blocking before the gated
/// chunk until the gate opens.
struct GatedSource {
    chunks: Vec<Vec<u8>>,
    next: usize,
    offset: usize,
    gate_before: usize,
    gate: Arc<(Mutex<bool>, parking_lot::Condvar)>,
    position: u64,
}

impl GatedSource {
    fn new(chunks: Vec<Vec<u8>>, gate_before: usize) -> (Self, Arc<(Mutex<bool>, parking_lot::Condvar)>) {
        let gate = Arc::new((Mutex::new(false), parking_lot::Condvar::new()));
        (
            Self {
                chunks,
                next: 0,
                offset: 0,
                gate_before,
                gate: Arc::clone(&gate),
                position: 0,
            },
            gate,
        )
    }
}

fn open_gate(gate: &Arc<(Mutex<bool>, parking_lot::Condvar)>) {
    let (lock, cond) = &**gate;
    *lock.lock() = true;
    cond.notify_all();
}

impl vellum_repl::ReplicationSource for GatedSource {
    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> ReplResult<usize> {
        if self.next >= self.chunks.len() {
            return Ok(0);
        }
        if self.next == self.gate_before && self.offset == 0 {
            let (lock, cond) = &*self.gate;
            let mut open = lock.lock();
            while !*open {
                cond.wait(&mut open);
            }
        }
        let chunk = &self.chunks[self.next];
        let n = (chunk.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&chunk[self.offset..self.offset + n]);
        self.offset += n;
        self.position += n as u64;
        if self.offset == chunk.len() {
            self.next += 1;
            self.offset = 0;
        }
        Ok(n)
    }
}

#[test]
fn suspend_blocks_decoding_until_resume() {
    let first = encode(|context, writer| {
        for i in 0..5u8 {
            context
                .redo_store_auto_commit(
                    writer,
                    IndexId::new(0xd00),
                    &[i],
                    Some(&[i]),
                    DurabilityMode::NoSync,
                )
                .unwrap();
        }
    });
    let second = encode(|context, writer| {
        for i in 5..10u8 {
            context
                .redo_store_auto_commit(
                    writer,
                    IndexId::new(0xd00),
                    &[i],
                    Some(&[i]),
                    DurabilityMode::NoSync,
                )
                .unwrap();
        }
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0xd00));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    let (source, gate) = GatedSource::new(vec![first, second], 1);
    engine
        .start_receiving(Box::new(source), TxnId::NONE)
        .unwrap();

    // Open the gate shortly after the suspension request so the
    // decoder can acknowledge it even if it is parked in the read.
    let opener = {
        let gate = Arc::clone(&gate);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            open_gate(&gate);
        })
    };

    let suspended = engine.suspend();

    // All enqueued work drained; nothing more is applied while
    // suspended.
    let applied = index.len();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(index.len(), applied, "work ran while suspended");

    suspended.resume();
    opener.join().unwrap();
    wait_until(|| !engine.is_receiving());
    assert_eq!(index.len(), 10);
}

#[test]
fn suspend_during_replay_leaves_workers_idle() {
    let stream = encode(|context, writer| {
        for i in 0..200u8 {
            context
                .redo_store_auto_commit(
                    writer,
                    IndexId::new(0xe00),
                    &[i],
                    Some(&[i]),
                    DurabilityMode::NoSync,
                )
                .unwrap();
        }
    });

    let db = MockDatabase::new();
    let index = db.add_index(IndexId::new(0xe00));
    let manager = MockManager::new(0);
    let engine = engine_with(&db, &manager, 4);

    engine
        .start_receiving(Box::new(MemorySource::new(stream, 0)), TxnId::NONE)
        .unwrap();

    // Suspend mid-replay. When suspend returns, either the decoder is
    // parked or the stream already ended; both ways, every enqueued
    // task has drained, so the applied count is stable.
    let suspended = engine.suspend();
    let applied = index.len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(index.len(), applied, "work ran while suspended");

    suspended.resume();
    wait_until(|| !engine.is_receiving());
    assert_eq!(index.len(), 200);
}

#[test]
fn decode_position_advances_with_the_stream() {
    let stream = encode(|context, writer| {
        context
            .redo_store_auto_commit(
                writer,
                IndexId::new(0xf00),
                b"k",
                Some(b"v"),
                DurabilityMode::NoSync,
            )
            .unwrap();
    });
    let total = stream.len() as u64;

    let db = MockDatabase::new();
    db.add_index(IndexId::new(0xf00));
    let manager = MockManager::new(500);
    let engine = engine_with(&db, &manager, 1);
    assert_eq!(engine.decode_position(), 500);

    engine
        .start_receiving(Box::new(MemorySource::new(stream, 500)), TxnId::NONE)
        .unwrap();
    wait_until(|| !engine.is_receiving());

    assert_eq!(engine.decode_position(), 500 + total);
}
