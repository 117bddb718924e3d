//! CLI subcommands.

pub mod dump;
pub mod verify;

use serde::Serialize;
use std::error::Error;
use std::path::Path;
use vellum_core::{IndexId, TxnId};
use vellum_repl::{MemorySource, RedoVisitor, ReplResult};
use vellum_storage::{FileBackend, StorageBackend};

/// Result type for CLI commands.
pub type CommandResult = Result<(), Box<dyn Error>>;

/// Loads a redo log file into a decodable source.
pub fn load_source(file: &Path) -> Result<MemorySource, Box<dyn Error>> {
    let backend = FileBackend::open(file)?;
    let size = backend.size()?;
    let bytes = backend.read_at(0, size as usize)?;
    Ok(MemorySource::new(bytes, 0))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One decoded record, ready for text or JSON output.
#[derive(Debug, Serialize)]
pub struct RecordLine {
    /// Stream position at which the record starts.
    pub position: u64,
    /// Operation name.
    pub op: &'static str,
    /// Transaction id, for transactional records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<i64>,
    /// Index id, when the record names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_id: Option<u64>,
    /// Key bytes in hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Value bytes in hex; absent for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Custom message bytes in hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Millisecond timestamp operand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl RecordLine {
    fn new(op: &'static str) -> Self {
        Self {
            position: 0,
            op,
            txn_id: None,
            index_id: None,
            key: None,
            value: None,
            message: None,
            timestamp: None,
        }
    }

    /// Renders the record as one text line.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut line = format!("{:>10}  {}", self.position, self.op);
        if let Some(txn_id) = self.txn_id {
            line.push_str(&format!(" txn={txn_id}"));
        }
        if let Some(index_id) = self.index_id {
            line.push_str(&format!(" index={index_id}"));
        }
        if let Some(key) = &self.key {
            line.push_str(&format!(" key={key}"));
        }
        if let Some(value) = &self.value {
            line.push_str(&format!(" value={value}"));
        }
        if let Some(message) = &self.message {
            line.push_str(&format!(" message={message}"));
        }
        if let Some(timestamp) = self.timestamp {
            line.push_str(&format!(" timestamp={timestamp}"));
        }
        line
    }
}

/// Visitor collecting every decoded record as a [`RecordLine`].
#[derive(Debug, Default)]
pub struct RecordCollector {
    /// Collected records in stream order.
    pub records: Vec<RecordLine>,
}

impl RecordCollector {
    fn push(&mut self, line: RecordLine) -> ReplResult<bool> {
        self.records.push(line);
        Ok(false)
    }

    fn push_marker(&mut self, op: &'static str, timestamp: u64) -> ReplResult<bool> {
        let mut line = RecordLine::new(op);
        line.timestamp = Some(timestamp);
        self.push(line)
    }

    fn push_store(
        &mut self,
        op: &'static str,
        txn_id: Option<TxnId>,
        index_id: IndexId,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> ReplResult<bool> {
        let mut line = RecordLine::new(op);
        line.txn_id = txn_id.map(TxnId::value);
        line.index_id = Some(index_id.value());
        line.key = Some(hex(key));
        line.value = value.map(hex);
        self.push(line)
    }

    fn push_txn(&mut self, op: &'static str, txn_id: TxnId) -> ReplResult<bool> {
        let mut line = RecordLine::new(op);
        line.txn_id = Some(txn_id.value());
        self.push(line)
    }

    fn push_lock(
        &mut self,
        op: &'static str,
        txn_id: TxnId,
        index_id: IndexId,
        key: &[u8],
    ) -> ReplResult<bool> {
        let mut line = RecordLine::new(op);
        line.txn_id = Some(txn_id.value());
        line.index_id = Some(index_id.value());
        line.key = Some(hex(key));
        self.push(line)
    }
}

impl RedoVisitor for RecordCollector {
    fn reset(&mut self) -> ReplResult<bool> {
        self.push(RecordLine::new("reset"))
    }

    fn timestamp(&mut self, ts: u64) -> ReplResult<bool> {
        self.push_marker("timestamp", ts)
    }

    fn shutdown(&mut self, ts: u64) -> ReplResult<bool> {
        self.push_marker("shutdown", ts)
    }

    fn close(&mut self, ts: u64) -> ReplResult<bool> {
        self.push_marker("close", ts)
    }

    fn end_file(&mut self, ts: u64) -> ReplResult<bool> {
        self.push_marker("end_file", ts)
    }

    fn store(&mut self, ix: IndexId, key: Vec<u8>, value: Option<Vec<u8>>) -> ReplResult<bool> {
        self.push_store("store", None, ix, &key, value.as_deref())
    }

    fn store_no_lock(
        &mut self,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push_store("store_no_lock", None, ix, &key, value.as_deref())
    }

    fn rename_index(&mut self, txn: TxnId, ix: IndexId, new_name: Vec<u8>) -> ReplResult<bool> {
        let mut line = RecordLine::new("rename_index");
        line.txn_id = Some(txn.value());
        line.index_id = Some(ix.value());
        line.message = Some(hex(&new_name));
        self.push(line)
    }

    fn delete_index(&mut self, txn: TxnId, ix: IndexId) -> ReplResult<bool> {
        let mut line = RecordLine::new("delete_index");
        line.txn_id = Some(txn.value());
        line.index_id = Some(ix.value());
        self.push(line)
    }

    fn txn_enter(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push_txn("txn_enter", txn)
    }

    fn txn_rollback(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push_txn("txn_rollback", txn)
    }

    fn txn_rollback_final(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push_txn("txn_rollback_final", txn)
    }

    fn txn_commit(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push_txn("txn_commit", txn)
    }

    fn txn_commit_final(&mut self, txn: TxnId) -> ReplResult<bool> {
        self.push_txn("txn_commit_final", txn)
    }

    fn txn_enter_store(
        &mut self,
        txn: TxnId,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push_store("txn_enter_store", Some(txn), ix, &key, value.as_deref())
    }

    fn txn_store(
        &mut self,
        txn: TxnId,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push_store("txn_store", Some(txn), ix, &key, value.as_deref())
    }

    fn txn_store_commit(
        &mut self,
        txn: TxnId,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push_store("txn_store_commit", Some(txn), ix, &key, value.as_deref())
    }

    fn txn_store_commit_final(
        &mut self,
        txn: TxnId,
        ix: IndexId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> ReplResult<bool> {
        self.push_store(
            "txn_store_commit_final",
            Some(txn),
            ix,
            &key,
            value.as_deref(),
        )
    }

    fn txn_lock_shared(&mut self, txn: TxnId, ix: IndexId, key: Vec<u8>) -> ReplResult<bool> {
        self.push_lock("txn_lock_shared", txn, ix, &key)
    }

    fn txn_lock_upgradable(&mut self, txn: TxnId, ix: IndexId, key: Vec<u8>) -> ReplResult<bool> {
        self.push_lock("txn_lock_upgradable", txn, ix, &key)
    }

    fn txn_lock_exclusive(&mut self, txn: TxnId, ix: IndexId, key: Vec<u8>) -> ReplResult<bool> {
        self.push_lock("txn_lock_exclusive", txn, ix, &key)
    }

    fn txn_custom(&mut self, txn: TxnId, message: Vec<u8>) -> ReplResult<bool> {
        let mut line = RecordLine::new("txn_custom");
        line.txn_id = Some(txn.value());
        line.message = Some(hex(&message));
        self.push(line)
    }

    fn txn_custom_lock(
        &mut self,
        txn: TxnId,
        message: Vec<u8>,
        ix: IndexId,
        key: Vec<u8>,
    ) -> ReplResult<bool> {
        let mut line = RecordLine::new("txn_custom_lock");
        line.txn_id = Some(txn.value());
        line.index_id = Some(ix.value());
        line.key = Some(hex(&key));
        line.message = Some(hex(&message));
        self.push(line)
    }
}
