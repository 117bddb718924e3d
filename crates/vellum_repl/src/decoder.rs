//! Pull-parser over a redo byte stream.

use crate::error::{ReplError, ReplResult};
use crate::source::ReplicationSource;
use crate::visitor::RedoVisitor;
use vellum_codec::{
    decode_int_le, decode_long_le, decode_signed_var_long, decode_unsigned_var_int, nz_hash,
    CodecError, RedoOp, TERMINATOR_LEN,
};
use vellum_core::{IndexId, TxnId};

const CHUNK_SIZE: usize = 32 * 1024;

/// Streaming decoder over a [`ReplicationSource`].
///
/// Reads exactly one record per [`Self::decode_one`] call and invokes
/// the matching visitor method. The decoder tracks the stream position
/// and the running transaction id; the id accumulates the signed
/// deltas carried by transactional records and is zeroed by reset
/// records.
///
/// End of input at a record boundary is a clean end of stream.
/// Truncation inside a record, an unknown opcode, or a terminator
/// mismatch are corruption and fail the decode.
pub struct RedoDecoder<S: ReplicationSource> {
    source: S,
    chunk: Vec<u8>,
    start: usize,
    end: usize,
    position: u64,
    txn_id: TxnId,
    /// Whether the stream delimits records with terminators.
    terminators: bool,
}

impl<S: ReplicationSource> RedoDecoder<S> {
    /// Creates a decoder with terminator verification on, as used for
    /// replicated streams.
    pub fn new(source: S, initial_txn_id: TxnId) -> Self {
        Self::with_terminators(source, initial_txn_id, true)
    }

    /// Creates a decoder, selecting terminator verification. Local
    /// redo log files carry no terminators.
    pub fn with_terminators(source: S, initial_txn_id: TxnId, terminators: bool) -> Self {
        let position = source.position();
        Self {
            source,
            chunk: vec![0u8; CHUNK_SIZE],
            start: 0,
            end: 0,
            position,
            txn_id: initial_txn_id,
            terminators,
        }
    }

    /// The stream position of the next unconsumed byte.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The running transaction id, before any delta of the next record
    /// is applied.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Decodes one record and dispatches it to `visitor`.
    ///
    /// Returns true when the stream has ended, either cleanly or
    /// because the visitor reported a terminating event.
    pub fn decode_one(&mut self, visitor: &mut dyn RedoVisitor) -> ReplResult<bool> {
        let Some(op_byte) = self.read_byte()? else {
            return Ok(true);
        };
        let op = RedoOp::try_from_byte(op_byte).map_err(ReplError::Decode)?;

        match op {
            RedoOp::Reset => {
                self.verify_terminator()?;
                self.txn_id = TxnId::NONE;
                visitor.reset()
            }
            RedoOp::Timestamp => {
                let ts = self.read_long_le()?;
                self.verify_terminator()?;
                visitor.timestamp(ts)
            }
            RedoOp::Shutdown => {
                let ts = self.read_long_le()?;
                self.verify_terminator()?;
                visitor.shutdown(ts)
            }
            RedoOp::Close => {
                let ts = self.read_long_le()?;
                self.verify_terminator()?;
                visitor.close(ts)
            }
            RedoOp::EndFile => {
                let ts = self.read_long_le()?;
                self.verify_terminator()?;
                visitor.end_file(ts)
            }
            RedoOp::NopRandom => {
                let _ = self.read_long_le()?;
                self.verify_terminator()?;
                Ok(false)
            }
            RedoOp::Store => {
                let index_id = self.read_index_id()?;
                let key = self.read_prefixed_bytes()?;
                let value = self.read_prefixed_bytes()?;
                self.verify_terminator()?;
                visitor.store(index_id, key, Some(value))
            }
            RedoOp::Delete => {
                let index_id = self.read_index_id()?;
                let key = self.read_prefixed_bytes()?;
                self.verify_terminator()?;
                visitor.store(index_id, key, None)
            }
            RedoOp::StoreNoLock => {
                let index_id = self.read_index_id()?;
                let key = self.read_prefixed_bytes()?;
                let value = self.read_prefixed_bytes()?;
                self.verify_terminator()?;
                visitor.store_no_lock(index_id, key, Some(value))
            }
            RedoOp::DeleteNoLock => {
                let index_id = self.read_index_id()?;
                let key = self.read_prefixed_bytes()?;
                self.verify_terminator()?;
                visitor.store_no_lock(index_id, key, None)
            }
            RedoOp::RenameIndex => {
                let txn_id = self.read_txn_id()?;
                let index_id = self.read_index_id()?;
                let new_name = self.read_prefixed_bytes()?;
                self.verify_terminator()?;
                visitor.rename_index(txn_id, index_id, new_name)
            }
            RedoOp::DeleteIndex => {
                let txn_id = self.read_txn_id()?;
                let index_id = self.read_index_id()?;
                self.verify_terminator()?;
                visitor.delete_index(txn_id, index_id)
            }
            RedoOp::TxnEnter => {
                let txn_id = self.read_txn_id()?;
                self.verify_terminator()?;
                visitor.txn_enter(txn_id)
            }
            RedoOp::TxnRollback => {
                let txn_id = self.read_txn_id()?;
                self.verify_terminator()?;
                visitor.txn_rollback(txn_id)
            }
            RedoOp::TxnRollbackFinal => {
                let txn_id = self.read_txn_id()?;
                self.verify_terminator()?;
                visitor.txn_rollback_final(txn_id)
            }
            RedoOp::TxnCommit => {
                let txn_id = self.read_txn_id()?;
                self.verify_terminator()?;
                visitor.txn_commit(txn_id)
            }
            RedoOp::TxnCommitFinal => {
                let txn_id = self.read_txn_id()?;
                self.verify_terminator()?;
                visitor.txn_commit_final(txn_id)
            }
            RedoOp::TxnEnterStore => {
                let (txn_id, index_id, key, value) = self.read_txn_store()?;
                visitor.txn_enter_store(txn_id, index_id, key, Some(value))
            }
            RedoOp::TxnEnterDelete => {
                let (txn_id, index_id, key) = self.read_txn_delete()?;
                visitor.txn_enter_store(txn_id, index_id, key, None)
            }
            RedoOp::TxnStore => {
                let (txn_id, index_id, key, value) = self.read_txn_store()?;
                visitor.txn_store(txn_id, index_id, key, Some(value))
            }
            RedoOp::TxnDelete => {
                let (txn_id, index_id, key) = self.read_txn_delete()?;
                visitor.txn_store(txn_id, index_id, key, None)
            }
            RedoOp::TxnStoreCommit => {
                let (txn_id, index_id, key, value) = self.read_txn_store()?;
                visitor.txn_store_commit(txn_id, index_id, key, Some(value))
            }
            RedoOp::TxnDeleteCommit => {
                let (txn_id, index_id, key) = self.read_txn_delete()?;
                visitor.txn_store_commit(txn_id, index_id, key, None)
            }
            RedoOp::TxnStoreCommitFinal => {
                let (txn_id, index_id, key, value) = self.read_txn_store()?;
                visitor.txn_store_commit_final(txn_id, index_id, key, Some(value))
            }
            RedoOp::TxnDeleteCommitFinal => {
                let (txn_id, index_id, key) = self.read_txn_delete()?;
                visitor.txn_store_commit_final(txn_id, index_id, key, None)
            }
            RedoOp::TxnLockShared => {
                let (txn_id, index_id, key) = self.read_txn_delete()?;
                visitor.txn_lock_shared(txn_id, index_id, key)
            }
            RedoOp::TxnLockUpgradable => {
                let (txn_id, index_id, key) = self.read_txn_delete()?;
                visitor.txn_lock_upgradable(txn_id, index_id, key)
            }
            RedoOp::TxnLockExclusive => {
                let (txn_id, index_id, key) = self.read_txn_delete()?;
                visitor.txn_lock_exclusive(txn_id, index_id, key)
            }
            RedoOp::TxnCustom => {
                let txn_id = self.read_txn_id()?;
                let message = self.read_prefixed_bytes()?;
                self.verify_terminator()?;
                visitor.txn_custom(txn_id, message)
            }
            RedoOp::TxnCustomLock => {
                let txn_id = self.read_txn_id()?;
                let index_id = self.read_index_id()?;
                let key = self.read_prefixed_bytes()?;
                let message = self.read_prefixed_bytes()?;
                self.verify_terminator()?;
                visitor.txn_custom_lock(txn_id, message, index_id, key)
            }
        }
    }

    // --- Operand readers -------------------------------------------------

    fn read_txn_store(&mut self) -> ReplResult<(TxnId, IndexId, Vec<u8>, Vec<u8>)> {
        let txn_id = self.read_txn_id()?;
        let index_id = self.read_index_id()?;
        let key = self.read_prefixed_bytes()?;
        let value = self.read_prefixed_bytes()?;
        self.verify_terminator()?;
        Ok((txn_id, index_id, key, value))
    }

    fn read_txn_delete(&mut self) -> ReplResult<(TxnId, IndexId, Vec<u8>)> {
        let txn_id = self.read_txn_id()?;
        let index_id = self.read_index_id()?;
        let key = self.read_prefixed_bytes()?;
        self.verify_terminator()?;
        Ok((txn_id, index_id, key))
    }

    /// Applies the next signed delta to the running transaction id.
    fn read_txn_id(&mut self) -> ReplResult<TxnId> {
        let delta = self.read_signed_var_long()?;
        let txn_id = TxnId::new(self.txn_id.value().wrapping_add(delta));
        self.txn_id = txn_id;
        Ok(txn_id)
    }

    fn read_index_id(&mut self) -> ReplResult<IndexId> {
        Ok(IndexId::new(self.read_long_le()?))
    }

    fn read_prefixed_bytes(&mut self) -> ReplResult<Vec<u8>> {
        let len = self.read_unsigned_var_int()? as usize;
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn verify_terminator(&mut self) -> ReplResult<()> {
        if !self.terminators {
            return Ok(());
        }
        let mut buf = [0u8; TERMINATOR_LEN];
        self.read_exact(&mut buf)?;
        let (actual, _) = decode_int_le(&buf, 0).map_err(ReplError::Decode)?;
        let expected = nz_hash(self.txn_id.value());
        if actual != expected {
            return Err(ReplError::Decode(CodecError::TerminatorMismatch {
                expected,
                actual,
            }));
        }
        Ok(())
    }

    // --- Buffered byte input ---------------------------------------------

    fn read_byte(&mut self) -> ReplResult<Option<u8>> {
        if self.start == self.end && !self.refill()? {
            return Ok(None);
        }
        let b = self.chunk[self.start];
        self.start += 1;
        self.position += 1;
        Ok(Some(b))
    }

    fn require_byte(&mut self) -> ReplResult<u8> {
        self.read_byte()?
            .ok_or(ReplError::Decode(CodecError::UnexpectedEof))
    }

    fn read_exact(&mut self, out: &mut [u8]) -> ReplResult<()> {
        let mut filled = 0;
        while filled < out.len() {
            if self.start == self.end && !self.refill()? {
                return Err(ReplError::Decode(CodecError::UnexpectedEof));
            }
            let n = (self.end - self.start).min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.chunk[self.start..self.start + n]);
            self.start += n;
            self.position += n as u64;
            filled += n;
        }
        Ok(())
    }

    fn refill(&mut self) -> ReplResult<bool> {
        let n = self.source.read(&mut self.chunk)?;
        self.start = 0;
        self.end = n;
        Ok(n > 0)
    }

    fn read_long_le(&mut self) -> ReplResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(decode_long_le(&buf, 0).map_err(ReplError::Decode)?.0)
    }

    fn read_unsigned_var_int(&mut self) -> ReplResult<u32> {
        let first = self.require_byte()?;
        let len = ((first.leading_ones() as usize) + 1).min(5);
        let mut buf = [0u8; 5];
        buf[0] = first;
        self.read_exact(&mut buf[1..len])?;
        Ok(decode_unsigned_var_int(&buf[..len], 0)
            .map_err(ReplError::Decode)?
            .0)
    }

    fn read_signed_var_long(&mut self) -> ReplResult<i64> {
        let first = self.require_byte()?;
        let len = ((first.leading_ones() as usize) + 1).min(9);
        let mut buf = [0u8; 9];
        buf[0] = first;
        self.read_exact(&mut buf[1..len])?;
        Ok(decode_signed_var_long(&buf[..len], 0)
            .map_err(ReplError::Decode)?
            .0)
    }
}
