//! The redo writer seam and its file-backed sink.

use crate::error::{CoreError, CoreResult};
use crate::types::{DurabilityMode, TxnId};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;
use vellum_storage::StorageBackend;

/// Owned guard over a latched writer.
///
/// A transaction context may hold this across several buffer
/// operations so that multi-part writes reach the sink contiguously.
pub(crate) type WriterGuard = ArcMutexGuard<RawMutex, WriterState>;

/// A sink under a [`RedoWriter`]: the actual byte stream, either a
/// local redo log file or a replicated stream.
pub trait RedoSink: Send + Sync {
    /// Checks that a write with the given durability is currently
    /// possible, returning the mode to honor (possibly downgraded).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnmodifiableReplica`] when the stream
    /// belongs to a replica that cannot accept local writes.
    fn check_write(&self, mode: DurabilityMode) -> CoreResult<DurabilityMode>;

    /// Appends bytes to the stream and returns the position after them.
    ///
    /// `commit_len` is a hint: `Some(len)` marks the write as ending a
    /// commit of `len` bytes, letting the sink issue its durability
    /// operation at the right boundary. The returned position is what
    /// callers report as a commit position.
    fn write(&mut self, data: &[u8], commit_len: Option<usize>) -> CoreResult<u64>;

    /// Forces previously written bytes to durable storage.
    fn sync(&mut self) -> CoreResult<()>;

    /// Whether records in this stream are delimited by 4-byte
    /// terminators. True for replicated streams, false for the local
    /// redo log file.
    fn writes_terminators(&self) -> bool {
        false
    }
}

/// Latched state of a writer: the sink plus the writer's view of the
/// stream's last transaction id.
pub(crate) struct WriterState {
    sink: Box<dyn RedoSink>,
    /// The last transaction id encoded into the stream, as the sink
    /// observes it. Buffer flushes compute their first delta from this.
    pub(crate) last_txn_id: TxnId,
    close_cause: Option<String>,
}

impl WriterState {
    /// Writes through the sink, chaining any latched close cause so the
    /// first root cause survives retries.
    pub(crate) fn write(&mut self, data: &[u8], commit_len: Option<usize>) -> CoreResult<u64> {
        match self.sink.write(data, commit_len) {
            Ok(pos) => Ok(pos),
            Err(err) => Err(match &self.close_cause {
                Some(cause) => CoreError::WriterClosed {
                    cause: cause.clone(),
                    source: Box::new(err),
                },
                None => err,
            }),
        }
    }

    /// Forces written bytes durable.
    pub(crate) fn sync(&mut self) -> CoreResult<()> {
        self.sink.sync()
    }
}

/// Shared, latched writer over a redo stream.
///
/// Many transaction contexts bind to one writer; the exclusive latch
/// serializes their flushes and protects the writer's last-seen
/// transaction id.
pub struct RedoWriter {
    state: Arc<Mutex<WriterState>>,
    terminators: bool,
}

impl RedoWriter {
    /// Creates a writer over a sink.
    #[must_use]
    pub fn new(sink: Box<dyn RedoSink>) -> Arc<Self> {
        let terminators = sink.writes_terminators();
        Arc::new(Self {
            state: Arc::new(Mutex::new(WriterState {
                sink,
                last_txn_id: TxnId::NONE,
                close_cause: None,
            })),
            terminators,
        })
    }

    /// Checks writability and durability for an upcoming operation.
    ///
    /// Callers that only need the writability check pass
    /// [`DurabilityMode::NoFlush`] and ignore the returned mode.
    pub fn check_write(&self, mode: DurabilityMode) -> CoreResult<DurabilityMode> {
        self.state.lock().sink.check_write(mode)
    }

    /// Whether this writer's records carry terminators.
    #[must_use]
    pub fn should_write_terminators(&self) -> bool {
        self.terminators
    }

    /// Latches the writer exclusively, returning an owned guard.
    pub(crate) fn latch(&self) -> WriterGuard {
        Mutex::lock_arc(&self.state)
    }

    /// Forces the stream durable up to everything written so far.
    pub fn sync(&self) -> CoreResult<()> {
        self.state.lock().sync()
    }

    /// Latches a close cause. The first cause wins; later writes that
    /// fail report it via [`CoreError::WriterClosed`].
    pub fn close(&self, cause: impl Into<String>) {
        let mut state = self.state.lock();
        if state.close_cause.is_none() {
            state.close_cause = Some(cause.into());
        }
    }
}

/// Sink writing the local redo log file through a storage backend.
///
/// Positions are byte offsets into the file. No terminators: the local
/// log relies on recovery-time scanning rather than self-synchronizing
/// delimiters.
pub struct FileRedoSink<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> FileRedoSink<B> {
    /// Creates a sink over a backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: StorageBackend> RedoSink for FileRedoSink<B> {
    fn check_write(&self, mode: DurabilityMode) -> CoreResult<DurabilityMode> {
        Ok(mode)
    }

    fn write(&mut self, data: &[u8], commit_len: Option<usize>) -> CoreResult<u64> {
        let offset = self.backend.append(data)?;
        if commit_len.is_some() {
            self.backend.flush()?;
        }
        Ok(offset + data.len() as u64)
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_storage::InMemoryBackend;

    #[test]
    fn file_sink_reports_end_positions() {
        let writer = RedoWriter::new(Box::new(FileRedoSink::new(InMemoryBackend::new())));
        let mut state = writer.latch();
        assert_eq!(state.write(b"abcd", None).unwrap(), 4);
        assert_eq!(state.write(b"efg", Some(3)).unwrap(), 7);
    }

    #[test]
    fn close_cause_chains_into_write_errors() {
        struct FailingSink;
        impl RedoSink for FailingSink {
            fn check_write(&self, mode: DurabilityMode) -> CoreResult<DurabilityMode> {
                Ok(mode)
            }
            fn write(&mut self, _data: &[u8], _commit: Option<usize>) -> CoreResult<u64> {
                Err(CoreError::database("stream torn down"))
            }
            fn sync(&mut self) -> CoreResult<()> {
                Ok(())
            }
        }

        let writer = RedoWriter::new(Box::new(FailingSink));
        writer.close("leadership lost");
        writer.close("second cause is ignored");

        let err = writer.latch().write(b"x", None).unwrap_err();
        match err {
            CoreError::WriterClosed { cause, .. } => assert_eq!(cause, "leadership lost"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn file_sink_never_downgrades() {
        let sink = FileRedoSink::new(InMemoryBackend::new());
        assert_eq!(
            sink.check_write(DurabilityMode::Sync).unwrap(),
            DurabilityMode::Sync
        );
    }
}
