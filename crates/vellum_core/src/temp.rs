//! Durability override for cursors over ephemeral trees.

use crate::error::CoreResult;
use crate::types::DurabilityMode;

/// Store/commit seam of a positioned cursor, as far as the durability
/// override needs to see it.
///
/// Implementations are expected to perform their own lock acquisition
/// inside `store`/`commit` unless the transaction's lock mode is
/// [`crate::LockMode::Unsafe`].
pub trait RedoCursor {
    /// The durability mode of the cursor's transaction.
    fn durability_mode(&self) -> DurabilityMode;

    /// Changes the durability mode of the cursor's transaction.
    fn set_durability_mode(&mut self, mode: DurabilityMode);

    /// Stores a value at the cursor's position; `None` deletes.
    fn store(&mut self, value: Option<&[u8]>) -> CoreResult<()>;

    /// Stores a value and commits the transaction.
    fn commit(&mut self, value: Option<&[u8]>) -> CoreResult<()>;
}

/// Cursor wrapper that prohibits redo durability.
///
/// Used for temporary trees, whose contents never survive a restart:
/// appending their mutations to the redo stream would only slow the
/// stream down. The wrapper forces [`DurabilityMode::NoRedo`] around
/// each delegated store or commit and restores the previous mode
/// afterwards, even when the delegate fails.
pub struct TempCursor<C: RedoCursor> {
    inner: C,
}

impl<C: RedoCursor> TempCursor<C> {
    /// Wraps a cursor.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// Returns the wrapped cursor.
    pub fn into_inner(self) -> C {
        self.inner
    }

    /// A reference to the wrapped cursor.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Stores without redo durability.
    pub fn store(&mut self, value: Option<&[u8]>) -> CoreResult<()> {
        self.with_no_redo(|cursor| cursor.store(value))
    }

    /// Stores and commits without redo durability.
    pub fn commit(&mut self, value: Option<&[u8]>) -> CoreResult<()> {
        self.with_no_redo(|cursor| cursor.commit(value))
    }

    fn with_no_redo(&mut self, f: impl FnOnce(&mut C) -> CoreResult<()>) -> CoreResult<()> {
        let saved = self.inner.durability_mode();
        if saved == DurabilityMode::NoRedo {
            return f(&mut self.inner);
        }
        self.inner.set_durability_mode(DurabilityMode::NoRedo);
        let result = f(&mut self.inner);
        self.inner.set_durability_mode(saved);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    struct RecordingCursor {
        mode: DurabilityMode,
        stored_under: Vec<DurabilityMode>,
        committed: bool,
        fail_next: bool,
    }

    impl RecordingCursor {
        fn new(mode: DurabilityMode) -> Self {
            Self {
                mode,
                stored_under: Vec::new(),
                committed: false,
                fail_next: false,
            }
        }
    }

    impl RedoCursor for RecordingCursor {
        fn durability_mode(&self) -> DurabilityMode {
            self.mode
        }

        fn set_durability_mode(&mut self, mode: DurabilityMode) {
            self.mode = mode;
        }

        fn store(&mut self, _value: Option<&[u8]>) -> CoreResult<()> {
            if self.fail_next {
                return Err(CoreError::database("store failed"));
            }
            self.stored_under.push(self.mode);
            Ok(())
        }

        fn commit(&mut self, value: Option<&[u8]>) -> CoreResult<()> {
            self.store(value)?;
            self.committed = true;
            Ok(())
        }
    }

    #[test]
    fn store_forces_no_redo_and_restores() {
        let mut cursor = TempCursor::new(RecordingCursor::new(DurabilityMode::Sync));
        cursor.store(Some(b"v")).unwrap();

        assert_eq!(cursor.inner().stored_under, vec![DurabilityMode::NoRedo]);
        assert_eq!(cursor.inner().durability_mode(), DurabilityMode::Sync);
    }

    #[test]
    fn commit_forces_no_redo_and_restores() {
        let mut cursor = TempCursor::new(RecordingCursor::new(DurabilityMode::NoSync));
        cursor.commit(None).unwrap();

        assert!(cursor.inner().committed);
        assert_eq!(cursor.inner().stored_under, vec![DurabilityMode::NoRedo]);
        assert_eq!(cursor.inner().durability_mode(), DurabilityMode::NoSync);
    }

    #[test]
    fn already_no_redo_passes_through() {
        let mut cursor = TempCursor::new(RecordingCursor::new(DurabilityMode::NoRedo));
        cursor.store(Some(b"v")).unwrap();
        assert_eq!(cursor.inner().stored_under, vec![DurabilityMode::NoRedo]);
    }

    #[test]
    fn mode_restored_on_failure() {
        let mut inner = RecordingCursor::new(DurabilityMode::Sync);
        inner.fail_next = true;
        let mut cursor = TempCursor::new(inner);

        assert!(cursor.store(Some(b"v")).is_err());
        assert_eq!(cursor.inner().durability_mode(), DurabilityMode::Sync);
    }
}
