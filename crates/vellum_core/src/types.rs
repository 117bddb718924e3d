//! Core type definitions for VellumDB.

use std::fmt;

/// Maximum allowed key length in bytes.
///
/// The limit belongs to the tree collaborator; the redo pipeline
/// enforces it on the collaborator's behalf so oversized keys never
/// reach the wire.
pub const MAX_KEY_LENGTH: usize = 8192;

/// Unique identifier for a transaction.
///
/// Ids minted by a [`crate::TransactionContext`] are strictly
/// increasing within that context and stride by a context-specific
/// increment, so multiple contexts mint disjoint subsequences. Zero is
/// reserved for "no transaction" and negative ids for transactions
/// that are never replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxnId(pub i64);

impl TxnId {
    /// The "no transaction" id.
    pub const NONE: Self = Self(0);

    /// Creates a transaction id from its raw value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Whether this is the reserved "no transaction" id.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Whether this id names a non-replicated transaction.
    #[must_use]
    pub const fn is_unreplicated(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Opaque identifier naming a keyspace. Never zero.
///
/// Ids below 0x100 are reserved for internal metadata indexes, which
/// are excluded from replication change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexId(pub u64);

impl IndexId {
    /// Creates an index id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Whether this id names an internal metadata index.
    #[must_use]
    pub const fn is_internal(self) -> bool {
        self.0 < 0x100
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index:{}", self.0)
    }
}

/// Durability requirement declared per redo operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurabilityMode {
    /// The record must be durable before the operation returns.
    Sync,
    /// The record must be in the writer's buffer before the operation
    /// returns; durability is eventual.
    NoSync,
    /// The record may remain in the shared redo buffer.
    NoFlush,
    /// The record is not appended to the redo stream at all.
    NoRedo,
}

impl DurabilityMode {
    /// Whether a flush with this mode is a commit boundary.
    #[must_use]
    pub const fn is_commit(self) -> bool {
        matches!(self, Self::Sync | Self::NoSync)
    }
}

/// Lock acquisition discipline of a transaction.
///
/// Only [`LockMode::UpgradableRead`] and [`LockMode::Unsafe`] matter to
/// the redo and replay cores; the rest exist so collaborators can
/// report their mode faithfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// No locking at all. Replay still acquires locks so that
    /// applications layering their own locking stay consistent.
    Unsafe,
    /// Reads skip locks entirely.
    ReadUncommitted,
    /// Read locks released after each read.
    ReadCommitted,
    /// Read locks held until the scope ends.
    RepeatableRead,
    /// Writes take upgradable locks, promoted to exclusive at store.
    UpgradableRead,
}
