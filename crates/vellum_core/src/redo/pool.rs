//! Context pools: permanent transaction-to-context assignment.

use crate::config::ContextConfig;
use crate::error::CoreResult;
use crate::redo::context::{ContextStats, TransactionContext};
use crate::types::TxnId;
use std::sync::Arc;

/// A fixed set of transaction contexts.
///
/// The pool holds a small power of two of contexts, chosen from the
/// processor count unless configured. Each transaction is permanently
/// assigned to one context by its id, and each context mints a
/// disjoint id subsequence: context `k` is seeded with initial id `k`
/// and strides by the pool size.
pub struct ContextPool {
    contexts: Vec<Arc<TransactionContext>>,
}

impl ContextPool {
    /// Creates a pool from the configuration.
    pub fn new(config: &ContextConfig) -> CoreResult<Self> {
        let count = if config.context_count == 0 {
            let processors = std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1);
            processors.next_power_of_two().min(64)
        } else {
            config.context_count.next_power_of_two()
        };

        let mut contexts = Vec::with_capacity(count);
        for k in 0..count {
            let context = TransactionContext::new(count as i64, config.redo_buffer_size)?;
            context.reset_transaction_id(TxnId::new(k as i64))?;
            contexts.push(Arc::new(context));
        }

        Ok(Self { contexts })
    }

    /// Number of contexts in the pool. Always a power of two.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether the pool is empty. Never true for a constructed pool.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// The context a transaction is permanently assigned to.
    #[must_use]
    pub fn select(&self, txn_id: TxnId) -> &Arc<TransactionContext> {
        let mask = self.contexts.len() as u64 - 1;
        &self.contexts[(txn_id.value() as u64 & mask) as usize]
    }

    /// All contexts, for checkpoint traversal.
    #[must_use]
    pub fn contexts(&self) -> &[Arc<TransactionContext>] {
        &self.contexts
    }

    /// Drains every context's redo buffer.
    pub fn flush_all(&self) -> CoreResult<()> {
        for context in &self.contexts {
            context.flush()?;
        }
        Ok(())
    }

    /// The confirmed pair with the greatest position across the pool.
    #[must_use]
    pub fn copy_confirmed(&self) -> (i64, TxnId) {
        let mut best = &self.contexts[0];
        for context in &self.contexts[1..] {
            if !std::ptr::eq(best.higher_confirmed(context), &**best) {
                best = context;
            }
        }
        best.copy_confirmed()
    }

    /// Accumulated statistics across the pool.
    #[must_use]
    pub fn stats(&self) -> ContextStats {
        let mut stats = ContextStats::default();
        for context in &self.contexts {
            context.add_stats(&mut stats);
        }
        stats
    }
}
