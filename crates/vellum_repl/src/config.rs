//! Replay engine configuration.

/// Configuration for a [`crate::ReplEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum replay threads, including the decoder thread. Zero
    /// means one per processor; a negative value multiplies the
    /// processor count. A resolved value of one runs all work on the
    /// decoder thread.
    pub max_threads: i32,

    /// Bounded task queue size per worker. A full queue blocks the
    /// decoder, which is the intended backpressure.
    pub max_queue_size: usize,

    /// Maximum open indexes kept by the replay index cache.
    pub index_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            max_queue_size: 100,
            index_cache_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum thread count.
    #[must_use]
    pub const fn with_max_threads(mut self, max_threads: i32) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Sets the per-worker queue size.
    #[must_use]
    pub const fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Sets the index cache capacity.
    #[must_use]
    pub const fn with_index_cache_capacity(mut self, capacity: usize) -> Self {
        self.index_cache_capacity = capacity;
        self
    }

    /// Resolves the configured thread count against the processor
    /// count. Always at least one.
    #[must_use]
    pub fn resolved_threads(&self) -> usize {
        let processors = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1) as i64;
        let threads = match self.max_threads {
            0 => processors,
            n if n < 0 => i64::from(n).unsigned_abs() as i64 * processors,
            n => i64::from(n),
        };
        threads.max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_threads_is_positive() {
        assert!(EngineConfig::new().resolved_threads() >= 1);
        assert_eq!(EngineConfig::new().with_max_threads(3).resolved_threads(), 3);
        let doubled = EngineConfig::new().with_max_threads(-2).resolved_threads();
        assert!(doubled >= 2);
    }
}
