//! Context pool configuration.

/// Configuration for a [`crate::ContextPool`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Size in bytes of each context's redo buffer.
    pub redo_buffer_size: usize,

    /// Number of contexts to create. Rounded up to a power of two.
    /// Zero means derive from the processor count.
    pub context_count: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            redo_buffer_size: 64 * 1024,
            context_count: 0,
        }
    }
}

impl ContextConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the redo buffer size.
    #[must_use]
    pub const fn with_redo_buffer_size(mut self, size: usize) -> Self {
        self.redo_buffer_size = size;
        self
    }

    /// Sets the context count.
    #[must_use]
    pub const fn with_context_count(mut self, count: usize) -> Self {
        self.context_count = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = ContextConfig::new()
            .with_redo_buffer_size(4096)
            .with_context_count(2);
        assert_eq!(config.redo_buffer_size, 4096);
        assert_eq!(config.context_count, 2);
    }
}
