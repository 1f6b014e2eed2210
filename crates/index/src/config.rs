//! Writer configuration

use std::time::Duration;

/// Tunables of the index writer.
///
/// `index_interval` and `skip_interval` are baked into segment files at
/// write time; changing them affects only segments written afterwards.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Buffered docs before an automatic flush
    pub max_buffered_docs: usize,
    /// Segments per level before a merge triggers
    pub merge_factor: usize,
    /// Upper bound on a merged segment's doc count
    pub max_merge_docs: u32,
    /// Every n-th dictionary term replicated into the .tii index
    pub index_interval: u32,
    /// Postings per skip-list entry
    pub skip_interval: u32,
    /// How long to wait for `write.lock`
    pub lock_timeout: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            max_buffered_docs: 10,
            merge_factor: 10,
            max_merge_docs: u32::MAX,
            index_interval: 128,
            skip_interval: 16,
            lock_timeout: Duration::from_secs(1),
        }
    }
}

impl IndexConfig {
    /// Builder: flush threshold.
    pub fn with_max_buffered_docs(mut self, n: usize) -> Self {
        self.max_buffered_docs = n.max(1);
        self
    }

    /// Builder: merge factor.
    pub fn with_merge_factor(mut self, n: usize) -> Self {
        self.merge_factor = n.max(2);
        self
    }

    /// Builder: merged segment size cap.
    pub fn with_max_merge_docs(mut self, n: u32) -> Self {
        self.max_merge_docs = n;
        self
    }

    /// Builder: lock acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.max_buffered_docs, 10);
        assert_eq!(config.merge_factor, 10);
        assert_eq!(config.max_merge_docs, u32::MAX);
        assert_eq!(config.index_interval, 128);
        assert_eq!(config.skip_interval, 16);
    }

    #[test]
    fn test_builder_clamps() {
        let config = IndexConfig::default()
            .with_max_buffered_docs(0)
            .with_merge_factor(1);
        assert_eq!(config.max_buffered_docs, 1);
        assert_eq!(config.merge_factor, 2);
    }
}
