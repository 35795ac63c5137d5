//! Cache Metrics Collection
//!
//! Counters for monitoring cache health and verifying object lifetimes.
//! `objects_created` and `objects_destroyed` reach parity once every
//! handle is released and the cache is purged.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cache-wide counters
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // File table
    files_opened: AtomicU64,
    open_failures: AtomicU64,
    file_table_hits: AtomicU64,

    // Object lifetimes
    objects_created: AtomicU64,
    objects_destroyed: AtomicU64,
    objects_orphaned: AtomicU64,

    // Eviction
    file_evictions: AtomicU64,
    data_evictions: AtomicU64,
    purges: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file_opened(&self) {
        self.files_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_table_hit(&self) {
        self.file_table_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.objects_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_destroyed(&self) {
        self.objects_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphaned(&self) {
        self.objects_orphaned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_eviction(&self) {
        self.file_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_data_eviction(&self) {
        self.data_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purge(&self) {
        self.purges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files_opened(&self) -> u64 {
        self.files_opened.load(Ordering::Relaxed)
    }

    pub fn objects_created(&self) -> u64 {
        self.objects_created.load(Ordering::Relaxed)
    }

    pub fn objects_destroyed(&self) -> u64 {
        self.objects_destroyed.load(Ordering::Relaxed)
    }

    /// Objects created but not yet destroyed
    pub fn live_objects(&self) -> u64 {
        self.objects_created()
            .saturating_sub(self.objects_destroyed())
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_opened: self.files_opened(),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            file_table_hits: self.file_table_hits.load(Ordering::Relaxed),
            objects_created: self.objects_created(),
            objects_destroyed: self.objects_destroyed(),
            objects_orphaned: self.objects_orphaned.load(Ordering::Relaxed),
            file_evictions: self.file_evictions.load(Ordering::Relaxed),
            data_evictions: self.data_evictions.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.files_opened.store(0, Ordering::Relaxed);
        self.open_failures.store(0, Ordering::Relaxed);
        self.file_table_hits.store(0, Ordering::Relaxed);
        self.objects_created.store(0, Ordering::Relaxed);
        self.objects_destroyed.store(0, Ordering::Relaxed);
        self.objects_orphaned.store(0, Ordering::Relaxed);
        self.file_evictions.store(0, Ordering::Relaxed);
        self.data_evictions.store(0, Ordering::Relaxed);
        self.purges.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub files_opened: u64,
    pub open_failures: u64,
    pub file_table_hits: u64,
    pub objects_created: u64,
    pub objects_destroyed: u64,
    pub objects_orphaned: u64,
    pub file_evictions: u64,
    pub data_evictions: u64,
    pub purges: u64,
}

/// Point-in-time view of cache occupancy plus counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// File objects currently alive (referenced or cached)
    pub open_files: usize,
    /// Files queued for eviction
    pub unused_files: usize,
    /// Data blocks queued for eviction
    pub unused_data_count: usize,
    /// Bytes held by queued data blocks
    pub unused_data_size: usize,
    /// Objects tracked by the cache, including orphans still referenced
    pub tracked_objects: usize,
    pub max_files: usize,
    pub max_mem: usize,
    pub min_data_count: usize,
    pub counters: MetricsSnapshot,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.files_opened(), 0);
        assert_eq!(metrics.live_objects(), 0);
    }

    #[test]
    fn test_lifetime_parity() {
        let metrics = CacheMetrics::new();
        metrics.record_created();
        metrics.record_created();
        metrics.record_destroyed();
        assert_eq!(metrics.live_objects(), 1);

        metrics.record_destroyed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.objects_created, snapshot.objects_destroyed);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_file_opened();
        metrics.record_open_failure();
        metrics.record_file_table_hit();
        metrics.record_data_eviction();
        metrics.record_file_eviction();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files_opened, 1);
        assert_eq!(snapshot.open_failures, 1);
        assert_eq!(snapshot.file_table_hits, 1);
        assert_eq!(snapshot.data_evictions, 1);
        assert_eq!(snapshot.file_evictions, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = CacheMetrics::new();
        metrics.record_purge();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"purges\":1"));
    }
}
