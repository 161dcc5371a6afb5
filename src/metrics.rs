use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_processed: AtomicU64,
    chunks_analyzed: AtomicU64,
    chunk_failures: AtomicU64,
    cache_hits: AtomicU64,
    forced_truncations: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document that reached the streaming phase.
    pub fn record_document(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one chunk-analysis phase.
    pub fn record_analysis(&self, analyzed: u64, failed: u64) {
        self.chunks_analyzed.fetch_add(analyzed, Ordering::Relaxed);
        self.chunk_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record a phase skipped thanks to a cached snapshot.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a consolidation that needed the forced-truncation fallback.
    pub fn record_forced_truncation(&self) {
        self.forced_truncations.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            chunks_analyzed: self.chunks_analyzed.load(Ordering::Relaxed),
            chunk_failures: self.chunk_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            forced_truncations: self.forced_truncations.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that reached the final streaming phase.
    pub documents_processed: u64,
    /// Chunks whose remote analysis succeeded; placeholders are counted in `chunk_failures`.
    pub chunks_analyzed: u64,
    /// Chunks replaced by a placeholder after exhausting retries.
    pub chunk_failures: u64,
    /// Phases short-circuited by the document cache.
    pub cache_hits: u64,
    /// Consolidations that hit the round ceiling or could not shrink further.
    pub forced_truncations: u64,
}
