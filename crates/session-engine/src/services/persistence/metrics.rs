use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Gateway counters, so masked failures stay visible to operators
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    remote_writes_total: AtomicU64,
    fallback_writes_total: AtomicU64,
    remote_reads_total: AtomicU64,
    fallback_reads_total: AtomicU64,
    reconciled_total: AtomicU64,
    reference_failures_total: AtomicU64,
}

impl GatewayMetrics {
    pub fn inc_remote_write(&self) {
        self.remote_writes_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_fallback_write(&self) {
        self.fallback_writes_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_remote_read(&self) {
        self.remote_reads_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_fallback_read(&self) {
        self.fallback_reads_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_reconciled(&self, n: u64) {
        self.reconciled_total.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_reference_failure(&self) {
        self.reference_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending_fallbacks: usize) -> GatewayStats {
        GatewayStats {
            remote_writes: self.remote_writes_total.load(Ordering::Relaxed),
            fallback_writes: self.fallback_writes_total.load(Ordering::Relaxed),
            remote_reads: self.remote_reads_total.load(Ordering::Relaxed),
            fallback_reads: self.fallback_reads_total.load(Ordering::Relaxed),
            reconciled: self.reconciled_total.load(Ordering::Relaxed),
            reference_failures: self.reference_failures_total.load(Ordering::Relaxed),
            pending_fallbacks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub remote_writes: u64,
    pub fallback_writes: u64,
    pub remote_reads: u64,
    pub fallback_reads: u64,
    pub reconciled: u64,
    pub reference_failures: u64,
    /// Mirror entries not yet confirmed by the remote store
    pub pending_fallbacks: usize,
}
