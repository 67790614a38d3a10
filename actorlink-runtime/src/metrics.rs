//! Call-level and proxy-level counters (C10), kept alongside the kernel
//! the way [`actorlink_wire::metrics::TransportMetrics`] sits alongside the
//! transport. Together the two snapshots give a full point-in-time picture:
//! packets at the wire layer, calls and proxies at the runtime layer.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one [`crate::kernel::Kernel`].
#[derive(Default)]
pub struct RuntimeMetrics {
    pub calls_completed: AtomicU64,
    pub calls_timed_out: AtomicU64,
    pub calls_cancelled: AtomicU64,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// `proxies_active` is read live from the [`crate::proxy::ProxyManager`]
    /// rather than tracked as its own counter, so the snapshot always
    /// matches the table's current contents instead of a stale tally.
    pub fn snapshot(&self, proxies_active: usize) -> RuntimeMetricsSnapshot {
        RuntimeMetricsSnapshot {
            calls_completed: self.calls_completed.load(Ordering::Relaxed),
            calls_timed_out: self.calls_timed_out.load(Ordering::Relaxed),
            calls_cancelled: self.calls_cancelled.load(Ordering::Relaxed),
            proxies_active,
        }
    }

    pub(crate) fn inc_calls_completed(&self) {
        self.calls_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_calls_timed_out(&self) {
        self.calls_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_calls_cancelled_by(&self, n: u64) {
        if n > 0 {
            self.calls_cancelled.fetch_add(n, Ordering::Relaxed);
        }
    }
}

/// Non-atomic point-in-time copy of [`RuntimeMetrics`], paired with the
/// transport's own [`actorlink_wire::metrics::TransportMetricsSnapshot`] to
/// cover everything sec4.10 tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeMetricsSnapshot {
    pub calls_completed: u64,
    pub calls_timed_out: u64,
    pub calls_cancelled: u64,
    pub proxies_active: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments_and_live_proxy_count() {
        let metrics = RuntimeMetrics::new();
        metrics.inc_calls_completed();
        metrics.inc_calls_completed();
        metrics.inc_calls_timed_out();
        metrics.inc_calls_cancelled_by(3);
        let snapshot = metrics.snapshot(2);
        assert_eq!(snapshot.calls_completed, 2);
        assert_eq!(snapshot.calls_timed_out, 1);
        assert_eq!(snapshot.calls_cancelled, 3);
        assert_eq!(snapshot.proxies_active, 2);
    }
}
