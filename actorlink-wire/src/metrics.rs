//! Atomic counters for the transport layer (C10). Cheap enough to update on
//! every packet; read out as a plain snapshot for logging or a metrics
//! exporter to pick up.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one [`crate::transport::FragmentationTransport`].
#[derive(Default)]
pub struct TransportMetrics {
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub messages_fragmented: AtomicU64,
    pub messages_reassembled: AtomicU64,
    pub reassembly_timeouts: AtomicU64,
    pub retry_attempts: AtomicU64,
    pub write_failures: AtomicU64,
    pub faults_injected: AtomicU64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TransportMetricsSnapshot {
        TransportMetricsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            messages_fragmented: self.messages_fragmented.load(Ordering::Relaxed),
            messages_reassembled: self.messages_reassembled.load(Ordering::Relaxed),
            reassembly_timeouts: self.reassembly_timeouts.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            faults_injected: self.faults_injected.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn inc_packets_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_packets_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_messages_fragmented(&self) {
        self.messages_fragmented.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_messages_reassembled(&self) {
        self.messages_reassembled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_reassembly_timeouts_by(&self, n: u64) {
        self.reassembly_timeouts.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_retry_attempts(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_write_failures(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_faults_injected(&self) {
        self.faults_injected.fetch_add(1, Ordering::Relaxed);
    }
}

/// Non-atomic point-in-time copy of [`TransportMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportMetricsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub messages_fragmented: u64,
    pub messages_reassembled: u64,
    pub reassembly_timeouts: u64,
    pub retry_attempts: u64,
    pub write_failures: u64,
    pub faults_injected: u64,
}
