//! Deterministic fault injection for exercising retry/timeout/cancellation
//! paths against [`sim::SimCentral`](crate::sim::SimCentral) without real
//! hardware flakiness.
//!
//! Like [`crate::ids::IdMinter`], this avoids an external RNG dependency:
//! pseudo-random decisions are derived from an atomic counter folded
//! through `std::collections::hash_map::RandomState`.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Action to take for one simulated outbound write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultAction {
    /// Deliver the write normally.
    Pass,
    /// Silently drop the write, as if the link queue swallowed it.
    Drop,
    /// Fail the write with a synthetic queue-saturation error.
    QueueFull,
    /// Deliver the write, but only after the given delay.
    Delay(Duration),
}

/// Injects faults into a [`sim::SimLink`](crate::sim::SimLink)'s outbound
/// path for testing. All faults are disabled by default.
pub struct FaultInjector {
    drop_rate: AtomicU32,
    queue_full_rate: AtomicU32,
    delay_ms: AtomicU32,
    counter: AtomicU64,
    random_state: RandomState,
}

impl FaultInjector {
    pub fn new() -> Self {
        FaultInjector {
            drop_rate: AtomicU32::new(0),
            queue_full_rate: AtomicU32::new(0),
            delay_ms: AtomicU32::new(0),
            counter: AtomicU64::new(0),
            random_state: RandomState::new(),
        }
    }

    /// Rate in basis points (0-10000 = 0.00%-100.00%), clamped.
    pub fn set_drop_rate(&self, rate: u32) {
        self.drop_rate.store(rate.min(10_000), Ordering::Relaxed);
    }

    /// Rate in basis points (0-10000 = 0.00%-100.00%), clamped.
    pub fn set_queue_full_rate(&self, rate: u32) {
        self.queue_full_rate.store(rate.min(10_000), Ordering::Relaxed);
    }

    pub fn set_delay(&self, delay_ms: u32) {
        self.delay_ms.store(delay_ms, Ordering::Relaxed);
    }

    pub fn check(&self) -> FaultAction {
        let drop_rate = self.drop_rate.load(Ordering::Relaxed);
        if drop_rate > 0 && self.roll() < drop_rate {
            return FaultAction::Drop;
        }
        let queue_full_rate = self.queue_full_rate.load(Ordering::Relaxed);
        if queue_full_rate > 0 && self.roll() < queue_full_rate {
            return FaultAction::QueueFull;
        }
        let delay_ms = self.delay_ms.load(Ordering::Relaxed);
        if delay_ms > 0 {
            return FaultAction::Delay(Duration::from_millis(delay_ms as u64));
        }
        FaultAction::Pass
    }

    fn roll(&self) -> u32 {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = self.random_state.build_hasher();
        counter.hash(&mut hasher);
        (hasher.finish() % 10_000) as u32
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        let injector = FaultInjector::new();
        for _ in 0..100 {
            assert_eq!(injector.check(), FaultAction::Pass);
        }
    }

    #[test]
    fn full_drop_rate_always_drops() {
        let injector = FaultInjector::new();
        injector.set_drop_rate(10_000);
        for _ in 0..100 {
            assert_eq!(injector.check(), FaultAction::Drop);
        }
    }

    #[test]
    fn drop_takes_priority_over_queue_full() {
        let injector = FaultInjector::new();
        injector.set_drop_rate(10_000);
        injector.set_queue_full_rate(10_000);
        assert_eq!(injector.check(), FaultAction::Drop);
    }

    #[test]
    fn rate_clamps_above_100_percent() {
        let injector = FaultInjector::new();
        injector.set_drop_rate(50_000);
        injector.set_queue_full_rate(50_000);
        // clamped internally; just confirm it doesn't panic and stays decisive
        let _ = injector.check();
    }

    #[test]
    fn statistical_drop_rate_is_roughly_right() {
        let injector = FaultInjector::new();
        injector.set_drop_rate(5_000);
        let trials = 2000;
        let drops = (0..trials).filter(|_| injector.check() == FaultAction::Drop).count();
        assert!((700..1300).contains(&drops), "got {drops} drops out of {trials}");
    }
}
