//! Listener Registry: count of live listener sessions

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
struct Counters {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

/// Shared listener counter
///
/// The only way to increment is [`ListenerRegistry::enter`], and the only way
/// to decrement is dropping the returned [`ListenerGuard`], so the count can
/// neither go negative nor leak.
#[derive(Debug, Clone, Default)]
pub struct ListenerRegistry {
    counters: Arc<Counters>,
}

/// Snapshot for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub current: usize,
    pub peak: usize,
    pub total_served: usize,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener; it stays counted until the guard is dropped
    pub fn enter(&self) -> ListenerGuard {
        let now = self.counters.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(now, Ordering::AcqRel);
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        ListenerGuard {
            counters: self.counters.clone(),
        }
    }

    pub fn current(&self) -> usize {
        self.counters.current.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    pub fn total_served(&self) -> usize {
        self.counters.total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            current: self.current(),
            peak: self.peak(),
            total_served: self.total_served(),
        }
    }
}

/// Decrements the registry exactly once, on drop
#[derive(Debug)]
pub struct ListenerGuard {
    counters: Arc<Counters>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.counters.current.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_pairs_enter_and_leave() {
        let registry = ListenerRegistry::new();
        let a = registry.enter();
        let b = registry.enter();
        assert_eq!(registry.current(), 2);

        drop(a);
        assert_eq!(registry.current(), 1);
        drop(b);
        assert_eq!(registry.current(), 0);

        assert_eq!(
            registry.snapshot(),
            RegistrySnapshot {
                current: 0,
                peak: 2,
                total_served: 2
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enter_and_leave() {
        let registry = ListenerRegistry::new();
        let n = 200;
        let m = 120;

        let mut handles = Vec::new();
        for _ in 0..n {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.enter() }));
        }
        let mut guards = Vec::new();
        for h in handles {
            guards.push(h.await.unwrap());
        }
        assert_eq!(registry.current(), n);

        let mut handles = Vec::new();
        for guard in guards.drain(..m) {
            handles.push(tokio::spawn(async move { drop(guard) }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(registry.current(), n - m);
        assert_eq!(registry.peak(), n);
    }
}
