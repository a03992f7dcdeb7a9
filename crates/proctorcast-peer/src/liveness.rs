//! Per-id connection liveness.
//!
//! Every identified connection stamps its id with a fresh token. When a
//! connection ends, its delayed removal only goes ahead if the id still
//! carries that connection's token; a reconnect in between overwrites it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Token identifying one connection's registration for an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionStamp(u64);

/// Latest connection stamp per agent id.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    stamps: Mutex<HashMap<String, ConnectionStamp>>,
    next: AtomicU64,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection for `id`, superseding any earlier one.
    pub fn register(&self, id: &str) -> ConnectionStamp {
        let stamp = ConnectionStamp(self.next.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id.to_string(), stamp);
        stamp
    }

    /// Whether `stamp` is still the latest registration for `id`.
    pub fn is_current(&self, id: &str, stamp: ConnectionStamp) -> bool {
        self.lock().get(id) == Some(&stamp)
    }

    /// Forget `id` and run `release` if `stamp` is still current.
    ///
    /// `release` runs under the tracker lock, so a concurrent
    /// [`register`](Self::register) lands either before the check (and wins)
    /// or after the release (and re-creates the record).
    pub fn release_if_current(&self, id: &str, stamp: ConnectionStamp, release: impl FnOnce()) -> bool {
        let mut stamps = self.lock();
        if stamps.get(id) != Some(&stamp) {
            return false;
        }
        stamps.remove(id);
        release();
        true
    }

    /// Drop all stamps. Pending removals become no-ops.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionStamp>> {
        self.stamps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_registration_blocks_release() {
        let tracker = LivenessTracker::new();
        let first = tracker.register("A42");
        let second = tracker.register("A42");
        assert_ne!(first, second);

        let mut released = false;
        assert!(!tracker.release_if_current("A42", first, || released = true));
        assert!(!released);
        assert!(tracker.is_current("A42", second));

        assert!(tracker.release_if_current("A42", second, || released = true));
        assert!(released);
        assert!(tracker.is_empty());
    }

    #[test]
    fn ids_are_independent() {
        let tracker = LivenessTracker::new();
        let a = tracker.register("A");
        let _b = tracker.register("B");
        assert!(tracker.release_if_current("A", a, || {}));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn clear_disarms_pending_removals() {
        let tracker = LivenessTracker::new();
        let stamp = tracker.register("A42");
        tracker.clear();
        assert!(!tracker.release_if_current("A42", stamp, || panic!("must not release")));
    }
}
