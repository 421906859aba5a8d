//! Deferred release queue for native value references.
//!
//! ## Problem
//!
//! A reference must only be released on the isolate thread while the runtime
//! is locked. A `V8Value` can however be dropped from any thread, including
//! one that does not hold (and cannot take) the runtime lock.
//!
//! ## Solution
//!
//! Queue the reference id instead, then release everything pending at the
//! start of the next call into the runtime, which already holds the lock.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::ValueId;

/// Per-runtime queue of references waiting to be released.
pub struct DeferredReleaseQueue {
    queue: Mutex<Vec<ValueId>>,

    /// Fast check for pending items (avoids lock acquisition on hot path)
    pending_count: AtomicU64,
}

impl Default for DeferredReleaseQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredReleaseQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::with_capacity(8)),
            pending_count: AtomicU64::new(0),
        }
    }

    /// Queue a reference for release. Callable from any thread.
    pub fn defer(&self, id: ValueId) {
        self.queue.lock().push(id);
        let pending = self.pending_count.fetch_add(1, Ordering::Release) + 1;

        tracing::trace!("Deferred release of reference {} (pending: {})", id, pending);
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Take every pending id. The caller releases them under the lock.
    pub fn take_all(&self) -> Vec<ValueId> {
        if self.is_empty() {
            return Vec::new();
        }

        let ids = std::mem::take(&mut *self.queue.lock());
        self.pending_count
            .fetch_sub(ids.len() as u64, Ordering::Release);
        ids
    }
}

impl std::fmt::Debug for DeferredReleaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredReleaseQueue")
            .field("pending_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_queue_creation() {
        let queue = DeferredReleaseQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.take_all().is_empty());
    }

    #[test]
    fn test_take_all_drains() {
        let queue = DeferredReleaseQueue::new();
        queue.defer(3);
        queue.defer(7);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.take_all(), vec![3, 7]);
        assert!(queue.is_empty());
        assert!(queue.take_all().is_empty());
    }

    #[test]
    fn test_defer_from_many_threads() {
        let queue = Arc::new(DeferredReleaseQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        queue.defer(t * 100 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut ids = queue.take_all();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 100);
        assert!(queue.is_empty());
    }
}
