//! Fail-fast runtime locking.
//!
//! A runtime is owned by at most one thread at a time. Ownership is recorded
//! as a per-thread token in an atomic; `0` means unlocked. Acquisition never
//! blocks: it either wins the compare-exchange or reports a conflict.
//!
//! Two kinds of ownership exist:
//!
//! - [`Locker`]: explicit, held until released or dropped. Not re-entrant,
//!   even from the thread that already holds it.
//! - [`RuntimeEntry`]: implicit, scoped to one call. Nests inside an explicit
//!   lock held by the same thread.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::RuntimeInner;
use crate::error::{Error, Result};

const UNLOCKED: u64 = 0;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Process-unique token of the calling thread.
pub(crate) fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// Ownership word of one runtime.
#[derive(Debug, Default)]
pub(crate) struct RuntimeLock {
    owner: AtomicU64,
}

impl RuntimeLock {
    pub(crate) fn new() -> Self {
        Self {
            owner: AtomicU64::new(UNLOCKED),
        }
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Acquire) != UNLOCKED
    }

    pub(crate) fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread_token()
    }

    fn try_acquire(&self) -> Result<()> {
        let me = current_thread_token();
        self.owner
            .compare_exchange(UNLOCKED, me, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|owner| {
                if owner == me {
                    Error::lock_conflict("runtime is already locked by the current thread")
                } else {
                    Error::lock_conflict(format!("runtime is locked by thread #{}", owner))
                }
            })
    }

    fn release(&self) {
        let me = current_thread_token();
        if self
            .owner
            .compare_exchange(me, UNLOCKED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::error!("Runtime lock released by a thread that does not own it");
        }
    }

    /// Scoped ownership for one call.
    pub(crate) fn enter(&self) -> Result<RuntimeEntry<'_>> {
        if self.is_held_by_current_thread() {
            return Ok(RuntimeEntry {
                lock: self,
                owned: false,
            });
        }

        self.try_acquire()?;
        tracing::trace!("Implicit lock taken by thread #{}", current_thread_token());

        Ok(RuntimeEntry {
            lock: self,
            owned: true,
        })
    }
}

/// Implicit lock for the duration of a single call.
///
/// Released on drop when this entry took ownership; a nested entry inside an
/// explicit [`Locker`] leaves ownership untouched.
#[must_use]
pub(crate) struct RuntimeEntry<'a> {
    lock: &'a RuntimeLock,
    owned: bool,
}

impl Drop for RuntimeEntry<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.lock.release();
            tracing::trace!("Implicit lock released by thread #{}", current_thread_token());
        }
    }
}

/// Explicit ownership of a runtime by the current thread.
///
/// While a locker is active, calls issued from any other thread fail with
/// [`Error::LockConflict`]. Calls from the owning thread run under it.
///
/// # Example
///
/// ```rust,ignore
/// let mut locker = runtime.locker()?;
/// let two = runtime.executor("1 + 1").execute_integer()?;
/// locker.release()?;
/// ```
pub struct Locker {
    runtime: Arc<RuntimeInner>,
    active: bool,
    // Ownership belongs to the acquiring thread
    _not_send: PhantomData<*const ()>,
}

impl Locker {
    pub(crate) fn acquire(runtime: Arc<RuntimeInner>) -> Result<Self> {
        if runtime.is_closed() {
            return Err(Error::RuntimeAlreadyClosed);
        }

        runtime.lock.try_acquire()?;
        tracing::trace!(
            "Runtime #{} locked by thread #{}",
            runtime.id,
            current_thread_token()
        );

        Ok(Self {
            runtime,
            active: true,
            _not_send: PhantomData,
        })
    }

    /// Give up ownership. Fails with [`Error::LockConflict`] if already released.
    pub fn release(&mut self) -> Result<()> {
        if !self.active {
            return Err(Error::lock_conflict("locker has already been released"));
        }

        self.active = false;
        self.runtime.lock.release();
        tracing::trace!(
            "Runtime #{} unlocked by thread #{}",
            self.runtime.id,
            current_thread_token()
        );
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn runtime_id(&self) -> u64 {
        self.runtime.id
    }
}

impl Drop for Locker {
    fn drop(&mut self) {
        if self.active {
            let _ = self.release();
        }
    }
}

impl std::fmt::Debug for Locker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locker")
            .field("runtime_id", &self.runtime.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_tokens_are_distinct() {
        let here = current_thread_token();
        assert_eq!(here, current_thread_token());

        let there = std::thread::spawn(current_thread_token).join().unwrap();
        assert_ne!(here, there);
        assert_ne!(there, UNLOCKED);
    }

    #[test]
    fn test_entry_releases_on_drop() {
        let lock = RuntimeLock::new();
        {
            let _entry = lock.enter().unwrap();
            assert!(lock.is_held_by_current_thread());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_entry_nests_inside_owner() {
        let lock = RuntimeLock::new();
        lock.try_acquire().unwrap();
        {
            let entry = lock.enter().unwrap();
            assert!(!entry.owned);
        }
        // The outer owner keeps the lock
        assert!(lock.is_held_by_current_thread());
        lock.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_acquire_is_not_reentrant() {
        let lock = RuntimeLock::new();
        lock.try_acquire().unwrap();
        assert!(matches!(lock.try_acquire(), Err(Error::LockConflict(_))));
        lock.release();
    }

    #[test]
    fn test_other_thread_fails_fast() {
        let lock = Arc::new(RuntimeLock::new());
        lock.try_acquire().unwrap();

        let other = lock.clone();
        let result = std::thread::spawn(move || other.enter().map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(Error::LockConflict(_))));

        lock.release();
    }
}
