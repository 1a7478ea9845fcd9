//! The table's fair reader/writer lock
//!
//! `spec.md` §9 Design Notes are explicit: "a simple non-fair lock will
//! cause compaction starvation under read load and must not be used." A
//! plain `parking_lot::RwLock` does not guarantee that; this module
//! hand-rolls a writer-preferring lock on top of `std::sync::{Mutex,
//! Condvar}`, the way `strata-concurrency::manager::TransactionManager`
//! hand-rolls its per-branch commit serialization (`commit_locks:
//! DashMap<BranchId, Mutex<()>>`) rather than reaching for a dedicated
//! crate — `parking_lot` itself is still used elsewhere in this crate for
//! ordinary, non-fairness-critical locking (e.g. the delete-bitmap and the
//! mutable value/index stores).
//!
//! Fairness contract: once a writer is waiting, no new reader is admitted
//! until that writer (and any writers queued behind it) has run. Readers
//! already in progress are allowed to finish. This bounds writer wait time
//! by "however long the currently-active readers take", not by an
//! unbounded stream of new readers — enough to guarantee compaction's
//! write-lock acquisition in §4.6.7 always eventually succeeds.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};

/// A fair (writer-preferring) reader/writer lock.
pub struct FairRwLock<T> {
    state: Mutex<LockState>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for FairRwLock<T> {}
unsafe impl<T: Send> Sync for FairRwLock<T> {}

#[derive(Default)]
struct LockState {
    active_readers: usize,
    writer_active: bool,
    waiting_writers: usize,
}

fn lock_state(mutex: &Mutex<LockState>) -> MutexGuard<'_, LockState> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> FairRwLock<T> {
    /// Wrap `value` behind a fresh lock.
    pub fn new(value: T) -> Self {
        FairRwLock {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire a shared read guard, blocking while a writer holds or is
    /// waiting for the lock.
    pub fn read(&self) -> FairRwLockReadGuard<'_, T> {
        let mut state = lock_state(&self.state);
        while state.writer_active || state.waiting_writers > 0 {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.active_readers += 1;
        drop(state);
        FairRwLockReadGuard { lock: self }
    }

    /// Acquire the exclusive write guard, blocking until all in-progress
    /// readers (and any earlier writer) have released the lock.
    pub fn write(&self) -> FairRwLockWriteGuard<'_, T> {
        let mut state = lock_state(&self.state);
        state.waiting_writers += 1;
        while state.writer_active || state.active_readers > 0 {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.waiting_writers -= 1;
        state.writer_active = true;
        drop(state);
        FairRwLockWriteGuard { lock: self }
    }
}

/// RAII shared-read guard returned by [`FairRwLock::read`].
pub struct FairRwLockReadGuard<'a, T> {
    lock: &'a FairRwLock<T>,
}

impl<T> Deref for FairRwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the outer `FairRwLock` only hands out a read guard while
        // `writer_active` is false and no writer is waiting; any number of
        // read guards may alias an immutable view concurrently.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for FairRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = lock_state(&self.lock.state);
        state.active_readers -= 1;
        if state.active_readers == 0 {
            self.lock.cond.notify_all();
        }
    }
}

/// RAII exclusive-write guard returned by [`FairRwLock::write`].
pub struct FairRwLockWriteGuard<'a, T> {
    lock: &'a FairRwLock<T>,
}

impl<T> Deref for FairRwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: see `FairRwLockWriteGuard::deref_mut`.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for FairRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the outer `FairRwLock` only hands out a write guard once
        // `writer_active` is set and `active_readers` has drained to zero,
        // so this is the sole live reference to `data` for the guard's
        // lifetime.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for FairRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = lock_state(&self.lock.state);
        state.writer_active = false;
        drop(state);
        self.lock.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_see_consistent_snapshots() {
        let lock = FairRwLock::new(0u64);
        {
            let mut w = lock.write();
            *w = 42;
        }
        assert_eq!(*lock.read(), 42);
    }

    #[test]
    fn concurrent_reads_are_allowed() {
        let lock = Arc::new(FairRwLock::new(0u64));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let concurrent = Arc::clone(&concurrent);
            let max_seen = Arc::clone(&max_seen);
            handles.push(thread::spawn(move || {
                let _guard = lock.read();
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn writer_eventually_acquires_under_reader_pressure() {
        let lock = Arc::new(FairRwLock::new(0u64));
        let stop = Arc::new(AtomicUsize::new(0));
        let mut readers = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            let stop = Arc::clone(&stop);
            readers.push(thread::spawn(move || {
                while stop.load(Ordering::SeqCst) == 0 {
                    let _g = lock.read();
                    thread::sleep(Duration::from_micros(200));
                }
            }));
        }
        {
            let mut w = lock.write();
            *w += 1;
        }
        stop.store(1, Ordering::SeqCst);
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(*lock.read(), 1);
    }
}
