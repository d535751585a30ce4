//! The inline spinlock embedded in each peer.
//!
//! Peers start out lock-free: as long as a promise and its future have only ever been touched by
//! one thread, no atomic operation is ever issued on their locks. The lock is engaged exactly
//! once, when a future is bound before the state has been set, and stays engaged for the rest of
//! both peers' lifetimes. Engagements can be counted through the `lock_tracking` feature (always
//! available to this crate's own tests), which is how the lock-elision fast path is asserted.

use std::sync::atomic::{AtomicBool, Ordering};

/// A one-word test-and-set spinlock with split lock/unlock, suitable for the two-object
/// protocol where a single guard must hold locks belonging to two different peers.
pub(crate) struct RawSpinlock {
    locked: AtomicBool,
}

impl RawSpinlock {
    pub const fn new() -> RawSpinlock {
        RawSpinlock {
            locked: AtomicBool::new(false)
        }
    }

    /// Marks this lock as live. Purely an accounting notion: the word itself always exists, but
    /// a peer only routes its accesses through it once engaged.
    pub fn engage(&self) {
        #[cfg(any(test, feature = "lock_tracking"))]
        tracking::note_engaged();
    }

    pub fn lock(&self) {
        while self.locked.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }

    pub fn try_lock(&self) -> bool {
        self.locked.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_ok()
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(test, feature = "lock_tracking"))] {
        /// Counts lock engagements per thread, so tests can observe whether the fast path
        /// avoided constructing any lock.
        pub mod tracking {
            use std::cell::Cell;

            thread_local! {
                static ENGAGED: Cell<usize> = Cell::new(0);
            }

            /// The number of inline locks engaged by the current thread so far.
            pub fn engaged_on_thread() -> usize {
                ENGAGED.with(|count| count.get())
            }

            pub(crate) fn note_engaged() {
                ENGAGED.with(|count| count.set(count.get() + 1));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lock_exclusion() {
        let lock = RawSpinlock::new();

        lock.lock();
        assert!(!lock.try_lock());

        lock.unlock();
        assert!(lock.try_lock());

        lock.unlock();
    }

    #[test]
    fn test_engage_counting() {
        let lock = RawSpinlock::new();
        let before = tracking::engaged_on_thread();

        lock.engage();
        lock.engage();

        assert_eq!(before + 2, tracking::engaged_on_thread());
    }

    #[test]
    fn test_contended_lock() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let lock = RawSpinlock::new();
        let counter = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        lock.lock();
                        let val = counter.load(Ordering::Relaxed);
                        counter.store(val + 1, Ordering::Relaxed);
                        lock.unlock();
                    }
                });
            }
        });

        assert_eq!(4000, counter.load(Ordering::Relaxed));
    }
}
