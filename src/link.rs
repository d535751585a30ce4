//! The two-object locking protocol that coordinates a promise with its future.
//!
//! A linked promise and future each carry their own inline lock, and an operation on either peer
//! may need to mutate both sides at once (delivering a result, scrubbing a back-reference,
//! redirecting a link after a swap). There is no canonical lock ordering between the two objects:
//! either side may initiate, and a peer's identity can change under a swap while another thread
//! is preparing to lock it. Ordering by address would therefore be unsound. Instead the protocol
//! is asymmetric and optimistic:
//!
//! - Lock the side we hold with a blocking acquire.
//! - If that side's state names a peer, acquire the peer with a *non-blocking* try. On success
//!   both sides are held; on failure release our own lock and start over. Both directions back
//!   off the same way, so two initiators cannot hold one lock each forever.
//! - If there is no peer, the single lock is all that is needed.
//!
//! When the held side has never engaged its lock (`need_locks` false), the peers have only ever
//! been observed by one thread and the guard skips locking entirely; the pair is simply read out
//! of the untaken state. The guard records which locks it actually took and releases exactly
//! those when dropped, so latches exchanged while a guard is held (as `swap` does) cannot
//! confuse the release path.

use std::ptr::NonNull;

use crate::future::Future;
use crate::promise::Promise;

/// Holds the locks for one linked promise/future pair, resolved from whichever side initiated.
///
/// The pointers identify the pair as it was at acquisition; a peer that was absent then stays
/// absent for the guard's lifetime because attachment only ever happens on the unlinked fast
/// path, before any second thread exists.
pub(crate) struct LinkGuard<T> {
    promise: Option<NonNull<Promise<T>>>,
    future: Option<NonNull<Future<T>>>,
    locked_promise: bool,
    locked_future: bool,
}

impl<T> LinkGuard<T> {
    /// Resolves and locks the pair starting from the promise side.
    ///
    /// # Safety
    ///
    /// `promise` must point to a live promise that is either pinned or untouched by any other
    /// thread, and the caller must be its owning side.
    pub unsafe fn from_promise(promise: NonNull<Promise<T>>) -> LinkGuard<T> {
        let p = promise.as_ref();

        if !p.need_locks.get() {
            return LinkGuard {
                promise: Some(promise),
                future: (*p.storage.get()).link(),
                locked_promise: false,
                locked_future: false
            };
        }

        loop {
            p.lock.lock();

            match (*p.storage.get()).link() {
                Some(future) => {
                    if future.as_ref().lock.try_lock() {
                        return LinkGuard {
                            promise: Some(promise),
                            future: Some(future),
                            locked_promise: true,
                            locked_future: true
                        };
                    }
                },
                None => {
                    return LinkGuard {
                        promise: Some(promise),
                        future: None,
                        locked_promise: true,
                        locked_future: false
                    };
                }
            };

            p.lock.unlock();
            std::hint::spin_loop();
        }
    }

    /// Resolves and locks the pair starting from the future side.
    ///
    /// # Safety
    ///
    /// As [`LinkGuard::from_promise`], for a future.
    pub unsafe fn from_future(future: NonNull<Future<T>>) -> LinkGuard<T> {
        let f = future.as_ref();

        if !f.need_locks.get() {
            return LinkGuard {
                promise: f.promise.get(),
                future: Some(future),
                locked_promise: false,
                locked_future: false
            };
        }

        loop {
            f.lock.lock();

            match f.promise.get() {
                Some(promise) => {
                    if promise.as_ref().lock.try_lock() {
                        return LinkGuard {
                            promise: Some(promise),
                            future: Some(future),
                            locked_promise: true,
                            locked_future: true
                        };
                    }
                },
                None => {
                    return LinkGuard {
                        promise: None,
                        future: Some(future),
                        locked_promise: false,
                        locked_future: true
                    };
                }
            };

            f.lock.unlock();
            std::hint::spin_loop();
        }
    }

    /// The promise side of the pair, if one is attached.
    pub fn promise(&self) -> Option<NonNull<Promise<T>>> {
        self.promise
    }

    /// The future side of the pair, if one is attached.
    pub fn future(&self) -> Option<NonNull<Future<T>>> {
        self.future
    }
}

impl<T> Drop for LinkGuard<T> {
    fn drop(&mut self) {
        // Safety: a recorded lock implies the peer was live and locked at acquisition, and a
        // locked peer cannot be destroyed out from under the guard.
        unsafe {
            if self.locked_future {
                self.future.unwrap().as_ref().lock.unlock();
            }
            if self.locked_promise {
                self.promise.unwrap().as_ref().lock.unlock();
            }
        };
    }
}
