//! The state-setting side of a promise/future pair.

use std::cell::{Cell, UnsafeCell};
use std::error::Error;
use std::fmt;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{ErrorCode, ExceptionRef, FutureError};
use crate::future::Future;
use crate::link::LinkGuard;
use crate::lock::RawSpinlock;
use crate::storage::Storage;

/// The state-setting side of a promise/future pair.
///
/// A fresh promise is an ordinary movable value. Binding a future pins both peers in place and
/// links them with mutual non-owning references; from then on the producer writes its one result
/// directly into the future's storage and the pair coordinates through their inline spinlocks.
/// If the result is set *before* a future is bound, it is stored locally, the eventual future
/// comes out already detached, and no lock is ever engaged on either side.
///
/// Dropping a promise that never delivered a result reports a broken promise through its future.
/// Exactly one state-setting operation ever succeeds; the rest fail with
/// [`FutureError::PromiseAlreadySatisfied`].
///
/// A promise is `Send` but deliberately not `Sync`: each side of the pair belongs to exactly one
/// thread at a time, and handing the promise to another thread is itself the synchronization
/// that makes the lock-free fast path sound.
pub struct Promise<T> {
    pub(crate) storage: UnsafeCell<Storage<T>>,
    pub(crate) lock: RawSpinlock,
    pub(crate) need_locks: Cell<bool>,
    pub(crate) detached: Cell<bool>,
    pub(crate) retrieved: Cell<bool>,
    pub(crate) _pin: PhantomPinned,
}

// Safety: the raw peer pointer is only dereferenced under the link guard, and the !Sync default
// is kept so a single promise can never be shared between threads.
unsafe impl<T: Send> Send for Promise<T> {}

impl<T> Promise<T> {
    /// Creates a new promise with no state set and no future bound.
    pub fn new() -> Promise<T> {
        Promise {
            storage: UnsafeCell::new(Storage::Empty),
            lock: RawSpinlock::new(),
            need_locks: Cell::new(false),
            detached: Cell::new(false),
            retrieved: Cell::new(false),
            _pin: PhantomPinned
        }
    }

    /// Binds `future` as the consuming side of this promise. Can succeed exactly once; later
    /// calls fail with [`FutureError::FutureAlreadyRetrieved`] even if the bound future has
    /// since been dropped.
    ///
    /// If the result has already been set, it moves into `future` immediately, this promise
    /// detaches, and neither side ever engages its lock. Otherwise the two peers are linked in
    /// place and become thread-safe: from this point on, either may be handed to another thread
    /// and the inline locks coordinate the result's delivery.
    ///
    /// # Panics
    ///
    /// Panics if `future` is not fresh (already bound, already consumed, or already carrying a
    /// result).
    pub fn bind_future(self: Pin<&Self>, future: Pin<&Future<T>>) -> Result<(), FutureError> {
        let this = NonNull::from(self.get_ref());
        let slot = NonNull::from(future.get_ref());
        let f = future.get_ref();

        // Safety: both peers are pinned by the caller and owned by this thread; no second
        // thread can exist for either until this call links them.
        unsafe {
            if f.need_locks.get() || f.promise.get().is_some() || !(*f.storage.get()).is_empty() {
                panic!("future passed to bind_future has already been used");
            }

            if self.retrieved.get() || self.detached.get() {
                return Err(FutureError::FutureAlreadyRetrieved);
            }

            if (*self.storage.get()).is_empty() {
                // The result is still outstanding, so the pair may now be split across threads
                // and every later access has to go through the locks.
                self.need_locks.set(true);
                self.lock.engage();
                f.need_locks.set(true);
                f.lock.engage();

                let guard = LinkGuard::from_promise(this);
                f.promise.set(Some(this));
                (*self.storage.get()).set_link(slot);
                drop(guard);

                log::trace!("promise linked to its future; locks engaged");
            } else {
                *f.storage.get() = (*self.storage.get()).take();
                self.detached.set(true);

                log::trace!("result was already set; future detached at bind");
            }

            self.retrieved.set(true);
        };

        Ok(())
    }

    /// Whether a future has been bound to this promise, now or in the past.
    pub fn has_future(&self) -> bool {
        self.retrieved.get() || self.detached.get()
    }

    /// Sets the value to be observed by the future, releasing any wait in progress on it.
    pub fn set_value(&self, val: T) -> Result<(), FutureError> {
        self.deliver(move |storage| storage.set_value(val))
    }

    /// As [`Promise::set_value`], but only runs the constructor if the state is still settable.
    pub fn set_value_with(&self, make: impl FnOnce() -> T) -> Result<(), FutureError> {
        if self.detached.get() {
            return Err(FutureError::PromiseAlreadySatisfied);
        }

        self.deliver(move |storage| storage.set_value(make()))
    }

    /// Sets an error-code outcome, releasing any wait in progress on the future.
    pub fn set_error(&self, err: ErrorCode) -> Result<(), FutureError> {
        self.deliver(move |storage| storage.set_error(err))
    }

    /// Sets an exception outcome, releasing any wait in progress on the future.
    pub fn set_exception(&self, exc: ExceptionRef) -> Result<(), FutureError> {
        self.deliver(move |storage| storage.set_exception(exc))
    }

    /// As [`Promise::set_exception`], wrapping an arbitrary error into a shared handle.
    pub fn set_exception_from(&self, err: impl Error + Send + Sync + 'static) -> Result<(), FutureError> {
        self.set_exception(Arc::new(err))
    }

    /// Writes one result into whichever side owns the storage right now: through the link into
    /// the future if one is attached, locally otherwise.
    fn deliver(&self, write: impl FnOnce(&mut Storage<T>)) -> Result<(), FutureError> {
        let this = NonNull::from(self);

        // Safety: peer access only happens under the guard, and the storage writes stay inside
        // whichever side the guard resolved.
        unsafe {
            let guard = LinkGuard::from_promise(this);

            if self.detached.get() {
                return Err(FutureError::PromiseAlreadySatisfied);
            }

            if let Some(future) = guard.future() {
                let f = future.as_ref();

                if !(*f.storage.get()).is_empty() {
                    return Err(FutureError::PromiseAlreadySatisfied);
                }

                write(&mut *f.storage.get());
                f.promise.set(None);
                (*self.storage.get()).clear();
                self.detached.set(true);

                log::trace!("result delivered through the link; promise detached");
            } else {
                let storage = &mut *self.storage.get();

                if !storage.is_empty() {
                    return Err(FutureError::PromiseAlreadySatisfied);
                }

                write(storage);
            };

            drop(guard);
        };

        Ok(())
    }

    /// Exchanges the complete state of two promises, redirecting any linked futures to their
    /// peers' new identities. This is how a linked promise is relocated: swap it with a fresh
    /// one and the link follows.
    pub fn swap(self: Pin<&Self>, other: Pin<&Self>) {
        let this = NonNull::from(self.get_ref());
        let that = NonNull::from(other.get_ref());

        if this == that {
            return;
        }

        // Safety: both promises are pinned and owned by this thread; their futures are only
        // touched under the guards.
        unsafe {
            let guard_a = LinkGuard::from_promise(this);
            let guard_b = LinkGuard::from_promise(that);

            (*self.storage.get()).swap(&mut *other.storage.get());
            self.need_locks.swap(&other.need_locks);
            self.detached.swap(&other.detached);
            self.retrieved.swap(&other.retrieved);

            if let Some(future) = guard_a.future() {
                future.as_ref().promise.set(Some(that));
            }
            if let Some(future) = guard_b.future() {
                future.as_ref().promise.set(Some(this));
            }

            drop(guard_b);
            drop(guard_a);
        };
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Promise<T> {
        Promise::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Promise")
            .field("has_future", &self.has_future())
            .field("detached", &self.detached.get())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.detached.get() {
            return;
        }

        let this = NonNull::from(&*self);

        // Safety: a linked promise is pinned, so this drop runs at the address the future
        // knows; the future is only touched under the guard.
        unsafe {
            let guard = LinkGuard::from_promise(this);

            if let Some(future) = guard.future() {
                let f = future.as_ref();

                if !(*f.storage.get()).is_ready() {
                    (*f.storage.get()).set_error(FutureError::BrokenPromise.code());
                    log::debug!("promise dropped before a result was set; future observes a broken promise");
                }

                f.promise.set(None);
            }

            (*self.storage.get()).clear();
            drop(guard);
        };
    }
}

#[cfg(test)]
mod test {
    use std::pin::pin;

    use super::*;
    use crate::future::Future;
    use crate::lock::tracking;

    #[test]
    fn test_set_once() {
        let promise: Promise<i32> = Promise::new();

        assert!(promise.set_value(1).is_ok());
        assert_eq!(Err(FutureError::PromiseAlreadySatisfied), promise.set_value(2));
        assert_eq!(Err(FutureError::PromiseAlreadySatisfied), promise.set_error(FutureError::NoState.code()));
    }

    #[test]
    fn test_has_future() {
        let promise = pin!(Promise::<i32>::new());
        let future = pin!(Future::new());

        assert!(!promise.has_future());

        promise.as_ref().bind_future(future.as_ref()).unwrap();
        assert!(promise.has_future());
    }

    #[test]
    fn test_bind_is_single_shot() {
        let promise = pin!(Promise::<i32>::new());
        let first = pin!(Future::new());
        let second = pin!(Future::new());

        promise.as_ref().bind_future(first.as_ref()).unwrap();
        assert_eq!(Err(FutureError::FutureAlreadyRetrieved), promise.as_ref().bind_future(second.as_ref()));
    }

    #[test]
    fn test_bind_remembered_after_future_drops() {
        let promise = pin!(Promise::<i32>::new());

        {
            let future = pin!(Future::new());
            promise.as_ref().bind_future(future.as_ref()).unwrap();
        };

        let second = pin!(Future::new());

        assert!(promise.has_future());
        assert_eq!(Err(FutureError::FutureAlreadyRetrieved), promise.as_ref().bind_future(second.as_ref()));
    }

    #[test]
    #[should_panic(expected = "already been used")]
    fn test_bind_rejects_used_slot() {
        let promise = pin!(Promise::<i32>::new());
        let other = pin!(Promise::<i32>::new());
        let future = pin!(Future::new());

        other.as_ref().bind_future(future.as_ref()).unwrap();
        promise.as_ref().bind_future(future.as_ref()).unwrap();
    }

    #[test]
    fn test_set_then_bind_elides_locks() {
        let engaged = tracking::engaged_on_thread();

        let promise = pin!(Promise::<i32>::new());
        promise.set_value(17).unwrap();

        let mut future = pin!(Future::new());
        promise.as_ref().bind_future(future.as_ref()).unwrap();

        assert_eq!(Ok(17), future.as_mut().get().map_err(|_| ()));
        assert_eq!(engaged, tracking::engaged_on_thread());
    }

    #[test]
    fn test_bind_then_set_engages_locks() {
        let engaged = tracking::engaged_on_thread();

        let promise = pin!(Promise::<i32>::new());
        let future = pin!(Future::new());
        promise.as_ref().bind_future(future.as_ref()).unwrap();

        assert_eq!(engaged + 2, tracking::engaged_on_thread());
    }

    #[test]
    fn test_set_value_with_skips_constructor_when_detached() {
        let promise = pin!(Promise::<String>::new());
        let future = pin!(Future::new());

        promise.as_ref().bind_future(future.as_ref()).unwrap();
        promise.set_value("first".to_owned()).unwrap();

        let result = promise.set_value_with(|| panic!("constructor must not run"));
        assert_eq!(Err(FutureError::PromiseAlreadySatisfied), result);
    }
}
