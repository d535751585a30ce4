//! The state-observing side of a promise/future pair.

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;

use crate::error::{CodeError, ErrorCode, ExceptionRef, FutureError, GetError, StateErrc};
use crate::link::LinkGuard;
use crate::lock::RawSpinlock;
use crate::promise::Promise;
use crate::storage::Storage;

/// The state-observing side of a promise/future pair.
///
/// A future begins life as an empty, movable, invalid value. It becomes useful in one of two
/// ways: [`Promise::bind_future`] links it to a promise in place (after which it is pinned and
/// its storage is where the result will be delivered), or one of [`make_ready_future`],
/// [`make_errored_future`] and [`make_exceptional_future`] produces it already carrying a
/// result with no peer at all.
///
/// Reads are consuming by default: a successful [`Future::get`] (or one that surfaces a stored
/// error) empties the future, and later reads fail with [`FutureError::NoState`]. The
/// [`Future::share`] view switches to non-consuming reads for as long as the view is borrowed.
///
/// Like its promise, a future is `Send` but not `Sync`; the consuming side of a pair belongs to
/// one thread at a time.
pub struct Future<T> {
    pub(crate) storage: UnsafeCell<Storage<T>>,
    pub(crate) lock: RawSpinlock,
    pub(crate) need_locks: Cell<bool>,
    pub(crate) promise: Cell<Option<NonNull<Promise<T>>>>,
    pub(crate) _pin: PhantomPinned,
}

// Safety: the raw peer pointer is only dereferenced under the link guard, and the !Sync default
// is kept so a single future can never be shared between threads.
unsafe impl<T: Send> Send for Future<T> {}

impl<T> Future<T> {
    /// Creates a future with no state and no peer. The result is invalid until a promise binds
    /// it; its only other use is as the target of a [`Future::swap`].
    #[must_use]
    pub fn new() -> Future<T> {
        Future::with_storage(Storage::Empty)
    }

    fn with_storage(storage: Storage<T>) -> Future<T> {
        Future {
            storage: UnsafeCell::new(storage),
            lock: RawSpinlock::new(),
            need_locks: Cell::new(false),
            promise: Cell::new(None),
            _pin: PhantomPinned
        }
    }

    /// Runs `read` against this future's state, through the lock if one has been engaged.
    fn probe<R>(&self, read: impl FnOnce(&Future<T>) -> R) -> R {
        if self.need_locks.get() {
            self.lock.lock();
            let result = read(self);
            self.lock.unlock();
            result
        } else {
            read(self)
        }
    }

    /// Whether this future is attached to a promise or already carries a result.
    pub fn valid(&self) -> bool {
        // Safety: the storage is only read, under the lock whenever one is engaged.
        self.probe(|f| f.promise.get().is_some() || unsafe { (*f.storage.get()).is_ready() })
    }

    /// Whether a result has arrived.
    pub fn is_ready(&self) -> bool {
        // Safety: as in [`Future::valid`].
        self.probe(|f| unsafe { (*f.storage.get()).is_ready() })
    }

    pub fn is_empty(&self) -> bool {
        // Safety: as in [`Future::valid`].
        self.probe(|f| unsafe { (*f.storage.get()).is_empty() })
    }

    pub fn has_value(&self) -> bool {
        // Safety: as in [`Future::valid`].
        self.probe(|f| unsafe { (*f.storage.get()).has_value() })
    }

    pub fn has_error(&self) -> bool {
        // Safety: as in [`Future::valid`].
        self.probe(|f| unsafe { (*f.storage.get()).has_error() })
    }

    pub fn has_exception(&self) -> bool {
        // Safety: as in [`Future::valid`].
        self.probe(|f| unsafe { (*f.storage.get()).has_exception() })
    }

    /// Blocks until a result arrives, yielding the thread between probes.
    ///
    /// Returns immediately if the result is already here, and fails with
    /// [`FutureError::NoState`] if there is neither a result nor a promise that could still
    /// deliver one. A promise dropped mid-wait releases the wait with a broken-promise result.
    pub fn wait(&self) -> Result<(), FutureError> {
        if self.is_ready() {
            return Ok(());
        };

        if !self.valid() {
            return Err(FutureError::NoState);
        };

        while !self.is_ready() {
            thread::yield_now();
        }

        Ok(())
    }

    /// Waits for the result and takes it, leaving the future empty and invalid.
    ///
    /// A stored error or exception is also consumed and surfaces as the corresponding
    /// [`GetError`] variant; either way, a second `get` fails with [`FutureError::NoState`].
    pub fn get(self: Pin<&mut Self>) -> Result<T, GetError> {
        let this = self.into_ref().get_ref();

        this.wait()?;

        // Safety: the pair is only touched under the guard, and the take stays within our own
        // storage, which no peer writes once it is non-empty.
        unsafe {
            let guard = LinkGuard::from_future(NonNull::from(this));
            let storage = &mut *this.storage.get();

            let result = if this.promise.get().is_none() && !storage.is_ready() {
                Err(GetError::State(FutureError::NoState))
            } else {
                match storage.take() {
                    Storage::Value(val) => Ok(val),
                    Storage::Error(err) => Err(GetError::Errored(CodeError(err))),
                    Storage::Exception(exc) => Err(GetError::Panicked(exc)),
                    Storage::Empty | Storage::Link(_) => Err(GetError::State(FutureError::NoState))
                }
            };

            drop(guard);
            result
        }
    }

    /// Waits, then reports the stored diagnostic as an error code without going through
    /// [`GetError`]: a stored error is consumed and returned, a stored exception maps to the
    /// [`StateErrc::ExceptionPresent`] sentinel (and stays stored), and a stored value reports
    /// `None`.
    pub fn get_error(self: Pin<&mut Self>) -> Result<Option<ErrorCode>, FutureError> {
        let this = self.into_ref().get_ref();

        this.wait()?;

        // Safety: as in [`Future::get`].
        unsafe {
            let guard = LinkGuard::from_future(NonNull::from(this));
            let storage = &mut *this.storage.get();

            let result = if this.promise.get().is_none() && !storage.is_ready() {
                Err(FutureError::NoState)
            } else if storage.has_error() {
                match storage.take() {
                    Storage::Error(err) => Ok(Some(err)),
                    _ => unreachable!()
                }
            } else if storage.has_exception() {
                Ok(Some(StateErrc::ExceptionPresent.code()))
            } else {
                Ok(None)
            };

            drop(guard);
            result
        }
    }

    /// Waits, then reports the stored diagnostic as an exception handle: a stored exception is
    /// consumed and returned, a stored error is consumed and wrapped into a fresh handle, and a
    /// stored value reports `None`.
    pub fn get_exception(self: Pin<&mut Self>) -> Result<Option<ExceptionRef>, FutureError> {
        let this = self.into_ref().get_ref();

        this.wait()?;

        // Safety: as in [`Future::get`].
        unsafe {
            let guard = LinkGuard::from_future(NonNull::from(this));
            let storage = &mut *this.storage.get();

            let result = if this.promise.get().is_none() && !storage.is_ready() {
                Err(FutureError::NoState)
            } else if storage.has_error() {
                match storage.take() {
                    Storage::Error(err) => Ok(Some(Arc::new(CodeError(err)) as ExceptionRef)),
                    _ => unreachable!()
                }
            } else if storage.has_exception() {
                match storage.take() {
                    Storage::Exception(exc) => Ok(Some(exc)),
                    _ => unreachable!()
                }
            } else {
                Ok(None)
            };

            drop(guard);
            result
        }
    }

    /// Reclassifies this future as non-consuming for as long as the returned view is borrowed.
    ///
    /// No data moves: the view reads the same storage in place, and the borrow keeps every
    /// consuming operation unreachable until the view is gone. Fails with
    /// [`FutureError::NoState`] if the future is not currently valid.
    pub fn share(self: Pin<&mut Self>) -> Result<SharedFuture<'_, T>, FutureError> {
        let this = self.into_ref().get_ref();

        if !this.valid() {
            return Err(FutureError::NoState);
        };

        log::trace!("future reclassified as non-consuming for the lifetime of a shared view");
        Ok(SharedFuture { inner: this })
    }

    /// Exchanges the complete state of two futures, redirecting any linked promises to their
    /// peers' new identities. This is how a linked future is relocated: swap it with a fresh
    /// one and the link follows.
    pub fn swap(self: Pin<&mut Self>, other: Pin<&mut Self>) {
        let this = self.into_ref().get_ref();
        let that = other.into_ref().get_ref();
        let a = NonNull::from(this);
        let b = NonNull::from(that);

        if a == b {
            return;
        }

        // Safety: both futures are pinned and owned by this thread; their promises are only
        // touched under the guards.
        unsafe {
            let guard_a = LinkGuard::from_future(a);
            let guard_b = LinkGuard::from_future(b);

            (*this.storage.get()).swap(&mut *that.storage.get());
            this.need_locks.swap(&that.need_locks);
            this.promise.swap(&that.promise);

            if let Some(promise) = guard_a.promise() {
                (*promise.as_ref().storage.get()).relink(b);
            }
            if let Some(promise) = guard_b.promise() {
                (*promise.as_ref().storage.get()).relink(a);
            }

            drop(guard_b);
            drop(guard_a);
        };
    }
}

impl<T> Default for Future<T> {
    fn default() -> Future<T> {
        Future::new()
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Future")
            .field("valid", &self.valid())
            .field("is_ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for Future<T> {
    fn drop(&mut self) {
        let this = NonNull::from(&*self);

        // Safety: a linked future is pinned, so this drop runs at the address the promise
        // knows; the promise is only touched under the guard.
        unsafe {
            let guard = LinkGuard::from_future(this);

            if let Some(promise) = guard.promise() {
                (*promise.as_ref().storage.get()).clear();
                self.promise.set(None);

                log::trace!("future dropped with its promise still live; link severed");
            }

            (*self.storage.get()).clear();
            drop(guard);
        };
    }
}

/// A non-consuming view over a [`Future`], produced by [`Future::share`].
///
/// Copies of the view all read the same storage in place; nothing is ever cleared through a
/// view, so repeated reads keep returning the stored result.
pub struct SharedFuture<'a, T> {
    inner: &'a Future<T>,
}

impl<'a, T> SharedFuture<'a, T> {
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    pub fn has_value(&self) -> bool {
        self.inner.has_value()
    }

    pub fn has_error(&self) -> bool {
        self.inner.has_error()
    }

    pub fn has_exception(&self) -> bool {
        self.inner.has_exception()
    }

    /// As [`Future::wait`].
    pub fn wait(&self) -> Result<(), FutureError> {
        self.inner.wait()
    }

    /// Waits for the result and borrows it in place. Stored errors and exceptions surface as
    /// with [`Future::get`], but nothing is consumed: every later read observes the same state.
    pub fn get(&self) -> Result<&'a T, GetError> {
        self.inner.wait()?;

        // Safety: the view's borrow keeps the future pinned, un-consumed and un-swapped for
        // 'a, and a peer never writes into non-empty storage, so the borrow handed out below
        // stays stable once ready.
        unsafe {
            let guard = LinkGuard::from_future(NonNull::from(self.inner));
            let storage: &'a Storage<T> = &*self.inner.storage.get();

            let result = if self.inner.promise.get().is_none() && !storage.is_ready() {
                Err(GetError::State(FutureError::NoState))
            } else {
                match storage {
                    Storage::Value(val) => Ok(val),
                    Storage::Error(err) => Err(GetError::Errored(CodeError(*err))),
                    Storage::Exception(exc) => Err(GetError::Panicked(exc.clone())),
                    Storage::Empty | Storage::Link(_) => Err(GetError::State(FutureError::NoState))
                }
            };

            drop(guard);
            result
        }
    }

    /// As [`Future::get_error`], without consuming the stored diagnostic.
    pub fn get_error(&self) -> Result<Option<ErrorCode>, FutureError> {
        self.inner.wait()?;

        // Safety: as in [`SharedFuture::get`].
        unsafe {
            let guard = LinkGuard::from_future(NonNull::from(self.inner));
            let storage = &*self.inner.storage.get();

            let result = if self.inner.promise.get().is_none() && !storage.is_ready() {
                Err(FutureError::NoState)
            } else {
                match storage {
                    Storage::Error(err) => Ok(Some(*err)),
                    Storage::Exception(_) => Ok(Some(StateErrc::ExceptionPresent.code())),
                    _ => Ok(None)
                }
            };

            drop(guard);
            result
        }
    }

    /// As [`Future::get_exception`], without consuming the stored diagnostic.
    pub fn get_exception(&self) -> Result<Option<ExceptionRef>, FutureError> {
        self.inner.wait()?;

        // Safety: as in [`SharedFuture::get`].
        unsafe {
            let guard = LinkGuard::from_future(NonNull::from(self.inner));
            let storage = &*self.inner.storage.get();

            let result = if self.inner.promise.get().is_none() && !storage.is_ready() {
                Err(FutureError::NoState)
            } else {
                match storage {
                    Storage::Error(err) => Ok(Some(Arc::new(CodeError(*err)) as ExceptionRef)),
                    Storage::Exception(exc) => Ok(Some(exc.clone())),
                    _ => Ok(None)
                }
            };

            drop(guard);
            result
        }
    }
}

impl<'a, T> Clone for SharedFuture<'a, T> {
    fn clone(&self) -> SharedFuture<'a, T> {
        SharedFuture { inner: self.inner }
    }
}

impl<'a, T> Copy for SharedFuture<'a, T> {}

impl<'a, T> fmt::Debug for SharedFuture<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedFuture").field("inner", &self.inner).finish()
    }
}

/// Makes a future that already carries `val`, with no peer and no locks.
#[must_use]
pub fn make_ready_future<T>(val: T) -> Future<T> {
    Future::with_storage(Storage::Value(val))
}

/// Makes a future that already carries an error code, with no peer and no locks.
pub fn make_errored_future<T>(err: ErrorCode) -> Future<T> {
    Future::with_storage(Storage::Error(err))
}

/// Makes a future that already carries an exception, with no peer and no locks.
pub fn make_exceptional_future<T>(exc: ExceptionRef) -> Future<T> {
    Future::with_storage(Storage::Exception(exc))
}

#[cfg(test)]
mod test {
    use std::pin::pin;

    use super::*;

    #[test]
    fn test_default_future_is_invalid() {
        let future: Future<i32> = Future::new();

        assert!(!future.valid());
        assert!(!future.is_ready());
        assert_eq!(Err(FutureError::NoState), future.wait());
    }

    #[test]
    fn test_ready_future() {
        let mut future = pin!(make_ready_future(42));

        assert!(future.valid());
        assert!(future.is_ready());
        assert!(future.has_value());
        assert_eq!(42, future.as_mut().get().unwrap());

        // The read consumed the state.
        assert!(!future.valid());
        assert!(matches!(future.as_mut().get(), Err(GetError::State(FutureError::NoState))));
    }

    #[test]
    fn test_errored_future() {
        let mut future = pin!(make_errored_future::<i32>(FutureError::BrokenPromise.code()));

        assert!(future.valid());
        assert!(future.has_error());

        match future.as_mut().get() {
            Err(err) => assert!(err.is_broken_promise()),
            Ok(_) => panic!("expected the stored error")
        };

        assert!(!future.valid());
    }

    #[test]
    fn test_exceptional_future() {
        #[derive(Debug, thiserror::Error)]
        #[error("exceptional")]
        struct Exceptional;

        let exc: ExceptionRef = Arc::new(Exceptional);
        let mut future = pin!(make_exceptional_future::<i32>(exc.clone()));

        assert!(future.has_exception());

        match future.as_mut().get() {
            Err(GetError::Panicked(stored)) => assert!(Arc::ptr_eq(&exc, &stored)),
            other => panic!("expected the stored exception, found ok={}", other.is_ok())
        };
    }

    #[test]
    fn test_get_error_conversions() {
        let code = ErrorCode::new(crate::error::future_category(), 2);
        let mut errored = pin!(make_errored_future::<i32>(code));
        assert_eq!(Ok(Some(code)), errored.as_mut().get_error());
        assert_eq!(Err(FutureError::NoState), errored.as_mut().get_error());

        let exc: ExceptionRef = Arc::new(CodeError(code));
        let mut exceptional = pin!(make_exceptional_future::<i32>(exc));
        assert_eq!(Ok(Some(StateErrc::ExceptionPresent.code())), exceptional.as_mut().get_error());
        // The conversion does not consume the stored exception itself.
        assert!(exceptional.has_exception());

        let mut ready = pin!(make_ready_future(1));
        assert_eq!(Ok(None), ready.as_mut().get_error());
    }

    #[test]
    fn test_get_exception_wraps_errors() {
        let code = FutureError::BrokenPromise.code();
        let mut future = pin!(make_errored_future::<i32>(code));

        let exc = future.as_mut().get_exception().unwrap().expect("an exception should be synthesized");
        assert_eq!(code.to_string(), exc.to_string());
        assert!(!future.valid());
    }

    #[test]
    fn test_shared_view_repeats() {
        let mut future = pin!(make_ready_future(String::from("shared")));
        let view = future.as_mut().share().unwrap();
        let copy = view;

        assert_eq!("shared", view.get().unwrap());
        assert_eq!("shared", copy.get().unwrap());
        assert!(view.valid());

        // Dropping the views makes consuming reads reachable again, with the state intact.
        assert_eq!("shared", future.as_mut().get().unwrap());
    }

    #[test]
    fn test_share_requires_state() {
        let mut future = pin!(Future::<i32>::new());

        assert_eq!(FutureError::NoState, future.as_mut().share().unwrap_err());
    }

    #[test]
    fn test_swap_between_detached_futures() {
        let mut a = pin!(make_ready_future(1));
        let mut b = pin!(Future::new());

        a.as_mut().swap(b.as_mut());

        assert!(!a.valid());
        assert!(b.valid());
        assert_eq!(1, b.as_mut().get().unwrap());
    }
}
