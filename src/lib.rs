//! A non-allocating, single-producer/single-consumer promise/future pair.
//!
//! A [`Promise`] and its [`Future`] are two peer objects that hold their state inline: no heap
//! allocation is ever performed, the result travels directly from one peer's storage to the
//! other's, and in the common uncontended case — the result is set before the future is bound —
//! no atomic operation is ever issued. Once a future is bound to a still-empty promise, both
//! peers engage their inline spinlocks and the pair becomes safe to split across two threads,
//! coordinating through a two-object locking protocol that needs no canonical lock order.
//!
//! Because the peers point at each other without owning each other, a linked promise or future
//! must stay at a stable address: linking requires both objects to be pinned, and a linked peer
//! is relocated by swapping it with a fresh pinned slot ([`Promise::swap`] / [`Future::swap`]),
//! which redirects the peer's back-reference under both locks. Either side may outlive the
//! other: dropping a promise that never delivered reports a broken promise through its future,
//! and dropping a future simply severs the link, after which the promise's setters succeed
//! unobserved.
//!
//! ```
//! use std::pin::pin;
//! use spinfuture::{Future, Promise};
//!
//! let promise = pin!(Promise::new());
//! let mut future = pin!(Future::new());
//! promise.as_ref().bind_future(future.as_ref()).unwrap();
//!
//! std::thread::scope(|s| {
//!     s.spawn(move || promise.set_value(42).unwrap());
//!     assert_eq!(42, future.as_mut().get().unwrap());
//! });
//! ```
//!
//! Reads are consuming by default; [`Future::share`] provides a non-consuming view. Futures
//! carrying an immediate result are built with [`make_ready_future`], [`make_errored_future`]
//! and [`make_exceptional_future`] and need no pinning until they are read.

pub mod error;

mod future;
mod link;
mod lock;
mod promise;
mod storage;

pub use crate::error::{CodeError, ErrorCategory, ErrorCode, ExceptionRef, FutureError, GetError, StateErrc};
pub use crate::future::{make_errored_future, make_exceptional_future, make_ready_future, Future, SharedFuture};
pub use crate::promise::Promise;

#[cfg(feature = "lock_tracking")]
pub use crate::lock::tracking;
