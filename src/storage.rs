//! Inline result storage shared by the promise and future peers.

use std::fmt;
use std::mem;
use std::ptr::NonNull;

use crate::error::{ErrorCode, ExceptionRef};
use crate::future::Future;

/// The inline storage of one peer: either nothing, a result in one of three forms, or (inside a
/// promise only) a link to the future that now owns the result's storage.
///
/// Callers are responsible for checking the discriminant before a state-setting transition;
/// the transitions themselves treat a mismatch as memory corruption and panic.
pub(crate) enum Storage<T> {
    Empty,
    Value(T),
    Error(ErrorCode),
    Exception(ExceptionRef),
    Link(NonNull<Future<T>>),
}

impl<T> Storage<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Storage::Empty)
    }

    /// Whether a result is present. A link is not a result; the result lives on the other side.
    pub fn is_ready(&self) -> bool {
        matches!(self, Storage::Value(_) | Storage::Error(_) | Storage::Exception(_))
    }

    pub fn has_value(&self) -> bool {
        matches!(self, Storage::Value(_))
    }

    pub fn has_error(&self) -> bool {
        matches!(self, Storage::Error(_))
    }

    pub fn has_exception(&self) -> bool {
        matches!(self, Storage::Exception(_))
    }

    /// The linked future, if this storage currently holds a link.
    pub fn link(&self) -> Option<NonNull<Future<T>>> {
        match *self {
            Storage::Link(f) => Some(f),
            _ => None
        }
    }

    pub fn set_value(&mut self, val: T) {
        match self {
            Storage::Empty => *self = Storage::Value(val),
            _ => panic!("value stored over occupied storage")
        }
    }

    pub fn set_error(&mut self, err: ErrorCode) {
        match self {
            Storage::Empty => *self = Storage::Error(err),
            _ => panic!("error stored over occupied storage")
        }
    }

    pub fn set_exception(&mut self, exc: ExceptionRef) {
        match self {
            Storage::Empty => *self = Storage::Exception(exc),
            _ => panic!("exception stored over occupied storage")
        }
    }

    pub fn set_link(&mut self, future: NonNull<Future<T>>) {
        match self {
            Storage::Empty => *self = Storage::Link(future),
            _ => panic!("link stored over occupied storage")
        }
    }

    /// Redirects an existing link to a future that has changed identity.
    pub fn relink(&mut self, future: NonNull<Future<T>>) {
        match self {
            Storage::Link(f) => *f = future,
            _ => panic!("relink of storage that holds no link")
        }
    }

    /// Destroys whatever is stored, leaving the storage empty.
    pub fn clear(&mut self) {
        *self = Storage::Empty;
    }

    /// Takes the stored state out, leaving the storage empty.
    pub fn take(&mut self) -> Storage<T> {
        mem::replace(self, Storage::Empty)
    }

    pub fn swap(&mut self, other: &mut Storage<T>) {
        mem::swap(self, other);
    }
}

impl<T> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Storage::Empty => write!(f, "Empty"),
            Storage::Value(_) => write!(f, "Value(..)"),
            Storage::Error(e) => write!(f, "Error({:?})", e),
            Storage::Exception(_) => write!(f, "Exception(..)"),
            Storage::Link(p) => write!(f, "Link({:p})", p.as_ptr())
        }
    }
}
