//! Error codes, categories and the protocol error taxonomy.
//!
//! Diagnostics travel through the promise/future state in one of two forms: a small copyable
//! [`ErrorCode`] (a category reference plus an integer, cheap enough to store inline) or an
//! [`ExceptionRef`] (a shared, type-erased handle to an arbitrary error value). Protocol
//! violations — setting a promise twice, retrieving a second future, reading an invalid future —
//! are reported through [`FutureError`] and are distinct from whatever diagnostic the producer
//! stored as the result.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased handle to an error value stored as a future's result.
///
/// Cloning the handle yields the same underlying error, so a non-consuming read can hand the
/// stored diagnostic out any number of times.
pub type ExceptionRef = Arc<dyn Error + Send + Sync + 'static>;

/// A family of related error codes, analogous to an errno domain.
///
/// A category is identified by the singleton it is implemented on: two [`ErrorCode`]s are equal
/// only if they name the same category *object*, so independently defined categories never
/// collide even if they share a display name. The two built-in categories are
/// [`state_category`] and [`future_category`]; users storing their own codes in a promise
/// should define their own category as a `&'static` singleton.
pub trait ErrorCategory: Send + Sync {
    /// Short identifier for this category, used for equality and display.
    fn name(&self) -> &'static str;

    /// Human-readable description of `code` within this category.
    fn message(&self, code: i32) -> &'static str;
}

/// A small copyable error code: a category plus an integer within that category.
#[derive(Clone, Copy)]
pub struct ErrorCode {
    category: &'static dyn ErrorCategory,
    code: i32,
}

impl ErrorCode {
    /// Creates an error code in the given category.
    pub fn new(category: &'static dyn ErrorCategory, code: i32) -> ErrorCode {
        ErrorCode { category, code }
    }

    /// The integer value of this code within its category.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The category this code belongs to.
    pub fn category(&self) -> &'static dyn ErrorCategory {
        self.category
    }

    /// The category's description of this code.
    pub fn message(&self) -> &'static str {
        self.category.message(self.code)
    }
}

impl PartialEq for ErrorCode {
    fn eq(&self, other: &ErrorCode) -> bool {
        // Category identity, not name: two unrelated categories may pick the same name, and
        // their code spaces must not compare equal.
        self.code == other.code
            && std::ptr::eq(
                self.category as *const dyn ErrorCategory as *const (),
                other.category as *const dyn ErrorCategory as *const ()
            )
    }
}

impl Eq for ErrorCode {}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ErrorCode({}:{})", self.category.name(), self.code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.category.name(), self.message())
    }
}

struct StateCategory;

impl ErrorCategory for StateCategory {
    fn name(&self) -> &'static str {
        "state"
    }

    fn message(&self, code: i32) -> &'static str {
        match code {
            1 => "state has already been set",
            2 => "no associated state",
            3 => "an exception is stored",
            _ => "unrecognized state error"
        }
    }
}

static STATE_CATEGORY: StateCategory = StateCategory;

/// The category of storage-level codes ([`StateErrc`]).
pub fn state_category() -> &'static dyn ErrorCategory {
    &STATE_CATEGORY
}

/// Storage-level error conditions, below the promise/future protocol proper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrc {
    /// A state-setting operation found the state already occupied.
    AlreadySet = 1,
    /// An observation was attempted with no state present.
    NoState = 2,
    /// The stored diagnostic is an exception handle rather than an error code.
    ExceptionPresent = 3,
}

impl StateErrc {
    /// This condition as an [`ErrorCode`] in [`state_category`].
    pub fn code(self) -> ErrorCode {
        ErrorCode::new(state_category(), self as i32)
    }
}

struct FutureCategory;

impl ErrorCategory for FutureCategory {
    fn name(&self) -> &'static str {
        "future"
    }

    fn message(&self, code: i32) -> &'static str {
        match code {
            1 => "promise was dropped before a state was set",
            2 => "promise state was already set",
            3 => "a future has already been retrieved",
            4 => "future has no associated state",
            _ => "unrecognized future error"
        }
    }
}

static FUTURE_CATEGORY: FutureCategory = FutureCategory;

/// The category of protocol-level codes ([`FutureError`]).
pub fn future_category() -> &'static dyn ErrorCategory {
    &FUTURE_CATEGORY
}

/// A violation of the promise/future protocol.
///
/// These are raised by the operations themselves and never originate from the producer's
/// payload. The one exception is [`FutureError::BrokenPromise`], which is also delivered *as*
/// the stored result when a promise dies unfulfilled, and so surfaces from
/// [`Future::get`](crate::Future::get) as [`GetError::Errored`] carrying
/// `FutureError::BrokenPromise.code()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FutureError {
    /// The promise was dropped before any state was set.
    #[error("promise was dropped before a state was set")]
    BrokenPromise,
    /// A second state-setting operation was attempted.
    #[error("promise state was already set")]
    PromiseAlreadySatisfied,
    /// A second future was requested from the same promise.
    #[error("a future has already been retrieved")]
    FutureAlreadyRetrieved,
    /// The future has neither a peer promise nor a stored state.
    #[error("future has no associated state")]
    NoState,
}

impl FutureError {
    /// This condition as an [`ErrorCode`] in [`future_category`].
    pub fn code(self) -> ErrorCode {
        let code = match self {
            FutureError::BrokenPromise => 1,
            FutureError::PromiseAlreadySatisfied => 2,
            FutureError::FutureAlreadyRetrieved => 3,
            FutureError::NoState => 4
        };

        ErrorCode::new(future_category(), code)
    }
}

/// An [`ErrorCode`] adapted to [`std::error::Error`], for the error-to-exception conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CodeError(pub ErrorCode);

/// The ways reading a future's value can fail.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GetError {
    /// The read itself violated the protocol (typically [`FutureError::NoState`]).
    #[error(transparent)]
    State(#[from] FutureError),
    /// The producer stored an error code instead of a value.
    #[error("{0}")]
    Errored(CodeError),
    /// The producer stored an exception; the handle is returned for the caller to inspect or
    /// propagate.
    #[error("{0}")]
    Panicked(ExceptionRef),
}

impl GetError {
    /// The stored or implied [`ErrorCode`], if this failure has one.
    pub fn as_code(&self) -> Option<ErrorCode> {
        match self {
            GetError::State(e) => Some(e.code()),
            GetError::Errored(CodeError(code)) => Some(*code),
            GetError::Panicked(_) => None
        }
    }

    /// Whether this failure is the broken-promise error.
    pub fn is_broken_promise(&self) -> bool {
        self.as_code() == Some(FutureError::BrokenPromise.code())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_code_equality() {
        assert_eq!(StateErrc::AlreadySet.code(), StateErrc::AlreadySet.code());
        assert_ne!(StateErrc::AlreadySet.code(), StateErrc::NoState.code());
        assert_ne!(StateErrc::NoState.code(), FutureError::NoState.code());
        assert_eq!(FutureError::BrokenPromise.code(), FutureError::BrokenPromise.code());
    }

    #[test]
    fn test_same_name_categories_stay_distinct() {
        struct ImposterCategory;

        impl ErrorCategory for ImposterCategory {
            fn name(&self) -> &'static str {
                "future"
            }

            fn message(&self, _code: i32) -> &'static str {
                "an unrelated code space"
            }
        }

        static IMPOSTER: ImposterCategory = ImposterCategory;

        // Same name and same integer as the broken-promise code, but a different category
        // object: these must not compare equal.
        let imposter = ErrorCode::new(&IMPOSTER, 1);

        assert_ne!(FutureError::BrokenPromise.code(), imposter);
        assert_eq!(imposter, ErrorCode::new(&IMPOSTER, 1));
    }

    #[test]
    fn test_code_display() {
        assert_eq!(
            FutureError::BrokenPromise.code().to_string(),
            "future: promise was dropped before a state was set"
        );
        assert_eq!(StateErrc::ExceptionPresent.code().to_string(), "state: an exception is stored");
    }

    #[test]
    fn test_get_error_classification() {
        let broken = GetError::Errored(CodeError(FutureError::BrokenPromise.code()));

        assert!(broken.is_broken_promise());
        assert!(!GetError::State(FutureError::NoState).is_broken_promise());
        assert_eq!(GetError::State(FutureError::NoState).as_code(), Some(FutureError::NoState.code()));
    }
}
