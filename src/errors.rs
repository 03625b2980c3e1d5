//! Runtime error types for the rebus core
//!
//! This module defines [`RuntimeError`], which represents all recoverable
//! failures the core can produce (as opposed to programmer errors, which are
//! `debug_assert!` failures and abort in debug builds).
//!
//! All of these unwind like exceptions to the nearest handler; the core never
//! silently truncates or clamps. Read-only violations are reported with the
//! most specific cause, checked in the fixed order auto-locked > held >
//! frozen > protected.

use std::fmt;

/// Why a write to a buffer was refused.
///
/// Ordered from most to least specific; [`crate::memory::buffer::Buffer::check_writable`]
/// reports the first one that applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOnlyCause {
    /// Locked by the core itself for the duration of an evaluation
    AutoLocked,
    /// Temporarily immutable during an active operation
    Held,
    /// Permanently immutable
    Frozen,
    /// User-requested immutability
    Protected,
}

impl fmt::Display for ReadOnlyCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOnlyCause::AutoLocked => write!(f, "locked by the evaluator"),
            ReadOnlyCause::Held => write!(f, "held during an active operation"),
            ReadOnlyCause::Frozen => write!(f, "frozen"),
            ReadOnlyCause::Protected => write!(f, "protected"),
        }
    }
}

/// Recoverable runtime errors produced by the core
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Heap allocation would exceed the configured limit
    OutOfMemory { requested: usize, limit: usize },

    /// Index past the used portion of a buffer, array, or context
    IndexOutOfRange { index: usize, len: usize },

    /// Write refused because the target buffer is immutable
    ReadOnly { cause: ReadOnlyCause },

    /// Access to a series whose backing storage has been reclaimed
    StaleSeries,

    /// Access to a context that was a call frame whose storage is gone
    ///
    /// Distinct from [`RuntimeError::StaleSeries`] so callers can tell a
    /// dead frame apart from generic staleness.
    StaleFrame,

    /// An expression-barrier action was pushed while the caller was still
    /// fulfilling an argument
    ExpressionBarrier { label: String },

    /// Argument did not satisfy its parameter's type constraint set
    ArgTypeMismatch {
        param: String,
        expected: String,
        got: String,
    },

    /// Fulfillment ended with a required parameter still unfilled
    MissingArgument { action: String, param: String },

    /// More arguments supplied than the phase's parameter list accepts
    TooManyArguments { action: String, expected: usize },

    /// A word cell had no binding to resolve through
    NotBound { word: String },

    /// A relative binding was resolved without an enclosing frame context
    RelativeOutsideFrame { word: String },

    /// Context lookup failed for a symbol
    UnknownField { word: String },

    /// A throw unwound past the bottom of the frame stack
    UncaughtThrow { label: String },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::OutOfMemory { requested, limit } => {
                write!(
                    f,
                    "Out of memory: requested {} bytes, limit is {}",
                    requested, limit
                )
            }
            RuntimeError::IndexOutOfRange { index, len } => {
                write!(f, "Index {} out of range for length {}", index, len)
            }
            RuntimeError::ReadOnly { cause } => {
                write!(f, "Series is {}", cause)
            }
            RuntimeError::StaleSeries => {
                write!(f, "Series storage has been reclaimed")
            }
            RuntimeError::StaleFrame => {
                write!(f, "Frame is no longer on the stack")
            }
            RuntimeError::ExpressionBarrier { label } => {
                write!(
                    f,
                    "Expression barrier '{}' hit while fulfilling an argument",
                    label
                )
            }
            RuntimeError::ArgTypeMismatch {
                param,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Argument '{}' does not match {}, got {}",
                    param, expected, got
                )
            }
            RuntimeError::MissingArgument { action, param } => {
                write!(f, "'{}' is missing its '{}' argument", action, param)
            }
            RuntimeError::TooManyArguments { action, expected } => {
                write!(
                    f,
                    "'{}' takes at most {} argument{}",
                    action,
                    expected,
                    if *expected == 1 { "" } else { "s" }
                )
            }
            RuntimeError::NotBound { word } => {
                write!(f, "'{}' is not bound to a context", word)
            }
            RuntimeError::RelativeOutsideFrame { word } => {
                write!(
                    f,
                    "'{}' is relatively bound and needs a frame to resolve",
                    word
                )
            }
            RuntimeError::UnknownField { word } => {
                write!(f, "'{}' is not in the context", word)
            }
            RuntimeError::UncaughtThrow { label } => {
                write!(f, "Uncaught throw: {}", label)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
