// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types surfaced at the Job boundary (§7).
//!
//! Following the teacher crate's own `error.rs`, these are hand-rolled
//! `core::error::Error` impls rather than derived via a macro crate.

use crate::cause::Cause;
use core::fmt;

/// The exception returned by [`Job::get_cancellation_exception`] and used to
/// abort a suspended `join`/`await` when the *calling* context is cancelled.
///
/// [`Job::get_cancellation_exception`]: crate::job::Job::get_cancellation_exception
#[derive(Clone)]
pub struct CancellationError(Cause);

impl CancellationError {
    pub(crate) fn new(cause: Cause) -> Self {
        Self(cause)
    }

    /// The cause this cancellation carries.
    pub fn cause(&self) -> &Cause {
        &self.0
    }
}

impl fmt::Debug for CancellationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancellationError").field(&self.0).finish()
    }
}

impl fmt::Display for CancellationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job was cancelled: {}", self.0)
    }
}

impl core::error::Error for CancellationError {}

/// Error returned by `join` when the *calling* context is cancelled while
/// waiting. `join` never reports the joined Job's own failure as its own
/// return (§4.4) — only caller-side cancellation can abort it.
pub type JoinError = CancellationError;

/// Error returned by `await` (§4.4): either the awaited Job terminated
/// abnormally, or the calling context was cancelled while waiting.
#[derive(Clone)]
pub enum AwaitError {
    /// The awaited Job was cancelled.
    Cancelled(Cause),
    /// The awaited Job completed exceptionally (a non-cancellation failure).
    Failed(Cause),
    /// The calling context was cancelled while awaiting; the awaited Job is
    /// unaffected (§5 "Cancellation of the caller of join/await").
    CallerCancelled(CancellationError),
}

impl fmt::Debug for AwaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled(c) => f.debug_tuple("Cancelled").field(c).finish(),
            Self::Failed(c) => f.debug_tuple("Failed").field(c).finish(),
            Self::CallerCancelled(e) => f.debug_tuple("CallerCancelled").field(e).finish(),
        }
    }
}

impl fmt::Display for AwaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled(c) => write!(f, "awaited job was cancelled: {c}"),
            Self::Failed(c) => write!(f, "awaited job failed: {c}"),
            Self::CallerCancelled(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl core::error::Error for AwaitError {}

/// A programmer error: operations invoked in a state the contract forbids
/// (§7 "Illegal state"), such as calling `get_cancellation_exception` on a
/// Job that has not yet completed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IllegalStateError(pub(crate) &'static str);

impl fmt::Display for IllegalStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl core::error::Error for IllegalStateError {}
