// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The payload carried by a cancelled or exceptionally-completed [`Job`](crate::Job).
//!
//! A [`Cause`] is reference-counted so that "is this the same cause" can be
//! answered by pointer identity (§3 invariant 2, §7 "cause preservation"),
//! without requiring the wrapped error type to implement `PartialEq`.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

/// Any error type that can be carried as a [`Cause`].
pub trait CauseError: core::error::Error + Send + Sync + 'static {}
impl<T: core::error::Error + Send + Sync + 'static> CauseError for T {}

/// A cancellation or failure cause, reference-counted so identity can be
/// compared across threads without cloning the underlying error.
#[derive(Clone)]
pub struct Cause(Arc<Inner>);

struct Inner {
    error: Box<dyn core::error::Error + Send + Sync + 'static>,
    is_cancellation: bool,
    /// If this `Cause` is a wrapper generated by [`Cause::wrapping`], the
    /// cause it wraps. Used to implement the "wrapped form whose inner cause
    /// is reference-equal" identity rule.
    wraps: Option<Cause>,
}

impl Cause {
    /// Construct a new, non-cancellation cause (a plain failure).
    pub fn new<E: CauseError>(error: E) -> Self {
        Self(Arc::new(Inner {
            error: Box::new(error),
            is_cancellation: false,
            wraps: None,
        }))
    }

    /// Construct a new cancellation cause.
    pub fn cancellation<E: CauseError>(error: E) -> Self {
        Self(Arc::new(Inner {
            error: Box::new(error),
            is_cancellation: true,
            wraps: None,
        }))
    }

    /// Construct a cancellation cause from a bare message, used where the
    /// spec calls for a "generated" cancellation exception (e.g. `cancel()`
    /// with no cause, or `getCancellationException` on a normally-completed
    /// Job).
    pub fn generated(message: impl Into<String>) -> Self {
        Self::cancellation(Generated(message.into()))
    }

    /// Wrap `inner` in a new cancellation-typed cause, preserving `inner` as
    /// the reference-equal cause reachable from the wrapper (§3 invariant 2).
    #[must_use]
    pub fn wrapping(inner: &Cause, message: impl Into<String>) -> Self {
        Self(Arc::new(Inner {
            error: Box::new(Generated(message.into())),
            is_cancellation: true,
            wraps: Some(inner.clone()),
        }))
    }

    /// Whether this cause represents an expected cancellation, as opposed to
    /// an unexpected failure.
    pub fn is_cancellation(&self) -> bool {
        self.0.is_cancellation
    }

    /// Access the underlying error.
    pub fn as_error(&self) -> &(dyn core::error::Error + Send + Sync + 'static) {
        &*self.0.error
    }

    /// The cause this one wraps, if it is a wrapper produced by
    /// [`Cause::wrapping`].
    pub fn unwrap_inner(&self) -> Option<&Cause> {
        self.0.wraps.as_ref()
    }

    /// Identity comparison per §3 invariant 2 and §7's "cause preservation"
    /// property: two causes are "the same" if they are reference-equal, or if
    /// one is a wrapped form whose inner cause is reference-equal to the
    /// other.
    pub fn is_same_as(&self, other: &Cause) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        if let Some(inner) = self.unwrap_inner() {
            if Arc::ptr_eq(&inner.0, &other.0) {
                return true;
            }
        }
        if let Some(inner) = other.unwrap_inner() {
            if Arc::ptr_eq(&inner.0, &self.0) {
                return true;
            }
        }
        false
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cause")
            .field("error", &format_args!("{}", self.0.error))
            .field("is_cancellation", &self.0.is_cancellation)
            .finish()
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.error, f)
    }
}

#[derive(Debug)]
struct Generated(String);

impl fmt::Display for Generated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::error::Error for Generated {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;
    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }
    impl core::error::Error for Boom {}

    #[test]
    fn identical_clone_is_same() {
        let c = Cause::new(Boom);
        let c2 = c.clone();
        assert!(c.is_same_as(&c2));
    }

    #[test]
    fn distinct_causes_differ() {
        let a = Cause::new(Boom);
        let b = Cause::new(Boom);
        assert!(!a.is_same_as(&b));
    }

    #[test]
    fn wrapper_is_same_as_inner() {
        let inner = Cause::new(Boom);
        let wrapper = Cause::wrapping(&inner, "job was cancelled");
        assert!(wrapper.is_same_as(&inner));
        assert!(inner.is_same_as(&wrapper));
        assert!(wrapper.is_cancellation());
    }
}
