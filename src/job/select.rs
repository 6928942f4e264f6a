// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The minimal registration surface an external `select!`-style multiplexer
//! needs to race a Job's completion against other events (§4.6 SelectHooks).
//!
//! A full `select!` combinator, with fairness and claim arbitration across
//! multiple sources, is out of scope (§1); what this crate offers instead is
//! [`SelectSource`], implemented by [`Join`] and [`Await`] themselves, since
//! both already carry exactly the state (an embedded, pinned listener node)
//! a multiplexer needs to poll repeatedly against its own `Waker` until one
//! of several sources becomes ready. The spec's separately-named
//! `poll_join_select`/`poll_await_select` collapse into one trait method
//! here since `Join`/`Await` are already distinct types.

use crate::job::core::AwaitOutcome;
use crate::job::suspend::{Await, Join};
use core::pin::Pin;
use core::task::{Context, Poll};

/// A single event source an external multiplexer can poll as part of
/// racing several waits against each other.
pub trait SelectSource {
    /// The value produced once this source becomes ready.
    type Output;

    /// Poll this source. Like [`Future::poll`](core::future::Future::poll),
    /// may be called repeatedly with a fresh `Waker` each time; unlike a bare
    /// `Future`, a multiplexer is expected to hold several of these side by
    /// side and proceed with whichever resolves first, dropping the rest.
    fn poll_select(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output>;
}

impl<T: Clone + Send + 'static> SelectSource for Join<'_, T> {
    type Output = ();

    fn poll_select(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        core::future::Future::poll(self, cx)
    }
}

impl<T: Clone + Send + 'static> SelectSource for Await<'_, T> {
    type Output = AwaitOutcome<T>;

    fn poll_select(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<AwaitOutcome<T>> {
        core::future::Future::poll(self, cx)
    }
}
