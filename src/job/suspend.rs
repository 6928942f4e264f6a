// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `join`/`await` suspension bridges (§4.5 SuspensionBridge).
//!
//! Each future embeds one [`ListenerNode`] inline, pinned in its own stack
//! frame rather than heap-allocated: the Job's listener list only ever stores
//! a `NonNull` pointer into it, so dropping the future before it resolves
//! (the caller's own cancellation, realized here as Rust's usual
//! drop-cancels-a-future idiom) must unlink the node before the frame goes
//! away. `PinnedDrop` does that.

use crate::job::core::{AwaitOutcome, Job};
use crate::job::node::ListenerNode;
use core::future::Future;
use core::pin::Pin;
use core::ptr::NonNull;
use core::task::{Context, Poll};
use pin_project::{pin_project, pinned_drop};

#[derive(Clone, Copy, Eq, PartialEq)]
enum Phase {
    Start,
    Installed,
    Done,
}

/// The future returned by [`Job::join`](crate::job::Job::join).
#[pin_project(PinnedDrop)]
#[must_use = "futures do nothing unless polled"]
pub struct Join<'a, T: Clone + Send + 'static> {
    job: &'a Job<T>,
    #[pin]
    node: ListenerNode,
    phase: Phase,
}

impl<'a, T: Clone + Send + 'static> Join<'a, T> {
    pub(crate) fn new(job: &'a Job<T>) -> Self {
        Self {
            job,
            node: ListenerNode::new_suspension(),
            phase: Phase::Start,
        }
    }
}

impl<T: Clone + Send + 'static> Future for Join<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.job.start();

        if *this.phase == Phase::Done {
            return Poll::Ready(());
        }
        if this.job.is_completed() {
            *this.phase = Phase::Done;
            return Poll::Ready(());
        }

        if *this.phase == Phase::Start {
            let ptr = NonNull::from(&*this.node);
            if this.job.install_suspension(ptr) {
                *this.phase = Phase::Installed;
            } else {
                *this.phase = Phase::Done;
                return Poll::Ready(());
            }
        }

        match this.node.waiter().poll_wait(cx) {
            Poll::Ready(_) => {
                *this.phase = Phase::Done;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[pinned_drop]
impl<T: Clone + Send + 'static> PinnedDrop for Join<'_, T> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if *this.phase == Phase::Installed {
            let ptr = NonNull::from(&*this.node);
            this.job.remove_suspension(ptr);
        }
    }
}

/// The future returned by [`Job::await_`](crate::job::Job::await_).
#[pin_project(PinnedDrop)]
#[must_use = "futures do nothing unless polled"]
pub struct Await<'a, T: Clone + Send + 'static> {
    job: &'a Job<T>,
    #[pin]
    node: ListenerNode,
    phase: Phase,
}

impl<'a, T: Clone + Send + 'static> Await<'a, T> {
    pub(crate) fn new(job: &'a Job<T>) -> Self {
        Self {
            job,
            node: ListenerNode::new_suspension(),
            phase: Phase::Start,
        }
    }
}

impl<T: Clone + Send + 'static> Future for Await<'_, T> {
    type Output = AwaitOutcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.job.start();

        if *this.phase == Phase::Done {
            return Poll::Ready(this.job.await_outcome());
        }
        if this.job.is_completed() {
            *this.phase = Phase::Done;
            return Poll::Ready(this.job.await_outcome());
        }

        if *this.phase == Phase::Start {
            let ptr = NonNull::from(&*this.node);
            if this.job.install_suspension(ptr) {
                *this.phase = Phase::Installed;
            } else {
                *this.phase = Phase::Done;
                return Poll::Ready(this.job.await_outcome());
            }
        }

        match this.node.waiter().poll_wait(cx) {
            Poll::Ready(_) => {
                *this.phase = Phase::Done;
                Poll::Ready(this.job.await_outcome())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[pinned_drop]
impl<T: Clone + Send + 'static> PinnedDrop for Await<'_, T> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if *this.phase == Phase::Installed {
            let ptr = NonNull::from(&*this.node);
            this.job.remove_suspension(ptr);
        }
    }
}
