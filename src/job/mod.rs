// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The Job state machine (§3, §4).

mod core;
mod id;
mod node;
mod select;
mod state;
mod suspend;

pub use self::core::{AwaitOutcome, DisposableHandle, Job, JobHooks, JobOutcome};
pub use id::Id;
pub use node::ListenerKind;
pub use select::SelectSource;
pub use suspend::{Await, Join};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::Cause;
    use core::future::Future;
    use core::pin::Pin;
    use core::task::{Context, Poll};
    use futures::task::noop_waker;

    fn poll_once<F: Future>(fut: Pin<&mut F>) -> Poll<F::Output> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        fut.poll(&mut cx)
    }

    #[derive(Debug)]
    struct Boom;
    impl core::fmt::Display for Boom {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.write_str("boom")
        }
    }
    impl core::error::Error for Boom {}

    #[test]
    fn lazy_job_does_not_start_until_polled() {
        let job: Job<()> = Job::new();
        assert!(!job.is_active());
        let mut join = job.join();
        let join = unsafe { Pin::new_unchecked(&mut join) };
        assert_eq!(poll_once(join), Poll::Pending);
        assert!(job.is_active());
    }

    #[test]
    fn start_is_idempotent() {
        let job: Job<()> = Job::new();
        assert!(job.start());
        assert!(!job.start());
    }

    #[test]
    fn cancel_before_start_goes_straight_to_cancelled() {
        let job: Job<()> = Job::new();
        assert!(job.cancel(None));
        assert!(job.is_completed());
        assert!(job.is_cancelled());
        assert!(!job.cancel(None));
    }

    #[test]
    fn cancel_propagates_to_attached_children() {
        let parent: Job<()> = Job::new_active();
        let child: Job<()> = Job::new_active();
        let _handle = parent.attach_child(&child);

        parent.cancel(None);
        assert!(child.is_cancelled());
    }

    #[test]
    fn complete_waits_for_children() {
        let parent: Job<u32> = Job::new_active();
        let child: Job<()> = Job::new_active();
        let _handle = parent.attach_child(&child);

        assert!(parent.complete_value(7));
        assert!(!parent.is_completed());

        child.complete_value(());
        assert!(parent.is_completed());
    }

    #[test]
    fn cancel_during_complete_wins_over_proposed_value() {
        let parent: Job<u32> = Job::new_active();
        let child: Job<()> = Job::new_active();
        let _handle = parent.attach_child(&child);

        assert!(parent.complete_value(7));
        assert!(parent.cancel(None));
        child.complete_value(());

        assert!(parent.is_cancelled());
        match parent.await_outcome() {
            AwaitOutcome::Cancelled(_) => {}
            _ => panic!("expected the parent to resolve Cancelled"),
        }
    }

    #[test]
    fn invoke_on_completion_after_terminal_fires_immediately() {
        let job: Job<()> = Job::new_active();
        job.complete_value(());

        let fired = alloc::sync::Arc::new(core::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        job.invoke_on_completion(false, move |_cause| {
            fired2.store(true, core::sync::atomic::Ordering::SeqCst);
        });
        assert!(fired.load(core::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn dispose_is_idempotent_and_prevents_firing() {
        let job: Job<()> = Job::new_active();

        let fired = alloc::sync::Arc::new(core::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        let handle = job.invoke_on_completion(false, move |_cause| {
            fired2.store(true, core::sync::atomic::Ordering::SeqCst);
        });
        handle.dispose();
        handle.dispose();

        job.complete_value(());
        assert!(!fired.load(core::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn failed_job_reports_cause_via_await_outcome() {
        let job: Job<()> = Job::new_active();
        let cause = Cause::new(Boom);
        assert!(job.complete_exceptionally(cause));

        match job.await_outcome() {
            AwaitOutcome::Failed(c) => assert!(!c.is_cancellation()),
            _ => panic!("expected Failed"),
        }
    }

    #[test]
    fn get_cancellation_exception_is_illegal_state_before_completion() {
        let job: Job<()> = Job::new_active();
        assert!(job.get_cancellation_exception().is_err());
    }
}
