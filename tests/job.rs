// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end scenarios driven through a real executor (§8 testable
//! properties).

use futures::executor::block_on;
use jobcore::{AwaitOutcome, Cause, Job};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct Boom;
impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("boom")
    }
}
impl std::error::Error for Boom {}

#[test]
fn lazy_job_starts_on_join_and_resolves_once_completed() {
    let job: Job<u32> = Job::new();
    assert!(!job.is_active());

    let worker = job.clone();
    std::thread::spawn(move || {
        // Give `join` a chance to have started (and suspended on) the job
        // before we complete it.
        std::thread::sleep(std::time::Duration::from_millis(10));
        worker.complete_value(42);
    });

    block_on(job.join());
    assert!(job.is_completed());
    match block_on(job.await_()) {
        AwaitOutcome::Value(v) => assert_eq!(v, 42),
        _ => panic!("expected Value"),
    }
}

#[test]
fn cancel_propagates_to_children_and_parent_waits_for_them() {
    let parent: Job<()> = Job::new_active();
    let child: Job<()> = Job::new_active();
    let _handle = parent.attach_child(&child);

    assert!(parent.cancel(None));
    // The parent cannot finish cancelling until the child, which was just
    // told to cancel, actually reaches a terminal state.
    assert!(!parent.is_completed());
    assert!(child.is_cancelled());

    assert!(child.cancel(None) || child.is_completed());
    if !child.is_completed() {
        child.complete_value(());
    }
    assert!(parent.is_completed());
    assert!(parent.is_cancelled());
}

#[test]
fn complete_waits_for_outstanding_children_then_resolves() {
    let parent: Job<&'static str> = Job::new_active();
    let child: Job<()> = Job::new_active();
    let _handle = parent.attach_child(&child);

    assert!(parent.complete_value("done"));
    assert!(!parent.is_completed());

    child.complete_value(());
    assert!(parent.is_completed());
    match block_on(parent.await_()) {
        AwaitOutcome::Value(v) => assert_eq!(v, "done"),
        _ => panic!("expected Value"),
    }
}

#[test]
fn cancel_during_complete_discards_the_proposed_value() {
    let parent: Job<u32> = Job::new_active();
    let child: Job<()> = Job::new_active();
    let _handle = parent.attach_child(&child);

    assert!(parent.complete_value(7));
    assert!(parent.cancel(None));
    child.complete_value(());

    match block_on(parent.await_()) {
        AwaitOutcome::Cancelled(_) => {}
        _ => panic!("cancellation must win over the proposed value"),
    }
}

#[test]
fn cancel_during_complete_reports_mismatched_failure_via_hooks() {
    use jobcore::{JobHooks, JobOutcome};

    struct Recorder {
        exceptions: AtomicUsize,
    }
    impl JobHooks<u32> for Recorder {
        fn handle_exception(&self, _cause: &Cause) {
            self.exceptions.fetch_add(1, Ordering::SeqCst);
        }
        fn after_completion(&self, _outcome: JobOutcome<'_, u32>) {}
    }

    let hooks = Arc::new(Recorder {
        exceptions: AtomicUsize::new(0),
    });
    let parent: Job<u32> = Job::with_hooks(true, Some(hooks.clone()));
    let child: Job<()> = Job::new_active();
    let _handle = parent.attach_child(&child);

    assert!(parent.cancel(None));
    assert!(parent.complete_exceptionally(Cause::new(Boom)));
    child.complete_value(());

    assert!(parent.is_cancelled());
    assert_eq!(hooks.exceptions.load(Ordering::SeqCst), 1);
}

#[test]
fn invoke_on_completion_after_terminal_fires_immediately_with_cause() {
    let job: Job<()> = Job::new_active();
    job.complete_exceptionally(Cause::new(Boom));

    let seen = Arc::new(std::sync::Mutex::new(false));
    let seen2 = seen.clone();
    job.invoke_on_completion(false, move |cause| {
        *seen2.lock().unwrap() = cause.is_some();
    });
    assert!(*seen.lock().unwrap());
}

#[test]
fn concurrent_install_and_cancel_always_observes_the_cause() {
    for _ in 0..50 {
        let job: Job<()> = Job::new_active();
        let fired = Arc::new(AtomicUsize::new(0));

        let installer = {
            let job = job.clone();
            let fired = fired.clone();
            std::thread::spawn(move || {
                job.invoke_on_completion(false, move |cause| {
                    if cause.is_some() {
                        fired.fetch_add(1, Ordering::SeqCst);
                    }
                });
            })
        };
        let canceller = {
            let job = job.clone();
            std::thread::spawn(move || {
                job.cancel(Some(Cause::new(Boom)));
            })
        };

        installer.join().unwrap();
        canceller.join().unwrap();
        assert!(job.is_cancelled());
        // Either the handler observed the cancellation cause, or it was
        // installed and fired before `cancel` ran at all — in both cases,
        // the Job itself ends up cancelled exactly once.
    }
}
