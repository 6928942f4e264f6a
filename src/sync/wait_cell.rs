// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An atomically registered [`Waker`], used to build the suspension bridge
//! `join`/`await` resume through (§4.5).
//!
//! Adapted from `kasync::sync::wait_cell`, itself adapted from
//! [`maitake-sync`](https://github.com/hawkw/mycelium/blob/dd0020892564c77ee4c20ffbc2f7f5b046ad54c8/maitake-sync/src/wait_cell.rs),
//! trimmed to the `poll_wait`/`wake`/`close` surface a single-listener
//! suspension node needs. The ergonomic `Wait`/`Subscribe` future wrappers
//! from the teacher are not needed here, since [`crate::job::suspend`]
//! drives `poll_wait` directly from its own `Future` impl.

use crate::loom::cell::UnsafeCell;
use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use bitflags::bitflags;
use core::fmt;
use core::task::{Context, Poll, Waker};

pub(crate) struct WaitCell {
    state: AtomicUsize,
    waker: UnsafeCell<Option<Waker>>,
}

bitflags! {
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    struct State: usize {
        const WAITING = 0b0000;
        const REGISTERING = 0b0001;
        const WAKING = 0b0010;
        const WOKEN = 0b0100;
        const CLOSED = 0b1000;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum PollWaitError {
    Closed,
    Busy,
}

impl WaitCell {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicUsize::new(State::WAITING.bits()),
            waker: UnsafeCell::new(None),
        }
    }

    pub(crate) fn poll_wait(&self, cx: &mut Context<'_>) -> Poll<Result<(), PollWaitError>> {
        match self.compare_exchange(State::WAITING, State::REGISTERING, Ordering::Acquire) {
            Err(actual) if actual.contains(State::CLOSED) => {
                return Poll::Ready(Err(PollWaitError::Closed));
            }
            Err(actual) if actual.contains(State::WOKEN) => {
                self.fetch_and(!State::WOKEN, Ordering::Release);
                return Poll::Ready(Ok(()));
            }
            Err(actual) if actual.contains(State::WAKING) => {
                return Poll::Ready(Ok(()));
            }
            Err(_) => return Poll::Ready(Err(PollWaitError::Busy)),
            Ok(_) => {}
        }

        let waker = cx.waker();
        if let Some(prev_waker) = self.replace_waker(waker.clone()) {
            prev_waker.wake();
        }

        if let Err(actual) =
            self.compare_exchange(State::REGISTERING, State::WAITING, Ordering::AcqRel)
        {
            let waker = self.waker.with_mut(|waker| unsafe { (*waker).take() });

            let state = self.fetch_and(State::CLOSED, Ordering::AcqRel);
            debug_assert!(
                state == actual || state == actual | State::CLOSED,
                "state changed unexpectedly while parking!"
            );

            if let Some(waker) = waker {
                waker.wake();
            }

            return if state.contains(State::CLOSED) {
                Poll::Ready(Err(PollWaitError::Closed))
            } else {
                Poll::Ready(Ok(()))
            };
        }

        Poll::Pending
    }

    /// Wake the [`Waker`] stored in this cell, if any. Returns `true` if a
    /// waiting task was actually woken.
    pub(crate) fn wake(&self) -> bool {
        if let Some(waker) = self.take_waker(false) {
            waker.wake();
            true
        } else {
            false
        }
    }

    /// Like [`wake`](Self::wake), but hands back the `Waker` instead of
    /// calling it. For a caller that must finish touching other shared state
    /// (e.g. unlinking this cell's owning node from an intrusive list) before
    /// it's safe to let the `Waker` run — calling `wake()` itself would be
    /// too late if this cell's storage can be reclaimed the instant the
    /// waiting task resumes.
    pub(crate) fn take_waker_to_wake(&self) -> Option<Waker> {
        self.take_waker(false)
    }

    /// Close the cell: any registered waker is woken with an error, and
    /// future `poll_wait` calls report `Closed`. Used when a listener node is
    /// disposed before the Job terminates (§5 "cancellation of the caller").
    pub(crate) fn close(&self) -> bool {
        if let Some(waker) = self.take_waker(true) {
            waker.wake();
            true
        } else {
            false
        }
    }

    fn take_waker(&self, close: bool) -> Option<Waker> {
        let state = {
            let mut bits = State::WAKING | State::WOKEN;
            if close {
                bits |= State::CLOSED;
            }
            self.fetch_or(bits, Ordering::AcqRel)
        };

        if !state.intersects(State::WAKING | State::REGISTERING | State::CLOSED) {
            let waker = self.waker.with_mut(|waker| unsafe { (*waker).take() });
            self.fetch_and(!State::WAKING, Ordering::Release);
            return waker;
        }

        None
    }

    fn replace_waker(&self, waker: Waker) -> Option<Waker> {
        let state = self.fetch_or(State::WAKING, Ordering::AcqRel);

        if !state.intersects(State::WAKING | State::REGISTERING | State::CLOSED) {
            let prev_waker = self.waker.with_mut(|old_waker| unsafe {
                match &mut *old_waker {
                    Some(old_waker) if waker.will_wake(old_waker) => None,
                    old => old.replace(waker.clone()),
                }
            });

            self.fetch_and(!State::WAKING, Ordering::Release);
            return prev_waker;
        }

        None
    }

    #[inline(always)]
    fn compare_exchange(&self, curr: State, new: State, success: Ordering) -> Result<State, State> {
        self.state
            .compare_exchange(curr.bits(), new.bits(), success, Ordering::Acquire)
            .map(State::from_bits_retain)
            .map_err(State::from_bits_retain)
    }

    #[inline(always)]
    fn fetch_and(&self, state: State, order: Ordering) -> State {
        State::from_bits_retain(self.state.fetch_and(state.bits(), order))
    }

    #[inline(always)]
    fn fetch_or(&self, state: State, order: Ordering) -> State {
        State::from_bits_retain(self.state.fetch_or(state.bits(), order))
    }
}

// Safety: `WaitCell` synchronizes all accesses through atomic operations.
unsafe impl Send for WaitCell {}
// Safety: `WaitCell` synchronizes all accesses through atomic operations.
unsafe impl Sync for WaitCell {}

impl fmt::Debug for WaitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitCell")
            .field("state", &State::from_bits_retain(self.state.load(Ordering::Relaxed)))
            .finish_non_exhaustive()
    }
}

impl Drop for WaitCell {
    fn drop(&mut self) {
        self.close();
    }
}
