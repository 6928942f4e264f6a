// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `JobCore` — the state machine itself (§4.4).
//!
//! The listener-list spinlock (mirroring `kasync::sync::WaitQueue`) is used
//! to serialize every operation that needs to observe or change the coarse
//! state tag *and* the listener list consistently: `start`, `cancel`,
//! `make_completing`/`on_child_terminal`, `invoke_on_completion` and
//! `attach_child` all take it. `StateCell::load` remains a lock-free single
//! atomic read, so `is_active`/`is_completed`/`is_cancelled` never block.
//! This is a simplification of the fully lock-free transition table in §4.4
//! (see DESIGN.md): every writer funnels through one short critical section
//! instead of reproducing the listener-promotion CAS ladder, which §4.1's
//! implementation note and §9's "OpDescriptor helping" note both permit.

use crate::cause::Cause;
use crate::error::{CancellationError, IllegalStateError};
use crate::job::id::Id;
use crate::job::node::{Fired, ListenerKind, ListenerNode};
use crate::job::state::{Snapshot, StateCell, Tag};
use crate::loom::cell::UnsafeCell;
use crate::loom::sync::Arc;
use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::NonNull;
use cordyceps::list;

/// The outcome passed to [`JobHooks::after_completion`].
pub enum JobOutcome<'a, T> {
    /// The Job completed normally with this value.
    Value(&'a T),
    /// The Job was cancelled.
    Cancelled(&'a Cause),
    /// The Job completed exceptionally (a non-cancellation failure).
    Failed(&'a Cause),
}

/// Extension points for a carrier built on top of [`Job`] (§6, §9).
///
/// Modeled as a trait object rather than an inheritance hierarchy, mirroring
/// how `kasync::task::Task` exposes a small `VTable` rather than requiring
/// subclassing.
#[allow(unused_variables)]
pub trait JobHooks<T>: Send + Sync {
    /// Called exactly once, the first time `start()` succeeds.
    fn on_start(&self) {}
    /// Called once when the Job enters the cancelling phase or, for Jobs with
    /// no cancelling phase, once it reaches a terminal state.
    /// `exceptionally` is true if triggered by a non-cancellation failure.
    fn on_cancellation(&self, exceptionally: bool) {}
    /// Called once after the terminal transition and listener notification.
    fn after_completion(&self, outcome: JobOutcome<'_, T>) {}
    /// Called when a listener throws, or when a proposed exceptional
    /// completion is discarded in favor of an in-progress cancellation cause
    /// (§4.4 "cause coercion").
    fn handle_exception(&self, cause: &Cause) {}
    /// An optional human-readable name, used in diagnostics.
    fn name(&self) -> Option<&str> {
        None
    }
}

enum Terminal<T> {
    Value(T),
    Failed(Cause),
}

struct JobInner<T> {
    id: Id,
    state: StateCell,
    listeners: spin::Mutex<list::List<ListenerNode>>,
    pending_children: AtomicUsize,
    /// Set once, before `HAS_CAUSE` is published: the in-progress or final
    /// cancellation cause.
    cancel_cause: UnsafeCell<Option<Cause>>,
    /// Either the proposal stashed while `Finishing(completing)` awaits child
    /// quiescence, or (once resolved) the final `Failed`/`Value` payload.
    terminal: UnsafeCell<Option<Terminal<T>>>,
    hooks: Option<Arc<dyn JobHooks<T>>>,
}

// Safety: all interior-mutable fields are written at most once before the
// state bit that publishes them is set with `Release`, and read only after
// observing that bit with `Acquire` — the discipline `kasync::task::TaskInner`
// documents for its own `join_waker` slot.
unsafe impl<T: Send> Send for JobInner<T> {}
// Safety: see above; shared access to `JobInner<T>` only ever reads these
// cells after the serializing bit is observed.
unsafe impl<T: Send> Sync for JobInner<T> {}

/// A cancellable, composable unit of asynchronous work (§2).
///
/// Cloning a `Job` yields another handle to the same underlying state machine
/// (it is reference-counted internally); there is no separate "owned" vs.
/// "shared" handle distinction as there would be for a type erasing its
/// `Future` payload, since `Job<T>`'s only payload is the terminal value.
pub struct Job<T = ()> {
    inner: Arc<JobInner<T>>,
}

impl<T> Clone for Job<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> core::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Job<T> {
    /// Create a lazy Job: not started until `start()` or `join`/`await` is
    /// called on it.
    pub fn new() -> Self {
        Self::with_hooks(false, None)
    }

    /// Create an already-active Job.
    pub fn new_active() -> Self {
        Self::with_hooks(true, None)
    }

    /// Create a Job with extension hooks installed (§6, §9).
    pub fn with_hooks(active: bool, hooks: Option<Arc<dyn JobHooks<T>>>) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: Id::next(),
                state: StateCell::new(active),
                listeners: spin::Mutex::new(list::List::new()),
                pending_children: AtomicUsize::new(0),
                cancel_cause: UnsafeCell::new(None),
                terminal: UnsafeCell::new(None),
                hooks,
            }),
        }
    }

    pub fn id(&self) -> Id {
        self.inner.id
    }

    /// `isActive` (§3): non-terminal, started, and not cancelling.
    pub fn is_active(&self) -> bool {
        let snapshot = self.inner.state.load(Ordering::Acquire);
        match snapshot.tag() {
            Tag::Active => true,
            Tag::Finishing => !snapshot.get(Snapshot::HAS_CAUSE),
            _ => false,
        }
    }

    /// `isCompleted` (§3): the Job has reached a terminal state.
    pub fn is_completed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire).is_terminal()
    }

    /// `isCancelled` (§3): `Cancelled`, or `Finishing` with a cause.
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .state
            .load(Ordering::Acquire)
            .is_cancelling_or_cancelled()
    }

    /// Start the Job. Returns `true` iff this call effected the transition
    /// from `New` to `Active`.
    pub fn start(&self) -> bool {
        let listeners = self.inner.listeners.lock();
        let snapshot = self.inner.state.load(Ordering::Acquire);
        if snapshot.tag() != Tag::New {
            return false;
        }
        self.inner
            .state
            .transition(|s| s.set(Snapshot::TAG, Tag::Active));
        drop(listeners);
        tracing::trace!(job.id = %self.inner.id, "Job::start");
        if let Some(hooks) = &self.inner.hooks {
            hooks.on_start();
        }
        true
    }

    /// Cancel the Job with an optional cause (§4.4). Returns `true` iff this
    /// call effected the transition into cancelling/cancelled.
    ///
    /// A Job with no attached children (`EmptyNew`/`EmptyActive` in §3's
    /// terms) goes straight to `Cancelled`: there is nothing to wait on.
    /// One with children enters `Finishing` and waits for `on_child_terminal`
    /// to observe `pending_children` reach zero. Since `Finishing` is only
    /// ever entered by this path or by `make_completing` with children still
    /// outstanding, observing `Tag::Finishing` here implies `pending > 0`
    /// already.
    pub fn cancel(&self, cause: Option<Cause>) -> bool {
        let listeners = self.inner.listeners.lock();
        let snapshot = self.inner.state.load(Ordering::Acquire);

        match snapshot.tag() {
            Tag::Cancelled | Tag::Failed | Tag::Value => return false,
            Tag::Finishing if snapshot.get(Snapshot::HAS_CAUSE) => return false,
            _ => {}
        }

        let cause = self.publish_cause(cause);
        let pending = self.inner.pending_children.load(Ordering::Acquire);

        if pending == 0 {
            self.inner
                .state
                .transition(|s| s.set(Snapshot::TAG, Tag::Cancelled));
            self.notify_terminal(listeners, Some(&cause));
            if let Some(hooks) = &self.inner.hooks {
                hooks.on_cancellation(false);
            }
        } else {
            self.inner.state.transition(|s| {
                s.set(Snapshot::TAG, Tag::Finishing);
                s.set(Snapshot::HAS_CAUSE, true);
            });
            self.notify_cancelling(listeners, &cause);
            // `notify_cancelling` may have synchronously cascaded all the
            // way through `on_child_terminal` to a final `Cancelled` (e.g.
            // the Job's only child resolved immediately once told to
            // cancel). `finish_terminal` never fires `on_cancellation`
            // itself, so this is still the one and only place that does,
            // regardless of which tag we observe now.
            if let Some(hooks) = &self.inner.hooks {
                hooks.on_cancellation(false);
            }
        }
        true
    }

    /// For each attached child currently in the list, call `child.cancel`
    /// (§4.4). Does not itself change this Job's state: children stay
    /// attached (and are still notified again, harmlessly, by the real
    /// cancelling-phase transition if one follows), since `Job::cancel` is
    /// itself idempotent.
    pub fn cancel_children(&self, cause: Option<Cause>) {
        let cause = cause.unwrap_or_else(|| Cause::generated("children cancelled"));
        let actions = {
            let listeners = self.inner.listeners.lock();
            listeners
                .iter()
                .filter_map(ListenerNode::child_action)
                .collect::<Vec<_>>()
        };
        for action in actions {
            action(Some(&cause));
        }
    }

    /// Attach `child` (§4.4): installs a cancellation-phase listener on
    /// `self` that propagates `cancel` to `child`, and a completion listener
    /// on `child` that resolves this Job's child-quiescence wait.
    pub fn attach_child<C: Clone + Send + 'static>(&self, child: &Job<C>) -> DisposableHandle {
        self.inner.pending_children.fetch_add(1, Ordering::AcqRel);

        let child_for_cancel = child.clone();
        let cancel_handle = self.install_child(Arc::new(move |cause: Option<&Cause>| {
            child_for_cancel.cancel(cause.cloned());
        }));

        let parent_for_completion = self.clone();
        let cancel_handle_for_dispose = cancel_handle.clone();
        child.install_listener(
            false,
            Box::new(move |_cause| {
                cancel_handle_for_dispose.dispose();
                parent_for_completion.on_child_terminal();
            }),
        );

        cancel_handle
    }

    /// Install a completion listener (§4.4 `invokeOnCompletion`).
    ///
    /// `on_cancelling`: fire at Cancelling-phase entry rather than only at
    /// terminal.
    pub fn invoke_on_completion(
        &self,
        on_cancelling: bool,
        handler: impl FnOnce(Option<&Cause>) + Send + 'static,
    ) -> DisposableHandle {
        self.install_listener(on_cancelling, Box::new(handler))
    }

    /// Complete the Job normally with `value` (§4.4 `makeCompleting`).
    /// Returns `true` iff this call initiated the completion.
    pub fn complete_value(&self, value: T) -> bool {
        self.make_completing(Terminal::Value(value))
    }

    /// Complete the Job exceptionally with `cause` (§4.4 `makeCompleting`).
    /// Returns `true` iff this call initiated the completion.
    pub fn complete_exceptionally(&self, cause: Cause) -> bool {
        self.make_completing(Terminal::Failed(cause))
    }

    /// Suspend until this Job reaches a terminal state, starting it first if
    /// it is lazy (§4.4 `join`). Never reports the Job's own outcome — only
    /// the caller's own cancellation (realized here as the returned future
    /// simply being dropped) can abort it early.
    pub fn join(&self) -> crate::job::suspend::Join<'_, T> {
        crate::job::suspend::Join::new(self)
    }

    /// Suspend until this Job reaches a terminal state, starting it first if
    /// it is lazy, and resolve to its outcome (§4.4 `await`).
    pub fn await_(&self) -> crate::job::suspend::Await<'_, T> {
        crate::job::suspend::Await::new(self)
    }

    /// `getCancellationException` (§4.4).
    pub fn get_cancellation_exception(&self) -> Result<CancellationError, IllegalStateError> {
        let snapshot = self.inner.state.load(Ordering::Acquire);
        match snapshot.tag() {
            Tag::Cancelled => {
                let cause = self
                    .inner
                    .cancel_cause
                    .with(|c| unsafe { (*c).clone() })
                    .expect("Cancelled without a cause");
                Ok(Self::wrap_cancellation(cause))
            }
            Tag::Finishing if snapshot.get(Snapshot::HAS_CAUSE) => {
                let cause = self
                    .inner
                    .cancel_cause
                    .with(|c| unsafe { (*c).clone() })
                    .expect("cancelling without a cause");
                Ok(Self::wrap_cancellation(cause))
            }
            Tag::Failed => {
                let cause = self
                    .inner
                    .terminal
                    .with(|t| unsafe {
                        match &*t {
                            Some(Terminal::Failed(c)) => Some(c.clone()),
                            _ => None,
                        }
                    })
                    .expect("Failed without a cause");
                Ok(CancellationError::new(Cause::wrapping(
                    &cause,
                    "job has failed",
                )))
            }
            Tag::Value => Ok(CancellationError::new(Cause::generated(
                "job has completed normally",
            ))),
            _ => Err(IllegalStateError("job has not completed")),
        }
    }

    fn wrap_cancellation(cause: Cause) -> CancellationError {
        if cause.is_cancellation() {
            CancellationError::new(cause)
        } else {
            CancellationError::new(Cause::wrapping(&cause, "job was cancelled"))
        }
    }

    // === internal: listener installation/removal plumbing ===

    pub(crate) fn install_listener(
        &self,
        on_cancelling: bool,
        handler: Box<dyn FnOnce(Option<&Cause>) + Send>,
    ) -> DisposableHandle {
        let mut listeners = self.inner.listeners.lock();
        let snapshot = self.inner.state.load(Ordering::Acquire);

        if snapshot.is_terminal() {
            drop(listeners);
            let cause = self.immediate_cause(snapshot);
            handler(cause.as_ref());
            return DisposableHandle::noop();
        }

        if snapshot.tag() == Tag::Finishing && snapshot.get(Snapshot::HAS_CAUSE) && on_cancelling {
            let cause = self.inner.cancel_cause.with(|c| unsafe { (*c).clone() });
            drop(listeners);
            handler(cause.as_ref());
            return DisposableHandle::noop();
        }

        let node = Box::new(ListenerNode::new_completion(on_cancelling, handler));
        let ptr = NonNull::from(Box::leak(node));
        listeners.push_back(ptr);
        drop(listeners);

        let inner = self.inner.clone();
        DisposableHandle::new(move || {
            if inner.remove_listener(ptr) {
                // Safety: `ptr` came from `Box::leak` above and is reclaimed
                // at most once: either here, or by the notify path
                // (`drain_fired`), never both, since `remove_listener` only
                // returns `true` for whichever call actually unlinked the
                // node, and the notify path only frees `Completion` nodes it
                // has itself just unlinked under the same lock.
                drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            }
        })
    }

    /// Install a `Child`-kind listener (`attach_child`). Unlike a plain
    /// completion handler, `action` is re-invocable — `cancel_children` may
    /// fire it any number of times without retiring the node — and the node
    /// is reclaimed only by disposing the returned handle, never by the
    /// notify path: see DESIGN.md for why a parent's `Child` node must
    /// outlive its own cancelling-phase firing (the child it refers to may
    /// not actually terminate, and thus dispose this handle, until long
    /// afterward).
    fn install_child(
        &self,
        action: Arc<dyn Fn(Option<&Cause>) + Send + Sync + 'static>,
    ) -> DisposableHandle {
        let mut listeners = self.inner.listeners.lock();
        let snapshot = self.inner.state.load(Ordering::Acquire);

        if snapshot.is_terminal() {
            drop(listeners);
            let cause = self.immediate_cause(snapshot);
            action(cause.as_ref());
            return DisposableHandle::noop();
        }

        if snapshot.tag() == Tag::Finishing && snapshot.get(Snapshot::HAS_CAUSE) {
            let cause = self.inner.cancel_cause.with(|c| unsafe { (*c).clone() });
            drop(listeners);
            action(cause.as_ref());
            return DisposableHandle::noop();
        }

        let node = Box::new(ListenerNode::new_child(action));
        let ptr = NonNull::from(Box::leak(node));
        listeners.push_back(ptr);
        drop(listeners);

        let inner = self.inner.clone();
        DisposableHandle::new(move || {
            inner.remove_listener(ptr);
            // Safety: a `Child` node is freed exactly once, here, and only
            // here — `drain_fired` never frees one (it only clones the
            // `Arc` action out before unlocking). `DisposeInner::disposed`
            // guarantees this closure body runs at most once across every
            // clone of this handle (the one returned to the caller and the
            // one captured by the child's own completion listener), so by
            // the time either of them gets here the node is guaranteed not
            // yet freed and never will be by anyone else.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        })
    }

    /// Install a suspension node (owned by the caller's pinned future, not
    /// heap-allocated). Returns `true` if installed; `false` if the Job was
    /// already terminal (caller should re-check state directly).
    pub(crate) fn install_suspension(&self, ptr: NonNull<ListenerNode>) -> bool {
        let mut listeners = self.inner.listeners.lock();
        if self.inner.state.load(Ordering::Acquire).is_terminal() {
            return false;
        }
        listeners.push_back(ptr);
        true
    }

    pub(crate) fn remove_suspension(&self, ptr: NonNull<ListenerNode>) {
        self.inner.remove_listener(ptr);
    }

    fn immediate_cause(&self, snapshot: Snapshot) -> Option<Cause> {
        match snapshot.tag() {
            Tag::Cancelled => self.inner.cancel_cause.with(|c| unsafe { (*c).clone() }),
            Tag::Failed => self.inner.terminal.with(|t| unsafe {
                match &*t {
                    Some(Terminal::Failed(c)) => Some(c.clone()),
                    _ => None,
                }
            }),
            _ => None,
        }
    }

    fn publish_cause(&self, cause: Option<Cause>) -> Cause {
        let cause = cause.unwrap_or_else(|| Cause::generated("job was cancelled"));
        self.inner
            .cancel_cause
            .with_mut(|c| unsafe { *c = Some(cause.clone()) });
        cause
    }

    // === internal: completion protocol (§4.4) ===

    fn make_completing(&self, proposed: Terminal<T>) -> bool {
        let listeners = self.inner.listeners.lock();
        let snapshot = self.inner.state.load(Ordering::Acquire);

        match snapshot.tag() {
            Tag::Cancelled | Tag::Failed | Tag::Value => {
                tracing::warn!(job.id = %self.inner.id, "make_completing: already complete");
                return false;
            }
            Tag::Finishing if snapshot.get(Snapshot::COMPLETING) => {
                tracing::warn!(job.id = %self.inner.id, "make_completing: already completing");
                return false;
            }
            Tag::New => {
                // A lazy Job completing without ever being polled/started.
                // Bypasses `start()` directly since it would try to retake
                // this same lock; `on_start` is not fired in this case.
                self.inner
                    .state
                    .transition(|s| s.set(Snapshot::TAG, Tag::Active));
            }
            _ => {}
        }

        let pending = self.inner.pending_children.load(Ordering::Acquire);
        if pending == 0 {
            self.finish_terminal(listeners, Some(proposed));
        } else {
            self.inner
                .terminal
                .with_mut(|t| unsafe { *t = Some(proposed) });
            self.inner.state.transition(|s| {
                s.set(Snapshot::TAG, Tag::Finishing);
                s.set(Snapshot::COMPLETING, true);
            });
            drop(listeners);
        }
        true
    }

    /// Called when an attached child reaches a terminal state (§4.4
    /// `continueCompleting`, realized via an atomic counter rather than
    /// ordered child traversal — see DESIGN.md).
    fn on_child_terminal(&self) {
        let remaining = self.inner.pending_children.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining != 0 {
            return;
        }

        let listeners = self.inner.listeners.lock();
        let snapshot = self.inner.state.load(Ordering::Acquire);
        if snapshot.tag() == Tag::Finishing
            && (snapshot.get(Snapshot::COMPLETING) || snapshot.get(Snapshot::HAS_CAUSE))
        {
            let proposed = self.inner.terminal.with_mut(|t| unsafe { (*t).take() });
            self.finish_terminal(listeners, proposed);
        }
    }

    fn finish_terminal(
        &self,
        listeners: spin::MutexGuard<'_, list::List<ListenerNode>>,
        proposed: Option<Terminal<T>>,
    ) {
        let snapshot = self.inner.state.load(Ordering::Acquire);

        if snapshot.get(Snapshot::HAS_CAUSE) {
            if let Some(Terminal::Failed(ref unexpected)) = proposed {
                let existing = self.inner.cancel_cause.with(|c| unsafe { (*c).clone() });
                if let Some(existing) = existing {
                    if !existing.is_same_as(unexpected) {
                        if let Some(hooks) = &self.inner.hooks {
                            hooks.handle_exception(unexpected);
                        }
                    }
                }
            }
            // A proposed `Value` is simply discarded (§4.4 scenario 4).

            self.inner
                .state
                .transition(|s| s.set(Snapshot::TAG, Tag::Cancelled));
            let cause = self.inner.cancel_cause.with(|c| unsafe { (*c).clone() });
            self.notify_terminal(listeners, cause.as_ref());
            // `on_cancellation` already fired when `cancel()` entered the
            // cancelling phase; only the terminal-completion hook fires here.
            if let Some(hooks) = &self.inner.hooks {
                if let Some(cause) = &cause {
                    hooks.after_completion(JobOutcome::Cancelled(cause));
                }
            }
            return;
        }

        match proposed.expect("completing without a proposed outcome") {
            Terminal::Value(value) => {
                self.inner
                    .terminal
                    .with_mut(|t| unsafe { *t = Some(Terminal::Value(value)) });
                self.inner
                    .state
                    .transition(|s| s.set(Snapshot::TAG, Tag::Value));
                self.notify_terminal(listeners, None);
                if let Some(hooks) = &self.inner.hooks {
                    self.inner.terminal.with(|t| unsafe {
                        if let Some(Terminal::Value(ref v)) = *t {
                            hooks.after_completion(JobOutcome::Value(v));
                        }
                    });
                }
            }
            Terminal::Failed(cause) => {
                self.inner
                    .terminal
                    .with_mut(|t| unsafe { *t = Some(Terminal::Failed(cause.clone())) });
                self.inner
                    .state
                    .transition(|s| s.set(Snapshot::TAG, Tag::Failed));
                self.notify_terminal(listeners, Some(&cause));
                if let Some(hooks) = &self.inner.hooks {
                    hooks.after_completion(JobOutcome::Failed(&cause));
                }
            }
        }
    }

    // === internal: listener notification (§4.4 "Listener notification") ===

    fn notify_cancelling(
        &self,
        listeners: spin::MutexGuard<'_, list::List<ListenerNode>>,
        cause: &Cause,
    ) {
        let fired = Self::drain_fired(listeners, |n| n.fires_on_cancelling());
        Self::invoke_fired(fired, Some(cause));
    }

    fn notify_terminal(
        &self,
        listeners: spin::MutexGuard<'_, list::List<ListenerNode>>,
        cause: Option<&Cause>,
    ) {
        let fired = Self::drain_fired(listeners, |_| true);
        Self::invoke_fired(fired, cause);
    }

    /// Unlink every node matching `pred` and extract what's needed to notify
    /// it, all while still holding `listeners`. This is the only place
    /// allowed to dereference a node's memory after the lock is released —
    /// everything handed back in the returned `Vec` is either an owned
    /// closure/`Arc` (safe to invoke any time) or a `Waker` (safe to wake any
    /// time), never a raw pointer into the node itself. See
    /// `ListenerNode::take_fired` for why this matters most for `Suspension`
    /// nodes.
    fn drain_fired(
        mut listeners: spin::MutexGuard<'_, list::List<ListenerNode>>,
        mut pred: impl FnMut(&ListenerNode) -> bool,
    ) -> Vec<Fired> {
        let matched: Vec<NonNull<ListenerNode>> = listeners
            .iter()
            .filter(|n| pred(n))
            .map(NonNull::from)
            .collect();

        let mut fired = Vec::with_capacity(matched.len());
        for ptr in matched {
            // Safety: still under `listeners`' lock; nothing else can have
            // freed or relinked `ptr` yet, since every other path that could
            // (another notify pass, `dispose`, `PinnedDrop`) takes this same
            // lock first.
            unsafe {
                listeners.remove(ptr);
            }
            let node = unsafe { ptr.as_ref() };
            let kind = node.kind();
            if let Some(item) = node.take_fired() {
                fired.push(item);
            }
            if kind == ListenerKind::Completion {
                // Safety: the handler was just taken above (the cell is now
                // empty), and `Completion` nodes are reclaimed here and only
                // here, still under the lock — a concurrent `dispose()` on
                // this same node races this removal, not this free, and
                // `remove_listener`'s own lock serializes the two so it can
                // never observe `ptr` after this point.
                drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            }
            // `Child` nodes are never freed here: see `install_child`.
            // `Suspension` nodes are never heap-owned by this list at all.
        }
        fired
    }

    fn invoke_fired(items: Vec<Fired>, cause: Option<&Cause>) {
        for item in items {
            match item {
                Fired::Invoke(handler) => handler(cause),
                Fired::Child(action) => action(cause),
                Fired::Wake(waker) => waker.wake(),
            }
        }
    }
}

impl<T> JobInner<T> {
    fn remove_listener(&self, ptr: NonNull<ListenerNode>) -> bool {
        let mut listeners = self.listeners.lock();
        unsafe { listeners.remove(ptr) }.is_some()
    }
}

/// The resolved outcome of a terminated Job, as produced by
/// [`Job::await_`]'s future (§4.5 SuspensionBridge, §4.4 `await`).
pub enum AwaitOutcome<T> {
    /// The Job completed normally with this value.
    Value(T),
    /// The Job was cancelled.
    Cancelled(Cause),
    /// The Job completed exceptionally (a non-cancellation failure).
    Failed(Cause),
}

impl<T: Clone + Send + 'static> Job<T> {
    pub(crate) fn await_outcome(&self) -> AwaitOutcome<T> {
        let snapshot = self.inner.state.load(Ordering::Acquire);
        match snapshot.tag() {
            Tag::Value => {
                let value = self.inner.terminal.with(|t| unsafe {
                    match &*t {
                        Some(Terminal::Value(v)) => v.clone(),
                        _ => unreachable!("Value tag without a value"),
                    }
                });
                AwaitOutcome::Value(value)
            }
            Tag::Failed => {
                let cause = self.inner.terminal.with(|t| unsafe {
                    match &*t {
                        Some(Terminal::Failed(c)) => c.clone(),
                        _ => unreachable!("Failed tag without a cause"),
                    }
                });
                AwaitOutcome::Failed(cause)
            }
            Tag::Cancelled => {
                let cause = self
                    .inner
                    .cancel_cause
                    .with(|c| unsafe { (*c).clone() })
                    .expect("Cancelled without a cause");
                AwaitOutcome::Cancelled(cause)
            }
            _ => panic!("await_outcome called before the job reached a terminal state"),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Job<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle returned by [`Job::invoke_on_completion`]/[`Job::attach_child`]
/// that disposes (removes) the installed listener. Idempotent (§8).
#[derive(Clone)]
pub struct DisposableHandle {
    inner: Arc<DisposeInner>,
}

struct DisposeInner {
    disposed: core::sync::atomic::AtomicBool,
    action: UnsafeCell<Option<Box<dyn FnOnce() + Send>>>,
}

// Safety: `action` is only ever taken by the single caller that wins the
// `disposed` compare-and-swap below.
unsafe impl Send for DisposeInner {}
// Safety: see above.
unsafe impl Sync for DisposeInner {}

impl DisposableHandle {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(DisposeInner {
                disposed: core::sync::atomic::AtomicBool::new(false),
                action: UnsafeCell::new(Some(Box::new(action))),
            }),
        }
    }

    pub(crate) fn noop() -> Self {
        Self::new(|| {})
    }

    /// Remove the installed listener. Safe to call more than once, including
    /// concurrently from multiple clones of this handle.
    pub fn dispose(&self) {
        if self
            .inner
            .disposed
            .swap(true, core::sync::atomic::Ordering::AcqRel)
        {
            return;
        }
        let action = self.inner.action.with_mut(|a| unsafe { (*a).take() });
        if let Some(action) = action {
            action();
        }
    }
}
