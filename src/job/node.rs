// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The node type linked into a Job's listener list (§4.3).
//!
//! Grounded on `kasync::time::timer::entry::Entry`: an intrusive
//! `cordyceps::list::Links` node addressed by `NonNull<Self>`, carrying a
//! [`WaitCell`] for the suspension case. Plain completion handlers instead
//! carry a one-shot boxed closure; child handlers carry a re-invocable `Arc`
//! closure, since `cancel_children` (§4.4) may fire one any number of times
//! without retiring it.

use crate::cause::Cause;
use crate::loom::cell::UnsafeCell;
use crate::loom::sync::Arc;
use crate::sync::wait_cell::WaitCell;
use alloc::boxed::Box;
use core::marker::PhantomPinned;
use core::mem::offset_of;
use core::ptr::NonNull;
use core::task::Waker;
use cordyceps::{Linked, list};

/// What kind of listener a [`ListenerNode`] represents; used to filter the
/// shared list without maintaining a second, parallel list (§4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListenerKind {
    /// A plain handler installed via `invoke_on_completion`.
    Completion,
    /// A child Job attached via `attach_child`; propagates cancellation.
    Child,
    /// A suspended `join`/`await` continuation.
    Suspension,
}

type Handler = Box<dyn FnOnce(Option<&Cause>) + Send + 'static>;
type ChildAction = Arc<dyn Fn(Option<&Cause>) + Send + Sync + 'static>;

enum Payload {
    Completion(UnsafeCell<Option<Handler>>),
    Child(ChildAction),
    Suspension(WaitCell),
}

/// What firing a node hands back to the caller, to be acted on only after
/// the listener-list lock has been released (§4.4 "collect under lock,
/// invoke after unlock").
pub(crate) enum Fired {
    /// A one-shot completion handler, already taken out of its node.
    Invoke(Handler),
    /// A child-cancellation action; the node it came from keeps its own copy
    /// since `Child` nodes are re-invocable (see [`ListenerNode::child_action`]).
    Child(ChildAction),
    /// A suspended waiter's `Waker`, already taken out of its `WaitCell`.
    Wake(Waker),
}

/// A node linked into a Job's listener list.
///
/// Completion/child nodes are heap-allocated (`Box`) for the duration they
/// are linked. Suspension nodes live inline in the `join`/`await` future's
/// stack frame and are pinned there; the list never owns their storage.
pub(crate) struct ListenerNode {
    links: list::Links<ListenerNode>,
    /// Fires at Cancelling-phase entry rather than only at terminal (§4.3).
    on_cancelling: bool,
    payload: Payload,
    _pin: PhantomPinned,
}

impl ListenerNode {
    pub(crate) fn new_completion(on_cancelling: bool, handler: Handler) -> Self {
        Self {
            links: list::Links::new(),
            on_cancelling,
            payload: Payload::Completion(UnsafeCell::new(Some(handler))),
            _pin: PhantomPinned,
        }
    }

    /// A `Child`-kind node always fires at the cancelling-phase transition
    /// (that's the entire point of `attach_child`), so `on_cancelling` isn't
    /// parameterized here.
    pub(crate) fn new_child(action: ChildAction) -> Self {
        Self {
            links: list::Links::new(),
            on_cancelling: true,
            payload: Payload::Child(action),
            _pin: PhantomPinned,
        }
    }

    pub(crate) fn new_suspension() -> Self {
        Self {
            links: list::Links::new(),
            on_cancelling: false,
            payload: Payload::Suspension(WaitCell::new()),
            _pin: PhantomPinned,
        }
    }

    pub(crate) fn kind(&self) -> ListenerKind {
        match &self.payload {
            Payload::Completion(_) => ListenerKind::Completion,
            Payload::Child(_) => ListenerKind::Child,
            Payload::Suspension(_) => ListenerKind::Suspension,
        }
    }

    pub(crate) fn fires_on_cancelling(&self) -> bool {
        self.on_cancelling
    }

    /// The `WaitCell` a suspension node parks a `Waker` in. Only valid for
    /// [`ListenerKind::Suspension`] nodes.
    pub(crate) fn waiter(&self) -> &WaitCell {
        match &self.payload {
            Payload::Suspension(waiter) => waiter,
            _ => unreachable!("waiter() called on a non-suspension node"),
        }
    }

    /// A read-only peek at a `Child` node's cancellation action, for
    /// `cancel_children` (§4.4): cloning the `Arc` neither consumes nor
    /// unlinks the node, so the listener stays attached for the real
    /// cancelling-phase notification that follows later. `None` for any
    /// other kind.
    pub(crate) fn child_action(&self) -> Option<ChildAction> {
        match &self.payload {
            Payload::Child(action) => Some(action.clone()),
            _ => None,
        }
    }

    /// Extract what's needed to notify this node, while the caller still
    /// holds the listener-list lock (the node must already be unlinked by
    /// the caller before calling this). Returns `None` if there is nothing
    /// left to do (a `Completion` node whose handler already fired, or a
    /// `Suspension` node with no waker currently registered).
    ///
    /// For `Completion`/`Child` nodes this just hands back an owned
    /// closure/`Arc` — the node's own storage isn't touched again after this
    /// call returns, so it's safe to free a `Completion` node immediately
    /// (still under the lock). A `Child` node is never freed here; see
    /// `attach_child`/DESIGN.md for why its node's memory is reclaimed only
    /// by disposing its handle, not by firing it.
    ///
    /// For `Suspension` nodes this takes the registered `Waker` out of the
    /// `WaitCell` without waking it yet. The node's backing storage is the
    /// `join`/`await` future's own stack frame, which a concurrent
    /// `PinnedDrop` reclaims the instant it observes the node unlinked —
    /// nothing may dereference the node again once the lock is released, so
    /// the actual `Waker::wake()` call must happen only after unlock, on the
    /// extracted `Waker` alone (mirroring
    /// `kasync::sync::wait_queue::wake_locked`, which returns `Option<Waker>`
    /// for the same reason).
    pub(crate) fn take_fired(&self) -> Option<Fired> {
        match &self.payload {
            Payload::Completion(cell) => {
                let handler = cell.with_mut(|h| unsafe { (*h).take() })?;
                Some(Fired::Invoke(handler))
            }
            Payload::Child(action) => Some(Fired::Child(action.clone())),
            Payload::Suspension(waiter) => waiter.take_waker_to_wake().map(Fired::Wake),
        }
    }
}

// Safety: nodes are only ever linked into a list while protected by the
// owning Job's listener mutex, and the payload is only accessed through that
// same discipline (or, for suspension nodes, exclusively by the pinned
// future that owns them, synchronized through `WaitCell`'s own atomics).
unsafe impl Send for ListenerNode {}

// Safety: `Entry`-style intrusive node; the list stores a bare `NonNull`, so
// ownership and lifetime are managed by the caller (the listener mutex for
// heap nodes, the future's stack frame for suspension nodes), not by `List`
// itself.
unsafe impl Linked<list::Links<ListenerNode>> for ListenerNode {
    type Handle = NonNull<ListenerNode>;

    fn into_ptr(r: Self::Handle) -> NonNull<ListenerNode> {
        r
    }

    unsafe fn from_ptr(ptr: NonNull<ListenerNode>) -> Self::Handle {
        ptr
    }

    unsafe fn links(ptr: NonNull<ListenerNode>) -> NonNull<list::Links<ListenerNode>> {
        ptr.map_addr(|addr| {
            let offset = offset_of!(ListenerNode, links);
            addr.checked_add(offset).unwrap()
        })
        .cast()
    }
}
