// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The Job's atomic state word (§4.1 StateCell).
//!
//! One `AtomicUsize` bitfield packs the coarse tag from §3's state space plus
//! the two flags needed while `Finishing`. Payloads that don't fit in a
//! bitfield (a [`Cause`](crate::cause::Cause), a value `T`) live in
//! `UnsafeCell` slots on `JobInner`, written before the word that publishes
//! them and read only after observing that word — the same discipline
//! `kasync::task::state::State` uses for its `join_waker` slot. There is no
//! `OpDescriptor`/helping protocol: every transition here is a single CAS
//! (§4.1 implementation note).

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

mycelium_bitfield::enum_from_bits! {
    /// The coarse shape of a Job's state (§3), independent of listeners.
    #[derive(Debug, Eq, PartialEq)]
    enum Tag<u8> {
        /// `EmptyNew` / `ListNew` — not yet started.
        New = 0b000,
        /// `EmptyActive` / `ListActive` — started, running.
        Active = 0b001,
        /// `Finishing` — cancelling and/or awaiting child quiescence.
        Finishing = 0b010,
        /// Terminal: cancelled, with a cause in `JobInner::cause`.
        Cancelled = 0b011,
        /// Terminal: completed exceptionally, with a cause in `JobInner::cause`.
        Failed = 0b100,
        /// Terminal: completed normally, with a value in `JobInner::value`.
        Value = 0b101,
    }
}

impl Tag {
    fn is_terminal(self) -> bool {
        matches!(self, Tag::Cancelled | Tag::Failed | Tag::Value)
    }
}

mycelium_bitfield::bitfield! {
    /// A snapshot of a Job's current state word.
    #[derive(Eq, PartialEq)]
    pub(crate) struct Snapshot<usize> {
        /// The coarse state tag.
        const TAG: Tag;
        /// Set once a cancellation cause has been published into
        /// `JobInner::cause`, while `TAG == Finishing`. Meaningless otherwise.
        pub(crate) const HAS_CAUSE: bool;
        /// Set while a `makeCompleting` proposal is waiting on child
        /// quiescence, while `TAG == Finishing`. Meaningless otherwise.
        pub(crate) const COMPLETING: bool;
        const _RESERVED = ..;
    }
}

impl Snapshot {
    pub(crate) fn tag(self) -> Tag {
        self.get(Snapshot::TAG)
    }

    pub(crate) fn is_terminal(self) -> bool {
        self.tag().is_terminal()
    }

    pub(crate) fn is_cancelling_or_cancelled(self) -> bool {
        match self.tag() {
            Tag::Cancelled => true,
            Tag::Finishing => self.get(Snapshot::HAS_CAUSE),
            _ => false,
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("tag", &self.tag())
            .field("has_cause", &self.get(Snapshot::HAS_CAUSE))
            .field("completing", &self.get(Snapshot::COMPLETING))
            .finish()
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The single atomic slot backing a Job's state (§4.1).
pub(crate) struct StateCell {
    val: AtomicUsize,
}

impl StateCell {
    pub(crate) fn new(active: bool) -> Self {
        let mut snap = Snapshot(0);
        snap.set(Snapshot::TAG, if active { Tag::Active } else { Tag::New });
        Self {
            val: AtomicUsize::new(snap.0),
        }
    }

    pub(crate) fn load(&self, ordering: Ordering) -> Snapshot {
        Snapshot(self.val.load(ordering))
    }

    /// Attempt `transition`, retrying on CAS contention until either it
    /// reports no change or the CAS succeeds. `transition` MUST be pure aside
    /// from reading/writing the `&mut Snapshot` it is given, since it may be
    /// invoked more than once under contention (§4.1, §5 progress).
    pub(crate) fn transition<T>(&self, mut transition: impl FnMut(&mut Snapshot) -> T) -> T {
        let mut current = self.load(Ordering::Acquire);
        loop {
            let mut next = current;
            let res = transition(&mut next);

            if current.0 == next.0 {
                return res;
            }

            match self.val.compare_exchange_weak(
                current.0,
                next.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return res,
                Err(actual) => current = Snapshot(actual),
            }
        }
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}
