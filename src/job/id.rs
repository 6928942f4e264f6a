// Copyright 2025 k23 contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::loom::sync::atomic::{AtomicU64, Ordering};
use core::fmt;

/// An opaque ID that uniquely identifies a [`Job`](crate::Job) relative to all
/// other currently live Jobs.
///
/// # Notes
///
/// - IDs are unique relative to other *currently live* Jobs. Once a Job is
///   dropped, the same ID may be reused by a later one.
/// - IDs are *not* sequential in any way that should be relied upon beyond
///   uniqueness; they carry no information about spawn order or hierarchy.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Id(u64);

impl Id {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
