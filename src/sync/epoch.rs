// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Refresh epochs.
//!
//! The document stamps a segment with a fresh epoch every time its content
//! changes. The synchronizer remembers the epoch it last pushed and only
//! compares; it never inspects content to decide whether work is needed.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Opaque content version issued from a process-wide counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch(u64);

impl Epoch {
    /// Issue a new epoch, strictly greater than every earlier one
    pub fn issue() -> Self {
        Epoch(NEXT_EPOCH.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}
