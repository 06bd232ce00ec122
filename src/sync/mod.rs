// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Segment synchronization between the document and the engine.
//!
//! This module provides:
//! - Refresh epochs stamped on segment content
//! - A change queue the document notifies, coalescing pass requests
//! - The per-segment buffer mapper
//! - The synchronization pass itself

pub mod epoch;
pub mod mapper;
pub mod queue;
pub mod refresh;

pub use epoch::Epoch;
pub use mapper::CompositionMapper;
pub use queue::{ChangeQueue, PendingChanges};
pub use refresh::{SegmentSynchronizer, SyncReport};
