// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Callback interfaces the document notifies.
//!
//! Each interface covers one family of notifications and is registered with
//! the document on its own. Implementations must not call back into the
//! document; they only record what happened.

use super::{SegmentId, SegmentKind, TrackId, TrackSnapshot};
use crate::timing::TimeT;

/// A property of a live segment that changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentChange {
    Repeat(bool),
    RepeatEnd(TimeT),
    EventsTiming { kind: SegmentKind },
    Transpose(i32),
    Track { track: TrackId, kind: SegmentKind },
    EndMarker,
    Instrument,
}

impl SegmentChange {
    /// Changes that move audio between tracks or in time
    pub fn needs_track_remap(&self) -> bool {
        matches!(
            self,
            SegmentChange::EventsTiming { kind: SegmentKind::Audio }
                | SegmentChange::Track { kind: SegmentKind::Audio, .. }
        )
    }
}

pub trait SegmentLifecycleListener: Send + Sync {
    fn segment_added(&self, segment: SegmentId);
    /// The segment is already gone; `segment` is only a key
    fn segment_removed(&self, segment: SegmentId);
    fn segment_changed(&self, segment: SegmentId, change: SegmentChange);
    /// Segment content was edited (its epoch moved)
    fn segment_content_changed(&self, segment: SegmentId);
}

pub trait TrackLifecycleListener: Send + Sync {
    fn tracks_added(&self, tracks: &[TrackSnapshot]);
    fn track_changed(&self, track: &TrackSnapshot);
    fn tracks_deleted(&self, tracks: &[TrackId]);
    fn selected_track_changed(&self, track: TrackId);
}

pub trait TempoListener: Send + Sync {
    fn tempo_changed(&self);
    fn time_signature_changed(&self);
    fn end_marker_changed(&self, shorten: bool);
    /// Metronome mute flags changed in the composition
    fn metronome_changed(&self);
}
