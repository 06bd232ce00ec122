// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Queue of document changes waiting for the next synchronization pass.
//!
//! The document calls the listener methods as edits happen. They only record
//! intent and request a pass; the pass itself runs later, once, however many
//! requests arrived in between.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::control::ControlBlock;
use crate::document::{
    SegmentChange, SegmentId, SegmentLifecycleListener, TempoListener, TrackId,
    TrackLifecycleListener, TrackSnapshot,
};

/// Everything recorded since the last pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingChanges {
    pub added: BTreeSet<SegmentId>,
    pub removed: BTreeSet<SegmentId>,
    /// Segments to push even if their epoch did not move
    pub dirty: BTreeSet<SegmentId>,
    pub remap_tracks: bool,
    pub tempo_changed: bool,
    pub time_signature_changed: bool,
    /// `Some(shorten)` when the end marker moved
    pub end_marker_changed: Option<bool>,
    pub metronome_changed: bool,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self == &PendingChanges::default()
    }
}

/// Listener side of the synchronizer
pub struct ChangeQueue {
    pending: Mutex<PendingChanges>,
    pass_requested: AtomicBool,
    notify: Notify,
    control: Arc<ControlBlock>,
}

impl ChangeQueue {
    pub fn new(control: Arc<ControlBlock>) -> Self {
        Self {
            pending: Mutex::new(PendingChanges::default()),
            pass_requested: AtomicBool::new(false),
            notify: Notify::new(),
            control,
        }
    }

    /// Ask for a pass. Returns `false` if one was already pending.
    pub fn request_pass(&self) -> bool {
        let first = !self.pass_requested.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_one();
        }
        first
    }

    pub fn is_pass_requested(&self) -> bool {
        self.pass_requested.load(Ordering::Acquire)
    }

    /// Wait until a pass has been requested.
    ///
    /// A wake-up left over from a request already claimed with
    /// `take_request` is ignored.
    pub async fn pass_requested(&self) {
        loop {
            if self.is_pass_requested() {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Claim the pending request; `true` if there was one
    pub fn take_request(&self) -> bool {
        self.pass_requested.swap(false, Ordering::AcqRel)
    }

    /// Take everything recorded so far
    pub fn take_pending(&self) -> PendingChanges {
        match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => {
                warn!("change queue lock poisoned, dropping pending changes");
                PendingChanges::default()
            }
        }
    }

    /// Take only the pending removals
    pub fn take_removed(&self) -> BTreeSet<SegmentId> {
        match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut pending.removed),
            Err(_) => {
                warn!("change queue lock poisoned, dropping pending removals");
                BTreeSet::new()
            }
        }
    }

    fn record(&self, f: impl FnOnce(&mut PendingChanges)) {
        match self.pending.lock() {
            Ok(mut pending) => f(&mut pending),
            Err(_) => {
                warn!("change queue lock poisoned, change not recorded");
                return;
            }
        }
        self.request_pass();
    }
}

impl SegmentLifecycleListener for ChangeQueue {
    fn segment_added(&self, segment: SegmentId) {
        debug!(segment = segment.0, "segment added");
        self.record(|p| {
            p.added.insert(segment);
        });
    }

    fn segment_removed(&self, segment: SegmentId) {
        debug!(segment = segment.0, "segment removed");
        self.record(|p| {
            p.added.remove(&segment);
            p.dirty.remove(&segment);
            p.removed.insert(segment);
        });
    }

    fn segment_changed(&self, segment: SegmentId, change: SegmentChange) {
        self.record(|p| {
            p.dirty.insert(segment);
            if change.needs_track_remap() {
                p.remap_tracks = true;
            }
        });
    }

    fn segment_content_changed(&self, _segment: SegmentId) {
        // the epoch moved; the pass will notice
        self.request_pass();
    }
}

impl TrackLifecycleListener for ChangeQueue {
    fn tracks_added(&self, tracks: &[TrackSnapshot]) {
        for track in tracks {
            self.control.update_track_data(track);
        }
        self.record(|p| p.remap_tracks = true);
    }

    fn track_changed(&self, track: &TrackSnapshot) {
        self.control.update_track_data(track);
        self.record(|p| p.remap_tracks = true);
    }

    fn tracks_deleted(&self, tracks: &[TrackId]) {
        for &track in tracks {
            self.control.set_track_deleted(track, true);
        }
    }

    fn selected_track_changed(&self, track: TrackId) {
        self.control.set_selected_track(track);
    }
}

impl TempoListener for ChangeQueue {
    fn tempo_changed(&self) {
        self.record(|p| p.tempo_changed = true);
    }

    fn time_signature_changed(&self) {
        self.record(|p| p.time_signature_changed = true);
    }

    fn end_marker_changed(&self, shorten: bool) {
        self.record(|p| {
            let earlier = p.end_marker_changed.unwrap_or(false);
            p.end_marker_changed = Some(earlier || shorten);
        });
    }

    fn metronome_changed(&self) {
        self.record(|p| p.metronome_changed = true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{InstrumentInfo, MemoryStudio, SegmentKind};
    use std::time::Duration;

    fn queue() -> ChangeQueue {
        let studio = MemoryStudio::new();
        studio.add_instrument(InstrumentInfo::midi(2000, 0, 0));
        ChangeQueue::new(Arc::new(ControlBlock::new(Arc::new(studio))))
    }

    #[test]
    fn test_requests_coalesce() {
        let q = queue();
        assert!(q.request_pass());
        assert!(!q.request_pass());
        assert!(q.take_request());
        assert!(!q.take_request());
    }

    #[test]
    fn test_removal_cancels_pending_add() {
        let q = queue();
        let id = SegmentId::allocate();
        q.segment_added(id);
        q.segment_changed(id, SegmentChange::Repeat(true));
        q.segment_removed(id);

        let pending = q.take_pending();
        assert!(pending.added.is_empty());
        assert!(pending.dirty.is_empty());
        assert!(pending.removed.contains(&id));
        assert!(q.take_pending().is_empty());
    }

    #[test]
    fn test_audio_move_requests_remap() {
        let q = queue();
        let id = SegmentId::allocate();
        q.segment_changed(id, SegmentChange::Track { track: 1, kind: SegmentKind::Internal });
        assert!(!q.take_pending().remap_tracks);
        q.segment_changed(id, SegmentChange::Track { track: 1, kind: SegmentKind::Audio });
        assert!(q.take_pending().remap_tracks);
    }

    #[test]
    fn test_track_changes_reach_control_block() {
        let q = queue();
        let mut track = TrackSnapshot::new(2, 2000);
        track.armed = true;
        q.tracks_added(&[track]);
        assert!(q.control.is_track_armed(2));
        q.tracks_deleted(&[2]);
        assert!(q.control.is_track_deleted(2));
        q.selected_track_changed(2);
        assert_eq!(q.control.selected_track(), 2);
    }

    #[test]
    fn test_end_marker_shorten_is_sticky() {
        let q = queue();
        q.end_marker_changed(true);
        q.end_marker_changed(false);
        assert_eq!(q.take_pending().end_marker_changed, Some(true));
    }

    #[tokio::test]
    async fn test_pass_signal_wakes_waiter() {
        let q = Arc::new(queue());
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.pass_requested().await })
        };
        q.tempo_changed();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter timed out")
            .unwrap();
        assert!(q.take_pending().tempo_changed);
    }

    #[tokio::test]
    async fn test_claimed_request_does_not_wake_waiter() {
        let q = Arc::new(queue());
        q.request_pass();
        assert!(q.take_request());

        // the stored wake-up is stale
        let early = tokio::time::timeout(Duration::from_millis(50), q.pass_requested()).await;
        assert!(early.is_err());

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.pass_requested().await })
        };
        q.request_pass();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter timed out")
            .unwrap();
    }

    #[test]
    fn test_poisoned_queue_degrades() {
        let q = Arc::new(queue());
        let poisoner = {
            let q = q.clone();
            std::thread::spawn(move || {
                let _held = q.pending.lock().unwrap();
                panic!("poison the change queue");
            })
        };
        assert!(poisoner.join().is_err());

        q.segment_removed(SegmentId::allocate());
        assert!(q.take_removed().is_empty());
        assert!(q.take_pending().is_empty());
    }
}
