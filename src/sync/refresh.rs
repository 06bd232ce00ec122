// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! The synchronization pass.
//!
//! Keeps the epoch each segment had when it was last pushed and, per pass,
//! pushes only what moved: removals first, then content changes, then
//! additions. A push the engine refuses is retried on the next pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{CompositionMapper, Epoch, PendingChanges};
use crate::document::{Composition, SegmentId, SegmentSnapshot};
use crate::engine::{BufferKey, MappedEventBuffer, SequencerEngine};

/// What a pass pushed to the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub removed: Vec<SegmentId>,
    pub modified: Vec<SegmentId>,
    pub added: Vec<SegmentId>,
    /// Segments made stale by a trigger segment they use
    pub trigger_stale: BTreeSet<SegmentId>,
    pub pseudo_refreshed: Vec<BufferKey>,
    /// Pushes the engine refused
    pub failed: usize,
}

impl SyncReport {
    /// Successful engine pushes of any kind
    pub fn pushes(&self) -> usize {
        self.removed.len() + self.modified.len() + self.added.len() + self.pseudo_refreshed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pushes() == 0 && self.failed == 0
    }

    pub(crate) fn merge(&mut self, other: SyncReport) {
        self.removed.extend(other.removed);
        self.modified.extend(other.modified);
        self.added.extend(other.added);
        self.trigger_stale.extend(other.trigger_stale);
        self.pseudo_refreshed.extend(other.pseudo_refreshed);
        self.failed += other.failed;
    }
}

/// Mirrors the document's segments into the engine
pub struct SegmentSynchronizer {
    engine: Arc<dyn SequencerEngine>,
    mapper: CompositionMapper,
    /// Epoch of each segment as last pushed
    segments: BTreeMap<SegmentId, Epoch>,
    /// Epoch of each trigger segment as last seen
    triggers: BTreeMap<SegmentId, Epoch>,
    retry_modified: BTreeSet<SegmentId>,
    retry_added: BTreeSet<SegmentId>,
    retry_removed: BTreeSet<SegmentId>,
}

impl SegmentSynchronizer {
    pub fn new(engine: Arc<dyn SequencerEngine>) -> Self {
        Self {
            engine,
            mapper: CompositionMapper::new(),
            segments: BTreeMap::new(),
            triggers: BTreeMap::new(),
            retry_modified: BTreeSet::new(),
            retry_added: BTreeSet::new(),
            retry_removed: BTreeSet::new(),
        }
    }

    pub fn mapper(&self) -> &CompositionMapper {
        &self.mapper
    }

    /// Epoch last pushed for a segment
    pub fn epoch_of(&self, id: SegmentId) -> Option<Epoch> {
        self.segments.get(&id).copied()
    }

    pub fn tracked_count(&self) -> usize {
        self.segments.len()
    }

    /// Drop everything and push the whole composition again
    pub fn reset(&mut self, composition: &dyn Composition) -> SyncReport {
        debug!("resetting composition mapper");
        self.engine.composition_about_to_be_deleted();
        self.mapper.clear();
        self.segments.clear();
        self.triggers.clear();
        self.retry_modified.clear();
        self.retry_added.clear();
        self.retry_removed.clear();

        let mut report = SyncReport {
            pseudo_refreshed: self.refresh_pseudo_segments(composition),
            ..SyncReport::default()
        };
        for segment in composition.segments() {
            self.add_segment(composition, &segment, &mut report);
        }
        for trigger in composition.trigger_segments() {
            self.triggers.insert(trigger.id, trigger.epoch);
        }
        report
    }

    /// One synchronization pass over `pending`
    pub fn run_pass(&mut self, composition: &dyn Composition, pending: &PendingChanges) -> SyncReport {
        let mut report = SyncReport {
            trigger_stale: self.trigger_fan_out(composition),
            ..SyncReport::default()
        };

        // removals: the ids are keys only, the segments are gone
        let mut removed: BTreeSet<SegmentId> = std::mem::take(&mut self.retry_removed);
        removed.extend(pending.removed.iter().copied());
        report.merge(self.remove_segments(removed));

        let live: BTreeMap<SegmentId, SegmentSnapshot> = composition
            .segments()
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        // content changes on segments already pushed
        let retry = std::mem::take(&mut self.retry_modified);
        let tracked: Vec<(SegmentId, Epoch)> = self.segments.iter().map(|(k, v)| (*k, *v)).collect();
        for (id, last) in tracked {
            let Some(segment) = live.get(&id) else {
                continue;
            };
            let stale = segment.epoch != last
                || report.trigger_stale.contains(&id)
                || pending.dirty.contains(&id)
                || retry.contains(&id);
            if !stale {
                continue;
            }
            let buffer = self.mapper.map_segment(composition, segment);
            match self.engine.segment_modified(buffer) {
                Ok(()) => {
                    self.segments.insert(id, segment.epoch);
                    report.modified.push(id);
                }
                Err(e) => {
                    warn!(segment = id.0, error = %e, "segment update refused, will retry");
                    self.retry_modified.insert(id);
                    report.failed += 1;
                }
            }
        }

        // additions last
        let mut added: BTreeSet<SegmentId> = std::mem::take(&mut self.retry_added);
        added.extend(pending.added.iter().copied());
        for id in added {
            if self.segments.contains_key(&id) {
                continue;
            }
            if let Some(segment) = live.get(&id) {
                self.add_segment(composition, segment, &mut report);
            }
        }

        if !report.is_empty() {
            debug!(
                removed = report.removed.len(),
                modified = report.modified.len(),
                added = report.added.len(),
                failed = report.failed,
                "synchronization pass"
            );
        }
        report
    }

    /// Withdraw buffers for removed segments.
    ///
    /// A buffer stays mapped until the engine accepts its removal, so a
    /// refused removal is retried on the next pass.
    pub fn remove_segments(&mut self, removed: BTreeSet<SegmentId>) -> SyncReport {
        let mut report = SyncReport::default();
        for id in removed {
            self.segments.remove(&id);
            self.retry_modified.remove(&id);
            self.retry_added.remove(&id);
            if !self.mapper.is_mapped(id) {
                continue;
            }
            match self.engine.segment_removed(BufferKey::Segment(id)) {
                Ok(()) => {
                    self.mapper.unmap_segment(id);
                    self.retry_removed.remove(&id);
                    report.removed.push(id);
                }
                Err(e) => {
                    warn!(segment = id.0, error = %e, "segment removal refused, will retry");
                    self.retry_removed.insert(id);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Push every tracked segment again
    pub fn refresh_all_segments(&mut self, composition: &dyn Composition) -> SyncReport {
        self.refresh_segments_except(composition, &BTreeSet::new())
    }

    /// Push every tracked segment not in `fresh` again. Segments already
    /// pushed earlier in the same pass go in `fresh`.
    pub fn refresh_segments_except(
        &mut self,
        composition: &dyn Composition,
        fresh: &BTreeSet<SegmentId>,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let ids: Vec<SegmentId> =
            self.segments.keys().copied().filter(|id| !fresh.contains(id)).collect();
        for id in ids {
            let Some(segment) = composition.segment(id) else {
                continue;
            };
            let buffer = self.mapper.map_segment(composition, &segment);
            match self.engine.segment_modified(buffer) {
                Ok(()) => {
                    self.segments.insert(id, segment.epoch);
                    report.modified.push(id);
                }
                Err(e) => {
                    warn!(segment = id.0, error = %e, "segment refresh refused, will retry");
                    self.retry_modified.insert(id);
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn refresh_metronome(&mut self, composition: &dyn Composition) -> bool {
        let existed = self.mapper.has_pseudo(BufferKey::Metronome);
        let buffer = self.mapper.map_metronome(composition);
        self.push_pseudo(buffer, existed)
    }

    pub fn refresh_tempo(&mut self, composition: &dyn Composition) -> bool {
        let existed = self.mapper.has_pseudo(BufferKey::Tempo);
        let buffer = self.mapper.map_tempo(composition);
        self.push_pseudo(buffer, existed)
    }

    pub fn refresh_time_signatures(&mut self, composition: &dyn Composition) -> bool {
        let existed = self.mapper.has_pseudo(BufferKey::TimeSignature);
        let buffer = self.mapper.map_time_signatures(composition);
        self.push_pseudo(buffer, existed)
    }

    /// Refresh metronome, tempo and time signature buffers
    pub fn refresh_pseudo_segments(&mut self, composition: &dyn Composition) -> Vec<BufferKey> {
        let mut refreshed = Vec::new();
        if self.refresh_metronome(composition) {
            refreshed.push(BufferKey::Metronome);
        }
        if self.refresh_tempo(composition) {
            refreshed.push(BufferKey::Tempo);
        }
        if self.refresh_time_signatures(composition) {
            refreshed.push(BufferKey::TimeSignature);
        }
        refreshed
    }

    fn push_pseudo(&self, buffer: Arc<MappedEventBuffer>, existed: bool) -> bool {
        let key = buffer.key;
        let result = if existed {
            self.engine.segment_modified(buffer)
        } else {
            self.engine.segment_added(buffer)
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(?key, error = %e, "pseudo-segment push refused");
                false
            }
        }
    }

    fn add_segment(&mut self, composition: &dyn Composition, segment: &SegmentSnapshot, report: &mut SyncReport) {
        let buffer = self.mapper.map_segment(composition, segment);
        match self.engine.segment_added(buffer) {
            Ok(()) => {
                self.segments.insert(segment.id, segment.epoch);
                report.added.push(segment.id);
            }
            Err(e) => {
                warn!(segment = segment.id.0, error = %e, "segment add refused, will retry");
                self.mapper.unmap_segment(segment.id);
                self.retry_added.insert(segment.id);
                report.failed += 1;
            }
        }
    }

    /// Segments whose trigger segments changed since the last pass.
    /// Trigger segments seen for the first time count as changed.
    fn trigger_fan_out(&mut self, composition: &dyn Composition) -> BTreeSet<SegmentId> {
        let mut stale = BTreeSet::new();
        let mut seen = BTreeMap::new();
        for trigger in composition.trigger_segments() {
            if self.triggers.get(&trigger.id) != Some(&trigger.epoch) {
                stale.extend(trigger.references.iter().copied());
            }
            seen.insert(trigger.id, trigger.epoch);
        }
        self.triggers = seen;
        stale
    }
}
