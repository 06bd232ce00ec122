// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Rendered event buffers, one per segment plus the pseudo-segments.

use std::collections::HashMap;
use std::sync::Arc;

use crate::document::{Composition, SegmentId, SegmentSnapshot};
use crate::engine::{BufferKey, MappedEventBuffer};

/// Buffers the engine was last given, by key
#[derive(Debug, Default)]
pub struct CompositionMapper {
    segments: HashMap<SegmentId, Arc<MappedEventBuffer>>,
    metronome: Option<Arc<MappedEventBuffer>>,
    tempo: Option<Arc<MappedEventBuffer>>,
    time_signatures: Option<Arc<MappedEventBuffer>>,
}

impl CompositionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a segment and keep the buffer
    pub fn map_segment(
        &mut self,
        composition: &dyn Composition,
        segment: &SegmentSnapshot,
    ) -> Arc<MappedEventBuffer> {
        let buffer = Arc::new(MappedEventBuffer {
            key: BufferKey::Segment(segment.id),
            track: Some(segment.track),
            epoch: Some(segment.epoch),
            events: composition.render_segment(segment.id),
        });
        self.segments.insert(segment.id, buffer.clone());
        buffer
    }

    /// Forget a segment's buffer. Takes the key only.
    pub fn unmap_segment(&mut self, id: SegmentId) -> Option<Arc<MappedEventBuffer>> {
        self.segments.remove(&id)
    }

    pub fn segment_buffer(&self, id: SegmentId) -> Option<&Arc<MappedEventBuffer>> {
        self.segments.get(&id)
    }

    pub fn is_mapped(&self, id: SegmentId) -> bool {
        self.segments.contains_key(&id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn map_metronome(&mut self, composition: &dyn Composition) -> Arc<MappedEventBuffer> {
        let buffer = Arc::new(MappedEventBuffer::new(
            BufferKey::Metronome,
            composition.render_metronome(),
        ));
        self.metronome = Some(buffer.clone());
        buffer
    }

    pub fn map_tempo(&mut self, composition: &dyn Composition) -> Arc<MappedEventBuffer> {
        let buffer = Arc::new(MappedEventBuffer::new(
            BufferKey::Tempo,
            composition.render_tempo_map(),
        ));
        self.tempo = Some(buffer.clone());
        buffer
    }

    pub fn map_time_signatures(&mut self, composition: &dyn Composition) -> Arc<MappedEventBuffer> {
        let buffer = Arc::new(MappedEventBuffer::new(
            BufferKey::TimeSignature,
            composition.render_time_signatures(),
        ));
        self.time_signatures = Some(buffer.clone());
        buffer
    }

    /// Whether a pseudo-segment buffer exists yet
    pub fn has_pseudo(&self, key: BufferKey) -> bool {
        match key {
            BufferKey::Metronome => self.metronome.is_some(),
            BufferKey::Tempo => self.tempo.is_some(),
            BufferKey::TimeSignature => self.time_signatures.is_some(),
            BufferKey::Segment(id) => self.is_mapped(id),
        }
    }

    pub fn metronome(&self) -> Option<&Arc<MappedEventBuffer>> {
        self.metronome.as_ref()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.metronome = None;
        self.tempo = None;
        self.time_signatures = None;
    }
}
