// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! The document model as seen by the transport.
//!
//! The composition, the studio and the recording side of the document are
//! external collaborators. This module defines the narrow interfaces the
//! transport needs from them, the plain-data snapshots that cross those
//! interfaces, and the listener traits the document calls back into.
//!
//! Segments are identified by a `SegmentId` allocated once when the segment
//! is created. Nothing here hands out references into document objects, so a
//! removed segment can only ever be named, never read.

pub mod listener;
pub mod memory;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

pub use listener::{SegmentChange, SegmentLifecycleListener, TempoListener, TrackLifecycleListener};
pub use memory::{MemoryComposition, MemoryStudio};

use crate::midi::{MappedEvent, MidiFilter};
use crate::sync::Epoch;
use crate::timing::{RealTime, TimeT};

pub type TrackId = u32;
pub type InstrumentId = u32;
pub type DeviceId = u32;

/// Device filter value matching every device
pub const ALL_DEVICES: DeviceId = 10000;
/// Device id for generated events
pub const NO_DEVICE: DeviceId = 10001;
/// Device id of the external control surface
pub const CONTROL_DEVICE: DeviceId = 10002;

/// Selected-track value when no track is selected
pub const NO_TRACK: TrackId = u32::MAX;

/// First MIDI instrument id; system events are addressed to it
pub const MIDI_INSTRUMENT_BASE: InstrumentId = 2000;

static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque runtime identity of a segment.
///
/// Allocated once at creation and never reused within a process, so it stays
/// a safe map key after the segment itself is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Allocate a fresh id
    pub fn allocate() -> Self {
        SegmentId(NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// MIDI / notation content
    Internal,
    /// Audio file playback
    Audio,
}

/// What the transport reads about a live segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSnapshot {
    pub id: SegmentId,
    pub track: TrackId,
    pub kind: SegmentKind,
    /// Content version; changes on every mutation
    pub epoch: Epoch,
}

/// A trigger segment and the segments whose rendering depends on it
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSegmentSnapshot {
    pub id: SegmentId,
    pub epoch: Epoch,
    pub references: BTreeSet<SegmentId>,
}

/// Track data the ControlBlock mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub instrument: InstrumentId,
    pub armed: bool,
    pub muted: bool,
    /// Input channel filter, -1 for any channel
    pub channel_filter: i8,
    /// Input device filter, `ALL_DEVICES` for any device
    pub device_filter: DeviceId,
}

impl TrackSnapshot {
    pub fn new(id: TrackId, instrument: InstrumentId) -> Self {
        Self {
            id,
            instrument,
            armed: false,
            muted: false,
            channel_filter: -1,
            device_filter: ALL_DEVICES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    Midi,
    SoftSynth,
    Audio,
}

/// Studio instrument as the transport needs it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentInfo {
    pub id: InstrumentId,
    pub kind: InstrumentKind,
    pub device: DeviceId,
    /// Whether the instrument always plays on `natural_channel`
    pub fixed_channel: bool,
    pub natural_channel: u8,
}

impl InstrumentInfo {
    pub fn midi(id: InstrumentId, device: DeviceId, natural_channel: u8) -> Self {
        Self {
            id,
            kind: InstrumentKind::Midi,
            device,
            fixed_channel: true,
            natural_channel,
        }
    }

    pub fn audio(id: InstrumentId) -> Self {
        Self {
            id,
            kind: InstrumentKind::Audio,
            device: NO_DEVICE,
            fixed_channel: true,
            natural_channel: 0,
        }
    }

    /// Let the instrument float between channels
    pub fn with_floating_channel(mut self) -> Self {
        self.fixed_channel = false;
        self
    }
}

/// Timeline, tracks and segments of the composition being played
pub trait Composition {
    fn position(&self) -> TimeT;
    fn set_position(&mut self, time: TimeT);
    fn start_marker(&self) -> TimeT;
    fn end_marker(&self) -> TimeT;
    /// Loop bounds while looping is enabled
    fn loop_range(&self) -> Option<(TimeT, TimeT)>;

    /// Start and end of the bar containing `time`
    fn bar_range_for_time(&self, time: TimeT) -> (TimeT, TimeT);
    fn bar_number(&self, time: TimeT) -> i32;
    fn bar_range(&self, bar: i32) -> (TimeT, TimeT);
    fn elapsed_real_time(&self, time: TimeT) -> RealTime;

    /// Current tempo in quarter notes per minute, `None` if never set
    fn current_tempo(&self) -> Option<f64>;
    fn set_default_tempo(&mut self, qpm: f64);

    fn use_play_metronome(&self) -> bool;
    fn use_record_metronome(&self) -> bool;
    fn metronome_instrument(&self) -> InstrumentId;

    fn selected_track(&self) -> TrackId;
    fn tracks(&self) -> Vec<TrackSnapshot>;
    fn track(&self, id: TrackId) -> Option<TrackSnapshot>;
    /// Tracks armed for recording
    fn record_tracks(&self) -> Vec<TrackId>;

    fn segments(&self) -> Vec<SegmentSnapshot>;
    fn segment(&self, id: SegmentId) -> Option<SegmentSnapshot>;
    fn trigger_segments(&self) -> Vec<TriggerSegmentSnapshot>;

    /// Render a segment's content for the engine
    fn render_segment(&self, id: SegmentId) -> Vec<MappedEvent>;
    fn render_metronome(&self) -> Vec<MappedEvent>;
    fn render_tempo_map(&self) -> Vec<MappedEvent>;
    fn render_time_signatures(&self) -> Vec<MappedEvent>;
}

/// Recording-side hooks of the document
pub trait Document: Composition {
    /// Create the placeholder segment a MIDI recording will fill
    fn add_record_midi_segment(&mut self, track: TrackId);
    fn stop_recording_midi(&mut self);
    fn stop_recording_audio(&mut self);
    fn stop_playing(&mut self);
    fn set_record_start_time(&mut self, time: TimeT);
    fn update_audio_record_latency(&mut self);
    /// Check the audio record path is usable
    fn test_audio_path(&self) -> Result<(), String>;
    fn finalize_audio_file(&mut self, file_id: u32);
}

/// Instruments and devices.
///
/// Shared with the real-time side through the ControlBlock, so it must be
/// thread-safe.
pub trait Studio: Send + Sync {
    fn instrument(&self, id: InstrumentId) -> Option<InstrumentInfo>;
    fn instruments(&self) -> Vec<InstrumentInfo>;
    /// Bit mask of channels on `device` taken by fixed-channel instruments
    fn reserved_channels(&self, device: DeviceId) -> u16;
    /// Send bank/program setup for `instrument` on `channel`
    fn send_channel_setup(&self, instrument: InstrumentId, channel: u8);
    fn midi_thru_filter(&self) -> MidiFilter;
    fn audio_preview_instrument(&self) -> InstrumentId;
}
