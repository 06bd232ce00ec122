// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Boundary to the real-time sequencing engine.
//!
//! The engine runs on its own threads and is only reached through the
//! `SequencerEngine` trait. Requests are fire-and-forget except `stop`, which
//! blocks until the engine has stopped. Per-segment event buffers are handed
//! over as `Arc<MappedEventBuffer>` and withdrawn by `BufferKey`, never by a
//! reference into the document.

pub mod offline;

use std::sync::Arc;

use thiserror::Error;

pub use offline::{EngineCall, OfflineEngine};

use crate::document::{InstrumentInfo, SegmentId, TrackId};
use crate::midi::MappedEvent;
use crate::sync::Epoch;
use crate::timing::RealTime;
use crate::transport::TransportStatus;

/// Errors reported by the engine boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("engine rejected the request: {0}")]
    Rejected(String),

    #[error("engine is not running")]
    Disconnected,

    #[error("engine has no buffer for {0:?}")]
    UnknownBuffer(BufferKey),
}

/// Which subsystems the engine's sound driver brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DriverStatus(pub u8);

impl DriverStatus {
    pub const NO_DRIVER: DriverStatus = DriverStatus(0);
    pub const MIDI_OK: u8 = 1 << 0;
    pub const AUDIO_OK: u8 = 1 << 1;
    pub const VERSION_OK: u8 = 1 << 2;

    /// Everything up and the engine version matches
    pub fn all_ok() -> Self {
        DriverStatus(Self::MIDI_OK | Self::AUDIO_OK | Self::VERSION_OK)
    }

    pub fn midi_ok(&self) -> bool {
        self.0 & Self::MIDI_OK != 0
    }

    pub fn audio_ok(&self) -> bool {
        self.0 & Self::AUDIO_OK != 0
    }

    pub fn version_ok(&self) -> bool {
        self.0 & Self::VERSION_OK != 0
    }

    /// Whether the transport can be started at all
    pub fn can_sequence(&self) -> bool {
        self.midi_ok() || self.audio_ok()
    }
}

/// Scheduling windows handed to the engine when the transport starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyProfile {
    pub read_ahead: RealTime,
    /// Ignored by the engine in low-latency mode
    pub audio_mix: RealTime,
    pub audio_read: RealTime,
    pub audio_write: RealTime,
    /// Audio files below this size (KB) are cached whole
    pub small_file_size_kb: u32,
}

impl LatencyProfile {
    pub fn low_latency() -> Self {
        Self {
            read_ahead: RealTime::from_millis(160),
            audio_mix: RealTime::from_millis(60),
            audio_read: RealTime::from_millis(2500),
            audio_write: RealTime::new(4, 0),
            small_file_size_kb: 256,
        }
    }

    pub fn standard() -> Self {
        Self {
            read_ahead: RealTime::from_millis(500),
            audio_mix: RealTime::from_millis(400),
            audio_read: RealTime::from_millis(2500),
            audio_write: RealTime::new(4, 0),
            small_file_size_kb: 256,
        }
    }

    pub fn for_mode(low_latency: bool) -> Self {
        if low_latency {
            Self::low_latency()
        } else {
            Self::standard()
        }
    }
}

/// A play or record request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayRequest {
    pub start: RealTime,
    pub latency: LatencyProfile,
}

/// Key of an engine-side event buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferKey {
    Segment(SegmentId),
    Metronome,
    Tempo,
    TimeSignature,
}

/// Rendered events for one segment or pseudo-segment
#[derive(Debug, Clone, PartialEq)]
pub struct MappedEventBuffer {
    pub key: BufferKey,
    pub track: Option<TrackId>,
    /// Document epoch the events were rendered from
    pub epoch: Option<Epoch>,
    pub events: Vec<MappedEvent>,
}

impl MappedEventBuffer {
    pub fn new(key: BufferKey, events: Vec<MappedEvent>) -> Self {
        Self {
            key,
            track: None,
            epoch: None,
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// The real-time sequencing engine
pub trait SequencerEngine: Send + Sync {
    fn driver_status(&self) -> DriverStatus;
    fn sample_rate(&self) -> u32;

    fn play(&self, request: &PlayRequest) -> Result<(), EngineError>;
    fn record(&self, request: &PlayRequest, target: TransportStatus) -> Result<(), EngineError>;
    /// Stop recording but keep playing; `false` if the engine stopped instead
    fn punch_out(&self) -> bool;
    /// Blocks until the engine has stopped
    fn stop(&self);
    fn jump_to(&self, time: RealTime);
    fn set_loop(&self, start: RealTime, end: RealTime);
    fn set_low_latency_mode(&self, enabled: bool);
    fn set_quarter_note_length(&self, length: RealTime);

    fn segment_added(&self, buffer: Arc<MappedEventBuffer>) -> Result<(), EngineError>;
    fn segment_modified(&self, buffer: Arc<MappedEventBuffer>) -> Result<(), EngineError>;
    fn segment_removed(&self, key: BufferKey) -> Result<(), EngineError>;
    fn composition_about_to_be_deleted(&self);
    fn remap_tracks(&self);

    fn send_mapped_instrument(&self, instrument: &InstrumentInfo);
    fn send_mapped_event(&self, event: MappedEvent);
}
