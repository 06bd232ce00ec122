// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Transport control: play, record, stop and the events they produce.
//!
//! The `SequenceManager` owns the transport state. Everything a host UI needs
//! to hear about (playing/recording toggles, warnings, incoming notes for
//! step recording) comes out as a `TransportEvent` on a channel.

pub mod manager;

pub use manager::SequenceManager;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::document::InstrumentId;
use crate::engine::DriverStatus;
use crate::midi::MappedEvent;

/// Transport state. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TransportStatus {
    #[default]
    Stopped = 0,
    StartingToPlay = 1,
    Playing = 2,
    StartingToRecord = 3,
    Recording = 4,
    RecordingArmed = 5,
}

impl TransportStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportStatus::StartingToPlay,
            2 => TransportStatus::Playing,
            3 => TransportStatus::StartingToRecord,
            4 => TransportStatus::Recording,
            5 => TransportStatus::RecordingArmed,
            _ => TransportStatus::Stopped,
        }
    }

    /// Playing or recording, confirmed or not
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            TransportStatus::StartingToPlay
                | TransportStatus::Playing
                | TransportStatus::StartingToRecord
                | TransportStatus::Recording
        )
    }
}

/// Transport status readable from any thread
#[derive(Debug, Clone, Default)]
pub struct SharedTransportStatus {
    status: Arc<AtomicU8>,
}

impl SharedTransportStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> TransportStatus {
        TransportStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: TransportStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// What a warning is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    Midi,
    Audio,
    Timer,
}

/// How loudly a message should be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageLevel {
    /// Modal, the user must acknowledge
    Critical,
    Information,
    /// Log only
    Console,
}

/// Notification for the host
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PlayingChanged(bool),
    RecordingChanged(bool),
    MetronomeActivated(bool),
    TempoChanged(f64),
    Warning {
        kind: WarningKind,
        text: String,
        informative: String,
    },
    UserMessage {
        level: MessageLevel,
        text: String,
    },
    AudioLevel {
        instrument: InstrumentId,
        left: u8,
        right: u8,
    },
    MidiInLabel(MappedEvent),
    MidiOutLabel(MappedEvent),
    /// Bank and program picked up from input, for display only
    SelectProgramNoSend {
        program: u8,
        bank_lsb: Option<u8>,
        bank_msb: Option<u8>,
    },
    InsertableNoteOn {
        pitch: u8,
        velocity: u8,
    },
    InsertableNoteOff {
        pitch: u8,
        velocity: u8,
    },
    ControllerDeviceEvent(MappedEvent),
    /// Preview of this audio file finished playing
    AudioPreviewStopped(u32),
}

/// Conditions a transport request reports back to the caller
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("no tracks are armed for recording")]
    NothingArmed,

    #[error("audio subsystem is not available, cannot record audio")]
    AudioUnavailable,

    #[error("cannot record audio: {0}")]
    BadAudioPath(String),

    #[error("sound driver unavailable (status {0:?})")]
    DriverUnavailable(DriverStatus),

    #[error("failed to start playback")]
    PlaybackStartFailed,

    #[error("failed to start recording{}", audio_suffix(.audio))]
    RecordStartFailed { audio: bool },
}

fn audio_suffix(audio: &bool) -> &'static str {
    if *audio {
        " audio"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TransportStatus::Stopped,
            TransportStatus::StartingToPlay,
            TransportStatus::Playing,
            TransportStatus::StartingToRecord,
            TransportStatus::Recording,
            TransportStatus::RecordingArmed,
        ] {
            assert_eq!(TransportStatus::from_u8(status as u8), status);
        }
        assert_eq!(TransportStatus::from_u8(99), TransportStatus::Stopped);
    }

    #[test]
    fn test_running_states() {
        assert!(TransportStatus::Playing.is_running());
        assert!(TransportStatus::StartingToRecord.is_running());
        assert!(!TransportStatus::RecordingArmed.is_running());
        assert!(!TransportStatus::Stopped.is_running());
    }

    #[test]
    fn test_shared_status_is_shared() {
        let status = SharedTransportStatus::new();
        let reader = status.clone();
        status.set(TransportStatus::Recording);
        assert_eq!(reader.get(), TransportStatus::Recording);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TransportError::RecordStartFailed { audio: true }.to_string(),
            "failed to start recording audio"
        );
        assert_eq!(
            TransportError::BadAudioPath("no such directory".into()).to_string(),
            "cannot record audio: no such directory"
        );
    }
}
