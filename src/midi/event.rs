// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Mapped events exchanged with the sequencing engine.
//!
//! The engine reports everything it wants the edit side to know about
//! (incoming MIDI, audio meters, failures) as a batch of these.

use super::messages;
use crate::document::{DeviceId, InstrumentId, NO_DEVICE};
use crate::timing::RealTime;

/// Kind of a mapped event.
///
/// Each kind is a distinct bit so kinds can be combined into a `MidiFilter`.
/// Everything from `Audio` upward is a pseudo-event, not MIDI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum MappedEventType {
    MidiNote = 1 << 0,
    MidiNoteOneShot = 1 << 1,
    MidiProgramChange = 1 << 2,
    MidiKeyPressure = 1 << 3,
    MidiChannelPressure = 1 << 4,
    MidiPitchBend = 1 << 5,
    MidiController = 1 << 6,
    MidiSystemMessage = 1 << 7,
    Audio = 1 << 8,
    AudioCancel = 1 << 9,
    AudioLevel = 1 << 10,
    AudioStopped = 1 << 11,
    AudioGeneratePreview = 1 << 12,
    SystemUpdateInstruments = 1 << 13,
    SystemJackTransport = 1 << 14,
    SystemMmcTransport = 1 << 15,
    SystemMidiClock = 1 << 16,
    SystemMidiSyncAuto = 1 << 17,
    SystemAudioPorts = 1 << 18,
    SystemFailure = 1 << 19,
    SystemMtcTransport = 1 << 20,
    SystemAudioFileFormat = 1 << 21,
    Panic = 1 << 22,
    Tempo = 1 << 23,
    TimeSignature = 1 << 24,
}

impl MappedEventType {
    /// The bit this type occupies in a filter mask
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Audio, meter, failure and system pseudo-events
    pub fn is_audio_or_system(self) -> bool {
        self.bits() >= MappedEventType::Audio.bits()
    }
}

/// Failure or warning code carried in `data1` of a `SystemFailure` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    DiscUnderrun,
    DiscOverrun,
    MixUnderrun,
    BussMixUnderrun,
    JackDied,
    JackRestartFailed,
    JackRestart,
    XRuns,
    CpuOverload,
    AlsaCallFailed,
    ImpreciseTimer,
    ImpreciseTimerTryRtc,
    Unknown(u8),
}

impl FailureCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => FailureCode::DiscUnderrun,
            1 => FailureCode::DiscOverrun,
            2 => FailureCode::MixUnderrun,
            3 => FailureCode::BussMixUnderrun,
            4 => FailureCode::JackDied,
            5 => FailureCode::JackRestartFailed,
            6 => FailureCode::JackRestart,
            7 => FailureCode::XRuns,
            8 => FailureCode::CpuOverload,
            9 => FailureCode::AlsaCallFailed,
            10 => FailureCode::ImpreciseTimer,
            11 => FailureCode::ImpreciseTimerTryRtc,
            other => FailureCode::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            FailureCode::DiscUnderrun => 0,
            FailureCode::DiscOverrun => 1,
            FailureCode::MixUnderrun => 2,
            FailureCode::BussMixUnderrun => 3,
            FailureCode::JackDied => 4,
            FailureCode::JackRestartFailed => 5,
            FailureCode::JackRestart => 6,
            FailureCode::XRuns => 7,
            FailureCode::CpuOverload => 8,
            FailureCode::AlsaCallFailed => 9,
            FailureCode::ImpreciseTimer => 10,
            FailureCode::ImpreciseTimerTryRtc => 11,
            FailureCode::Unknown(code) => code,
        }
    }
}

/// A MIDI or pseudo-event resolved against the studio
#[derive(Debug, Clone, PartialEq)]
pub struct MappedEvent {
    pub instrument: InstrumentId,
    pub event_type: MappedEventType,
    pub data1: u8,
    pub data2: u8,
    pub event_time: RealTime,
    pub duration: RealTime,
    /// Device the event arrived on (`NO_DEVICE` for generated events)
    pub recorded_device: DeviceId,
    /// Channel the event arrived on
    pub recorded_channel: u8,
}

impl MappedEvent {
    pub fn new(instrument: InstrumentId, event_type: MappedEventType, data1: u8, data2: u8) -> Self {
        Self {
            instrument,
            event_type,
            data1,
            data2,
            event_time: RealTime::ZERO,
            duration: RealTime::ZERO,
            recorded_device: NO_DEVICE,
            recorded_channel: 0,
        }
    }

    /// A failure notification from the engine
    pub fn failure(code: FailureCode) -> Self {
        Self::new(0, MappedEventType::SystemFailure, code.to_u8(), 0)
    }

    /// A system setting sent to the engine
    pub fn system(event_type: MappedEventType, value: u8) -> Self {
        Self::new(crate::document::MIDI_INSTRUMENT_BASE, event_type, value, 0)
    }

    /// Set the time of this event
    pub fn at(mut self, time: RealTime) -> Self {
        self.event_time = time;
        self
    }

    /// Mark where this event was recorded from
    pub fn recorded_from(mut self, device: DeviceId, channel: u8) -> Self {
        self.recorded_device = device;
        self.recorded_channel = channel;
        self
    }

    pub fn pitch(&self) -> u8 {
        self.data1
    }

    pub fn velocity(&self) -> u8 {
        self.data2
    }

    /// Failure code, for `SystemFailure` events
    pub fn failure_code(&self) -> Option<FailureCode> {
        (self.event_type == MappedEventType::SystemFailure).then(|| FailureCode::from_u8(self.data1))
    }

    /// Decode raw MIDI bytes received on `device`.
    ///
    /// Note On with velocity 0 becomes a note event with velocity 0, which
    /// the router treats as a note off. Returns `None` for empty input or
    /// messages that carry nothing the transport uses (sysex and friends).
    pub fn from_midi_bytes(device: DeviceId, data: &[u8]) -> Option<Self> {
        let status = *data.first()?;

        match status {
            messages::TIMING_CLOCK | messages::START | messages::CONTINUE | messages::STOP => {
                return Some(
                    Self::new(0, MappedEventType::MidiSystemMessage, status, 0)
                        .recorded_from(device, 0),
                );
            }
            _ => {}
        }

        let msg_type = status & 0xF0;
        let channel = status & 0x0F;

        let (event_type, data1, data2) = match msg_type {
            messages::NOTE_OFF if data.len() >= 3 => (MappedEventType::MidiNote, data[1] & 0x7F, 0),
            messages::NOTE_ON if data.len() >= 3 => {
                (MappedEventType::MidiNote, data[1] & 0x7F, data[2] & 0x7F)
            }
            messages::CONTROL_CHANGE if data.len() >= 3 => {
                (MappedEventType::MidiController, data[1] & 0x7F, data[2] & 0x7F)
            }
            messages::PROGRAM_CHANGE if data.len() >= 2 => {
                (MappedEventType::MidiProgramChange, data[1] & 0x7F, 0)
            }
            messages::PITCH_BEND if data.len() >= 3 => {
                (MappedEventType::MidiPitchBend, data[1] & 0x7F, data[2] & 0x7F)
            }
            messages::CHANNEL_AFTERTOUCH if data.len() >= 2 => {
                (MappedEventType::MidiChannelPressure, data[1] & 0x7F, 0)
            }
            messages::POLY_AFTERTOUCH if data.len() >= 3 => {
                (MappedEventType::MidiKeyPressure, data[1] & 0x7F, data[2] & 0x7F)
            }
            _ => return None,
        };

        Some(Self::new(0, event_type, data1, data2).recorded_from(device, channel))
    }
}
