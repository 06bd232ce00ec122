// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI-level vocabulary shared by the router and the engine boundary.
//!
//! Events crossing the engine boundary are `MappedEvent`s: a MIDI message
//! already resolved to an instrument, or a pseudo-event carrying audio
//! levels, failures and system settings.

pub mod event;

pub use event::{FailureCode, MappedEvent, MappedEventType};

/// MIDI message constants
pub mod messages {
    // Channel Voice Messages (upper nibble, lower nibble is channel 0-15)
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_AFTERTOUCH: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_AFTERTOUCH: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;

    // System Real-Time Messages
    pub const TIMING_CLOCK: u8 = 0xF8;
    pub const START: u8 = 0xFA;
    pub const CONTINUE: u8 = 0xFB;
    pub const STOP: u8 = 0xFC;

    // Controller numbers the transport cares about
    pub const BANK_SELECT_MSB: u8 = 0;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
}

/// Number of MIDI channels on one device
pub const MIDI_CHANNEL_COUNT: u8 = 16;

/// Bit mask of `MappedEventType`s to drop.
///
/// An event passes the filter when none of its type bits are set in the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MidiFilter(pub u32);

impl MidiFilter {
    /// Filter that lets everything through
    pub const NONE: MidiFilter = MidiFilter(0);

    /// Build a filter blocking the given event types
    pub fn blocking(types: &[MappedEventType]) -> Self {
        Self(types.iter().fold(0, |mask, t| mask | t.bits()))
    }

    /// Whether events of this type are dropped
    pub fn blocks(&self, event_type: MappedEventType) -> bool {
        self.0 & event_type.bits() != 0
    }

    /// Keep only the events this filter lets through
    pub fn apply<'a, I>(&self, events: I) -> Vec<MappedEvent>
    where
        I: IntoIterator<Item = &'a MappedEvent>,
    {
        events
            .into_iter()
            .filter(|e| !self.blocks(e.event_type))
            .cloned()
            .collect()
    }
}
