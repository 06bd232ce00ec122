// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Control data shared between the edit side and the real-time engine.
//!
//! This module provides:
//! - Per-track mute/arm/filter state in a fixed array of atomic slots
//! - Resolution of incoming events to an instrument and output channel
//! - MIDI-thru channel allocation for instruments without a fixed channel
//!
//! The real-time side only reads, apart from lazily readying a thru channel.
//! Edit-side changes that move channel ownership are serialized by a lock
//! the real-time side only ever `try_lock`s.

pub mod track_info;

pub use track_info::{InstrumentAndChannel, TrackControlInfo, TrackControlSnapshot};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::document::{
    Composition, InstrumentId, InstrumentKind, Studio, TrackId, TrackSnapshot, NO_TRACK,
};
use crate::midi::{MidiFilter, MIDI_CHANNEL_COUNT};

/// Number of track slots
pub const MAX_TRACKS: usize = 1024;

/// Track routing authority for one session
pub struct ControlBlock {
    studio: Arc<dyn Studio>,
    tracks: Box<[TrackControlInfo]>,
    max_track_id: AtomicU32,
    solo: AtomicBool,
    routing: AtomicBool,
    thru_filter: AtomicU32,
    record_filter: AtomicU32,
    selected_track: AtomicU32,
    metronome_instrument: AtomicU32,
    metronome_muted: AtomicBool,
    /// Serializes thru channel ownership changes
    alloc_lock: Mutex<()>,
}

impl std::fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBlock")
            .field("max_track_id", &self.max_track_id())
            .field("selected_track", &self.selected_track())
            .field("solo", &self.is_solo())
            .finish_non_exhaustive()
    }
}

impl ControlBlock {
    pub fn new(studio: Arc<dyn Studio>) -> Self {
        let tracks: Vec<TrackControlInfo> = (0..MAX_TRACKS).map(|_| TrackControlInfo::new()).collect();
        Self {
            studio,
            tracks: tracks.into_boxed_slice(),
            max_track_id: AtomicU32::new(0),
            solo: AtomicBool::new(false),
            routing: AtomicBool::new(true),
            thru_filter: AtomicU32::new(MidiFilter::NONE.0),
            record_filter: AtomicU32::new(MidiFilter::NONE.0),
            selected_track: AtomicU32::new(NO_TRACK),
            metronome_instrument: AtomicU32::new(0),
            metronome_muted: AtomicBool::new(true),
            alloc_lock: Mutex::new(()),
        }
    }

    pub fn studio(&self) -> &Arc<dyn Studio> {
        &self.studio
    }

    /// Reload every slot from a composition
    pub fn load_composition(&self, composition: &dyn Composition) {
        self.clear_tracks();
        for track in composition.tracks() {
            self.update_track_data(&track);
        }
        self.set_instrument_for_metronome(composition.metronome_instrument());
        self.set_thru_filter(self.studio.midi_thru_filter());
        self.set_selected_track(composition.selected_track());
    }

    /// Reset every slot to unused
    pub fn clear_tracks(&self) {
        let _guard = self.alloc_lock.lock().ok();
        for slot in self.tracks.iter() {
            slot.reset();
        }
        self.max_track_id.store(0, Ordering::Relaxed);
        self.selected_track.store(NO_TRACK, Ordering::Relaxed);
    }

    /// Highest track id ever written
    pub fn max_track_id(&self) -> TrackId {
        self.max_track_id.load(Ordering::Relaxed)
    }

    fn slot(&self, track: TrackId) -> Option<&TrackControlInfo> {
        self.tracks.get(track as usize)
    }

    /// Slot for a write; out of range is a caller bug
    fn slot_mut(&self, track: TrackId) -> Option<&TrackControlInfo> {
        debug_assert!(
            (track as usize) < MAX_TRACKS,
            "track id {} out of range",
            track
        );
        self.slot(track)
    }

    /// Mirror a track's document state
    pub fn update_track_data(&self, track: &TrackSnapshot) {
        let Some(slot) = self.slot_mut(track.id) else {
            return;
        };
        self.max_track_id.fetch_max(track.id, Ordering::Relaxed);

        let _guard = self.alloc_lock.lock().ok();
        if slot.instrument() != track.instrument {
            self.release_thru_channel(slot);
            slot.set_instrument(track.instrument);
        }
        slot.set_deleted(false);
        slot.set_armed(track.armed);
        slot.set_muted(track.muted);
        slot.set_channel_filter(track.channel_filter);
        slot.set_device_filter(track.device_filter);
        slot.set_selected(self.selected_track() == track.id);
        self.conform(track.id as usize);
    }

    pub fn set_instrument_for_track(&self, track: TrackId, instrument: InstrumentId) {
        let Some(slot) = self.slot_mut(track) else {
            return;
        };
        if slot.instrument() == instrument {
            return;
        }
        let _guard = self.alloc_lock.lock().ok();
        self.release_thru_channel(slot);
        slot.set_instrument(instrument);
        self.conform(track as usize);
    }

    pub fn instrument_for_track(&self, track: TrackId) -> InstrumentId {
        self.slot(track).map(|s| s.instrument()).unwrap_or(0)
    }

    pub fn set_track_armed(&self, track: TrackId, armed: bool) {
        let Some(slot) = self.slot_mut(track) else {
            return;
        };
        let _guard = self.alloc_lock.lock().ok();
        slot.set_armed(armed);
        self.conform(track as usize);
    }

    pub fn is_track_armed(&self, track: TrackId) -> bool {
        self.slot(track).map(|s| s.is_armed()).unwrap_or(false)
    }

    pub fn set_track_muted(&self, track: TrackId, muted: bool) {
        if let Some(slot) = self.slot_mut(track) {
            slot.set_muted(muted);
        }
    }

    pub fn is_track_muted(&self, track: TrackId) -> bool {
        self.slot(track).map(|s| s.is_muted()).unwrap_or(false)
    }

    pub fn set_track_deleted(&self, track: TrackId, deleted: bool) {
        let Some(slot) = self.slot_mut(track) else {
            return;
        };
        let _guard = self.alloc_lock.lock().ok();
        slot.set_deleted(deleted);
        self.conform(track as usize);
    }

    pub fn is_track_deleted(&self, track: TrackId) -> bool {
        self.slot(track).map(|s| s.is_deleted()).unwrap_or(true)
    }

    /// Input channel filter, -1 for any
    pub fn set_track_channel_filter(&self, track: TrackId, channel: i8) {
        if let Some(slot) = self.slot_mut(track) {
            slot.set_channel_filter(channel);
        }
    }

    pub fn track_channel_filter(&self, track: TrackId) -> i8 {
        self.slot(track).map(|s| s.channel_filter()).unwrap_or(-1)
    }

    pub fn set_track_device_filter(&self, track: TrackId, device: u32) {
        if let Some(slot) = self.slot_mut(track) {
            slot.set_device_filter(device);
        }
    }

    pub fn track_device_filter(&self, track: TrackId) -> u32 {
        self.slot(track)
            .map(|s| s.device_filter())
            .unwrap_or(crate::document::ALL_DEVICES)
    }

    pub fn track_snapshot(&self, track: TrackId) -> Option<TrackControlSnapshot> {
        self.slot(track).map(|s| s.snapshot())
    }

    fn live_slots(&self) -> impl Iterator<Item = (usize, &TrackControlInfo)> {
        let end = (self.max_track_id() as usize + 1).min(MAX_TRACKS);
        self.tracks[..end].iter().enumerate()
    }

    /// No live unmuted track plays this instrument
    pub fn is_instrument_muted(&self, instrument: InstrumentId) -> bool {
        !self
            .live_slots()
            .any(|(_, s)| s.instrument() == instrument && !s.is_deleted() && !s.is_muted())
    }

    /// No live track plays this instrument
    pub fn is_instrument_unused(&self, instrument: InstrumentId) -> bool {
        !self
            .live_slots()
            .any(|(_, s)| s.instrument() == instrument && !s.is_deleted())
    }

    pub fn set_instrument_for_metronome(&self, instrument: InstrumentId) {
        self.metronome_instrument.store(instrument, Ordering::Relaxed);
    }

    pub fn instrument_for_metronome(&self) -> InstrumentId {
        self.metronome_instrument.load(Ordering::Relaxed)
    }

    pub fn set_metronome_muted(&self, muted: bool) {
        self.metronome_muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_metronome_muted(&self) -> bool {
        self.metronome_muted.load(Ordering::Relaxed)
    }

    pub fn set_solo(&self, solo: bool) {
        self.solo.store(solo, Ordering::Relaxed);
    }

    pub fn is_solo(&self) -> bool {
        self.solo.load(Ordering::Relaxed)
    }

    pub fn set_midi_routing_enabled(&self, enabled: bool) {
        self.routing.store(enabled, Ordering::Relaxed);
    }

    pub fn is_midi_routing_enabled(&self) -> bool {
        self.routing.load(Ordering::Relaxed)
    }

    pub fn set_thru_filter(&self, filter: MidiFilter) {
        self.thru_filter.store(filter.0, Ordering::Relaxed);
    }

    pub fn thru_filter(&self) -> MidiFilter {
        MidiFilter(self.thru_filter.load(Ordering::Relaxed))
    }

    pub fn set_record_filter(&self, filter: MidiFilter) {
        self.record_filter.store(filter.0, Ordering::Relaxed);
    }

    pub fn record_filter(&self) -> MidiFilter {
        MidiFilter(self.record_filter.load(Ordering::Relaxed))
    }

    pub fn selected_track(&self) -> TrackId {
        self.selected_track.load(Ordering::Relaxed)
    }

    /// Move the selection, giving up and taking monitoring channels as needed
    pub fn set_selected_track(&self, track: TrackId) {
        let _guard = self.alloc_lock.lock().ok();
        let old = self.selected_track.swap(track, Ordering::Relaxed);
        if old != track {
            if let Some(slot) = self.slot(old) {
                slot.set_selected(false);
                self.conform(old as usize);
            }
        }
        if let Some(slot) = self.slot(track) {
            slot.set_selected(true);
            self.conform(track as usize);
        }
    }

    /// Resolve where an incoming event from `device` on `channel` should play.
    ///
    /// The first armed track (in track id order) whose filters accept the
    /// event wins. With no match, the selected track's instrument is used.
    /// Never blocks; degrades to `InstrumentAndChannel::INVALID`.
    pub fn ins_and_chan_for_event(&self, device: u32, channel: u8) -> InstrumentAndChannel {
        for (_, slot) in self.live_slots() {
            if slot.is_armed() && !slot.is_deleted() && slot.accepts(device, channel) {
                return self.channel_as_ready(slot);
            }
        }
        self.ins_and_chan_for_selected_track()
    }

    pub fn ins_and_chan_for_selected_track(&self) -> InstrumentAndChannel {
        match self.slot(self.selected_track()) {
            Some(slot) if !slot.is_deleted() => self.channel_as_ready(slot),
            _ => InstrumentAndChannel::INVALID,
        }
    }

    /// Drop `channel` from every floating track that holds it
    pub fn vacate_thru_channel(&self, channel: u8) {
        let _guard = self.alloc_lock.lock().ok();
        for (_, slot) in self.live_slots() {
            if slot.has_thru_channel()
                && !slot.uses_fixed_channel()
                && slot.thru_channel() == channel as i32
            {
                slot.clear_thru_channel();
            }
        }
    }

    /// The instrument's program changed; its channels need setup again
    pub fn instrument_changed_program(&self, instrument: InstrumentId) {
        for (_, slot) in self.live_slots() {
            if slot.instrument() == instrument {
                slot.invalidate_ready();
            }
        }
    }

    /// The instrument switched between fixed and floating channels
    pub fn instrument_changed_fixity(&self, instrument: InstrumentId) {
        let _guard = self.alloc_lock.lock().ok();
        for (index, slot) in self.live_slots() {
            if slot.instrument() == instrument {
                self.release_thru_channel(slot);
                self.conform(index);
            }
        }
    }

    /// Ready a slot's thru channel and return it.
    ///
    /// Allocates lazily when the slot has none, unless the edit side holds
    /// the allocation lock. Channel setup is sent once per readiness.
    fn channel_as_ready(&self, slot: &TrackControlInfo) -> InstrumentAndChannel {
        if !slot.has_thru_channel() {
            let Ok(_guard) = self.alloc_lock.try_lock() else {
                return InstrumentAndChannel::INVALID;
            };
            self.allocate_thru_channel(slot);
        }
        if !slot.has_thru_channel() {
            return InstrumentAndChannel::INVALID;
        }

        let channel = slot.thru_channel();
        if !(0..MIDI_CHANNEL_COUNT as i32).contains(&channel) {
            return InstrumentAndChannel::INVALID;
        }
        let instrument = slot.instrument();
        if slot.claim_ready() {
            self.studio.send_channel_setup(instrument, channel as u8);
        }
        InstrumentAndChannel::new(instrument, channel as u8)
    }

    /// Take or give up a thru channel to match arm/select state.
    /// Caller holds `alloc_lock`.
    fn conform(&self, index: usize) {
        let Some(slot) = self.tracks.get(index) else {
            return;
        };
        let instrument = self.studio.instrument(slot.instrument());
        let wants_channel = (slot.is_armed() || slot.is_selected())
            && !slot.is_deleted()
            && instrument.is_some_and(|i| i.kind != InstrumentKind::Audio);

        if wants_channel && !slot.has_thru_channel() {
            self.allocate_thru_channel(slot);
        } else if !wants_channel && slot.has_thru_channel() {
            self.release_thru_channel(slot);
        }
    }

    /// Caller holds `alloc_lock`
    fn allocate_thru_channel(&self, slot: &TrackControlInfo) {
        let Some(instrument) = self.studio.instrument(slot.instrument()) else {
            return;
        };
        if instrument.kind == InstrumentKind::Audio {
            return;
        }
        if instrument.fixed_channel {
            slot.assign_thru_channel(instrument.natural_channel, true);
            return;
        }

        let mut taken = self.studio.reserved_channels(instrument.device);
        for (_, other) in self.live_slots() {
            if std::ptr::eq(other, slot) || !other.has_thru_channel() || other.uses_fixed_channel() {
                continue;
            }
            let channel = other.thru_channel();
            if !(0..MIDI_CHANNEL_COUNT as i32).contains(&channel) {
                continue;
            }
            let same_device = self
                .studio
                .instrument(other.instrument())
                .is_some_and(|o| o.device == instrument.device);
            if same_device {
                taken |= 1 << channel;
            }
        }

        if let Some(channel) = (0..MIDI_CHANNEL_COUNT).find(|ch| taken & (1 << ch) == 0) {
            slot.assign_thru_channel(channel, false);
        }
    }

    fn release_thru_channel(&self, slot: &TrackControlInfo) {
        slot.clear_thru_channel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{InstrumentInfo, MemoryStudio, ALL_DEVICES};

    fn studio() -> Arc<MemoryStudio> {
        let studio = MemoryStudio::new();
        // fixed-channel instrument on device 0, channel 0
        studio.add_instrument(InstrumentInfo::midi(2000, 0, 0));
        // floating instruments on device 0
        studio.add_instrument(InstrumentInfo::midi(2001, 0, 1).with_floating_channel());
        studio.add_instrument(InstrumentInfo::midi(2002, 0, 2).with_floating_channel());
        studio.add_instrument(InstrumentInfo::audio(1000));
        Arc::new(studio)
    }

    fn track(id: TrackId, instrument: InstrumentId, armed: bool) -> TrackSnapshot {
        TrackSnapshot {
            armed,
            ..TrackSnapshot::new(id, instrument)
        }
    }

    #[test]
    fn test_armed_match_wins() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 2000, false));
        cb.update_track_data(&track(1, 2001, true));
        cb.set_selected_track(0);

        let resolved = cb.ins_and_chan_for_event(5, 3);
        assert_eq!(resolved.instrument, 2001);
        assert!(resolved.is_valid());
    }

    #[test]
    fn test_first_armed_match_in_track_order() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 2001, true));
        cb.update_track_data(&track(1, 2002, true));

        for _ in 0..3 {
            assert_eq!(cb.ins_and_chan_for_event(0, 0).instrument, 2001);
        }
    }

    #[test]
    fn test_filters_exclude_armed_tracks() {
        let cb = ControlBlock::new(studio());
        let mut filtered = track(0, 2001, true);
        filtered.device_filter = 7;
        filtered.channel_filter = 4;
        cb.update_track_data(&filtered);
        cb.update_track_data(&track(1, 2000, false));
        cb.set_selected_track(1);

        assert_eq!(cb.ins_and_chan_for_event(7, 4).instrument, 2001);
        // wrong channel falls back to the selected track
        assert_eq!(cb.ins_and_chan_for_event(7, 5).instrument, 2000);
        // wrong device too
        assert_eq!(cb.ins_and_chan_for_event(8, 4).instrument, 2000);
    }

    #[test]
    fn test_no_match_and_no_selection_is_invalid() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 2001, false));
        assert_eq!(cb.ins_and_chan_for_event(0, 0), InstrumentAndChannel::INVALID);
    }

    #[test]
    fn test_deleted_armed_track_is_skipped() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 2001, true));
        cb.update_track_data(&track(1, 2000, false));
        cb.set_selected_track(1);
        cb.set_track_deleted(0, true);
        assert_eq!(cb.ins_and_chan_for_event(0, 0).instrument, 2000);
    }

    #[test]
    fn test_fixed_instrument_uses_natural_channel() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 2000, true));
        let snap = cb.track_snapshot(0).unwrap();
        assert!(snap.has_thru_channel);
        assert!(snap.use_fixed_channel);
        assert!(snap.thru_channel_ready);
        assert_eq!(cb.ins_and_chan_for_event(0, 0), InstrumentAndChannel::new(2000, 0));
    }

    #[test]
    fn test_floating_channels_never_collide() {
        let s = studio();
        let cb = ControlBlock::new(s.clone());
        cb.update_track_data(&track(0, 2001, true));
        cb.update_track_data(&track(1, 2002, true));

        let a = cb.track_snapshot(0).unwrap().thru_channel;
        let b = cb.track_snapshot(1).unwrap().thru_channel;
        assert!(a >= 0 && b >= 0);
        assert_ne!(a, b);
        // channel 0 belongs to the fixed instrument on the same device
        assert_ne!(a, 0);
        assert_ne!(b, 0);
    }

    #[test]
    fn test_disarm_releases_channel() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 2001, true));
        assert!(cb.track_snapshot(0).unwrap().has_thru_channel);

        cb.set_track_armed(0, false);
        let snap = cb.track_snapshot(0).unwrap();
        assert!(!snap.has_thru_channel);
        assert_eq!(snap.thru_channel, -1);
    }

    #[test]
    fn test_selection_moves_channel() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 2001, false));
        cb.update_track_data(&track(1, 2002, false));

        cb.set_selected_track(0);
        assert!(cb.track_snapshot(0).unwrap().has_thru_channel);
        assert!(!cb.track_snapshot(1).unwrap().has_thru_channel);

        cb.set_selected_track(1);
        assert!(!cb.track_snapshot(0).unwrap().has_thru_channel);
        assert!(cb.track_snapshot(1).unwrap().has_thru_channel);
        assert!(cb.track_snapshot(1).unwrap().selected);
        assert!(!cb.track_snapshot(0).unwrap().selected);
    }

    #[test]
    fn test_audio_instrument_gets_no_channel() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 1000, true));
        assert!(!cb.track_snapshot(0).unwrap().has_thru_channel);
        assert_eq!(cb.ins_and_chan_for_event(0, 0), InstrumentAndChannel::INVALID);
    }

    #[test]
    fn test_channel_setup_sent_once_until_program_change() {
        let s = studio();
        let cb = ControlBlock::new(s.clone());
        cb.update_track_data(&track(0, 2001, true));

        let first = cb.ins_and_chan_for_event(0, 0);
        let _ = cb.ins_and_chan_for_event(0, 0);
        assert_eq!(s.channel_setups(), vec![(2001, first.channel as u8)]);

        cb.instrument_changed_program(2001);
        assert!(!cb.track_snapshot(0).unwrap().thru_channel_ready);
        let _ = cb.ins_and_chan_for_event(0, 0);
        assert_eq!(s.channel_setups().len(), 2);
    }

    #[test]
    fn test_vacate_thru_channel() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 2001, true));
        cb.update_track_data(&track(1, 2000, true));
        let channel = cb.track_snapshot(0).unwrap().thru_channel as u8;

        cb.vacate_thru_channel(channel);
        assert!(!cb.track_snapshot(0).unwrap().has_thru_channel);
        // fixed channel holder is untouched
        cb.vacate_thru_channel(0);
        assert!(cb.track_snapshot(1).unwrap().has_thru_channel);

        // lazily reallocated on next use
        assert!(cb.ins_and_chan_for_event(0, 0).is_valid());
        assert!(cb.track_snapshot(0).unwrap().has_thru_channel);
    }

    #[test]
    fn test_fixity_change_reallocates() {
        let s = studio();
        let cb = ControlBlock::new(s.clone());
        cb.update_track_data(&track(0, 2001, true));
        assert!(!cb.track_snapshot(0).unwrap().use_fixed_channel);

        s.add_instrument(InstrumentInfo::midi(2001, 0, 1));
        cb.instrument_changed_fixity(2001);
        let snap = cb.track_snapshot(0).unwrap();
        assert!(snap.use_fixed_channel);
        assert_eq!(snap.thru_channel, 1);
    }

    #[test]
    fn test_instrument_muted_and_unused() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(0, 2001, false));
        cb.update_track_data(&track(1, 2001, false));
        assert!(!cb.is_instrument_muted(2001));
        assert!(!cb.is_instrument_unused(2001));
        assert!(cb.is_instrument_unused(2002));

        cb.set_track_muted(0, true);
        assert!(!cb.is_instrument_muted(2001));
        cb.set_track_deleted(1, true);
        assert!(cb.is_instrument_muted(2001));
        assert!(!cb.is_instrument_unused(2001));
    }

    #[test]
    fn test_clear_tracks() {
        let cb = ControlBlock::new(studio());
        cb.update_track_data(&track(4, 2001, true));
        assert_eq!(cb.max_track_id(), 4);
        cb.clear_tracks();
        assert_eq!(cb.max_track_id(), 0);
        assert!(cb.is_track_deleted(4));
        assert!(!cb.is_track_armed(4));
        assert_eq!(cb.track_device_filter(4), ALL_DEVICES);
    }

    #[test]
    fn test_out_of_range_reads_degrade() {
        let cb = ControlBlock::new(studio());
        assert!(!cb.is_track_armed(MAX_TRACKS as TrackId));
        assert!(cb.track_snapshot(MAX_TRACKS as TrackId).is_none());
        assert_eq!(cb.track_channel_filter(NO_TRACK), -1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_write_asserts_in_debug() {
        let cb = ControlBlock::new(studio());
        cb.set_track_armed(MAX_TRACKS as TrackId, true);
    }

    #[test]
    fn test_routing_and_filters() {
        let cb = ControlBlock::new(studio());
        assert!(cb.is_midi_routing_enabled());
        cb.set_midi_routing_enabled(false);
        assert!(!cb.is_midi_routing_enabled());

        let filter = MidiFilter::blocking(&[crate::midi::MappedEventType::MidiController]);
        cb.set_thru_filter(filter);
        cb.set_record_filter(MidiFilter::NONE);
        assert_eq!(cb.thru_filter(), filter);
        assert_eq!(cb.record_filter(), MidiFilter::NONE);

        cb.set_instrument_for_metronome(2000);
        cb.set_metronome_muted(false);
        assert_eq!(cb.instrument_for_metronome(), 2000);
        assert!(!cb.is_metronome_muted());
    }

    /// Floating thru channels currently held, by track
    fn held_floating_channels(cb: &ControlBlock) -> Vec<i32> {
        (0..=cb.max_track_id())
            .filter_map(|id| cb.track_snapshot(id))
            .filter(|t| t.has_thru_channel && !t.use_fixed_channel)
            .map(|t| t.thru_channel)
            .collect()
    }

    #[test]
    fn test_contended_lookup_degrades_to_invalid() {
        let s = studio();
        let cb = ControlBlock::new(s.clone());
        cb.update_track_data(&track(0, 2001, true));
        cb.set_selected_track(0);
        let channel = cb.track_snapshot(0).unwrap().thru_channel as u8;
        cb.vacate_thru_channel(channel);
        let setups = s.channel_setups().len();

        {
            let _edit = cb.alloc_lock.lock().unwrap();
            assert_eq!(cb.ins_and_chan_for_event(0, 0), InstrumentAndChannel::INVALID);
            assert_eq!(cb.ins_and_chan_for_selected_track(), InstrumentAndChannel::INVALID);
            assert!(!cb.track_snapshot(0).unwrap().has_thru_channel);
            assert_eq!(s.channel_setups().len(), setups);
        }

        // allocated once the edit side lets go
        let resolved = cb.ins_and_chan_for_event(0, 0);
        assert_eq!(resolved.instrument, 2001);
        assert!(resolved.is_valid());
    }

    #[test]
    fn test_concurrent_reads_never_share_a_channel() {
        use std::sync::atomic::AtomicBool;
        use std::thread;

        let cb = Arc::new(ControlBlock::new(studio()));
        let instruments = [2001, 2002, 2001, 2002, 2001];
        for (id, instrument) in instruments.iter().enumerate() {
            cb.update_track_data(&track(id as TrackId, *instrument, false));
        }
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let cb = cb.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut resolved = 0usize;
                let mut lookups = 0usize;
                let mut channel = 0u8;
                while lookups < 2000 || !done.load(Ordering::Acquire) {
                    lookups += 1;
                    let routed = cb.ins_and_chan_for_event(0, channel);
                    if routed.is_valid() {
                        assert!((1..MIDI_CHANNEL_COUNT as i32).contains(&routed.channel));
                        assert!(routed.instrument == 2001 || routed.instrument == 2002);
                        resolved += 1;
                    } else {
                        assert_eq!(routed, InstrumentAndChannel::INVALID);
                    }
                    channel = (channel + 1) % MIDI_CHANNEL_COUNT;
                }
                resolved
            })
        };

        for step in 0..400u32 {
            let id = step % instruments.len() as u32;
            let armed = (step / instruments.len() as u32) % 2 == 0;
            cb.update_track_data(&track(id, instruments[id as usize], armed));
            cb.set_selected_track((step * 7) % instruments.len() as u32);

            let _edit = cb.alloc_lock.lock().unwrap();
            let mut held = held_floating_channels(&cb);
            // channel 0 belongs to the fixed instrument
            assert!(!held.contains(&0));
            let count = held.len();
            held.sort_unstable();
            held.dedup();
            assert_eq!(held.len(), count, "thru channel held twice at step {}", step);
        }

        done.store(true, Ordering::Release);
        let resolved = reader.join().unwrap();
        // the lock is free for most lookups
        assert!(resolved > 0);
    }
}
