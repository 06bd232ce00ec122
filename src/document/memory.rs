// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! In-memory document and studio.
//!
//! Enough of a composition to drive the transport without a host
//! application: 4/4 bars at 960 ticks per quarter, one tempo, tracks,
//! segments and trigger segments. Every mutator notifies the registered
//! listeners the same way a full document would.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::{
    Composition, DeviceId, Document, InstrumentId, InstrumentInfo, InstrumentKind,
    SegmentChange, SegmentId, SegmentKind, SegmentLifecycleListener, SegmentSnapshot, Studio,
    TempoListener, TrackId, TrackLifecycleListener, TrackSnapshot, TriggerSegmentSnapshot,
    MIDI_INSTRUMENT_BASE, NO_TRACK,
};
use crate::midi::{MappedEvent, MappedEventType, MidiFilter};
use crate::sync::Epoch;
use crate::timing::{RealTime, TimeT, DEFAULT_TEMPO_QPM};

/// Ticks per quarter note
pub const TICKS_PER_BEAT: TimeT = 960;
/// Ticks per 4/4 bar
pub const TICKS_PER_BAR: TimeT = TICKS_PER_BEAT * 4;

#[derive(Debug, Clone)]
struct MemorySegment {
    snapshot: SegmentSnapshot,
    events: Vec<MappedEvent>,
}

/// A composition held entirely in memory
pub struct MemoryComposition {
    position: TimeT,
    start_marker: TimeT,
    end_marker: TimeT,
    loop_range: Option<(TimeT, TimeT)>,
    tempo: Option<f64>,
    play_metronome: bool,
    record_metronome: bool,
    metronome_instrument: InstrumentId,
    selected_track: TrackId,
    tracks: BTreeMap<TrackId, TrackSnapshot>,
    segments: BTreeMap<SegmentId, MemorySegment>,
    triggers: BTreeMap<SegmentId, TriggerSegmentSnapshot>,

    segment_listeners: Vec<Arc<dyn SegmentLifecycleListener>>,
    track_listeners: Vec<Arc<dyn TrackLifecycleListener>>,
    tempo_listeners: Vec<Arc<dyn TempoListener>>,

    audio_path_error: Option<String>,
    record_start_time: Option<TimeT>,
    record_segments: Vec<TrackId>,
    finalized_audio_files: Vec<u32>,
    midi_recordings_stopped: usize,
    audio_recordings_stopped: usize,
    playing_stopped: usize,
    audio_latency_updates: usize,
}

impl MemoryComposition {
    /// An empty 100-bar composition
    pub fn new() -> Self {
        Self {
            position: 0,
            start_marker: 0,
            end_marker: TICKS_PER_BAR * 100,
            loop_range: None,
            tempo: None,
            play_metronome: false,
            record_metronome: true,
            metronome_instrument: MIDI_INSTRUMENT_BASE + 9,
            selected_track: NO_TRACK,
            tracks: BTreeMap::new(),
            segments: BTreeMap::new(),
            triggers: BTreeMap::new(),
            segment_listeners: Vec::new(),
            track_listeners: Vec::new(),
            tempo_listeners: Vec::new(),
            audio_path_error: None,
            record_start_time: None,
            record_segments: Vec::new(),
            finalized_audio_files: Vec::new(),
            midi_recordings_stopped: 0,
            audio_recordings_stopped: 0,
            playing_stopped: 0,
            audio_latency_updates: 0,
        }
    }

    pub fn subscribe_segments(&mut self, listener: Arc<dyn SegmentLifecycleListener>) {
        self.segment_listeners.push(listener);
    }

    pub fn subscribe_tracks(&mut self, listener: Arc<dyn TrackLifecycleListener>) {
        self.track_listeners.push(listener);
    }

    pub fn subscribe_tempo(&mut self, listener: Arc<dyn TempoListener>) {
        self.tempo_listeners.push(listener);
    }

    // Tracks

    pub fn add_track(&mut self, track: TrackSnapshot) {
        self.tracks.insert(track.id, track);
        for l in &self.track_listeners {
            l.tracks_added(&[track]);
        }
    }

    pub fn update_track(&mut self, track: TrackSnapshot) {
        self.tracks.insert(track.id, track);
        for l in &self.track_listeners {
            l.track_changed(&track);
        }
    }

    pub fn set_track_armed(&mut self, id: TrackId, armed: bool) {
        if let Some(mut track) = self.tracks.get(&id).copied() {
            track.armed = armed;
            self.update_track(track);
        }
    }

    pub fn remove_track(&mut self, id: TrackId) {
        if self.tracks.remove(&id).is_some() {
            for l in &self.track_listeners {
                l.tracks_deleted(&[id]);
            }
        }
    }

    pub fn select_track(&mut self, id: TrackId) {
        self.selected_track = id;
        for l in &self.track_listeners {
            l.selected_track_changed(id);
        }
    }

    // Segments

    /// Add a segment holding a single note
    pub fn add_segment(&mut self, track: TrackId, kind: SegmentKind) -> SegmentId {
        let note = MappedEvent::new(0, MappedEventType::MidiNote, 60, 100);
        self.add_segment_with_events(track, kind, vec![note])
    }

    pub fn add_segment_with_events(
        &mut self,
        track: TrackId,
        kind: SegmentKind,
        events: Vec<MappedEvent>,
    ) -> SegmentId {
        let id = SegmentId::allocate();
        let snapshot = SegmentSnapshot {
            id,
            track,
            kind,
            epoch: Epoch::issue(),
        };
        self.segments.insert(id, MemorySegment { snapshot, events });
        for l in &self.segment_listeners {
            l.segment_added(id);
        }
        id
    }

    /// Drop a segment; listeners hear about it after it is gone
    pub fn remove_segment(&mut self, id: SegmentId) {
        if self.segments.remove(&id).is_some() {
            for trigger in self.triggers.values_mut() {
                trigger.references.remove(&id);
            }
            for l in &self.segment_listeners {
                l.segment_removed(id);
            }
        }
    }

    /// Replace a segment's content
    pub fn edit_segment(&mut self, id: SegmentId, events: Vec<MappedEvent>) {
        if let Some(segment) = self.segments.get_mut(&id) {
            segment.events = events;
            segment.snapshot.epoch = Epoch::issue();
            for l in &self.segment_listeners {
                l.segment_content_changed(id);
            }
        }
    }

    /// Touch a segment's content without changing it
    pub fn touch_segment(&mut self, id: SegmentId) {
        if let Some(segment) = self.segments.get_mut(&id) {
            segment.snapshot.epoch = Epoch::issue();
            for l in &self.segment_listeners {
                l.segment_content_changed(id);
            }
        }
    }

    pub fn set_segment_repeat(&mut self, id: SegmentId, repeat: bool) {
        if self.segments.contains_key(&id) {
            for l in &self.segment_listeners {
                l.segment_changed(id, SegmentChange::Repeat(repeat));
            }
        }
    }

    pub fn move_segment(&mut self, id: SegmentId, track: TrackId) {
        if let Some(segment) = self.segments.get_mut(&id) {
            segment.snapshot.track = track;
            let kind = segment.snapshot.kind;
            for l in &self.segment_listeners {
                l.segment_changed(id, SegmentChange::Track { track, kind });
            }
        }
    }

    pub fn retime_segment(&mut self, id: SegmentId) {
        if let Some(segment) = self.segments.get(&id) {
            let kind = segment.snapshot.kind;
            for l in &self.segment_listeners {
                l.segment_changed(id, SegmentChange::EventsTiming { kind });
            }
        }
    }

    // Trigger segments

    /// Add a trigger segment used by `references`
    pub fn add_trigger_segment(&mut self, references: &[SegmentId]) -> SegmentId {
        let id = SegmentId::allocate();
        self.triggers.insert(
            id,
            TriggerSegmentSnapshot {
                id,
                epoch: Epoch::issue(),
                references: references.iter().copied().collect(),
            },
        );
        id
    }

    pub fn add_trigger_reference(&mut self, trigger: SegmentId, segment: SegmentId) {
        if let Some(t) = self.triggers.get_mut(&trigger) {
            t.references.insert(segment);
        }
    }

    /// Edit a trigger segment; its users go stale on the next pass
    pub fn edit_trigger_segment(&mut self, trigger: SegmentId) {
        if let Some(t) = self.triggers.get_mut(&trigger) {
            t.epoch = Epoch::issue();
            for l in &self.segment_listeners {
                l.segment_content_changed(trigger);
            }
        }
    }

    // Timeline

    pub fn set_tempo(&mut self, qpm: f64) {
        self.tempo = Some(qpm);
        for l in &self.tempo_listeners {
            l.tempo_changed();
        }
    }

    pub fn change_time_signature(&mut self) {
        for l in &self.tempo_listeners {
            l.time_signature_changed();
        }
    }

    pub fn set_end_marker(&mut self, end: TimeT) {
        let shorten = end < self.end_marker;
        self.end_marker = end;
        for l in &self.tempo_listeners {
            l.end_marker_changed(shorten);
        }
    }

    pub fn set_start_marker(&mut self, start: TimeT) {
        self.start_marker = start;
    }

    pub fn set_loop(&mut self, range: Option<(TimeT, TimeT)>) {
        self.loop_range = range;
    }

    pub fn set_play_metronome(&mut self, on: bool) {
        self.play_metronome = on;
        for l in &self.tempo_listeners {
            l.metronome_changed();
        }
    }

    pub fn set_record_metronome(&mut self, on: bool) {
        self.record_metronome = on;
        for l in &self.tempo_listeners {
            l.metronome_changed();
        }
    }

    pub fn set_metronome_instrument(&mut self, instrument: InstrumentId) {
        self.metronome_instrument = instrument;
    }

    // Recording hooks, for inspection

    /// Make the audio record path check fail with `reason`
    pub fn set_audio_path_error(&mut self, reason: Option<String>) {
        self.audio_path_error = reason;
    }

    pub fn record_start_time(&self) -> Option<TimeT> {
        self.record_start_time
    }

    /// Tracks that got a placeholder record segment
    pub fn record_segments(&self) -> &[TrackId] {
        &self.record_segments
    }

    pub fn finalized_audio_files(&self) -> &[u32] {
        &self.finalized_audio_files
    }

    pub fn midi_recordings_stopped(&self) -> usize {
        self.midi_recordings_stopped
    }

    pub fn audio_recordings_stopped(&self) -> usize {
        self.audio_recordings_stopped
    }

    pub fn playing_stopped(&self) -> usize {
        self.playing_stopped
    }

    pub fn audio_latency_updates(&self) -> usize {
        self.audio_latency_updates
    }

    fn tempo_or_default(&self) -> f64 {
        self.tempo.filter(|t| *t > 0.0).unwrap_or(DEFAULT_TEMPO_QPM)
    }
}

impl Default for MemoryComposition {
    fn default() -> Self {
        Self::new()
    }
}

impl Composition for MemoryComposition {
    fn position(&self) -> TimeT {
        self.position
    }

    fn set_position(&mut self, time: TimeT) {
        self.position = time;
    }

    fn start_marker(&self) -> TimeT {
        self.start_marker
    }

    fn end_marker(&self) -> TimeT {
        self.end_marker
    }

    fn loop_range(&self) -> Option<(TimeT, TimeT)> {
        self.loop_range
    }

    fn bar_range_for_time(&self, time: TimeT) -> (TimeT, TimeT) {
        self.bar_range(self.bar_number(time))
    }

    fn bar_number(&self, time: TimeT) -> i32 {
        time.div_euclid(TICKS_PER_BAR) as i32
    }

    fn bar_range(&self, bar: i32) -> (TimeT, TimeT) {
        let start = bar as TimeT * TICKS_PER_BAR;
        (start, start + TICKS_PER_BAR)
    }

    fn elapsed_real_time(&self, time: TimeT) -> RealTime {
        let beats = time as f64 / TICKS_PER_BEAT as f64;
        RealTime::from_secs_f64(beats * 60.0 / self.tempo_or_default())
    }

    fn current_tempo(&self) -> Option<f64> {
        self.tempo
    }

    fn set_default_tempo(&mut self, qpm: f64) {
        self.tempo = Some(qpm);
    }

    fn use_play_metronome(&self) -> bool {
        self.play_metronome
    }

    fn use_record_metronome(&self) -> bool {
        self.record_metronome
    }

    fn metronome_instrument(&self) -> InstrumentId {
        self.metronome_instrument
    }

    fn selected_track(&self) -> TrackId {
        self.selected_track
    }

    fn tracks(&self) -> Vec<TrackSnapshot> {
        self.tracks.values().copied().collect()
    }

    fn track(&self, id: TrackId) -> Option<TrackSnapshot> {
        self.tracks.get(&id).copied()
    }

    fn record_tracks(&self) -> Vec<TrackId> {
        self.tracks.values().filter(|t| t.armed).map(|t| t.id).collect()
    }

    fn segments(&self) -> Vec<SegmentSnapshot> {
        self.segments.values().map(|s| s.snapshot.clone()).collect()
    }

    fn segment(&self, id: SegmentId) -> Option<SegmentSnapshot> {
        self.segments.get(&id).map(|s| s.snapshot.clone())
    }

    fn trigger_segments(&self) -> Vec<TriggerSegmentSnapshot> {
        self.triggers.values().cloned().collect()
    }

    fn render_segment(&self, id: SegmentId) -> Vec<MappedEvent> {
        let Some(segment) = self.segments.get(&id) else {
            return Vec::new();
        };
        let instrument = self
            .tracks
            .get(&segment.snapshot.track)
            .map(|t| t.instrument)
            .unwrap_or(0);
        segment
            .events
            .iter()
            .cloned()
            .map(|mut e| {
                e.instrument = instrument;
                e
            })
            .collect()
    }

    fn render_metronome(&self) -> Vec<MappedEvent> {
        (self.start_marker..self.end_marker)
            .step_by(TICKS_PER_BEAT as usize)
            .map(|t| {
                let downbeat = t.rem_euclid(TICKS_PER_BAR) == 0;
                let (pitch, velocity) = if downbeat { (37, 120) } else { (37, 80) };
                MappedEvent::new(
                    self.metronome_instrument,
                    MappedEventType::MidiNoteOneShot,
                    pitch,
                    velocity,
                )
                .at(self.elapsed_real_time(t))
            })
            .collect()
    }

    fn render_tempo_map(&self) -> Vec<MappedEvent> {
        let qpm = self.tempo_or_default().round().clamp(0.0, 255.0) as u8;
        vec![MappedEvent::new(0, MappedEventType::Tempo, qpm, 0)]
    }

    fn render_time_signatures(&self) -> Vec<MappedEvent> {
        vec![MappedEvent::new(0, MappedEventType::TimeSignature, 4, 4)]
    }
}

impl Document for MemoryComposition {
    fn add_record_midi_segment(&mut self, track: TrackId) {
        self.record_segments.push(track);
    }

    fn stop_recording_midi(&mut self) {
        self.midi_recordings_stopped += 1;
    }

    fn stop_recording_audio(&mut self) {
        self.audio_recordings_stopped += 1;
    }

    fn stop_playing(&mut self) {
        self.playing_stopped += 1;
    }

    fn set_record_start_time(&mut self, time: TimeT) {
        self.record_start_time = Some(time);
    }

    fn update_audio_record_latency(&mut self) {
        self.audio_latency_updates += 1;
    }

    fn test_audio_path(&self) -> Result<(), String> {
        match &self.audio_path_error {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    fn finalize_audio_file(&mut self, file_id: u32) {
        self.finalized_audio_files.push(file_id);
    }
}

/// A thread-safe in-memory studio
#[derive(Debug)]
pub struct MemoryStudio {
    instruments: RwLock<BTreeMap<InstrumentId, InstrumentInfo>>,
    channel_setups: Mutex<Vec<(InstrumentId, u8)>>,
    thru_filter: AtomicU32,
    preview_instrument: AtomicU32,
}

impl MemoryStudio {
    pub fn new() -> Self {
        Self {
            instruments: RwLock::new(BTreeMap::new()),
            channel_setups: Mutex::new(Vec::new()),
            thru_filter: AtomicU32::new(MidiFilter::NONE.0),
            preview_instrument: AtomicU32::new(0),
        }
    }

    /// Add or replace an instrument
    pub fn add_instrument(&self, info: InstrumentInfo) {
        if let Ok(mut instruments) = self.instruments.write() {
            instruments.insert(info.id, info);
        }
    }

    pub fn remove_instrument(&self, id: InstrumentId) {
        if let Ok(mut instruments) = self.instruments.write() {
            instruments.remove(&id);
        }
    }

    pub fn set_midi_thru_filter(&self, filter: MidiFilter) {
        self.thru_filter.store(filter.0, Ordering::Relaxed);
    }

    pub fn set_audio_preview_instrument(&self, id: InstrumentId) {
        self.preview_instrument.store(id, Ordering::Relaxed);
    }

    /// Channel setups sent so far, oldest first
    pub fn channel_setups(&self) -> Vec<(InstrumentId, u8)> {
        self.channel_setups
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryStudio {
    fn default() -> Self {
        Self::new()
    }
}

impl Studio for MemoryStudio {
    fn instrument(&self, id: InstrumentId) -> Option<InstrumentInfo> {
        self.instruments.read().ok()?.get(&id).copied()
    }

    fn instruments(&self) -> Vec<InstrumentInfo> {
        self.instruments
            .read()
            .map(|i| i.values().copied().collect())
            .unwrap_or_default()
    }

    fn reserved_channels(&self, device: DeviceId) -> u16 {
        let Ok(instruments) = self.instruments.read() else {
            return 0;
        };
        let mut by_device: HashMap<DeviceId, u16> = HashMap::new();
        for info in instruments.values() {
            if info.kind != InstrumentKind::Audio && info.fixed_channel && info.natural_channel < 16 {
                *by_device.entry(info.device).or_default() |= 1 << info.natural_channel;
            }
        }
        by_device.get(&device).copied().unwrap_or(0)
    }

    fn send_channel_setup(&self, instrument: InstrumentId, channel: u8) {
        if let Ok(mut setups) = self.channel_setups.lock() {
            setups.push((instrument, channel));
        }
    }

    fn midi_thru_filter(&self) -> MidiFilter {
        MidiFilter(self.thru_filter.load(Ordering::Relaxed))
    }

    fn audio_preview_instrument(&self) -> InstrumentId {
        self.preview_instrument.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        added: Mutex<Vec<SegmentId>>,
        removed: Mutex<Vec<SegmentId>>,
    }

    impl SegmentLifecycleListener for Recorder {
        fn segment_added(&self, segment: SegmentId) {
            self.added.lock().unwrap().push(segment);
        }
        fn segment_removed(&self, segment: SegmentId) {
            self.removed.lock().unwrap().push(segment);
        }
        fn segment_changed(&self, _segment: SegmentId, _change: SegmentChange) {}
        fn segment_content_changed(&self, _segment: SegmentId) {}
    }

    #[test]
    fn test_bar_arithmetic() {
        let comp = MemoryComposition::new();
        assert_eq!(comp.bar_number(0), 0);
        assert_eq!(comp.bar_number(TICKS_PER_BAR + 1), 1);
        assert_eq!(comp.bar_number(-1), -1);
        assert_eq!(comp.bar_range_for_time(TICKS_PER_BAR * 2 + 5), (TICKS_PER_BAR * 2, TICKS_PER_BAR * 3));
    }

    #[test]
    fn test_elapsed_real_time_uses_tempo() {
        let mut comp = MemoryComposition::new();
        // default 120 qpm: one beat is half a second
        assert_eq!(comp.elapsed_real_time(TICKS_PER_BEAT), RealTime::from_millis(500));
        comp.set_default_tempo(60.0);
        assert_eq!(comp.elapsed_real_time(TICKS_PER_BEAT), RealTime::new(1, 0));
    }

    #[test]
    fn test_listeners_hear_segment_lifecycle() {
        let mut comp = MemoryComposition::new();
        let recorder = Arc::new(Recorder::default());
        comp.subscribe_segments(recorder.clone());

        let id = comp.add_segment(0, SegmentKind::Internal);
        comp.remove_segment(id);
        comp.remove_segment(id);

        assert_eq!(*recorder.added.lock().unwrap(), vec![id]);
        assert_eq!(*recorder.removed.lock().unwrap(), vec![id]);
        assert!(comp.segment(id).is_none());
    }

    #[test]
    fn test_edit_moves_epoch() {
        let mut comp = MemoryComposition::new();
        let id = comp.add_segment(0, SegmentKind::Internal);
        let before = comp.segment(id).unwrap().epoch;
        comp.edit_segment(id, Vec::new());
        assert!(comp.segment(id).unwrap().epoch > before);
        assert!(comp.render_segment(id).is_empty());
    }

    #[test]
    fn test_render_uses_track_instrument() {
        let mut comp = MemoryComposition::new();
        comp.add_track(TrackSnapshot::new(3, 2005));
        let id = comp.add_segment(3, SegmentKind::Internal);
        let events = comp.render_segment(id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].instrument, 2005);
    }

    #[test]
    fn test_record_tracks_are_armed_tracks() {
        let mut comp = MemoryComposition::new();
        comp.add_track(TrackSnapshot::new(0, 2000));
        comp.add_track(TrackSnapshot::new(1, 2001));
        comp.set_track_armed(1, true);
        assert_eq!(comp.record_tracks(), vec![1]);
    }

    #[test]
    fn test_studio_reserved_channels() {
        let studio = MemoryStudio::new();
        studio.add_instrument(InstrumentInfo::midi(2000, 0, 0));
        studio.add_instrument(InstrumentInfo::midi(2001, 0, 9));
        studio.add_instrument(InstrumentInfo::midi(2002, 0, 3).with_floating_channel());
        studio.add_instrument(InstrumentInfo::midi(2016, 1, 4));
        assert_eq!(studio.reserved_channels(0), (1 << 0) | (1 << 9));
        assert_eq!(studio.reserved_channels(1), 1 << 4);
        assert_eq!(studio.reserved_channels(7), 0);
    }
}
