// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! The transport state machine.
//!
//! `SequenceManager` turns play/record/stop requests into engine calls,
//! keeps the engine's segment buffers in step with the document through
//! the synchronizer, and routes what the engine sends back (incoming MIDI,
//! meters, failures) to `TransportEvent`s.
//!
//! Every operation that touches the document takes it as an argument; the
//! manager holds no reference into it.

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::{
    MessageLevel, SharedTransportStatus, TransportError, TransportEvent, TransportStatus, WarningKind,
};
use crate::config::SequencerSettings;
use crate::control::ControlBlock;
use crate::document::{
    Composition, Document, InstrumentId, InstrumentInfo, InstrumentKind, SegmentId, Studio, TrackId,
    CONTROL_DEVICE, MIDI_INSTRUMENT_BASE,
};
use crate::engine::{BufferKey, DriverStatus, LatencyProfile, PlayRequest, SequencerEngine};
use crate::failure::report::messages;
use crate::failure::{FailureRouter, ProcessWarnings};
use crate::midi::{self, MappedEvent, MappedEventType, MidiFilter, MIDI_CHANNEL_COUNT};
use crate::sync::{ChangeQueue, SegmentSynchronizer, SyncReport};
use crate::timing::{quarter_note_length, TimeT, DEFAULT_TEMPO_QPM};

/// Two rewinds closer together than this skip back an extra bar
pub const DOUBLE_REWIND_WINDOW: Duration = Duration::from_millis(200);

/// `SystemAudioPorts` flag: per-fader outputs
pub const AUDIO_PORTS_FADER_OUTS: u8 = 1 << 0;
/// `SystemAudioPorts` flag: submaster outputs
pub const AUDIO_PORTS_SUBMASTER_OUTS: u8 = 1 << 1;

#[derive(Debug, Clone, Copy)]
struct RecordCountdown {
    started_at: Instant,
    total_secs: i32,
}

/// Armed-track instruments found when recording starts
#[derive(Debug, Default)]
struct RecordTargets {
    midi: Vec<(TrackId, InstrumentInfo)>,
    have_audio: bool,
}

impl RecordTargets {
    fn is_empty(&self) -> bool {
        self.midi.is_empty() && !self.have_audio
    }
}

/// Owns the transport for one session
pub struct SequenceManager {
    engine: Arc<dyn SequencerEngine>,
    control: Arc<ControlBlock>,
    queue: Arc<ChangeQueue>,
    sync: SegmentSynchronizer,
    status: SharedTransportStatus,
    event_sender: Sender<TransportEvent>,
    event_receiver: Receiver<TransportEvent>,
    router: FailureRouter,
    settings: SequencerSettings,

    last_transport_start_position: TimeT,
    last_rewound_at: Option<Instant>,
    last_low_latency_sent: Option<bool>,
    tempo: Option<f64>,
    sample_rate: Option<u32>,
    driver_status: DriverStatus,
    record_countdown: Option<RecordCountdown>,
}

impl SequenceManager {
    pub fn new(
        engine: Arc<dyn SequencerEngine>,
        studio: Arc<dyn Studio>,
        settings: SequencerSettings,
    ) -> Self {
        let control = Arc::new(ControlBlock::new(studio));
        let queue = Arc::new(ChangeQueue::new(control.clone()));
        let (event_sender, event_receiver) = mpsc::channel();
        let mut router = FailureRouter::new();
        router.set_timer_setting(&settings.sequencer.timer);
        let driver_status = engine.driver_status();

        Self {
            sync: SegmentSynchronizer::new(engine.clone()),
            engine,
            control,
            queue,
            status: SharedTransportStatus::new(),
            event_sender,
            event_receiver,
            router,
            settings,
            last_transport_start_position: 0,
            last_rewound_at: None,
            last_low_latency_sent: None,
            tempo: None,
            sample_rate: None,
            driver_status,
            record_countdown: None,
        }
    }

    /// Use a separate set of once-per-process warning flags
    pub fn with_process_warnings(mut self, warnings: &'static ProcessWarnings) -> Self {
        let mut router = FailureRouter::with_process_warnings(warnings);
        router.set_timer_setting(&self.settings.sequencer.timer);
        self.router = router;
        self
    }

    // Accessors

    pub fn status(&self) -> TransportStatus {
        self.status.get()
    }

    /// Status handle readable from other threads
    pub fn shared_status(&self) -> SharedTransportStatus {
        self.status.clone()
    }

    pub fn control(&self) -> &Arc<ControlBlock> {
        &self.control
    }

    /// Register this with the document's segment, track and tempo notifications
    pub fn queue(&self) -> &Arc<ChangeQueue> {
        &self.queue
    }

    pub fn synchronizer(&self) -> &SegmentSynchronizer {
        &self.sync
    }

    pub fn settings(&self) -> &SequencerSettings {
        &self.settings
    }

    /// Driver status as of the last check
    pub fn driver_status(&self) -> DriverStatus {
        self.driver_status
    }

    pub fn tempo(&self) -> Option<f64> {
        self.tempo
    }

    /// Try to receive the next notification (non-blocking)
    pub fn try_recv(&self) -> Option<TransportEvent> {
        self.event_receiver.try_recv().ok()
    }

    /// Receive all pending notifications
    pub fn recv_all(&self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    fn emit(&self, event: TransportEvent) {
        // the receiver lives as long as we do
        let _ = self.event_sender.send(event);
    }

    fn set_status(&self, status: TransportStatus) {
        let previous = self.status.get();
        if previous != status {
            debug!(?previous, ?status, "transport status");
        }
        self.status.set(status);
    }

    // Document attachment

    /// Take on a new composition: reload track control data and push every
    /// segment to the engine from scratch
    pub fn attach(&mut self, composition: &dyn Composition) -> SyncReport {
        info!(segments = composition.segments().len(), "attaching composition");
        let _ = self.queue.take_request();
        let _ = self.queue.take_pending();
        self.control.load_composition(composition);
        self.control.set_instrument_for_metronome(composition.metronome_instrument());
        self.sync.reset(composition)
    }

    /// Run the deferred synchronization pass if one was requested.
    ///
    /// Call once per scheduling tick, or after awaiting
    /// `queue().pass_requested()`.
    pub fn run_scheduled_pass(&mut self, composition: &dyn Composition) -> Option<SyncReport> {
        if !self.queue.take_request() {
            return None;
        }
        let pending = self.queue.take_pending();
        let status = self.status();
        let mut report = SyncReport::default();

        if pending.end_marker_changed.is_some() {
            if status == TransportStatus::Recording {
                if self.sync.refresh_metronome(composition) {
                    report.pseudo_refreshed.push(BufferKey::Metronome);
                }
            } else {
                self.control.load_composition(composition);
                report.merge(self.sync.reset(composition));
            }
        }

        report.merge(self.sync.run_pass(composition, &pending));

        if pending.tempo_changed {
            let fresh: BTreeSet<SegmentId> =
                report.modified.iter().chain(&report.added).copied().collect();
            report.merge(self.sync.refresh_segments_except(composition, &fresh));
            report
                .pseudo_refreshed
                .extend(self.sync.refresh_pseudo_segments(composition));
            if let Some((start, end)) = composition.loop_range() {
                self.set_loop(composition, start, end);
            } else if status == TransportStatus::Playing {
                // keep musical position under the new tempo
                self.engine
                    .jump_to(composition.elapsed_real_time(composition.position()));
            }
            if let Some(qpm) = composition.current_tempo() {
                self.set_tempo(qpm);
            }
        }

        if pending.time_signature_changed {
            if self.sync.refresh_metronome(composition) {
                report.pseudo_refreshed.push(BufferKey::Metronome);
            }
            if self.sync.refresh_time_signatures(composition) {
                report.pseudo_refreshed.push(BufferKey::TimeSignature);
            }
        }

        if pending.metronome_changed {
            self.update_metronome_mute(composition);
            if self.sync.refresh_metronome(composition) {
                report.pseudo_refreshed.push(BufferKey::Metronome);
            }
        }

        if pending.remap_tracks && status == TransportStatus::Playing {
            self.engine.remap_tracks();
        }

        Some(report)
    }

    // Transport

    /// Start playback, or stop if already playing or recording
    pub fn play(&mut self, doc: &mut dyn Document) -> Result<(), TransportError> {
        if matches!(self.status(), TransportStatus::Playing | TransportStatus::Recording) {
            self.stopping(doc);
            return Ok(());
        }

        self.check_sound_driver_status(false);
        if !self.driver_status.can_sequence() {
            warn!(status = ?self.driver_status, "cannot play without a sound driver");
            return Err(TransportError::DriverUnavailable(self.driver_status));
        }

        self.prepare_playback();
        self.last_transport_start_position = doc.position();

        self.control.set_instrument_for_metronome(doc.metronome_instrument());
        self.control.set_metronome_muted(!doc.use_play_metronome());

        self.emit(TransportEvent::PlayingChanged(true));
        self.resolve_tempo(doc);

        let start = match doc.loop_range() {
            Some((loop_start, _)) => doc.elapsed_real_time(loop_start),
            None => doc.elapsed_real_time(doc.position()),
        };
        let request = self.play_request(start);

        match self.engine.play(&request) {
            Ok(()) => {
                self.set_status(TransportStatus::StartingToPlay);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to start playback");
                self.set_status(TransportStatus::Stopped);
                self.emit(TransportEvent::PlayingChanged(false));
                Err(TransportError::PlaybackStartFailed)
            }
        }
    }

    /// The stop button: stop if running, disarm if armed, otherwise return
    /// the pointer to where the last run started
    pub fn stopping(&mut self, doc: &mut dyn Document) {
        self.record_countdown = None;
        match self.status() {
            TransportStatus::Stopped => {
                let target = self.last_transport_start_position;
                self.set_pointer_position(doc, target);
            }
            _ => {
                self.stop(doc);
                self.router.reset_run();
            }
        }
    }

    /// Stop the engine and finalize whatever was being recorded.
    ///
    /// Blocks until the engine has stopped. Calling it while stopped does
    /// nothing beyond withdrawing buffers of segments already removed.
    pub fn stop(&mut self, doc: &mut dyn Document) {
        match self.status() {
            TransportStatus::Stopped => {}
            TransportStatus::RecordingArmed => self.disarm(doc),
            status => {
                let was_recording = matches!(
                    status,
                    TransportStatus::Recording | TransportStatus::StartingToRecord
                );
                if was_recording {
                    self.emit(TransportEvent::RecordingChanged(false));
                    self.emit(TransportEvent::MetronomeActivated(doc.use_play_metronome()));
                    self.record_countdown = None;
                }
                self.emit(TransportEvent::PlayingChanged(false));

                self.engine.stop();
                self.set_status(TransportStatus::Stopped);

                if was_recording {
                    doc.stop_recording_midi();
                    doc.stop_recording_audio();
                } else {
                    doc.stop_playing();
                }
            }
        }

        let removed = self.queue.take_removed();
        if !removed.is_empty() {
            self.sync.remove_segments(removed);
        }
    }

    /// Arm, disarm, punch in or out (`toggled`), or start recording
    pub fn record(&mut self, doc: &mut dyn Document, toggled: bool) -> Result<(), TransportError> {
        self.record_at(doc, toggled, Instant::now())
    }

    pub fn record_at(
        &mut self,
        doc: &mut dyn Document,
        toggled: bool,
        now: Instant,
    ) -> Result<(), TransportError> {
        let studio = self.control.studio().clone();

        let audio_armed = doc.record_tracks().into_iter().any(|track| {
            armed_instrument(&*doc, studio.as_ref(), track)
                .map_or(false, |info| info.kind == InstrumentKind::Audio)
        });
        if audio_armed {
            if !self.driver_status.audio_ok() {
                warn!("audio subsystem unavailable, cannot record audio");
                self.emit(TransportEvent::RecordingChanged(false));
                return Err(TransportError::AudioUnavailable);
            }
            doc.test_audio_path().map_err(TransportError::BadAudioPath)?;
        }

        let mut punch_in = false;
        if toggled {
            match self.status() {
                TransportStatus::RecordingArmed => {
                    self.disarm(doc);
                    return Ok(());
                }
                TransportStatus::Stopped => {
                    self.set_status(TransportStatus::RecordingArmed);
                    self.emit(TransportEvent::MetronomeActivated(doc.use_record_metronome()));
                    self.emit(TransportEvent::RecordingChanged(true));
                    return Ok(());
                }
                TransportStatus::Recording => {
                    self.punch_out(doc);
                    return Ok(());
                }
                TransportStatus::Playing => punch_in = true,
                _ => return Ok(()),
            }
        } else {
            self.last_transport_start_position = doc.position();
        }

        self.start_recording(doc, studio.as_ref(), punch_in, now)
    }

    fn start_recording(
        &mut self,
        doc: &mut dyn Document,
        studio: &dyn Studio,
        punch_in: bool,
        now: Instant,
    ) -> Result<(), TransportError> {
        let mut targets = RecordTargets::default();
        for track in doc.record_tracks() {
            match armed_instrument(&*doc, studio, track) {
                Some(info) if info.kind == InstrumentKind::Audio => targets.have_audio = true,
                Some(info) => targets.midi.push((track, info)),
                None => {}
            }
        }
        if targets.is_empty() {
            return Err(TransportError::NothingArmed);
        }

        self.check_sound_driver_status(false);
        if !self.driver_status.can_sequence() {
            return Err(TransportError::DriverUnavailable(self.driver_status));
        }

        self.emit(TransportEvent::MetronomeActivated(doc.use_record_metronome()));
        self.control.set_instrument_for_metronome(doc.metronome_instrument());
        self.control.set_metronome_muted(!doc.use_record_metronome());

        if let Some((loop_start, _)) = doc.loop_range() {
            self.set_pointer_position(doc, loop_start);
        } else if self.status() != TransportStatus::RecordingArmed && !punch_in {
            let count_in = self.settings.general.count_in();
            let (start, _) = doc.bar_range(doc.bar_number(doc.position()).saturating_sub(count_in));
            self.set_pointer_position(doc, start);
        }

        doc.set_record_start_time(doc.position());
        if targets.have_audio {
            doc.update_audio_record_latency();
        }

        // placeholders now so there is something to show before the first note
        for (track, info) in &targets.midi {
            doc.add_record_midi_segment(*track);
            if info.kind == InstrumentKind::Midi {
                studio.send_channel_setup(info.id, info.natural_channel);
            }
        }

        self.emit(TransportEvent::RecordingChanged(true));
        self.emit(TransportEvent::PlayingChanged(true));
        self.resolve_tempo(doc);

        let position = doc.position();
        let request = self.play_request(doc.elapsed_real_time(position));

        match self.engine.record(&request, TransportStatus::StartingToRecord) {
            Ok(()) => {
                self.set_status(TransportStatus::StartingToRecord);
                let remaining =
                    doc.elapsed_real_time(doc.end_marker()) - doc.elapsed_real_time(position);
                self.record_countdown = Some(RecordCountdown {
                    started_at: now,
                    total_secs: remaining.sec,
                });
                info!(
                    midi_tracks = targets.midi.len(),
                    audio = targets.have_audio,
                    punch_in,
                    "recording requested"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, audio = targets.have_audio, "failed to start recording");
                self.set_status(TransportStatus::Stopped);
                self.emit(TransportEvent::RecordingChanged(false));
                self.emit(TransportEvent::PlayingChanged(false));
                Err(TransportError::RecordStartFailed {
                    audio: targets.have_audio,
                })
            }
        }
    }

    fn punch_out(&mut self, doc: &mut dyn Document) {
        let still_playing = self.engine.punch_out();
        if still_playing {
            self.set_status(TransportStatus::Playing);
        } else {
            self.set_status(TransportStatus::Stopped);
            self.emit(TransportEvent::PlayingChanged(false));
        }
        self.record_countdown = None;
        self.emit(TransportEvent::RecordingChanged(false));
        doc.stop_recording_midi();
        doc.stop_recording_audio();
    }

    fn disarm(&mut self, doc: &dyn Document) {
        self.set_status(TransportStatus::Stopped);
        self.emit(TransportEvent::MetronomeActivated(doc.use_play_metronome()));
        self.emit(TransportEvent::RecordingChanged(false));
    }

    /// Seconds recorded so far and seconds available, while recording
    pub fn record_countdown(&self) -> Option<(u64, i32)> {
        self.record_countdown_at(Instant::now())
    }

    pub fn record_countdown_at(&self, now: Instant) -> Option<(u64, i32)> {
        self.record_countdown.map(|c| {
            (
                now.saturating_duration_since(c.started_at).as_secs(),
                c.total_secs,
            )
        })
    }

    /// Engine confirmation of a transport state
    pub fn notify_sequencer_status(&mut self, status: TransportStatus) {
        self.set_status(status);
        if status == TransportStatus::Stopped {
            self.record_countdown = None;
        }
    }

    // Positioning

    /// Move the pointer, following with the engine while it runs
    pub fn set_pointer_position(&mut self, doc: &mut dyn Document, time: TimeT) {
        doc.set_position(time);
        if self.status().is_running() {
            self.engine.jump_to(doc.elapsed_real_time(time));
        }
    }

    /// Back to the start of the bar, or the bar before on a quick second press
    pub fn rewind(&mut self, doc: &mut dyn Document) {
        self.rewind_at(doc, Instant::now());
    }

    pub fn rewind_at(&mut self, doc: &mut dyn Document, now: Instant) {
        let position = doc.position();
        let (mut start, end) = doc.bar_range_for_time(position - 1);

        if self.status() == TransportStatus::Playing {
            let quick = self
                .last_rewound_at
                .map_or(false, |at| now.saturating_duration_since(at) <= DOUBLE_REWIND_WINDOW);
            // early in the bar the first press only reached this bar's start
            if quick && position > start && position < end && position <= start + (end - start) / 2 {
                start = doc.bar_range_for_time(start - 1).0;
            }
            self.last_rewound_at = Some(now);
        }

        let target = start.max(doc.start_marker());
        self.set_pointer_position(doc, target);
    }

    /// Forward to the start of the next bar
    pub fn fastforward(&mut self, doc: &mut dyn Document) {
        let (_, end) = doc.bar_range_for_time(doc.position() + 1);
        let target = end.min(doc.end_marker());
        self.set_pointer_position(doc, target);
    }

    pub fn rewind_to_beginning(&mut self, doc: &mut dyn Document) {
        let start = doc.start_marker();
        self.set_pointer_position(doc, start);
    }

    pub fn fast_forward_to_end(&mut self, doc: &mut dyn Document) {
        let end = doc.end_marker();
        self.set_pointer_position(doc, end);
    }

    pub fn set_loop(&self, composition: &dyn Composition, start: TimeT, end: TimeT) {
        self.engine.set_loop(
            composition.elapsed_real_time(start),
            composition.elapsed_real_time(end),
        );
    }

    // Engine setup

    /// Send the quarter note length for `qpm` if the tempo changed
    pub fn set_tempo(&mut self, qpm: f64) {
        if self.tempo == Some(qpm) {
            return;
        }
        self.tempo = Some(qpm);
        self.engine.set_quarter_note_length(quarter_note_length(qpm));
        self.emit(TransportEvent::TempoChanged(qpm));
    }

    fn resolve_tempo(&mut self, doc: &mut dyn Document) {
        let qpm = match doc.current_tempo() {
            Some(qpm) if qpm > 0.0 => qpm,
            _ => {
                doc.set_default_tempo(DEFAULT_TEMPO_QPM);
                DEFAULT_TEMPO_QPM
            }
        };
        self.set_tempo(qpm);
    }

    fn play_request(&mut self, start: crate::timing::RealTime) -> PlayRequest {
        let low_latency = self.settings.sequencer.audio_low_latency_monitoring;
        if self.last_low_latency_sent != Some(low_latency) {
            self.engine.set_low_latency_mode(low_latency);
            self.last_low_latency_sent = Some(low_latency);
        }
        PlayRequest {
            start,
            latency: LatencyProfile::for_mode(low_latency),
        }
    }

    /// Bring the engine's instruments in line with the studio
    pub fn prepare_playback(&self) {
        for instrument in self.control.studio().instruments() {
            self.engine.send_mapped_instrument(&instrument);
        }
    }

    /// Refresh the cached driver status, warning the user if asked to
    pub fn check_sound_driver_status(&mut self, warn_user: bool) -> DriverStatus {
        self.driver_status = self.engine.driver_status();
        debug!(status = ?self.driver_status, "sound driver status");

        if !warn_user || self.driver_status == DriverStatus::all_ok() {
            return self.driver_status;
        }

        let midi_warning = if self.driver_status == DriverStatus::NO_DRIVER {
            Some((messages::NO_SEQUENCER, messages::NO_SEQUENCER_INFO))
        } else if !self.driver_status.midi_ok() {
            Some((messages::NO_MIDI, messages::NO_MIDI_INFO))
        } else {
            None
        };
        if let Some((text, informative)) = midi_warning {
            warn!("{}", text);
            self.emit(TransportEvent::Warning {
                kind: WarningKind::Midi,
                text: text.to_string(),
                informative: informative.to_string(),
            });
            return self.driver_status;
        }

        if !self.driver_status.audio_ok() && self.router.process_warnings().first_audio_driver_warning() {
            warn!("{}", messages::NO_AUDIO);
            self.emit(TransportEvent::Warning {
                kind: WarningKind::Audio,
                text: messages::NO_AUDIO.to_string(),
                informative: messages::NO_AUDIO_INFO.to_string(),
            });
        }
        self.driver_status
    }

    /// Engine sample rate, asked for once
    pub fn sample_rate(&mut self) -> u32 {
        match self.sample_rate {
            Some(rate) => rate,
            None => {
                let rate = self.engine.sample_rate();
                self.sample_rate = Some(rate);
                rate
            }
        }
    }

    /// Stop everything and silence every instrument
    pub fn panic(&mut self, doc: &mut dyn Document) {
        info!("panic");
        self.stopping(doc);
        self.engine
            .send_mapped_event(MappedEvent::new(MIDI_INSTRUMENT_BASE, MappedEventType::Panic, 0, 0));
    }

    /// Reset all controllers on the MIDI instrument slots
    pub fn reset_midi_network(&self) {
        debug!("resetting MIDI network");
        let events: Vec<MappedEvent> = (0..MIDI_CHANNEL_COUNT as InstrumentId)
            .map(|i| {
                MappedEvent::new(
                    MIDI_INSTRUMENT_BASE + i,
                    MappedEventType::MidiController,
                    midi::messages::RESET_ALL_CONTROLLERS,
                    0,
                )
            })
            .collect();
        if let Some(first) = events.first() {
            self.emit(TransportEvent::MidiOutLabel(first.clone()));
        }
        for event in events {
            self.engine.send_mapped_event(event);
        }
    }

    /// Send external sync settings to the engine
    pub fn send_transport_control_statuses(&self) {
        let options = &self.settings.sequencer;
        let statuses = [
            (MappedEventType::SystemJackTransport, options.jack_transport_mode()),
            (MappedEventType::SystemMmcTransport, options.mmc_mode.as_byte()),
            (MappedEventType::SystemMtcTransport, options.mtc_mode.as_byte()),
            (MappedEventType::SystemMidiClock, options.midi_clock.as_byte()),
            (MappedEventType::SystemMidiSyncAuto, options.midi_sync_auto_connect as u8),
        ];
        for (event_type, value) in statuses {
            self.engine.send_mapped_event(MappedEvent::system(event_type, value));
        }
    }

    /// Send audio routing and record format settings to the engine
    pub fn reinitialise_sequencer_studio(&self) {
        let options = &self.settings.sequencer;
        let mut ports = 0;
        if options.audio_fader_outs {
            ports |= AUDIO_PORTS_FADER_OUTS;
        }
        if options.audio_submaster_outs {
            ports |= AUDIO_PORTS_SUBMASTER_OUTS;
        }
        self.engine
            .send_mapped_event(MappedEvent::system(MappedEventType::SystemAudioPorts, ports));
        self.engine.send_mapped_event(MappedEvent::system(
            MappedEventType::SystemAudioFileFormat,
            options.audio_record_file_format,
        ));
    }

    /// Replace the settings and push them to the engine
    pub fn apply_settings(&mut self, settings: SequencerSettings) {
        self.router.set_timer_setting(&settings.sequencer.timer);
        self.settings = settings;
        self.send_transport_control_statuses();
        self.reinitialise_sequencer_studio();
    }

    /// Metronome instrument changed; `regenerate` when its clicks must be
    /// rendered again
    pub fn metronome_changed(
        &mut self,
        composition: &dyn Composition,
        instrument: InstrumentId,
        regenerate: bool,
    ) {
        self.control.set_instrument_for_metronome(instrument);
        self.update_metronome_mute(composition);
        if regenerate {
            self.sync.refresh_metronome(composition);
        }
    }

    fn update_metronome_mute(&self, composition: &dyn Composition) {
        let recording = matches!(
            self.status(),
            TransportStatus::Recording
                | TransportStatus::StartingToRecord
                | TransportStatus::RecordingArmed
        );
        let audible = if recording {
            composition.use_record_metronome()
        } else {
            composition.use_play_metronome()
        };
        self.control.set_metronome_muted(!audible);
    }

    pub fn filters_changed(&self, thru: MidiFilter, record: MidiFilter) {
        self.control.set_thru_filter(thru);
        self.control.set_record_filter(record);
    }

    // Incoming

    /// Handle a batch of events the engine received or generated
    pub fn process_asynchronous_midi(&mut self, doc: &mut dyn Document, events: &[MappedEvent]) {
        self.process_asynchronous_midi_at(doc, events, Instant::now());
    }

    pub fn process_asynchronous_midi_at(
        &mut self,
        doc: &mut dyn Document,
        events: &[MappedEvent],
        now: Instant,
    ) {
        let studio = self.control.studio().clone();

        // program list display, before thru filtering
        let mut bank_msb = None;
        let mut bank_lsb = None;
        for event in events {
            match event.event_type {
                MappedEventType::MidiController if event.data1 == midi::messages::BANK_SELECT_MSB => {
                    bank_msb = Some(event.data2)
                }
                MappedEventType::MidiController if event.data1 == midi::messages::BANK_SELECT_LSB => {
                    bank_lsb = Some(event.data2)
                }
                MappedEventType::MidiProgramChange => {
                    self.emit(TransportEvent::SelectProgramNoSend {
                        program: event.data1,
                        bank_lsb,
                        bank_msb,
                    })
                }
                _ => {}
            }
        }

        let thru = studio.midi_thru_filter().apply(events);
        if let Some(first) = events.first() {
            self.emit(TransportEvent::MidiInLabel(first.clone()));
        }
        if let Some(out) = thru.iter().find(|e| e.recorded_device != CONTROL_DEVICE) {
            self.emit(TransportEvent::MidiOutLabel(out.clone()));
        }

        for event in events.iter().filter(|e| e.event_type.is_audio_or_system()) {
            match event.event_type {
                MappedEventType::AudioStopped
                    if event.instrument == studio.audio_preview_instrument() =>
                {
                    self.emit(TransportEvent::AudioPreviewStopped(event.data1 as u32))
                }
                MappedEventType::AudioLevel => self.emit(TransportEvent::AudioLevel {
                    instrument: event.instrument,
                    left: event.data1,
                    right: event.data2,
                }),
                MappedEventType::AudioGeneratePreview => {
                    doc.finalize_audio_file(event.data1 as u32 + event.data2 as u32 * 256)
                }
                MappedEventType::SystemFailure => {
                    let Some(code) = event.failure_code() else {
                        continue;
                    };
                    let outcome = self.router.route(code, self.status(), now);
                    if outcome.stop {
                        self.stopping(doc);
                    }
                    if let Some(report) = outcome.event {
                        if let TransportEvent::UserMessage { level: MessageLevel::Critical, text } = &report {
                            error!("{}", text);
                        }
                        self.emit(report);
                    }
                }
                _ => {}
            }
        }

        let insertable = matches!(
            self.status(),
            TransportStatus::Stopped | TransportStatus::RecordingArmed
        );
        for event in events {
            if insertable && event.event_type == MappedEventType::MidiNote {
                let (pitch, velocity) = (event.pitch(), event.velocity());
                self.emit(if velocity == 0 {
                    TransportEvent::InsertableNoteOff { pitch, velocity }
                } else {
                    TransportEvent::InsertableNoteOn { pitch, velocity }
                });
            }
            if event.recorded_device == CONTROL_DEVICE {
                self.emit(TransportEvent::ControllerDeviceEvent(event.clone()));
            }
        }
    }
}

/// Studio instrument of an armed track
fn armed_instrument(doc: &dyn Document, studio: &dyn Studio, track: TrackId) -> Option<InstrumentInfo> {
    doc.track(track).and_then(|t| studio.instrument(t.instrument))
}
