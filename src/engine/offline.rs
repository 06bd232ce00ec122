// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! An engine that produces no sound.
//!
//! Keeps the buffers it is given and records every request, which is
//! enough to run the transport headless and to check what it asked for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    BufferKey, DriverStatus, EngineError, MappedEventBuffer, PlayRequest, SequencerEngine,
};
use crate::document::{InstrumentId, InstrumentInfo};
use crate::midi::MappedEvent;
use crate::timing::RealTime;
use crate::transport::TransportStatus;

/// A request the engine received
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Play(PlayRequest),
    Record(PlayRequest, TransportStatus),
    PunchOut,
    Stop,
    JumpTo(RealTime),
    SetLoop(RealTime, RealTime),
    SetLowLatencyMode(bool),
    QuarterNoteLength(RealTime),
    SegmentAdded(BufferKey),
    SegmentModified(BufferKey),
    SegmentRemoved(BufferKey),
    CompositionAboutToBeDeleted,
    RemapTracks,
    MappedInstrument(InstrumentId),
    MappedEvent(MappedEvent),
}

#[derive(Debug)]
struct OfflineState {
    calls: Vec<EngineCall>,
    buffers: HashMap<BufferKey, Arc<MappedEventBuffer>>,
    driver_status: DriverStatus,
    refuse_transport: bool,
    fail_segment_pushes: bool,
    fail_segment_removals: bool,
    punch_out_supported: bool,
    sample_rate: u32,
}

/// Headless `SequencerEngine`
#[derive(Debug)]
pub struct OfflineEngine {
    state: Mutex<OfflineState>,
}

impl OfflineEngine {
    pub fn new() -> Self {
        Self::with_driver_status(DriverStatus::all_ok())
    }

    pub fn with_driver_status(driver_status: DriverStatus) -> Self {
        Self {
            state: Mutex::new(OfflineState {
                calls: Vec::new(),
                buffers: HashMap::new(),
                driver_status,
                refuse_transport: false,
                fail_segment_pushes: false,
                fail_segment_removals: false,
                punch_out_supported: true,
                sample_rate: 48_000,
            }),
        }
    }

    /// Refuse play and record requests
    pub fn set_refuse_transport(&self, refuse: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.refuse_transport = refuse;
        }
    }

    /// Fail every buffer add/modify
    pub fn set_fail_segment_pushes(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_segment_pushes = fail;
        }
    }

    /// Fail every buffer removal, keeping the buffer
    pub fn set_fail_segment_removals(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_segment_removals = fail;
        }
    }

    pub fn set_punch_out_supported(&self, supported: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.punch_out_supported = supported;
        }
    }

    pub fn set_driver_status(&self, status: DriverStatus) {
        if let Ok(mut state) = self.state.lock() {
            state.driver_status = status;
        }
    }

    /// All requests received so far
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Number of requests matching `pred`
    pub fn count_calls(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.state
            .lock()
            .map(|s| s.calls.iter().filter(|c| pred(c)).count())
            .unwrap_or(0)
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.clear();
        }
    }

    /// Keys of the buffers the engine currently holds
    pub fn live_buffers(&self) -> Vec<BufferKey> {
        let mut keys: Vec<BufferKey> = self
            .state
            .lock()
            .map(|s| s.buffers.keys().copied().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn buffer(&self, key: BufferKey) -> Option<Arc<MappedEventBuffer>> {
        self.state.lock().ok()?.buffers.get(&key).cloned()
    }

    fn record_call(&self, call: EngineCall) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.push(call);
        }
    }

    fn store_buffer(&self, buffer: Arc<MappedEventBuffer>, call: EngineCall) -> Result<(), EngineError> {
        let mut state = self.state.lock().map_err(|_| EngineError::Disconnected)?;
        state.calls.push(call);
        if state.fail_segment_pushes {
            return Err(EngineError::Rejected("buffer push refused".into()));
        }
        state.buffers.insert(buffer.key, buffer);
        Ok(())
    }
}

impl Default for OfflineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SequencerEngine for OfflineEngine {
    fn driver_status(&self) -> DriverStatus {
        self.state
            .lock()
            .map(|s| s.driver_status)
            .unwrap_or(DriverStatus::NO_DRIVER)
    }

    fn sample_rate(&self) -> u32 {
        self.state.lock().map(|s| s.sample_rate).unwrap_or(0)
    }

    fn play(&self, request: &PlayRequest) -> Result<(), EngineError> {
        let mut state = self.state.lock().map_err(|_| EngineError::Disconnected)?;
        state.calls.push(EngineCall::Play(*request));
        if state.refuse_transport {
            return Err(EngineError::Rejected("play refused".into()));
        }
        Ok(())
    }

    fn record(&self, request: &PlayRequest, target: TransportStatus) -> Result<(), EngineError> {
        let mut state = self.state.lock().map_err(|_| EngineError::Disconnected)?;
        state.calls.push(EngineCall::Record(*request, target));
        if state.refuse_transport {
            return Err(EngineError::Rejected("record refused".into()));
        }
        Ok(())
    }

    fn punch_out(&self) -> bool {
        self.state
            .lock()
            .map(|mut s| {
                s.calls.push(EngineCall::PunchOut);
                s.punch_out_supported
            })
            .unwrap_or(false)
    }

    fn stop(&self) {
        self.record_call(EngineCall::Stop);
    }

    fn jump_to(&self, time: RealTime) {
        self.record_call(EngineCall::JumpTo(time));
    }

    fn set_loop(&self, start: RealTime, end: RealTime) {
        self.record_call(EngineCall::SetLoop(start, end));
    }

    fn set_low_latency_mode(&self, enabled: bool) {
        self.record_call(EngineCall::SetLowLatencyMode(enabled));
    }

    fn set_quarter_note_length(&self, length: RealTime) {
        self.record_call(EngineCall::QuarterNoteLength(length));
    }

    fn segment_added(&self, buffer: Arc<MappedEventBuffer>) -> Result<(), EngineError> {
        let key = buffer.key;
        self.store_buffer(buffer, EngineCall::SegmentAdded(key))
    }

    fn segment_modified(&self, buffer: Arc<MappedEventBuffer>) -> Result<(), EngineError> {
        let key = buffer.key;
        self.store_buffer(buffer, EngineCall::SegmentModified(key))
    }

    fn segment_removed(&self, key: BufferKey) -> Result<(), EngineError> {
        let mut state = self.state.lock().map_err(|_| EngineError::Disconnected)?;
        state.calls.push(EngineCall::SegmentRemoved(key));
        if state.fail_segment_removals {
            return Err(EngineError::Rejected("buffer removal refused".into()));
        }
        state
            .buffers
            .remove(&key)
            .map(|_| ())
            .ok_or(EngineError::UnknownBuffer(key))
    }

    fn composition_about_to_be_deleted(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.push(EngineCall::CompositionAboutToBeDeleted);
            state.buffers.retain(|key, _| !matches!(key, BufferKey::Segment(_)));
        }
    }

    fn remap_tracks(&self) {
        self.record_call(EngineCall::RemapTracks);
    }

    fn send_mapped_instrument(&self, instrument: &InstrumentInfo) {
        self.record_call(EngineCall::MappedInstrument(instrument.id));
    }

    fn send_mapped_event(&self, event: MappedEvent) {
        self.record_call(EngineCall::MappedEvent(event));
    }
}
