// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Per-track slot of the ControlBlock.
//!
//! Plain data only: every field is an atomic so the real-time side can read
//! a slot without locking. A reader may see a field one update stale.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI8, AtomicU32, Ordering};

use crate::document::{DeviceId, InstrumentId, ALL_DEVICES};

/// Resolved destination of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrumentAndChannel {
    pub instrument: InstrumentId,
    /// Output channel, -1 when unresolved
    pub channel: i32,
}

impl InstrumentAndChannel {
    /// "No resolution"
    pub const INVALID: InstrumentAndChannel = InstrumentAndChannel {
        instrument: 0,
        channel: -1,
    };

    pub fn new(instrument: InstrumentId, channel: u8) -> Self {
        Self {
            instrument,
            channel: channel as i32,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.channel >= 0
    }
}

impl Default for InstrumentAndChannel {
    fn default() -> Self {
        Self::INVALID
    }
}

/// A copy of one slot, for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackControlSnapshot {
    pub deleted: bool,
    pub muted: bool,
    pub armed: bool,
    pub channel_filter: i8,
    pub device_filter: DeviceId,
    pub instrument: InstrumentId,
    pub thru_channel: i32,
    pub thru_channel_ready: bool,
    pub has_thru_channel: bool,
    pub selected: bool,
    pub use_fixed_channel: bool,
}

/// One track's routing and monitoring state
#[derive(Debug)]
pub struct TrackControlInfo {
    deleted: AtomicBool,
    muted: AtomicBool,
    armed: AtomicBool,
    channel_filter: AtomicI8,
    device_filter: AtomicU32,
    instrument: AtomicU32,
    /// Valid only while `has_thru_channel`
    thru_channel: AtomicI32,
    /// Bank and program have been sent on `thru_channel`
    thru_channel_ready: AtomicBool,
    has_thru_channel: AtomicBool,
    /// Mirrors the ControlBlock's selected track
    selected: AtomicBool,
    /// Instrument fixity when the channel was taken
    use_fixed_channel: AtomicBool,
}

impl TrackControlInfo {
    pub fn new() -> Self {
        Self {
            deleted: AtomicBool::new(true),
            muted: AtomicBool::new(false),
            armed: AtomicBool::new(false),
            channel_filter: AtomicI8::new(-1),
            device_filter: AtomicU32::new(ALL_DEVICES),
            instrument: AtomicU32::new(0),
            thru_channel: AtomicI32::new(-1),
            thru_channel_ready: AtomicBool::new(false),
            has_thru_channel: AtomicBool::new(false),
            selected: AtomicBool::new(false),
            use_fixed_channel: AtomicBool::new(false),
        }
    }

    /// Back to an unused slot
    pub fn reset(&self) {
        self.deleted.store(true, Ordering::Relaxed);
        self.muted.store(false, Ordering::Relaxed);
        self.armed.store(false, Ordering::Relaxed);
        self.channel_filter.store(-1, Ordering::Relaxed);
        self.device_filter.store(ALL_DEVICES, Ordering::Relaxed);
        self.instrument.store(0, Ordering::Relaxed);
        self.selected.store(false, Ordering::Relaxed);
        self.clear_thru_channel();
    }

    pub fn snapshot(&self) -> TrackControlSnapshot {
        TrackControlSnapshot {
            deleted: self.is_deleted(),
            muted: self.is_muted(),
            armed: self.is_armed(),
            channel_filter: self.channel_filter(),
            device_filter: self.device_filter(),
            instrument: self.instrument(),
            thru_channel: self.thru_channel(),
            thru_channel_ready: self.is_thru_channel_ready(),
            has_thru_channel: self.has_thru_channel(),
            selected: self.is_selected(),
            use_fixed_channel: self.uses_fixed_channel(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Relaxed)
    }

    pub fn set_deleted(&self, deleted: bool) {
        self.deleted.store(deleted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }

    pub fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Relaxed);
    }

    pub fn channel_filter(&self) -> i8 {
        self.channel_filter.load(Ordering::Relaxed)
    }

    pub fn set_channel_filter(&self, channel: i8) {
        self.channel_filter.store(channel, Ordering::Relaxed);
    }

    pub fn device_filter(&self) -> DeviceId {
        self.device_filter.load(Ordering::Relaxed)
    }

    pub fn set_device_filter(&self, device: DeviceId) {
        self.device_filter.store(device, Ordering::Relaxed);
    }

    pub fn instrument(&self) -> InstrumentId {
        self.instrument.load(Ordering::Relaxed)
    }

    pub fn set_instrument(&self, instrument: InstrumentId) {
        self.instrument.store(instrument, Ordering::Relaxed);
    }

    pub fn is_selected(&self) -> bool {
        self.selected.load(Ordering::Relaxed)
    }

    pub fn set_selected(&self, selected: bool) {
        self.selected.store(selected, Ordering::Relaxed);
    }

    /// Whether an event from `device` on `channel` passes this track's input filters
    pub fn accepts(&self, device: DeviceId, channel: u8) -> bool {
        let device_filter = self.device_filter();
        let channel_filter = self.channel_filter();
        (device_filter == ALL_DEVICES || device_filter == device)
            && (channel_filter < 0 || channel_filter as u8 == channel)
    }

    pub fn has_thru_channel(&self) -> bool {
        self.has_thru_channel.load(Ordering::Acquire)
    }

    pub fn thru_channel(&self) -> i32 {
        self.thru_channel.load(Ordering::Relaxed)
    }

    pub fn is_thru_channel_ready(&self) -> bool {
        self.thru_channel_ready.load(Ordering::Acquire)
    }

    pub fn uses_fixed_channel(&self) -> bool {
        self.use_fixed_channel.load(Ordering::Relaxed)
    }

    /// Take `channel` for monitoring. Fixed channels need no setup.
    pub(crate) fn assign_thru_channel(&self, channel: u8, fixed: bool) {
        self.thru_channel.store(channel as i32, Ordering::Relaxed);
        self.use_fixed_channel.store(fixed, Ordering::Relaxed);
        self.thru_channel_ready.store(fixed, Ordering::Release);
        self.has_thru_channel.store(true, Ordering::Release);
    }

    pub(crate) fn clear_thru_channel(&self) {
        self.has_thru_channel.store(false, Ordering::Release);
        self.thru_channel_ready.store(false, Ordering::Release);
        self.thru_channel.store(-1, Ordering::Relaxed);
        self.use_fixed_channel.store(false, Ordering::Relaxed);
    }

    pub(crate) fn invalidate_ready(&self) {
        self.thru_channel_ready.store(false, Ordering::Release);
    }

    /// Flip ready from false to true; `true` for the caller that won
    pub(crate) fn claim_ready(&self) -> bool {
        self.thru_channel_ready
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for TrackControlInfo {
    fn default() -> Self {
        Self::new()
    }
}
