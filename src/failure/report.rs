// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Rate limiting and message text for engine failure reports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Minimum gap between two rate-limited reports
pub const REPORT_WINDOW: Duration = Duration::from_secs(5);

/// One-shot gate that closes for a window after each report
#[derive(Debug, Clone)]
pub struct ReportGate {
    window: Duration,
    closed_until: Option<Instant>,
}

impl ReportGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            closed_until: None,
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.closed_until.map_or(true, |until| now >= until)
    }

    /// Close the gate unless it is already closed
    pub fn close(&mut self, now: Instant) {
        if self.is_open(now) {
            self.closed_until = Some(now + self.window);
        }
    }
}

impl Default for ReportGate {
    fn default() -> Self {
        Self::new(REPORT_WINDOW)
    }
}

/// Warnings given at most once per process run
#[derive(Debug)]
pub struct ProcessWarnings {
    timer: AtomicBool,
    timer_rtc: AtomicBool,
    audio_driver: AtomicBool,
}

impl ProcessWarnings {
    pub const fn new() -> Self {
        Self {
            timer: AtomicBool::new(false),
            timer_rtc: AtomicBool::new(false),
            audio_driver: AtomicBool::new(false),
        }
    }

    /// `true` the first time only
    pub fn first_timer_warning(&self) -> bool {
        !self.timer.swap(true, Ordering::AcqRel)
    }

    pub fn first_rtc_timer_warning(&self) -> bool {
        !self.timer_rtc.swap(true, Ordering::AcqRel)
    }

    pub fn first_audio_driver_warning(&self) -> bool {
        !self.audio_driver.swap(true, Ordering::AcqRel)
    }
}

impl Default for ProcessWarnings {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags shared by every router in the process
pub static PROCESS_WARNINGS: ProcessWarnings = ProcessWarnings::new();

/// Timer warnings only apply when the timer is chosen automatically
pub fn should_warn_for_imprecise_timer(timer_setting: &str) -> bool {
    timer_setting.is_empty() || timer_setting == "(auto)"
}

pub mod messages {
    pub const JACK_RESTART_FAILED: &str = "The JACK audio subsystem has failed or has stopped \
        audio processing.\nRestart the application to continue working with audio.\nQuitting \
        other running applications may improve performance.";
    pub const JACK_RESTARTED: &str = "The JACK audio subsystem stopped audio processing, \
        probably because of a processing overload.\nThe audio service has been restarted, but \
        some problems may remain.\nQuitting other running applications may improve performance.";
    pub const CPU_OVERLOAD: &str =
        "Out of processor power for real-time audio processing. Cannot continue.";
    pub const ALSA_CALL_FAILED: &str = "A serious error has occurred in the ALSA MIDI \
        subsystem. It may not be possible to continue sequencing. Check the log for details.";
    pub const DISC_UNDERRUN: &str =
        "Failed to read audio data from disk in time to service the audio subsystem.";
    pub const DISC_OVERRUN: &str =
        "Failed to write audio data to disk fast enough to service the audio subsystem.";
    pub const BUSS_MIX_UNDERRUN: &str = "The audio mixing subsystem is failing to keep up.";
    pub const MIX_UNDERRUN: &str = "The audio subsystem is failing to keep up.";
    pub const UNKNOWN_FAILURE: &str = "Unknown sequencer failure mode!";

    pub const TIMER_TOO_LOW: &str = "System timer resolution is too low!";
    pub const TIMER_INFO: &str = "No high-resolution timing source was found for MIDI \
        performance. The kernel timer resolution may be set too low; a low latency kernel \
        avoids this.";
    pub const TIMER_RTC_INFO: &str = "No high-resolution timing source was found for MIDI \
        performance. Loading the RTC timer kernel module (snd-rtctimer) may solve this.";

    pub const NO_SEQUENCER: &str = "Sequencer engine unavailable!";
    pub const NO_SEQUENCER_INFO: &str =
        "Both MIDI and audio subsystems have failed to initialize.";
    pub const NO_MIDI: &str = "MIDI sequencing unavailable!";
    pub const NO_MIDI_INFO: &str = "The MIDI subsystem has failed to initialize. You may \
        continue without the sequencer.";
    pub const NO_AUDIO: &str = "Audio sequencing and synth plugins unavailable!";
    pub const NO_AUDIO_INFO: &str = "Could not connect to the JACK audio server. Audio files \
        and plugins cannot be played or recorded until JACK can be started.";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_closes_for_window() {
        let start = Instant::now();
        let mut gate = ReportGate::default();
        assert!(gate.is_open(start));

        gate.close(start);
        assert!(!gate.is_open(start + Duration::from_secs(3)));
        assert!(gate.is_open(start + Duration::from_secs(5)));
    }

    #[test]
    fn test_closing_again_does_not_extend() {
        let start = Instant::now();
        let mut gate = ReportGate::default();
        gate.close(start);
        gate.close(start + Duration::from_secs(4));
        assert!(gate.is_open(start + Duration::from_secs(5)));
    }

    #[test]
    fn test_process_warnings_fire_once() {
        let warnings = ProcessWarnings::new();
        assert!(warnings.first_timer_warning());
        assert!(!warnings.first_timer_warning());
        // separate flavours
        assert!(warnings.first_rtc_timer_warning());
        assert!(warnings.first_audio_driver_warning());
        assert!(!warnings.first_audio_driver_warning());
    }

    #[test]
    fn test_timer_setting() {
        assert!(should_warn_for_imprecise_timer("(auto)"));
        assert!(should_warn_for_imprecise_timer(""));
        assert!(!should_warn_for_imprecise_timer("RTC timer"));
    }
}
