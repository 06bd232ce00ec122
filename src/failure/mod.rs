// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Classification of failures reported by the engine.
//!
//! Fatal failures stop the transport and are always reported. Transient
//! ones are reported at most once per `REPORT_WINDOW`, and the
//! overrun/underrun family at most once per transport run on top of that.
//! Timer precision warnings are given once per process.

pub mod report;

pub use report::{ProcessWarnings, ReportGate, PROCESS_WARNINGS, REPORT_WINDOW};

use std::time::Instant;

use tracing::{debug, warn};

use crate::midi::FailureCode;
use crate::transport::{MessageLevel, TransportEvent, TransportStatus, WarningKind};
use report::{messages, should_warn_for_imprecise_timer};

/// What to do about one failure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureOutcome {
    /// Stop the transport
    pub stop: bool,
    /// Tell the user
    pub event: Option<TransportEvent>,
}

impl FailureOutcome {
    fn ignore() -> Self {
        Self::default()
    }

    fn report(level: MessageLevel, text: &str) -> Self {
        Self {
            stop: false,
            event: Some(TransportEvent::UserMessage {
                level,
                text: text.to_string(),
            }),
        }
    }

    fn stop_and(mut self) -> Self {
        self.stop = true;
        self
    }
}

/// Routes engine failures to stops and user reports
#[derive(Debug)]
pub struct FailureRouter {
    gate: ReportGate,
    alsa_reported_at: Option<Instant>,
    shown_overrun_warning: bool,
    timer_setting: String,
    warnings: &'static ProcessWarnings,
}

impl FailureRouter {
    pub fn new() -> Self {
        Self::with_process_warnings(&PROCESS_WARNINGS)
    }

    /// Use a separate set of once-per-process flags
    pub fn with_process_warnings(warnings: &'static ProcessWarnings) -> Self {
        Self {
            gate: ReportGate::default(),
            alsa_reported_at: None,
            shown_overrun_warning: false,
            timer_setting: "(auto)".to_string(),
            warnings,
        }
    }

    /// Configured sequencer timer name
    pub fn set_timer_setting(&mut self, timer: &str) {
        self.timer_setting = timer.to_string();
    }

    pub fn process_warnings(&self) -> &'static ProcessWarnings {
        self.warnings
    }

    /// Start of a new transport run
    pub fn reset_run(&mut self) {
        self.shown_overrun_warning = false;
    }

    pub fn route(&mut self, code: FailureCode, status: TransportStatus, now: Instant) -> FailureOutcome {
        match status {
            TransportStatus::Playing | TransportStatus::Recording => self.route_running(code, now),
            _ => self.route_idle(code),
        }
    }

    fn route_running(&mut self, code: FailureCode, now: Instant) -> FailureOutcome {
        match code {
            FailureCode::JackDied => {
                warn!("audio engine died, stopping transport");
                FailureOutcome::ignore().stop_and()
            }
            FailureCode::JackRestartFailed => {
                FailureOutcome::report(MessageLevel::Critical, messages::JACK_RESTART_FAILED)
            }
            FailureCode::JackRestart => {
                FailureOutcome::report(MessageLevel::Critical, messages::JACK_RESTARTED)
            }
            FailureCode::CpuOverload => {
                warn!("CPU overload, stopping transport");
                FailureOutcome::report(MessageLevel::Critical, messages::CPU_OVERLOAD).stop_and()
            }
            _ => self.route_rate_limited(code, now),
        }
    }

    fn route_rate_limited(&mut self, code: FailureCode, now: Instant) -> FailureOutcome {
        if !self.gate.is_open(now) {
            debug!(?code, "failure not reported yet");
            return FailureOutcome::ignore();
        }

        let outcome = match code {
            FailureCode::AlsaCallFailed => {
                let due = self
                    .alsa_reported_at
                    .map_or(true, |at| now.duration_since(at) >= REPORT_WINDOW);
                if due {
                    self.alsa_reported_at = Some(now);
                    FailureOutcome::report(MessageLevel::Information, messages::ALSA_CALL_FAILED)
                } else {
                    FailureOutcome::ignore()
                }
            }
            FailureCode::XRuns => {
                debug!("audio engine is losing sample frames");
                FailureOutcome::ignore()
            }
            _ if !self.shown_overrun_warning => {
                self.shown_overrun_warning = true;
                let text = match code {
                    FailureCode::DiscUnderrun => messages::DISC_UNDERRUN,
                    FailureCode::DiscOverrun => messages::DISC_OVERRUN,
                    FailureCode::BussMixUnderrun => messages::BUSS_MIX_UNDERRUN,
                    FailureCode::MixUnderrun => messages::MIX_UNDERRUN,
                    _ => messages::UNKNOWN_FAILURE,
                };
                if code == FailureCode::DiscOverrun {
                    // nobody hears this one
                    FailureOutcome::report(MessageLevel::Information, text)
                } else {
                    warn!("{}", text);
                    FailureOutcome::report(MessageLevel::Console, text)
                }
            }
            _ => FailureOutcome::ignore(),
        };

        self.gate.close(now);
        outcome
    }

    fn route_idle(&mut self, code: FailureCode) -> FailureOutcome {
        match code {
            FailureCode::JackRestartFailed => {
                FailureOutcome::report(MessageLevel::Critical, messages::JACK_RESTART_FAILED)
            }
            FailureCode::JackRestart => {
                FailureOutcome::report(MessageLevel::Critical, messages::JACK_RESTARTED)
            }
            FailureCode::ImpreciseTimer | FailureCode::ImpreciseTimerTryRtc
                if should_warn_for_imprecise_timer(&self.timer_setting) =>
            {
                warn!("no accurate sequencer timer available");
                let (first, informative) = if code == FailureCode::ImpreciseTimer {
                    (self.warnings.first_timer_warning(), messages::TIMER_INFO)
                } else {
                    (self.warnings.first_rtc_timer_warning(), messages::TIMER_RTC_INFO)
                };
                if !first {
                    return FailureOutcome::ignore();
                }
                FailureOutcome {
                    stop: false,
                    event: Some(TransportEvent::Warning {
                        kind: WarningKind::Timer,
                        text: messages::TIMER_TOO_LOW.to_string(),
                        informative: informative.to_string(),
                    }),
                }
            }
            other => {
                debug!(code = ?other, "failure while idle ignored");
                FailureOutcome::ignore()
            }
        }
    }
}

impl Default for FailureRouter {
    fn default() -> Self {
        Self::new()
    }
}
