// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Timing types shared by the document and the engine boundary.
//!
//! Composition positions are musical time (`TimeT`, ticks); the engine
//! works in `RealTime`. Tempo is carried as quarter notes per minute.

pub mod realtime;

pub use realtime::RealTime;

/// Musical time in ticks from the start of the composition
pub type TimeT = i64;

/// Tempo used when a composition has none
pub const DEFAULT_TEMPO_QPM: f64 = 120.0;

/// Length of one quarter note at the given tempo.
///
/// This is what the engine needs to drive MIDI clock at 24 PPQN.
pub fn quarter_note_length(qpm: f64) -> RealTime {
    if qpm <= 0.0 {
        return RealTime::ZERO;
    }
    RealTime::from_secs_f64(60.0 / qpm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarter_note_length() {
        assert_eq!(quarter_note_length(120.0), RealTime::from_millis(500));
        assert_eq!(quarter_note_length(60.0), RealTime::new(1, 0));
    }

    #[test]
    fn test_quarter_note_length_invalid_tempo() {
        assert_eq!(quarter_note_length(0.0), RealTime::ZERO);
        assert_eq!(quarter_note_length(-10.0), RealTime::ZERO);
    }
}
