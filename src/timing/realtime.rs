// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Wall-clock time as seen by the sequencing engine.
//!
//! The engine schedules in seconds + nanoseconds rather than musical time,
//! so every transport request converts composition time into a `RealTime`
//! before crossing the engine boundary.

use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A signed (seconds, nanoseconds) pair.
///
/// The pair is always normalized so that `nsec` carries the same sign as
/// `sec` and `|nsec| < 1_000_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RealTime {
    pub sec: i32,
    pub nsec: i32,
}

impl RealTime {
    pub const ZERO: RealTime = RealTime { sec: 0, nsec: 0 };

    /// Create a normalized real time from seconds and nanoseconds
    pub fn new(sec: i32, nsec: i32) -> Self {
        Self::from_nanos(sec as i64 * NANOS_PER_SEC + nsec as i64)
    }

    /// Create from a total nanosecond count
    pub fn from_nanos(nanos: i64) -> Self {
        Self {
            sec: (nanos / NANOS_PER_SEC) as i32,
            nsec: (nanos % NANOS_PER_SEC) as i32,
        }
    }

    /// Create from milliseconds
    pub fn from_millis(millis: i64) -> Self {
        Self::from_nanos(millis * 1_000_000)
    }

    /// Create from fractional seconds
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::from_nanos((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    /// Total nanoseconds
    pub fn as_nanos(&self) -> i64 {
        self.sec as i64 * NANOS_PER_SEC + self.nsec as i64
    }

    /// Fractional seconds
    pub fn as_secs_f64(&self) -> f64 {
        self.as_nanos() as f64 / NANOS_PER_SEC as f64
    }

    /// Convert to a `Duration`, clamping negative values to zero
    pub fn to_duration(&self) -> Duration {
        let nanos = self.as_nanos();
        if nanos <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}

impl From<Duration> for RealTime {
    fn from(d: Duration) -> Self {
        Self::from_nanos(d.as_nanos() as i64)
    }
}

impl Add for RealTime {
    type Output = RealTime;

    fn add(self, rhs: RealTime) -> RealTime {
        RealTime::from_nanos(self.as_nanos() + rhs.as_nanos())
    }
}

impl Sub for RealTime {
    type Output = RealTime;

    fn sub(self, rhs: RealTime) -> RealTime {
        RealTime::from_nanos(self.as_nanos() - rhs.as_nanos())
    }
}

impl Neg for RealTime {
    type Output = RealTime;

    fn neg(self) -> RealTime {
        RealTime::from_nanos(-self.as_nanos())
    }
}

impl fmt::Display for RealTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.as_nanos();
        let sign = if nanos < 0 { "-" } else { "" };
        let abs = nanos.abs();
        write!(
            f,
            "{}{}.{:09}",
            sign,
            abs / NANOS_PER_SEC,
            abs % NANOS_PER_SEC
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let t = RealTime::new(1, 1_500_000_000);
        assert_eq!(t, RealTime { sec: 2, nsec: 500_000_000 });

        let neg = RealTime::from_nanos(-1_250_000_000);
        assert_eq!(neg.sec, -1);
        assert_eq!(neg.nsec, -250_000_000);
    }

    #[test]
    fn test_arithmetic() {
        let a = RealTime::new(0, 600_000_000);
        let b = RealTime::new(0, 700_000_000);
        assert_eq!(a + b, RealTime::new(1, 300_000_000));
        assert_eq!(a - b, RealTime::from_millis(-100));
        assert_eq!(-a, RealTime::from_millis(-600));
    }

    #[test]
    fn test_ordering() {
        assert!(RealTime::from_millis(160) < RealTime::from_millis(500));
        assert!(RealTime::new(2, 500_000_000) > RealTime::new(2, 0));
    }

    #[test]
    fn test_float_conversion() {
        let t = RealTime::from_secs_f64(0.5);
        assert_eq!(t, RealTime::new(0, 500_000_000));
        assert!((t.as_secs_f64() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_display() {
        assert_eq!(RealTime::new(4, 0).to_string(), "4.000000000");
        assert_eq!(RealTime::from_millis(-1500).to_string(), "-1.500000000");
    }

    #[test]
    fn test_duration_clamps_negative() {
        assert_eq!(RealTime::from_millis(-5).to_duration(), Duration::ZERO);
        assert_eq!(
            RealTime::from_millis(250).to_duration(),
            Duration::from_millis(250)
        );
    }
}
