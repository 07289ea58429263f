//! Virtual simulation time

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};
use std::time::Duration;

use crate::error::EventError;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Virtual time with nanosecond resolution.
///
/// A `SimTime` is both an instant on the simulation clock (nanoseconds since the
/// start of the run) and a non-negative delay relative to "now". Being unsigned,
/// it cannot express a negative delay; fallible constructors such as
/// [`SimTime::try_from_secs`] exist for values that come from untrusted `f64`
/// arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Largest representable instant.
    pub const MAX: SimTime = SimTime(u64::MAX);

    /// Time zero, the start of every run.
    pub const fn zero() -> Self {
        SimTime(0)
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        SimTime(micros.saturating_mul(1_000))
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis.saturating_mul(1_000_000))
    }

    pub const fn from_secs(secs: u64) -> Self {
        SimTime(secs.saturating_mul(NANOS_PER_SEC))
    }

    pub fn from_duration(duration: Duration) -> Self {
        SimTime(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Converts fractional seconds, rejecting negative, NaN and infinite input.
    pub fn try_from_secs(secs: f64) -> Result<Self, EventError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(EventError::InvalidDelay { seconds: secs });
        }
        let nanos = secs * NANOS_PER_SEC as f64;
        if nanos >= u64::MAX as f64 {
            return Err(EventError::InvalidDelay { seconds: secs });
        }
        Ok(SimTime(nanos.round() as u64))
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.0)
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    pub fn duration_since(&self, earlier: SimTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    pub fn saturating_sub(&self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }

    pub fn checked_add(&self, rhs: SimTime) -> Option<SimTime> {
        self.0.checked_add(rhs.0).map(SimTime)
    }

    pub fn add_duration(&self, duration: Duration) -> Self {
        *self + SimTime::from_duration(duration)
    }

    /// Time needed to serialize `bytes` onto a link of `rate_bps` bits per second.
    pub fn transmission_time(bytes: u64, rate_bps: u64) -> SimTime {
        if rate_bps == 0 {
            return SimTime::MAX;
        }
        let bits = u128::from(bytes) * 8 * u128::from(NANOS_PER_SEC);
        SimTime(u64::try_from(bits.div_ceil(u128::from(rate_bps))).unwrap_or(u64::MAX))
    }
}

impl Add<SimTime> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> Self::Output {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<SimTime> for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        *self = *self + rhs;
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> Self::Output {
        self.add_duration(rhs)
    }
}

impl Sub<SimTime> for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Self::Output {
        self.duration_since(rhs)
    }
}

impl Mul<u64> for SimTime {
    type Output = SimTime;

    fn mul(self, rhs: u64) -> Self::Output {
        SimTime(self.0.saturating_mul(rhs))
    }
}

impl Default for SimTime {
    fn default() -> Self {
        SimTime::zero()
    }
}

impl From<Duration> for SimTime {
    fn from(duration: Duration) -> Self {
        SimTime::from_duration(duration)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let duration = self.as_duration();
        let secs = duration.as_secs();
        let millis = duration.subsec_millis();
        let micros = duration.subsec_micros() % 1000;
        let nanos = duration.subsec_nanos() % 1000;

        if secs > 0 {
            write!(f, "{secs}.{millis:03}s")
        } else if millis > 0 {
            write!(f, "{millis}.{micros:03}ms")
        } else if micros > 0 {
            write!(f, "{micros}.{nanos:03}µs")
        } else {
            write!(f, "{nanos}ns")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simtime_units() {
        assert_eq!(SimTime::zero().as_nanos(), 0);
        assert_eq!(SimTime::from_micros(1).as_nanos(), 1_000);
        assert_eq!(SimTime::from_millis(1).as_nanos(), 1_000_000);
        assert_eq!(SimTime::from_secs(2).as_secs_f64(), 2.0);
    }

    #[test]
    fn test_unit_constructors_saturate() {
        assert_eq!(SimTime::from_secs(u64::MAX), SimTime::MAX);
        assert_eq!(SimTime::from_millis(u64::MAX / 1_000), SimTime::MAX);
        assert_eq!(SimTime::from_micros(u64::MAX), SimTime::MAX);
        assert_eq!(SimTime::from_secs(18_446_744_073), SimTime::from_nanos(18_446_744_073_000_000_000));
    }

    #[test]
    fn test_simtime_arithmetic_saturates() {
        let t1 = SimTime::from_millis(100);
        let t2 = SimTime::from_millis(150);

        assert_eq!(t1 + SimTime::from_millis(25), SimTime::from_millis(125));
        assert_eq!(t2 - t1, Duration::from_millis(50));
        assert_eq!(t1 - t2, Duration::ZERO);
        assert_eq!(SimTime::MAX + t1, SimTime::MAX);
        assert_eq!(t1.saturating_sub(t2), SimTime::zero());
    }

    #[test]
    fn test_try_from_secs() {
        assert_eq!(SimTime::try_from_secs(1.5).unwrap(), SimTime::from_millis(1500));
        assert_eq!(SimTime::try_from_secs(0.000001).unwrap(), SimTime::from_micros(1));
        assert!(matches!(
            SimTime::try_from_secs(-0.5),
            Err(EventError::InvalidDelay { .. })
        ));
        assert!(SimTime::try_from_secs(f64::NAN).is_err());
        assert!(SimTime::try_from_secs(f64::INFINITY).is_err());
        assert!(SimTime::try_from_secs(1e12).is_err());
    }

    #[test]
    fn test_transmission_time() {
        // 1500 bytes at 10 Mbps = 1.2 ms
        assert_eq!(SimTime::transmission_time(1500, 10_000_000), SimTime::from_micros(1200));
        assert_eq!(SimTime::transmission_time(1, 3), SimTime::from_nanos(2_666_666_667));
        assert_eq!(SimTime::transmission_time(1, 0), SimTime::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(SimTime::from_millis(1500).to_string(), "1.500s");
        assert_eq!(SimTime::from_micros(2500).to_string(), "2.500ms");
        assert_eq!(SimTime::from_nanos(42).to_string(), "42ns");
    }
}
