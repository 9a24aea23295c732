//! Simulated time.
//!
//! Simulated time is an integer microsecond counter advanced only by event
//! dispatch. It is independent of wall-clock time; the speed governor is the
//! only component that relates the two.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// One simulated microsecond, the base unit.
pub const MICROSECOND: i64 = 1;
/// One simulated millisecond in microseconds.
pub const MILLISECOND: i64 = 1000 * MICROSECOND;

/// A point in (or span of) simulated time, in integer microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(i64);

impl SimTime {
    /// Simulation start.
    pub const ZERO: SimTime = SimTime(0);

    /// Create from microseconds.
    pub const fn from_micros(us: i64) -> Self {
        SimTime(us)
    }

    /// Create from milliseconds.
    pub const fn from_millis(ms: i64) -> Self {
        SimTime(ms * MILLISECOND)
    }

    /// Create from whole seconds.
    pub const fn from_secs(secs: i64) -> Self {
        SimTime(secs * 1_000_000)
    }

    /// Time in microseconds.
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Time rounded down to milliseconds.
    pub const fn as_millis(self) -> i64 {
        self.0 / MILLISECOND
    }

    /// Time as fractional seconds, for display and ratio math.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        self.0 += rhs.0;
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 - rhs.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} us", self.0)
    }
}
