//! Real-time speed governor.
//!
//! In limited mode a self-rescheduling kernel event fires roughly every
//! simulated millisecond and sleeps the simulation thread just long enough
//! to hold simulated time to `ratio` times real time. When the simulation
//! falls behind, the next firing is pushed out proportionally instead of
//! sleeping, so a lagging simulation pays less governor overhead.
//!
//! The governor compares simulated and real time against a pair of anchors
//! that are re-taken every real-time second, keeping the ratio honest over
//! long runs without accumulating early drift.

use std::time::{Duration, Instant};

use motesim_common::SimTime;

/// Throttling decision for one governor firing.
pub(crate) struct Throttle {
    /// How long the simulation thread should sleep before continuing.
    pub sleep: Duration,
    /// Delay until the governor should fire again.
    pub next_fire_in: SimTime,
    /// Re-take the anchors after sleeping.
    pub rearm_anchors: bool,
}

pub(crate) struct SpeedGovernor {
    limit: Option<f64>,
    anchor_real: Instant,
    anchor_sim_ms: i64,
}

impl SpeedGovernor {
    pub fn new() -> Self {
        SpeedGovernor {
            limit: None,
            anchor_real: Instant::now(),
            anchor_sim_ms: 0,
        }
    }

    /// Current ratio limit; `None` means unlimited.
    pub fn limit(&self) -> Option<f64> {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Option<f64>, sim_ms: i64) {
        self.limit = limit;
        self.reset_anchors(sim_ms);
    }

    pub fn reset_anchors(&mut self, sim_ms: i64) {
        self.anchor_real = Instant::now();
        self.anchor_sim_ms = sim_ms;
    }

    /// Compute the throttling decision for a firing at simulated time
    /// `sim_ms`. `None` in unlimited mode: the firing is a no-op and the
    /// governor is not rescheduled.
    pub fn throttle(&self, sim_ms: i64) -> Option<Throttle> {
        let limit = self.limit?;

        let diff_sim_ms = sim_ms - self.anchor_sim_ms;
        let diff_real_ms = self.anchor_real.elapsed().as_millis() as i64;
        let expected_real_ms = (diff_sim_ms as f64 / limit) as i64;
        let sleep_ms = expected_real_ms - diff_real_ms;

        let throttle = if sleep_ms >= 0 {
            // Ahead of real time: slow down, fire again next millisecond
            Throttle {
                sleep: Duration::from_millis(sleep_ms as u64),
                next_fire_in: SimTime::from_millis(1),
                rearm_anchors: diff_real_ms > 1000,
            }
        } else {
            // Behind: fire less often instead of sleeping
            Throttle {
                sleep: Duration::ZERO,
                next_fire_in: SimTime::from_millis(-sleep_ms),
                rearm_anchors: diff_real_ms > 1000,
            }
        };
        Some(throttle)
    }
}
