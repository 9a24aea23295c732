//! Shared value types for the motesim simulator.
//!
//! This crate holds the types that every other crate in the workspace agrees
//! on: the simulated-time value, mote identifiers, and the observer registry
//! used for lifecycle notifications.

mod observers;
mod time;

pub use observers::{Observers, Subscription};
pub use time::{SimTime, MICROSECOND, MILLISECOND};

use std::fmt;

/// Identifier of a mote within one simulation.
///
/// IDs are assigned by mote configuration and are unique per simulation;
/// duplicate IDs encountered during config load are dropped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MoteId(pub i32);

impl fmt::Display for MoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mote {}", self.0)
    }
}
