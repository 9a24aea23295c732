//! Discrete-event simulation kernel for the motesim simulator.
//!
//! Simulated time advances in integer microsecond ticks by dequeuing the
//! earliest pending event, executing it, and repeating. All simulated work
//! runs on one dedicated kernel thread; external threads (UIs, emulated
//! radios, user scripts) inject work through two narrow channels (deferred
//! event scheduling and the poll channel), and everything else about the
//! kernel state is single-owner by construction.
//!
//! ## Crate map
//!
//! - [`event`]: [`TimeEvent`]/[`EventHandler`], the unit of kernel work
//! - [`queue`]: the time-ordered event queue with out-of-thread deferral
//! - [`sim`]: the kernel itself: [`Simulation`], [`SimulationHandle`],
//!   the loop, lifecycle, and mote registries
//! - [`mote`]: collaborator traits and the per-simulation type registry
//! - [`central`]: buffered mote log output
//! - [`config`]: XML config codec
//! - [`motes`], [`radiomediums`]: built-in implementations
//!
//! ## Quick start
//!
//! ```rust
//! use motesim_core::{Simulation, SimulationConfig, TimeEvent, TypeRegistry};
//! use motesim_core::SimTime;
//!
//! let handle = Simulation::new(SimulationConfig::default(), TypeRegistry::with_builtins());
//! let stop = TimeEvent::from_fn("stop", |sim, _now| {
//!     sim.request_stop();
//!     Ok(())
//! });
//! handle.schedule_event(&stop, SimTime::from_millis(5));
//! handle.start();
//! handle.stop(true);
//! ```

pub mod central;
pub mod config;
pub mod error;
pub mod event;
mod governor;
pub mod mote;
pub mod motes;
mod poll;
pub mod queue;
pub mod radiomediums;
pub mod rng;
pub mod sim;

pub use central::{EventCentral, LogEntry};
pub use config::{Element, LoadOptions};
pub use error::{ConfigError, EventError, SimulationError};
pub use event::{EventHandler, TimeEvent};
pub use mote::{Mote, MoteType, RadioMedium, TypeRegistry};
pub use queue::{EventQueue, ExternalScheduler};
pub use rng::SimRng;
pub use sim::{Seed, SimEvent, Simulation, SimulationConfig, SimulationHandle};

pub use motesim_common::{MoteId, Observers, SimTime, Subscription, MICROSECOND, MILLISECOND};
