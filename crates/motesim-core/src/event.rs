//! Time events: the unit of work for the kernel loop.
//!
//! A [`TimeEvent`] pairs a callback with schedule bookkeeping. The same event
//! value can be scheduled, cancelled, and rescheduled; rescheduling an event
//! that is already linked replaces its old position. Cloning a `TimeEvent` is
//! cheap and yields another handle to the same event.
//!
//! ## Schedule bookkeeping
//!
//! Three atomics track an event's relationship to the queue without any
//! pointer from the event back into queue storage:
//!
//! - a *queue tag* identifying the queue the event is linked in (`0` when
//!   unscheduled), which detects accidental linking into two queues,
//! - a *generation* counter bumped on every (re)schedule; queue entries
//!   stamped with an older generation are dead and are discarded on pop,
//! - the `removed` tombstone honored by the dequeue path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use motesim_common::{MoteId, SimTime};

use crate::error::EventError;
use crate::sim::Simulation;

/// Callback interface implemented by collaborators.
///
/// `execute` runs on the simulation thread with the kernel clock already
/// advanced to the event's scheduled time. `this` is the event the handler
/// is attached to, so self-rescheduling handlers (periodic timers, the speed
/// governor) can hand themselves back to the scheduler.
pub trait EventHandler: Send + Sync {
    fn execute(
        &self,
        this: &TimeEvent,
        sim: &mut Simulation,
        now: SimTime,
    ) -> Result<(), EventError>;

    /// Debug label shown in logs and loop errors.
    fn label(&self) -> &str {
        "event"
    }

    /// Mote this event belongs to, when any. Mote-bound events are cancelled
    /// when their mote is removed from the simulation.
    fn mote(&self) -> Option<MoteId> {
        None
    }
}

struct EventCore {
    handler: Box<dyn EventHandler>,
    queue_tag: AtomicU64,
    generation: AtomicU64,
    removed: AtomicBool,
}

/// A schedulable `(time, callback)` event. Cheap to clone.
#[derive(Clone)]
pub struct TimeEvent {
    core: Arc<EventCore>,
}

impl TimeEvent {
    /// Wrap a handler implementation.
    pub fn new(handler: impl EventHandler + 'static) -> Self {
        TimeEvent {
            core: Arc::new(EventCore {
                handler: Box::new(handler),
                queue_tag: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                removed: AtomicBool::new(false),
            }),
        }
    }

    /// Event from a plain closure.
    pub fn from_fn<F>(label: &'static str, f: F) -> Self
    where
        F: Fn(&mut Simulation, SimTime) -> Result<(), EventError> + Send + Sync + 'static,
    {
        TimeEvent::new(FnEvent {
            label,
            mote: None,
            f,
        })
    }

    /// Event from a closure, bound to a mote.
    pub fn mote_fn<F>(mote: MoteId, label: &'static str, f: F) -> Self
    where
        F: Fn(&mut Simulation, SimTime) -> Result<(), EventError> + Send + Sync + 'static,
    {
        TimeEvent::new(FnEvent {
            label,
            mote: Some(mote),
            f,
        })
    }

    /// True while the event is linked in a queue and not tombstoned.
    pub fn is_scheduled(&self) -> bool {
        self.core.queue_tag.load(Ordering::Relaxed) != 0
            && !self.core.removed.load(Ordering::Relaxed)
    }

    pub fn label(&self) -> &str {
        self.core.handler.label()
    }

    pub fn mote(&self) -> Option<MoteId> {
        self.core.handler.mote()
    }

    /// Whether two handles refer to the same event.
    pub fn same_event(&self, other: &TimeEvent) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub(crate) fn execute(
        &self,
        sim: &mut Simulation,
        now: SimTime,
    ) -> Result<(), EventError> {
        self.core.handler.execute(self, sim, now)
    }

    pub(crate) fn queue_tag(&self) -> u64 {
        self.core.queue_tag.load(Ordering::Relaxed)
    }

    pub(crate) fn set_queue_tag(&self, tag: u64) {
        self.core.queue_tag.store(tag, Ordering::Relaxed);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.core.generation.load(Ordering::Relaxed)
    }

    /// Invalidate every queue entry stamped with the current generation.
    pub(crate) fn bump_generation(&self) -> u64 {
        self.core.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.core.removed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_removed(&self, removed: bool) {
        self.core.removed.store(removed, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for TimeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeEvent")
            .field("label", &self.label())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

struct FnEvent<F> {
    label: &'static str,
    mote: Option<MoteId>,
    f: F,
}

impl<F> EventHandler for FnEvent<F>
where
    F: Fn(&mut Simulation, SimTime) -> Result<(), EventError> + Send + Sync,
{
    fn execute(
        &self,
        _this: &TimeEvent,
        sim: &mut Simulation,
        now: SimTime,
    ) -> Result<(), EventError> {
        (self.f)(sim, now)
    }

    fn label(&self) -> &str {
        self.label
    }

    fn mote(&self) -> Option<MoteId> {
        self.mote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_event_is_unscheduled() {
        let event = TimeEvent::from_fn("noop", |_, _| Ok(()));
        assert!(!event.is_scheduled());
        assert_eq!(event.label(), "noop");
        assert_eq!(event.mote(), None);
    }

    #[test]
    fn test_mote_binding() {
        let event = TimeEvent::mote_fn(MoteId(3), "tick", |_, _| Ok(()));
        assert_eq!(event.mote(), Some(MoteId(3)));
    }

    #[test]
    fn test_clone_is_same_event() {
        let event = TimeEvent::from_fn("noop", |_, _| Ok(()));
        let other = TimeEvent::from_fn("noop", |_, _| Ok(()));
        assert!(event.same_event(&event.clone()));
        assert!(!event.same_event(&other));
    }
}
