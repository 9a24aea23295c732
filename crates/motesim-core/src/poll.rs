//! Poll channel: actions to run on the simulation thread between events.
//!
//! Poll actions are prioritized over simulation events; the kernel loop
//! drains the channel completely before dispatching the next event. An
//! action submitted during a drain runs within that same drain.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::sim::Simulation;

/// An action deferred to the simulation thread.
pub type SimAction = Box<dyn FnOnce(&mut Simulation) + Send>;

/// Unbounded FIFO of [`SimAction`]s. Submission is safe from any thread;
/// draining belongs to the simulation thread.
pub(crate) struct PollChannel {
    tx: Sender<SimAction>,
    rx: Receiver<SimAction>,
}

impl PollChannel {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        PollChannel { tx, rx }
    }

    pub fn submit(&self, action: SimAction) {
        // The receiver lives as long as this channel, so the send cannot fail
        let _ = self.tx.send(action);
    }

    pub fn try_next(&self) -> Option<SimAction> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
