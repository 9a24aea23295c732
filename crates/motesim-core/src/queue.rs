//! Time-ordered event queue.
//!
//! The queue is a binary min-heap ordered by `(time, insertion stamp)`, so
//! equal-time events dispatch in the order they were scheduled. Cancellation
//! and rescheduling never remove heap entries in place: superseded entries
//! die by generation mismatch and tombstoned entries are consumed by the pop
//! path.
//!
//! All heap operations belong to the simulation thread. The one concession
//! to other threads is [`ExternalScheduler`]: a mutex-guarded pending list
//! that the simulation thread merges (in submission order) before each pop
//! or peek. External enqueuers never touch heap storage.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use motesim_common::SimTime;

use crate::event::TimeEvent;

static NEXT_QUEUE_TAG: AtomicU64 = AtomicU64::new(1);

struct Entry {
    time: SimTime,
    seq: u64,
    generation: u64,
    event: TimeEvent,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap behavior (earliest time first,
        // earliest insertion first on ties)
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PendingState {
    tag: u64,
    pending: Mutex<Vec<(TimeEvent, SimTime)>>,
    has_pending: AtomicBool,
}

/// Out-of-thread scheduling half of an [`EventQueue`]. Clone freely and hand
/// to collaborators on other threads.
#[derive(Clone)]
pub struct ExternalScheduler {
    shared: Arc<PendingState>,
}

impl ExternalScheduler {
    /// Defer `schedule(event, time)` to the simulation thread.
    ///
    /// If the event is already linked in the queue, its old position is
    /// invalidated here (no heap surgery from this thread) and the event
    /// fires at `time` once the simulation thread merges the pending list.
    ///
    /// Panics if the event is linked in a different queue.
    pub fn schedule(&self, event: &TimeEvent, time: SimTime) {
        let mut pending = self.shared.pending.lock().unwrap();
        let tag = event.queue_tag();
        assert!(
            tag == 0 || tag == self.shared.tag,
            "event '{}' is linked in another queue",
            event.label()
        );
        if tag == self.shared.tag {
            event.bump_generation();
        }
        pending.push((event.clone(), time));
        self.shared.has_pending.store(true, Ordering::Relaxed);
    }
}

/// Ordered store of future events. Owned by the simulation thread.
pub struct EventQueue {
    tag: u64,
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    live: usize,
    shared: Arc<PendingState>,
}

impl EventQueue {
    pub fn new() -> Self {
        let tag = NEXT_QUEUE_TAG.fetch_add(1, Ordering::Relaxed);
        EventQueue {
            tag,
            heap: BinaryHeap::new(),
            next_seq: 0,
            live: 0,
            shared: Arc::new(PendingState {
                tag,
                pending: Mutex::new(Vec::new()),
                has_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Scheduling half usable from any thread.
    pub fn external(&self) -> ExternalScheduler {
        ExternalScheduler {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Schedule `event` at `time`. If the event is already linked here it is
    /// moved (unlink + relink), clearing any tombstone.
    ///
    /// Panics if the event is linked in a different queue.
    pub fn schedule(&mut self, event: &TimeEvent, time: SimTime) {
        let tag = event.queue_tag();
        if tag == self.tag {
            if event.is_removed() {
                // Tombstoned events were already counted out
                self.live += 1;
            }
        } else if tag == 0 {
            self.live += 1;
        } else {
            panic!("event '{}' is linked in another queue", event.label());
        }

        let generation = event.bump_generation();
        event.set_removed(false);
        event.set_queue_tag(self.tag);
        self.heap.push(Entry {
            time,
            seq: self.next_seq,
            generation,
            event: event.clone(),
        });
        self.next_seq += 1;
    }

    /// Unlink and return the earliest live event, merging deferred external
    /// additions first. Tombstoned events are consumed without being
    /// returned. `None` when no live event remains.
    pub fn pop_first(&mut self) -> Option<(TimeEvent, SimTime)> {
        self.merge_pending();
        while let Some(entry) = self.heap.pop() {
            if entry.generation != entry.event.generation() {
                // Superseded by a reschedule
                continue;
            }
            if entry.event.is_removed() {
                entry.event.set_queue_tag(0);
                continue;
            }
            entry.event.set_queue_tag(0);
            self.live -= 1;
            return Some((entry.event, entry.time));
        }
        None
    }

    /// Earliest live event without unlinking it.
    pub fn peek_first(&mut self) -> Option<(TimeEvent, SimTime)> {
        self.merge_pending();
        loop {
            let dead = match self.heap.peek() {
                None => return None,
                Some(entry) => {
                    if entry.generation != entry.event.generation() {
                        true
                    } else if entry.event.is_removed() {
                        entry.event.set_queue_tag(0);
                        true
                    } else {
                        false
                    }
                }
            };
            if !dead {
                break;
            }
            self.heap.pop();
        }
        self.heap
            .peek()
            .map(|entry| (entry.event.clone(), entry.time))
    }

    /// Tombstone every linked event matching `pred` and drop matching
    /// deferred external additions. Tombstoned events stay linked until the
    /// pop path consumes them.
    pub fn remove_if(&mut self, pred: impl Fn(&TimeEvent) -> bool) {
        for entry in self.heap.iter() {
            if entry.generation == entry.event.generation()
                && !entry.event.is_removed()
                && pred(&entry.event)
            {
                entry.event.set_removed(true);
                self.live -= 1;
            }
        }

        let mut pending = self.shared.pending.lock().unwrap();
        let mut kept = Vec::with_capacity(pending.len());
        for (event, time) in pending.drain(..) {
            if pred(&event) {
                // Still counted through a superseded link
                if event.queue_tag() == self.tag && !event.is_removed() {
                    self.live -= 1;
                }
                event.set_queue_tag(0);
            } else {
                kept.push((event, time));
            }
        }
        *pending = kept;
        self.shared
            .has_pending
            .store(!pending.is_empty(), Ordering::Relaxed);
    }

    /// Tombstone a single linked event. No-op when the event is not linked
    /// here.
    pub fn unschedule(&mut self, event: &TimeEvent) {
        if event.queue_tag() == self.tag && !event.is_removed() {
            event.set_removed(true);
            self.live -= 1;
        }
    }

    /// Drain the queue, unlinking every event.
    pub fn clear(&mut self) {
        for entry in self.heap.drain() {
            if entry.generation == entry.event.generation() {
                entry.event.set_queue_tag(0);
            }
        }
        let mut pending = self.shared.pending.lock().unwrap();
        for (event, _) in pending.drain(..) {
            event.set_queue_tag(0);
        }
        self.shared.has_pending.store(false, Ordering::Relaxed);
        self.live = 0;
    }

    /// Number of linked live events (tombstones excluded).
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Whether deferred external additions await merging.
    pub fn has_pending(&self) -> bool {
        self.shared.has_pending.load(Ordering::Relaxed)
    }

    fn merge_pending(&mut self) {
        if !self.shared.has_pending.load(Ordering::Relaxed) {
            return;
        }
        let drained: Vec<(TimeEvent, SimTime)> = {
            let mut pending = self.shared.pending.lock().unwrap();
            self.shared.has_pending.store(false, Ordering::Relaxed);
            std::mem::take(&mut *pending)
        };
        for (event, time) in drained {
            self.schedule(&event, time);
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
