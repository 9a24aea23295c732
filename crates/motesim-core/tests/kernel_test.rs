//! Integration tests for the simulation kernel loop.
//!
//! These tests exercise the full drain→pop→advance→execute cycle through
//! the public handle API: dispatch ordering, poll-channel priority, mote
//! removal semantics, single-stepping, and the loop's error policy.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use motesim_core::error::{EventError, SimulationError};
use motesim_core::motes::AppMote;
use motesim_core::{
    MoteId, SimEvent, SimTime, Simulation, SimulationConfig, SimulationHandle, TimeEvent,
    TypeRegistry,
};

// ============================================================================
// Helpers
// ============================================================================

fn new_sim() -> SimulationHandle {
    Simulation::new(SimulationConfig::default(), TypeRegistry::with_builtins())
}

fn stop_event() -> TimeEvent {
    TimeEvent::from_fn("test stop", |sim, _| {
        sim.request_stop();
        Ok(())
    })
}

fn recorder(
    label: &'static str,
    order: &Arc<Mutex<Vec<&'static str>>>,
) -> TimeEvent {
    let order = Arc::clone(order);
    TimeEvent::from_fn(label, move |_, _| {
        order.lock().unwrap().push(label);
        Ok(())
    })
}

/// Wait until the kernel thread has exited and parked the state back.
fn wait_until_parked(handle: &SimulationHandle) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.with_simulation(|_| ()).is_none() {
        assert!(
            Instant::now() < deadline,
            "simulation did not stop in time"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

fn us(t: i64) -> SimTime {
    SimTime::from_micros(t)
}

// ============================================================================
// Dispatch ordering
// ============================================================================

/// Events submitted at times 1000, 500, 1000 dispatch as 500, then the two
/// equal-time events in submission order.
#[test]
fn test_sorted_dispatch_with_fifo_tie_break() {
    let handle = new_sim();
    let order = Arc::new(Mutex::new(Vec::new()));

    handle.schedule_event(&recorder("first-at-1000", &order), us(1000));
    handle.schedule_event(&recorder("at-500", &order), us(500));
    handle.schedule_event(&recorder("second-at-1000", &order), us(1000));
    handle.schedule_event(&stop_event(), us(2000));

    handle.start();
    wait_until_parked(&handle);

    assert_eq!(
        *order.lock().unwrap(),
        vec!["at-500", "first-at-1000", "second-at-1000"]
    );
    assert_eq!(handle.simulation_time(), us(2000));
    assert!(handle.take_error().is_none());
}

/// The clock never moves backwards across dispatches, and every callback
/// observes the clock equal to its scheduled time.
#[test]
fn test_monotone_clock() {
    let handle = new_sim();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let times = [900, 100, 500, 100, 700, 300, 900, 50];
    for t in times {
        let seen = Arc::clone(&seen);
        let event = TimeEvent::from_fn("probe", move |_, now| {
            seen.lock().unwrap().push(now.as_micros());
            Ok(())
        });
        handle.schedule_event(&event, us(t));
    }
    handle.schedule_event(&stop_event(), us(1000));

    handle.start();
    wait_until_parked(&handle);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), times.len());
    let mut sorted = times.to_vec();
    sorted.sort();
    assert_eq!(*seen, sorted.iter().map(|t| *t as i64).collect::<Vec<_>>());
}

// ============================================================================
// Poll channel ordering
// ============================================================================

/// A poll action submitted before an externally scheduled event runs before
/// that event dispatches, and the external event becomes visible within one
/// loop iteration.
#[test]
fn test_poll_actions_run_before_next_event() {
    let handle = new_sim();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    // Gate event holds the kernel mid-iteration while the other thread
    // submits work
    let (ready_tx, ready_rx) = bounded::<()>(1);
    let (go_tx, go_rx) = bounded::<()>(1);
    let gate = TimeEvent::from_fn("gate", move |_, _| {
        ready_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        Ok(())
    });
    handle.schedule_event(&gate, us(100));
    handle.schedule_event(&stop_event(), us(10_000));

    let external = recorder("external-event", &order);
    handle.start();
    ready_rx.recv().unwrap();

    let order_poll = Arc::clone(&order);
    handle.invoke_in_sim_thread(move |_| {
        order_poll.lock().unwrap().push("poll-action");
    });
    handle.schedule_event_external(&external, us(200));
    go_tx.send(()).unwrap();

    wait_until_parked(&handle);
    assert_eq!(*order.lock().unwrap(), vec!["poll-action", "external-event"]);
}

/// Actions submitted by a draining action run within the same drain, before
/// the next event.
#[test]
fn test_nested_poll_actions_drain_together() {
    let handle = new_sim();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let resubmit = handle.clone();
    let order_outer = Arc::clone(&order);
    handle.invoke_in_sim_thread(move |_| {
        order_outer.lock().unwrap().push("outer");
        let order_inner = Arc::clone(&order_outer);
        resubmit.invoke_in_sim_thread(move |_| {
            order_inner.lock().unwrap().push("inner");
        });
    });
    handle.schedule_event(&recorder("event", &order), us(10));
    handle.schedule_event(&stop_event(), us(20));

    handle.start();
    wait_until_parked(&handle);

    assert_eq!(*order.lock().unwrap(), vec!["outer", "inner", "event"]);
}

// ============================================================================
// Mote removal
// ============================================================================

/// Removing a mote cancels its queued events: the mote event scheduled for
/// t=2000 never fires after the removal at t=1000, and the queue no longer
/// counts it.
#[test]
fn test_remove_mote_cancels_future_events() {
    let handle = new_sim();
    handle.add_mote(Box::new(AppMote::new(MoteId(7), "apptype1")));

    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = Arc::clone(&fired);
    let mote_event = TimeEvent::mote_fn(MoteId(7), "mote tick", move |_, _| {
        fired2.store(true, Ordering::SeqCst);
        Ok(())
    });
    handle.schedule_event(&mote_event, us(2000));

    let remove = TimeEvent::from_fn("remove mote", |sim, _| {
        sim.remove_mote(MoteId(7));
        Ok(())
    });
    handle.schedule_event(&remove, us(1000));

    let count_after_removal = Arc::new(AtomicUsize::new(usize::MAX));
    let count2 = Arc::clone(&count_after_removal);
    let probe = TimeEvent::from_fn("count probe", move |sim, _| {
        count2.store(sim.scheduled_event_count(), Ordering::SeqCst);
        Ok(())
    });
    handle.schedule_event(&probe, us(1500));
    handle.schedule_event(&stop_event(), us(3000));

    handle.start();
    wait_until_parked(&handle);

    assert!(!fired.load(Ordering::SeqCst), "removed mote received an event");
    // Only the stop event remained after the removal
    assert_eq!(count_after_removal.load(Ordering::SeqCst), 1);
    assert_eq!(handle.with_simulation(|sim| sim.motes().len()).unwrap(), 0);
}

/// A mote-removal observer fires exactly once, from the kernel thread.
#[test]
fn test_mote_removed_notification() {
    let handle = new_sim();
    handle.add_mote(Box::new(AppMote::new(MoteId(4), "apptype1")));

    let removed = Arc::new(AtomicUsize::new(0));
    let removed2 = Arc::clone(&removed);
    let _sub = handle.subscribe(move |event| {
        if *event == SimEvent::MoteRemoved(MoteId(4)) {
            removed2.fetch_add(1, Ordering::SeqCst);
        }
    });

    handle.remove_mote(MoteId(4));
    assert_eq!(removed.load(Ordering::SeqCst), 1);
}

/// A mote heartbeat logs through the event central once per period until the
/// run horizon.
#[test]
fn test_heartbeat_logs_to_event_central() {
    let handle = new_sim();
    handle.add_mote(Box::new(AppMote::new(MoteId(1), "apptype1")));

    let logged = Arc::new(AtomicUsize::new(0));
    let logged2 = Arc::clone(&logged);
    let _sub = handle.subscribe_log(move |_| {
        logged2.fetch_add(1, Ordering::SeqCst);
    });

    let heartbeat = motesim_core::motes::heartbeat_event(MoteId(1), SimTime::from_millis(1000));
    handle.schedule_event(&heartbeat, SimTime::from_millis(1000));
    handle.schedule_event(&stop_event(), us(3_500_000));

    handle.start();
    wait_until_parked(&handle);

    assert_eq!(logged.load(Ordering::SeqCst), 3);
    assert_eq!(
        handle
            .with_simulation(|sim| sim.event_central().entries().count())
            .unwrap(),
        3
    );
}

// ============================================================================
// Single stepping
// ============================================================================

/// `step_millisecond` dispatches exactly the events within the next
/// simulated millisecond plus the stop sentinel, then the loop exits.
#[test]
fn test_step_millisecond_window() {
    let handle = new_sim();
    let order = Arc::new(Mutex::new(Vec::new()));

    handle.schedule_event(&recorder("at-400", &order), us(400));
    handle.schedule_event(&recorder("at-1000", &order), us(1000));
    handle.schedule_event(&recorder("at-1500", &order), us(1500));

    handle.step_millisecond();
    wait_until_parked(&handle);

    assert_eq!(*order.lock().unwrap(), vec!["at-400", "at-1000"]);
    assert_eq!(handle.simulation_time(), SimTime::from_millis(1));
    assert_eq!(
        handle
            .with_simulation(|sim| sim.scheduled_event_count())
            .unwrap(),
        1
    );

    // Stepping again runs the next window
    handle.step_millisecond();
    wait_until_parked(&handle);
    assert_eq!(
        *order.lock().unwrap(),
        vec!["at-400", "at-1000", "at-1500"]
    );
    assert_eq!(handle.simulation_time(), SimTime::from_millis(2));
}

// ============================================================================
// Loop error policy
// ============================================================================

/// An empty queue is a setup error, not an idle state.
#[test]
fn test_starved_loop_reports_error() {
    let handle = new_sim();
    handle.start();
    wait_until_parked(&handle);

    assert!(matches!(
        handle.take_error(),
        Some(SimulationError::StarvedLoop)
    ));
}

/// A failing callback ends the loop and the error carries the mote context.
#[test]
fn test_event_failure_carries_mote_context() {
    let handle = new_sim();
    let bad = TimeEvent::mote_fn(MoteId(3), "exploder", |_, _| {
        Err(EventError::failure("radio caught fire"))
    });
    handle.schedule_event(&bad, us(100));

    let later_fired = Arc::new(AtomicBool::new(false));
    let later2 = Arc::clone(&later_fired);
    let later = TimeEvent::from_fn("later", move |_, _| {
        later2.store(true, Ordering::SeqCst);
        Ok(())
    });
    handle.schedule_event(&later, us(200));

    handle.start();
    wait_until_parked(&handle);

    match handle.take_error() {
        Some(SimulationError::EventFailed {
            label,
            mote,
            message,
        }) => {
            assert_eq!(label, "exploder");
            assert_eq!(mote, Some(MoteId(3)));
            assert!(message.contains("radio caught fire"));
        }
        other => panic!("expected EventFailed, got {other:?}"),
    }
    assert!(!later_fired.load(Ordering::SeqCst));
}

/// A `RequestedStop` error is a graceful exit, not a failure.
#[test]
fn test_requested_stop_is_graceful() {
    let handle = new_sim();
    let soft = TimeEvent::from_fn("breakpoint", |_, _| Err(EventError::stop("breakpoint hit")));
    handle.schedule_event(&soft, us(100));

    let later_fired = Arc::new(AtomicBool::new(false));
    let later2 = Arc::clone(&later_fired);
    let later = TimeEvent::from_fn("later", move |_, _| {
        later2.store(true, Ordering::SeqCst);
        Ok(())
    });
    handle.schedule_event(&later, us(200));

    handle.start();
    wait_until_parked(&handle);

    assert!(handle.take_error().is_none());
    assert!(!later_fired.load(Ordering::SeqCst));
    assert_eq!(handle.simulation_time(), us(100));
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Observers see Started then Stopped around a run.
#[test]
fn test_lifecycle_notifications() {
    let handle = new_sim();
    let events = Arc::new(Mutex::new(Vec::new()));
    let events2 = Arc::clone(&events);
    let _sub = handle.subscribe(move |event| events2.lock().unwrap().push(event.clone()));

    handle.schedule_event(&stop_event(), us(100));
    handle.start();
    wait_until_parked(&handle);

    let events = events.lock().unwrap();
    assert_eq!(*events, vec![SimEvent::Started, SimEvent::Stopped]);
}

/// `stop(block)` from a foreign thread returns within its 100 ms ceiling
/// even while the kernel is stuck in a long callback, and the loop honors
/// the request once the callback finishes.
#[test]
fn test_blocking_stop_is_bounded() {
    let handle = new_sim();
    let slow = TimeEvent::from_fn("slow callback", |_, _| {
        thread::sleep(Duration::from_millis(300));
        Ok(())
    });
    handle.schedule_event(&slow, us(1));

    let skipped = Arc::new(AtomicBool::new(false));
    let skipped2 = Arc::clone(&skipped);
    let next = TimeEvent::from_fn("after slow", move |_, _| {
        skipped2.store(true, Ordering::SeqCst);
        Ok(())
    });
    handle.schedule_event(&next, us(2));

    handle.start();
    thread::sleep(Duration::from_millis(50));

    let begin = Instant::now();
    handle.stop(true);
    assert!(
        begin.elapsed() < Duration::from_millis(250),
        "blocking stop exceeded its ceiling"
    );

    wait_until_parked(&handle);
    assert!(!skipped.load(Ordering::SeqCst), "loop ran past the stop request");
}

/// A simulation with queued work reports itself runnable.
#[test]
fn test_is_runnable() {
    let handle = new_sim();
    assert!(!handle.is_runnable());

    handle.schedule_event(&stop_event(), us(100));
    assert!(handle.is_runnable());

    handle.start();
    wait_until_parked(&handle);
    assert!(!handle.is_runnable());

    handle.invoke_in_sim_thread(|_| {});
    assert!(handle.is_runnable());
}
