//! The simulation kernel.
//!
//! A single dedicated thread executes all events sequentially: each loop
//! iteration drains pending poll actions, pops the earliest event, advances
//! the clock to its timestamp, and invokes its callback. External threads
//! interact exclusively through the poll channel and the event queue's
//! deferred-scheduling half.
//!
//! ## Ownership
//!
//! [`Simulation`] is the kernel state: clock, queue, registries, RNG,
//! governor. While running it is owned by the kernel thread; while stopped
//! it is parked in a slot inside the shared control block. Either way
//! exactly one thread can reach it at a time, which is what makes
//! "kernel-owned fields are kernel-thread-exclusive" hold without locks on
//! the hot path.
//!
//! [`SimulationHandle`] is the cloneable cross-thread face: lifecycle
//! control, poll submission, deferred scheduling, observers, and the clock
//! mirror. Collaborators running on the kernel thread receive
//! `&mut Simulation` in their event callbacks and use its in-thread API
//! directly.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use motesim_common::{MoteId, Observers, SimTime, Subscription};

use crate::central::{EventCentral, LogEntry};
use crate::config::{self, Element, LoadOptions};
use crate::error::{ConfigError, EventError, SimulationError};
use crate::event::{EventHandler, TimeEvent};
use crate::governor::SpeedGovernor;
use crate::mote::{Mote, MoteType, RadioMedium, TypeRegistry};
use crate::poll::PollChannel;
use crate::queue::{EventQueue, ExternalScheduler};
use crate::rng::SimRng;

/// Lifecycle notifications delivered to observers. Sent from the kernel
/// thread while running, or from the mutating thread while stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Started,
    Stopped,
    MoteAdded(MoteId),
    MoteRemoved(MoteId),
    ConfigChanged,
}

/// Random seed selection for a new simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    Fixed(i64),
    /// Draw a fresh seed at creation; recorded as "generated" in config.
    Generated,
}

/// Initial kernel parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub title: String,
    pub seed: Seed,
    /// Upper bound on the randomized per-mote startup delay.
    pub max_startup_delay: SimTime,
    /// Real-time ratio limit; `None` runs as fast as possible.
    pub speed_limit: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            title: "My simulation".to_string(),
            seed: Seed::Fixed(123_456),
            max_startup_delay: SimTime::from_millis(1000),
            speed_limit: None,
        }
    }
}

struct RunState {
    running: bool,
    thread: Option<thread::Thread>,
}

/// Cross-thread control block. The `running`/`thread` pair lives under one
/// mutex so observers never see a half-updated lifecycle snapshot; the
/// atomic mirror serves fast checks and is written only under that mutex.
struct SharedState {
    run: Mutex<RunState>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    clock_us: AtomicI64,
    speed_limit: Mutex<Option<f64>>,
    title: Mutex<String>,
    poll: PollChannel,
    external: ExternalScheduler,
    observers: Observers<SimEvent>,
    log_observers: Observers<LogEntry>,
    error: Mutex<Option<SimulationError>>,
}

struct StateSlot {
    state: Mutex<Option<Simulation>>,
    returned: Condvar,
}

/// Kernel-thread state and in-thread API.
pub struct Simulation {
    shared: Arc<SharedState>,
    clock: SimTime,
    queue: EventQueue,
    title: String,
    motes: Vec<Box<dyn Mote>>,
    mote_types: Vec<Box<dyn MoteType>>,
    radio_medium: Option<Box<dyn RadioMedium>>,
    registry: TypeRegistry,
    central: EventCentral,
    rng: SimRng,
    seed: i64,
    seed_generated: bool,
    max_startup_delay: SimTime,
    governor: SpeedGovernor,
    governor_event: TimeEvent,
}

impl Simulation {
    /// Create a stopped simulation and return its control handle.
    pub fn new(config: SimulationConfig, registry: TypeRegistry) -> SimulationHandle {
        let queue = EventQueue::new();
        let external = queue.external();
        let central = EventCentral::new();
        let (seed, seed_generated) = match config.seed {
            Seed::Fixed(seed) => (seed, false),
            Seed::Generated => (rand::random::<i64>(), true),
        };

        let shared = Arc::new(SharedState {
            run: Mutex::new(RunState {
                running: false,
                thread: None,
            }),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            clock_us: AtomicI64::new(0),
            speed_limit: Mutex::new(None),
            title: Mutex::new(config.title.clone()),
            poll: PollChannel::new(),
            external,
            observers: Observers::new(),
            log_observers: central.observers().clone(),
            error: Mutex::new(None),
        });

        let mut sim = Simulation {
            shared: Arc::clone(&shared),
            clock: SimTime::ZERO,
            queue,
            title: config.title,
            motes: Vec::new(),
            mote_types: Vec::new(),
            radio_medium: None,
            registry,
            central,
            rng: SimRng::new(seed),
            seed,
            seed_generated,
            max_startup_delay: config.max_startup_delay,
            governor: SpeedGovernor::new(),
            governor_event: TimeEvent::new(GovernorEvent),
        };
        tracing::info!(seed, generated = seed_generated, "simulation random seed");

        if config.speed_limit.is_some() {
            sim.set_speed_limit(config.speed_limit);
        }

        SimulationHandle {
            shared,
            slot: Arc::new(StateSlot {
                state: Mutex::new(Some(sim)),
                returned: Condvar::new(),
            }),
        }
    }

    /// Schedule an event at `time`. Rescheduling a linked event moves it.
    pub fn schedule_event(&mut self, event: &TimeEvent, time: SimTime) {
        self.queue.schedule(event, time);
    }

    /// Cancel a scheduled event.
    pub fn unschedule_event(&mut self, event: &TimeEvent) {
        self.queue.unschedule(event);
    }

    /// Current simulated time in microseconds.
    pub fn simulation_time(&self) -> SimTime {
        self.clock
    }

    /// Current simulated time rounded down to milliseconds.
    pub fn simulation_time_millis(&self) -> i64 {
        self.clock.as_millis()
    }

    /// Number of live events waiting in the queue.
    pub fn scheduled_event_count(&self) -> usize {
        self.queue.len()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        *self.shared.title.lock().unwrap() = self.title.clone();
        self.shared.observers.notify(&SimEvent::ConfigChanged);
    }

    /// Current real-time ratio limit; `None` means unlimited.
    pub fn speed_limit(&self) -> Option<f64> {
        self.governor.limit()
    }

    /// Switch the speed governor. Limited mode re-anchors and schedules the
    /// governor event at the current clock; unlimited mode cancels it.
    pub fn set_speed_limit(&mut self, limit: Option<f64>) {
        self.governor.set_limit(limit, self.clock.as_millis());
        self.queue.unschedule(&self.governor_event);
        if limit.is_some() {
            self.queue.schedule(&self.governor_event, self.clock);
        }
        *self.shared.speed_limit.lock().unwrap() = limit;
        self.shared.observers.notify(&SimEvent::ConfigChanged);
    }

    pub fn random_seed(&self) -> i64 {
        self.seed
    }

    /// Reseed the deterministic random stream.
    pub fn set_random_seed(&mut self, seed: i64) {
        self.seed = seed;
        self.rng.reseed(seed);
        tracing::info!(seed, "simulation random seed");
    }

    pub fn is_seed_generated(&self) -> bool {
        self.seed_generated
    }

    pub fn set_seed_generated(&mut self, generated: bool) {
        self.seed_generated = generated;
    }

    /// The simulation's random generator. All draws affecting simulated
    /// state must come from here.
    pub fn rng(&mut self) -> &mut SimRng {
        &mut self.rng
    }

    pub fn max_startup_delay(&self) -> SimTime {
        self.max_startup_delay
    }

    pub fn set_max_startup_delay(&mut self, delay: SimTime) {
        self.max_startup_delay = SimTime::from_micros(delay.as_micros().max(0));
    }

    /// Add a mote, randomizing its clock drift within the startup-delay
    /// window to stagger node boots.
    pub fn add_mote(&mut self, mut mote: Box<dyn Mote>) {
        let delay_us = self.max_startup_delay.as_micros();
        let drift = if delay_us > 0 {
            -(self.clock.as_micros() + self.rng.gen_range(0..delay_us))
        } else {
            -self.clock.as_micros()
        };
        mote.set_clock_drift(drift);

        if let Some(medium) = self.radio_medium.as_mut() {
            medium.register_mote(mote.as_ref());
        }
        mote.added();
        let id = mote.id();
        self.motes.push(mote);
        self.shared.observers.notify(&SimEvent::MoteAdded(id));
    }

    /// Remove a mote and cancel every event still queued for it, including
    /// deferred external additions.
    pub fn remove_mote(&mut self, id: MoteId) {
        let Some(index) = self.motes.iter().position(|m| m.id() == id) else {
            return;
        };
        let mut mote = self.motes.remove(index);
        if let Some(medium) = self.radio_medium.as_mut() {
            medium.unregister_mote(mote.as_ref());
        }
        mote.removed();
        self.shared.observers.notify(&SimEvent::MoteRemoved(id));
        self.queue.remove_if(|event| event.mote() == Some(id));
    }

    pub fn motes(&self) -> &[Box<dyn Mote>] {
        &self.motes
    }

    pub fn mote_with_id(&self, id: MoteId) -> Option<&dyn Mote> {
        self.motes.iter().find(|m| m.id() == id).map(|m| m.as_ref())
    }

    pub fn add_mote_type(&mut self, mote_type: Box<dyn MoteType>) {
        self.mote_types.push(mote_type);
        self.shared.observers.notify(&SimEvent::ConfigChanged);
    }

    /// Remove a mote type along with every mote generated from it.
    pub fn remove_mote_type(&mut self, identifier: &str) {
        if !self.mote_types.iter().any(|t| t.identifier() == identifier) {
            tracing::error!(identifier, "mote type is not registered");
            return;
        }
        let doomed: Vec<MoteId> = self
            .motes
            .iter()
            .filter(|m| m.type_identifier() == identifier)
            .map(|m| m.id())
            .collect();
        for id in doomed {
            self.remove_mote(id);
        }
        self.mote_types.retain(|t| t.identifier() != identifier);
        self.shared.observers.notify(&SimEvent::ConfigChanged);
    }

    pub fn mote_types(&self) -> &[Box<dyn MoteType>] {
        &self.mote_types
    }

    pub fn mote_type_with_id(&self, identifier: &str) -> Option<&dyn MoteType> {
        self.mote_types
            .iter()
            .find(|t| t.identifier() == identifier)
            .map(|t| t.as_ref())
    }

    /// Install a radio medium, migrating registered motes from the old one.
    pub fn set_radio_medium(&mut self, mut medium: Box<dyn RadioMedium>) {
        if let Some(old) = self.radio_medium.as_mut() {
            for mote in &self.motes {
                old.unregister_mote(mote.as_ref());
            }
        }
        for mote in &self.motes {
            medium.register_mote(mote.as_ref());
        }
        self.radio_medium = Some(medium);
    }

    pub fn radio_medium(&self) -> Option<&dyn RadioMedium> {
        self.radio_medium.as_deref()
    }

    pub fn radio_medium_mut(&mut self) -> Option<&mut (dyn RadioMedium + 'static)> {
        self.radio_medium.as_deref_mut()
    }

    pub fn event_central(&self) -> &EventCentral {
        &self.central
    }

    pub fn event_central_mut(&mut self) -> &mut EventCentral {
        &mut self.central
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Ask the loop to exit after the current event.
    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    /// True when the simulation has work: a queued event, a deferred
    /// external addition, or a pending poll action.
    pub fn is_runnable(&self) -> bool {
        !self.queue.is_empty() || self.queue.has_pending() || !self.shared.poll.is_empty()
    }

    /// Encode the current state as a config tree.
    pub fn export_config(&self) -> Element {
        config::export_config(self)
    }

    /// Apply a config tree. See [`config::apply_config`].
    pub fn apply_config(
        &mut self,
        root: &Element,
        options: &LoadOptions,
    ) -> Result<(), ConfigError> {
        config::apply_config(self, root, options)
    }

    /// Tear down collaborator resources: removes every mote, then the radio
    /// medium. Called when the simulation is discarded.
    pub fn teardown(&mut self) {
        let ids: Vec<MoteId> = self.motes.iter().map(|m| m.id()).collect();
        for id in ids {
            self.remove_mote(id);
        }
        if let Some(mut medium) = self.radio_medium.take() {
            medium.removed();
        }
    }

    pub(crate) fn run_poll_actions(&mut self) {
        let shared = Arc::clone(&self.shared);
        while let Some(action) = shared.poll.try_next() {
            action(self);
        }
    }

    pub(crate) fn governor_fired(&mut self, event: &TimeEvent, now: SimTime) {
        let Some(throttle) = self.governor.throttle(now.as_millis()) else {
            return;
        };
        if !throttle.sleep.is_zero() {
            thread::sleep(throttle.sleep);
        }
        self.queue.schedule(event, now + throttle.next_fire_in);
        if throttle.rearm_anchors {
            self.governor.reset_anchors(self.clock.as_millis());
        }
    }
}

struct GovernorEvent;

impl EventHandler for GovernorEvent {
    fn execute(
        &self,
        this: &TimeEvent,
        sim: &mut Simulation,
        now: SimTime,
    ) -> Result<(), EventError> {
        sim.governor_fired(this, now);
        Ok(())
    }

    fn label(&self) -> &str {
        "speed limiter"
    }
}

fn run_loop(sim: &mut Simulation) -> Option<SimulationError> {
    let start_real = Instant::now();
    let start_sim_ms = sim.clock.as_millis();
    tracing::debug!("simulation thread started");
    sim.governor.reset_anchors(start_sim_ms);
    let shared = Arc::clone(&sim.shared);
    shared.observers.notify(&SimEvent::Started);

    let error = loop {
        sim.run_poll_actions();

        let Some((event, time)) = sim.queue.pop_first() else {
            break Some(SimulationError::StarvedLoop);
        };
        assert!(
            time >= sim.clock,
            "event '{}' scheduled in the past ({time} < {})",
            event.label(),
            sim.clock
        );
        sim.clock = time;
        shared.clock_us.store(time.as_micros(), Ordering::Relaxed);

        match event.execute(sim, time) {
            Ok(()) => {}
            Err(EventError::RequestedStop(reason)) => {
                tracing::info!(%reason, "simulation stopped by event request");
                break None;
            }
            Err(EventError::Execution(message)) => {
                break Some(SimulationError::EventFailed {
                    label: event.label().to_string(),
                    mote: event.mote(),
                    message,
                });
            }
        }

        if shared.stop_requested.load(Ordering::SeqCst) {
            break None;
        }
    };

    let runtime_ms = start_real.elapsed().as_millis() as i64;
    let simulated_ms = sim.clock.as_millis() - start_sim_ms;
    tracing::info!(
        runtime_ms,
        simulated_ms,
        speedup = simulated_ms as f64 / runtime_ms.max(1) as f64,
        "simulation stopped"
    );
    error
}

/// Cloneable cross-thread control handle for one simulation.
#[derive(Clone)]
pub struct SimulationHandle {
    shared: Arc<SharedState>,
    slot: Arc<StateSlot>,
}

impl SimulationHandle {
    /// Spawn the kernel thread. No-op when already running.
    pub fn start(&self) {
        let mut sim = {
            let mut state = self.slot.state.lock().unwrap();
            match state.take() {
                Some(sim) => sim,
                None => return,
            }
        };
        *self.shared.error.lock().unwrap() = None;

        {
            let mut run = self.shared.run.lock().unwrap();
            run.running = true;
            self.shared.running.store(true, Ordering::SeqCst);
        }

        let slot = Arc::clone(&self.slot);
        thread::Builder::new()
            .name("simulation".to_string())
            .spawn(move || {
                let shared = Arc::clone(&sim.shared);
                {
                    let mut run = shared.run.lock().unwrap();
                    run.thread = Some(thread::current());
                }

                let error = run_loop(&mut sim);

                {
                    let mut run = shared.run.lock().unwrap();
                    run.running = false;
                    run.thread = None;
                    shared.running.store(false, Ordering::SeqCst);
                }
                shared.stop_requested.store(false, Ordering::SeqCst);
                if let Some(error) = error {
                    tracing::error!(%error, "simulation stopped due to error");
                    *shared.error.lock().unwrap() = Some(error);
                }
                shared.observers.notify(&SimEvent::Stopped);

                {
                    let mut state = slot.state.lock().unwrap();
                    *state = Some(sim);
                }
                slot.returned.notify_all();
            })
            .expect("failed to spawn simulation thread");
    }

    /// Request the loop to exit after the current event. With `block`, wait
    /// up to 100 ms for the kernel thread to finish; the wait is bounded so
    /// a kernel stuck in a long user callback cannot deadlock the caller.
    /// Called from the kernel thread itself, returns immediately.
    pub fn stop(&self, block: bool) {
        if !self.is_running() {
            return;
        }
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        if !block || self.is_simulation_thread() {
            return;
        }

        let deadline = Instant::now() + Duration::from_millis(100);
        let mut state = self.slot.state.lock().unwrap();
        while state.is_none() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .slot
                .returned
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }

    /// When stopped: schedule a stop sentinel one simulated millisecond
    /// ahead and start, so exactly one millisecond of simulated time runs.
    pub fn step_millisecond(&self) {
        {
            let mut state = self.slot.state.lock().unwrap();
            let Some(sim) = state.as_mut() else {
                return;
            };
            let stop = TimeEvent::from_fn("single step stop", |sim, _| {
                sim.request_stop();
                Ok(())
            });
            let at = sim.simulation_time() + SimTime::from_millis(1);
            sim.schedule_event(&stop, at);
        }
        self.start();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// True iff the calling thread is the kernel thread.
    pub fn is_simulation_thread(&self) -> bool {
        let run = self.shared.run.lock().unwrap();
        run.thread
            .as_ref()
            .map(|t| t.id() == thread::current().id())
            .unwrap_or(false)
    }

    /// Submit an action to run on the simulation thread between events.
    /// Safe from any thread; actions run in submission order, before the
    /// next event dispatch.
    pub fn invoke_in_sim_thread(&self, action: impl FnOnce(&mut Simulation) + Send + 'static) {
        self.shared.poll.submit(Box::new(action));
    }

    /// Schedule an event while the simulation is stopped.
    ///
    /// Panics when the simulation is running: foreign threads must route
    /// scheduling through [`Self::schedule_event_external`] or
    /// [`Self::invoke_in_sim_thread`], and kernel-thread code holds
    /// `&mut Simulation` and schedules directly.
    pub fn schedule_event(&self, event: &TimeEvent, time: SimTime) {
        let mut state = self.slot.state.lock().unwrap();
        match state.as_mut() {
            Some(sim) => sim.schedule_event(event, time),
            None => panic!(
                "schedule_event while running; use schedule_event_external or invoke_in_sim_thread"
            ),
        }
    }

    /// Defer `schedule(event, time)` to the simulation thread. Safe from any
    /// thread; the event is merged before the next pop.
    pub fn schedule_event_external(&self, event: &TimeEvent, time: SimTime) {
        self.shared.external.schedule(event, time);
    }

    /// Simulated time as published by the kernel loop.
    pub fn simulation_time(&self) -> SimTime {
        SimTime::from_micros(self.shared.clock_us.load(Ordering::Relaxed))
    }

    pub fn simulation_time_millis(&self) -> i64 {
        self.simulation_time().as_millis()
    }

    pub fn speed_limit(&self) -> Option<f64> {
        *self.shared.speed_limit.lock().unwrap()
    }

    /// Change the speed limit: applied inline while stopped, otherwise from
    /// the simulation thread via the poll channel.
    pub fn set_speed_limit(&self, limit: Option<f64>) {
        let mut state = self.slot.state.lock().unwrap();
        match state.as_mut() {
            Some(sim) => sim.set_speed_limit(limit),
            None => self.invoke_in_sim_thread(move |sim| sim.set_speed_limit(limit)),
        }
    }

    pub fn title(&self) -> String {
        self.shared.title.lock().unwrap().clone()
    }

    /// Add a mote: inline while stopped, otherwise from the simulation
    /// thread via the poll channel.
    pub fn add_mote(&self, mote: Box<dyn Mote>) {
        let mut state = self.slot.state.lock().unwrap();
        match state.as_mut() {
            Some(sim) => sim.add_mote(mote),
            None => self.invoke_in_sim_thread(move |sim| sim.add_mote(mote)),
        }
    }

    /// Remove a mote: inline while stopped, otherwise from the simulation
    /// thread via the poll channel. Once the removal runs, the mote receives
    /// no further events.
    pub fn remove_mote(&self, id: MoteId) {
        let mut state = self.slot.state.lock().unwrap();
        match state.as_mut() {
            Some(sim) => sim.remove_mote(id),
            None => self.invoke_in_sim_thread(move |sim| sim.remove_mote(id)),
        }
    }

    /// Register a lifecycle observer.
    pub fn subscribe(&self, f: impl Fn(&SimEvent) + Send + Sync + 'static) -> Subscription {
        self.shared.observers.subscribe(f)
    }

    /// Register an observer of mote log output.
    pub fn subscribe_log(&self, f: impl Fn(&LogEntry) + Send + Sync + 'static) -> Subscription {
        self.shared.log_observers.subscribe(f)
    }

    /// Consume the error that ended the last run, if any.
    pub fn take_error(&self) -> Option<SimulationError> {
        self.shared.error.lock().unwrap().take()
    }

    /// Run `f` against the kernel state while stopped. `None` when running.
    pub fn with_simulation<R>(&self, f: impl FnOnce(&mut Simulation) -> R) -> Option<R> {
        let mut state = self.slot.state.lock().unwrap();
        state.as_mut().map(f)
    }

    pub fn is_runnable(&self) -> bool {
        if self.is_running() {
            return true;
        }
        let mut state = self.slot.state.lock().unwrap();
        match state.as_mut() {
            Some(sim) => sim.is_runnable(),
            None => true,
        }
    }

    /// Apply a config tree. Requires a stopped simulation.
    pub fn load_config(&self, root: &Element, options: &LoadOptions) -> Result<(), ConfigError> {
        let mut state = self.slot.state.lock().unwrap();
        let sim = state
            .as_mut()
            .expect("config load requires a stopped simulation");
        config::apply_config(sim, root, options)
    }

    /// Encode the current state as a config tree. Requires a stopped
    /// simulation.
    pub fn export_config(&self) -> Element {
        let mut state = self.slot.state.lock().unwrap();
        let sim = state
            .as_mut()
            .expect("config export requires a stopped simulation");
        config::export_config(sim)
    }
}
