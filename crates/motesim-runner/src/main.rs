//! Headless simulation runner.
//!
//! Loads a simulation config file, runs it for a bounded amount of simulated
//! time, and exits. Mote log output is printed to stdout. Exit code 0 means
//! the run completed; 1 means an event-execution error (or a setup problem)
//! ended it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use crossbeam_channel::bounded;
use tracing_subscriber::EnvFilter;

use motesim_core::config::{self, LoadOptions};
use motesim_core::motes::heartbeat_event;
use motesim_core::{
    MoteId, SimEvent, SimTime, Simulation, SimulationConfig, TimeEvent, TypeRegistry,
};

#[derive(Debug, Parser)]
#[command(name = "motesim", about = "Headless wireless-sensor-network simulator")]
struct Args {
    /// Simulation config file (XML)
    config: PathBuf,

    /// Override the config's random seed
    #[arg(long)]
    seed: Option<i64>,

    /// Simulated time to run, in seconds
    #[arg(long, default_value_t = 60)]
    run_for: i64,

    /// Override the config's speed limit ratio (1.0 = real time)
    #[arg(long)]
    speed_limit: Option<f64>,

    /// Heartbeat period per mote in milliseconds; 0 disables heartbeats
    #[arg(long, default_value_t = 1000)]
    heartbeat_ms: i64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let handle = Simulation::new(SimulationConfig::default(), TypeRegistry::with_builtins());

    let root = match config::read_config_file(&args.config) {
        Ok(root) => root,
        Err(err) => {
            eprintln!("failed to read {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };
    let options = LoadOptions {
        manual_random_seed: args.seed,
        mote_type_resolver: None,
    };
    if let Err(err) = handle.load_config(&root, &options) {
        eprintln!("failed to load {}: {err}", args.config.display());
        return ExitCode::FAILURE;
    }

    if args.speed_limit.is_some() {
        handle.set_speed_limit(args.speed_limit);
    }

    // Print mote log output as it arrives
    let _log_sub = handle.subscribe_log(|entry| {
        println!("{:>12} {} {}", entry.time.as_micros(), entry.mote, entry.message);
    });

    // Wake each mote periodically so demo configs produce output
    let mote_ids: Vec<MoteId> = handle
        .with_simulation(|sim| sim.motes().iter().map(|m| m.id()).collect())
        .unwrap_or_default();
    if args.heartbeat_ms > 0 {
        for id in &mote_ids {
            let event = heartbeat_event(*id, SimTime::from_millis(args.heartbeat_ms));
            handle.schedule_event(&event, SimTime::from_millis(args.heartbeat_ms));
        }
    }

    // Bounded run: a stop sentinel ends the simulation at the horizon
    let stop = TimeEvent::from_fn("run horizon", |sim, _| {
        sim.request_stop();
        Ok(())
    });
    handle.schedule_event(&stop, SimTime::from_secs(args.run_for));

    let (stopped_tx, stopped_rx) = bounded::<()>(1);
    let _stop_sub = handle.subscribe(move |event| {
        if *event == SimEvent::Stopped {
            let _ = stopped_tx.try_send(());
        }
    });

    tracing::info!(
        config = %args.config.display(),
        motes = mote_ids.len(),
        run_for_secs = args.run_for,
        "starting simulation"
    );
    handle.start();
    let _ = stopped_rx.recv();

    match handle.take_error() {
        None => {
            tracing::info!(
                simulated_ms = handle.simulation_time_millis(),
                "simulation completed"
            );
            ExitCode::SUCCESS
        }
        Some(err) => {
            eprintln!("simulation failed: {err}");
            ExitCode::FAILURE
        }
    }
}
