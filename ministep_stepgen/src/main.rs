//! # ministep
//!
//! Loads a machine configuration, creates the control components and the
//! step generator, and runs them until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Simulated ports, stop with Ctrl-C
//! ministep --config config/ministep.toml
//!
//! # Run for two seconds with debug logs
//! ministep --config config/ministep.toml -v --run-for-ms 2000
//!
//! # List every signal after wiring, then exit
//! ministep --config config/ministep.toml --dump
//! ```

#![deny(warnings)]

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ministep_common::config::{ConfigError, ConfigLoader, LogLevel};
use ministep_hal::components::{counter, pid, sim_encoder};
use ministep_hal::{ComponentsConfig, PeriodicThread, Registry};
use ministep_stepgen::config::{MinistepConfig, TimingConfig};
use ministep_stepgen::device::MotionDevice;
use ministep_stepgen::feeder;
use ministep_stepgen::generator::StepGenerator;
use ministep_stepgen::ports::{MappedPorts, PortBank, SimPorts};
use ministep_stepgen::runner::{GeneratorRunner, RunnerConfig};

/// ministep - stepper motion controller
#[derive(Parser, Debug)]
#[command(name = "ministep")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Step-pulse generator with PID, counter and simulated encoder components")]
#[command(long_about = None)]
struct Args {
    /// Path to the machine configuration file
    #[arg(short, long, default_value = "/etc/ministep/ministep.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Stop after this many milliseconds instead of waiting for Ctrl-C
    #[arg(long, value_name = "MS")]
    run_for_ms: Option<u64>,

    /// Print every signal and parameter after wiring, then exit
    #[arg(long)]
    dump: bool,
}

type BoxError = Box<dyn std::error::Error>;

fn main() -> Result<(), BoxError> {
    if let Err(e) = run() {
        error!("ministep failed: {}", e);
        eprintln!("ministep: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), BoxError> {
    let args = Args::parse();
    let config = MinistepConfig::load(&args.config)?;
    setup_tracing(&args, config.shared.log_level);

    info!(
        "ministep v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );
    config.validate()?;

    let registry = Registry::new(config.registry.max_signals);
    let required = config.components.required_slots();
    if required > registry.capacity() {
        warn!(
            required,
            capacity = registry.capacity(),
            "registry smaller than the configured components need"
        );
    }

    let timing = &config.timing;
    let mut servo = PeriodicThread::new("servo-thread", i64::from(timing.servo_period_ns))?;
    let mut slow = PeriodicThread::new("slow-thread", i64::from(timing.slow_period_ns))?;
    install_components(&registry, &config.components, &mut servo, &mut slow);

    let mut device = MotionDevice::open()?;
    let (stepgen, teardown) = feeder::export(&registry, &mut device, &config.stepgen, timing)?;
    servo.add_function(Box::new(stepgen));

    let outcome = operate(&args, &config, &registry, &device, servo, slow);

    if let Err(e) = teardown.run(&mut device) {
        warn!("stepgen teardown failed: {}", e);
    }
    outcome?;

    info!("ministep shutdown complete");
    Ok(())
}

fn operate(
    args: &Args,
    config: &MinistepConfig,
    registry: &Registry,
    device: &MotionDevice,
    servo: PeriodicThread,
    slow: PeriodicThread,
) -> Result<(), BoxError> {
    apply_nets(registry, config)?;

    if args.dump {
        dump_signals(registry);
        return Ok(());
    }

    let run_for = args.run_for_ms.map(Duration::from_millis);
    match &config.stepgen.register_file {
        Some(path) => drive(MappedPorts::open(path)?, device, &config.timing, servo, slow, run_for),
        None => {
            info!("no register file configured, using simulated ports");
            drive(SimPorts::new(), device, &config.timing, servo, slow, run_for)
        }
    }
}

/// Create every configured component. A component that fails is logged and
/// left out; the others still run.
fn install_components(
    registry: &Registry,
    components: &ComponentsConfig,
    servo: &mut PeriodicThread,
    slow: &mut PeriodicThread,
) {
    if let Some(cfg) = &components.sim_encoder {
        match sim_encoder::export(registry, cfg) {
            Ok((pulses, speed)) => {
                servo.add_function(Box::new(pulses));
                slow.add_function(Box::new(speed));
            }
            Err(e) => error!(component = "sim-encoder", "component skipped: {}", e),
        }
    }
    if let Some(cfg) = &components.counter {
        match counter::export(registry, cfg) {
            Ok((update, capture)) => {
                servo.add_function(Box::new(update));
                slow.add_function(Box::new(capture));
            }
            Err(e) => error!(component = "counter", "component skipped: {}", e),
        }
    }
    if let Some(cfg) = &components.pid {
        match pid::export(registry, cfg) {
            Ok(loops) => {
                for pid_loop in loops {
                    servo.add_function(Box::new(pid_loop));
                }
            }
            Err(e) => error!(component = "pid", "component skipped: {}", e),
        }
    }
}

fn apply_nets(registry: &Registry, config: &MinistepConfig) -> Result<(), BoxError> {
    for net in &config.net {
        registry.link(&net.source, &net.sink)?;
        info!(source = %net.source, sink = %net.sink, "net");
    }
    for setp in &config.setp {
        let declared = registry.info(&setp.name)?.ty;
        let value = setp
            .value
            .to_value(declared)
            .ok_or_else(|| {
                ConfigError::ValidationError(format!("setp {}: value out of range", setp.name))
            })?;
        registry.set_value(&setp.name, value)?;
        info!(name = %setp.name, %value, "setp");
    }
    Ok(())
}

fn dump_signals(registry: &Registry) {
    println!("{:<12} {:<5} {:<5} {:<32} {:<14} LINKED", "OWNER", "KIND", "TYPE", "NAME", "VALUE");
    for signal in registry.signals() {
        println!(
            "{:<12} {:<5} {:<5} {:<32} {:<14} {}",
            signal.owner,
            signal.kind.to_string(),
            signal.ty.to_string(),
            signal.name,
            signal.value.to_string(),
            signal.linked_to.as_deref().unwrap_or("-"),
        );
    }
}

/// Start the generator and the periodic threads, arm, and wait for the stop
/// condition.
fn drive<P: PortBank + 'static>(
    ports: P,
    device: &MotionDevice,
    timing: &TimingConfig,
    servo: PeriodicThread,
    slow: PeriodicThread,
    run_for: Option<Duration>,
) -> Result<(), BoxError> {
    let map = device.map_status();
    let generator = StepGenerator::new(&map, ports)?;
    let runner = GeneratorRunner::spawn(generator, RunnerConfig::from_timing(timing))?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    let servo = servo.spawn(Arc::clone(&running))?;
    let slow = slow.spawn(Arc::clone(&running))?;
    device.arm();

    let started = Instant::now();
    while running.load(Ordering::SeqCst) {
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            info!("run time elapsed");
            running.store(false, Ordering::SeqCst);
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    device.disarm();
    let (generator, stats) = runner.stop()?;
    let status = &map.region().status;
    info!(
        ticks = stats.cycle_count,
        overruns = stats.overruns,
        underruns = status.underrun_count.load(Ordering::Relaxed),
        steps_axis0 = generator.steps(0),
        "generator statistics"
    );

    for handle in [servo, slow] {
        match handle.join() {
            Ok(thread) => {
                let stats = thread.stats();
                info!(
                    thread = thread.name(),
                    cycles = stats.cycle_count,
                    max_ns = stats.max_cycle_ns,
                    avg_ns = stats.avg_cycle_ns(),
                    overruns = stats.overruns,
                    "thread statistics"
                );
            }
            Err(_) => error!("periodic thread panicked"),
        }
    }
    Ok(())
}

/// Setup tracing: `RUST_LOG` wins, then `-v`, then the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
