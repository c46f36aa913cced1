//! Dedicated thread that ticks the generator at the base period.
//!
//! With the `rt` feature the thread locks memory, prefaults its stack, pins
//! itself to a core, switches to `SCHED_FIFO` and paces with
//! `clock_nanosleep(TIMER_ABSTIME)`. Without it, pacing uses absolute
//! `Instant` deadlines and `std::thread::sleep`, which is good enough for
//! simulation but far from the base period on a stock kernel.
//!
//! Both loops count a tick that ends past its deadline as an overrun and
//! re-base the schedule on the current time. An interrupted sleep is resumed
//! against the same deadline; any other sleep failure is counted in
//! [`CycleStats::sleep_errors`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, info, warn};

use ministep_common::shm::region::RegionMap;
use ministep_hal::thread::CycleStats;

use crate::config::TimingConfig;
use crate::generator::{GeneratorError, StepGenerator};
use crate::ports::PortBank;

/// Runner errors.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("RT setup failed: {0}")]
    RtSetup(String),

    #[error("Generator thread spawn failed: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Generator thread panicked")]
    Panicked,

    #[error(transparent)]
    Generator(#[from] GeneratorError),
}

/// Scheduling of the generator thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub period_ns: i64,
    pub cpu_core: Option<usize>,
    pub rt_priority: i32,
}

impl RunnerConfig {
    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            period_ns: i64::from(timing.base_period_ns),
            cpu_core: timing.cpu_core,
            rt_priority: timing.rt_priority,
        }
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), RunnerError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| RunnerError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), RunnerError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(not(feature = "rt"))]
fn prefault_stack() {}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), RunnerError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| RunnerError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| RunnerError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), RunnerError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), RunnerError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(RunnerError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), RunnerError> {
    Ok(())
}

/// Prepare the calling thread for the generator loop.
pub fn rt_setup(config: &RunnerConfig) -> Result<(), RunnerError> {
    rt_mlockall()?;
    prefault_stack();
    if let Some(cpu) = config.cpu_core {
        rt_set_affinity(cpu)?;
    }
    rt_set_scheduler(config.rt_priority)?;
    Ok(())
}

// ─── Loops ──────────────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let total = ts.tv_nsec() + ns;
    TimeSpec::new(
        ts.tv_sec() + total.div_euclid(1_000_000_000),
        total.rem_euclid(1_000_000_000),
    )
}

#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

/// Repeat `call` while it fails with `EINTR`.
#[cfg(any(feature = "rt", test))]
fn retry_interrupted<T>(mut call: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match call() {
            Err(nix::errno::Errno::EINTR) => continue,
            other => return other,
        }
    }
}

#[cfg(feature = "rt")]
fn run_loop<P: PortBank>(
    generator: &mut StepGenerator<P>,
    period_ns: i64,
    running: &AtomicBool,
) -> Result<CycleStats, RunnerError> {
    use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

    let clock = ClockId::CLOCK_MONOTONIC;
    let now = || clock_gettime(clock).map_err(|e| RunnerError::RtSetup(format!("clock_gettime: {e}")));
    let mut stats = CycleStats::new();
    let mut next_wake = now()?;

    while running.load(Ordering::Relaxed) {
        next_wake = timespec_add_ns(next_wake, period_ns);
        let start = now()?;
        generator.tick();
        let end = now()?;
        stats.record(timespec_diff_ns(&end, &start));

        if timespec_diff_ns(&end, &next_wake) > 0 {
            stats.overruns += 1;
            next_wake = end;
            continue;
        }
        if let Err(e) = retry_interrupted(|| {
            clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake)
        }) {
            if stats.sleep_errors == 0 {
                warn!(error = %e, "generator: clock_nanosleep failed");
            }
            stats.sleep_errors += 1;
        }
    }
    Ok(stats)
}

#[cfg(not(feature = "rt"))]
fn run_loop<P: PortBank>(
    generator: &mut StepGenerator<P>,
    period_ns: i64,
    running: &AtomicBool,
) -> Result<CycleStats, RunnerError> {
    use std::time::{Duration, Instant};

    let period = Duration::from_nanos(period_ns.max(1) as u64);
    let mut stats = CycleStats::new();
    let mut next_wake = Instant::now();

    while running.load(Ordering::Relaxed) {
        next_wake += period;
        let start = Instant::now();
        generator.tick();
        let end = Instant::now();
        stats.record(end.duration_since(start).as_nanos() as i64);

        if end > next_wake {
            stats.overruns += 1;
            next_wake = end;
            continue;
        }
        std::thread::sleep(next_wake - end);
    }
    Ok(stats)
}

// ─── Runner ─────────────────────────────────────────────────────────

type Outcome<P> = Result<(StepGenerator<P>, CycleStats), RunnerError>;

/// Owner of the generator thread.
pub struct GeneratorRunner<P: PortBank + 'static> {
    map: Arc<RegionMap>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Outcome<P>>>,
}

impl<P: PortBank + 'static> GeneratorRunner<P> {
    /// Move `generator` onto its own thread and start ticking.
    ///
    /// # Errors
    ///
    /// `Spawn` if the thread cannot be created, `RtSetup` if the thread
    /// could not be prepared (the generator is dropped in that case).
    pub fn spawn(mut generator: StepGenerator<P>, config: RunnerConfig) -> Result<Self, RunnerError> {
        let map = Arc::clone(generator.region_map());
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let handle = std::thread::Builder::new()
            .name("ministep-gen".into())
            .spawn(move || -> Outcome<P> {
                if let Err(e) = rt_setup(&config) {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return Err(e);
                }
                let _ = ready_tx.send(Ok(()));
                let result = run_loop(&mut generator, config.period_ns, &flag);
                generator.shutdown();
                result.map(|stats| (generator, stats))
            })
            .map_err(RunnerError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    period_ns = config.period_ns,
                    cpu_core = ?config.cpu_core,
                    rt_priority = config.rt_priority,
                    rt = cfg!(feature = "rt"),
                    "generator thread started"
                );
                Ok(Self {
                    map,
                    running,
                    handle: Some(handle),
                })
            }
            Ok(Err(msg)) => {
                let _ = handle.join();
                Err(RunnerError::RtSetup(msg))
            }
            Err(_) => {
                let _ = handle.join();
                Err(RunnerError::Panicked)
            }
        }
    }

    /// Request the generator to run.
    pub fn arm(&self) {
        self.map.region().command.arm.store(true, Ordering::Release);
        debug!("runner: arm");
    }

    /// Request the generator to stop driving outputs.
    pub fn disarm(&self) {
        self.map.region().command.arm.store(false, Ordering::Release);
        debug!("runner: disarm");
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and hand back the generator, outputs low.
    ///
    /// # Errors
    ///
    /// `Panicked` if the thread panicked, or the error that ended its loop.
    pub fn stop(mut self) -> Outcome<P> {
        self.running.store(false, Ordering::Relaxed);
        let handle = self.handle.take().ok_or(RunnerError::Panicked)?;
        let (generator, stats) = handle.join().map_err(|_| RunnerError::Panicked)??;
        info!(
            ticks = stats.cycle_count,
            max_ns = stats.max_cycle_ns,
            avg_ns = stats.avg_cycle_ns(),
            overruns = stats.overruns,
            sleep_errors = stats.sleep_errors,
            "generator thread stopped"
        );
        Ok((generator, stats))
    }
}

impl<P: PortBank + 'static> Drop for GeneratorRunner<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.running.store(false, Ordering::Relaxed);
            if handle.join().is_err() {
                warn!("generator thread panicked");
            }
        }
    }
}
