//! Periodic threads and the functions they run.
//!
//! A component exports one or more [`RtFunction`]s. A [`PeriodicThread`]
//! owns an ordered list of them and calls each once per period, passing the
//! nominal period in nanoseconds. Functions are added at setup; nothing is
//! allocated once the thread runs.
//!
//! Pacing uses absolute deadlines (`next += period`) so that jitter does not
//! accumulate. A cycle that finishes after its deadline counts as an overrun
//! and the schedule is re-based on the current time.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// A function exported by a component and run by a periodic thread.
pub trait RtFunction: Send {
    /// Exported name, e.g. `pid.0.do-pid-calcs`.
    fn name(&self) -> &str;

    /// Run one period. `period_ns` is the nominal period of the calling thread.
    fn call(&mut self, period_ns: i64);
}

/// Errors raised while building or starting a periodic thread.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// Period must be strictly positive.
    #[error("Thread '{name}': invalid period {period_ns} ns")]
    InvalidPeriod { name: String, period_ns: i64 },

    /// The OS refused to start the thread.
    #[error("Thread '{name}': spawn failed: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics. No allocation on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for the average.
    pub sum_cycle_ns: i64,
    /// Cycles that ended past their deadline.
    pub overruns: u64,
    /// Deadline sleeps that failed; the cycle ran early.
    pub sleep_errors: u64,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            sleep_errors: 0,
        }
    }

    /// Record one cycle duration.
    #[inline]
    pub fn record(&mut self, duration_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns = self.sum_cycle_ns.saturating_add(duration_ns);
    }

    /// Average cycle time [ns], 0 before the first cycle.
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

// ─── Periodic Thread ────────────────────────────────────────────────

/// Ordered list of functions run at a fixed period.
pub struct PeriodicThread {
    name: String,
    period_ns: i64,
    functions: Vec<Box<dyn RtFunction>>,
    stats: CycleStats,
}

impl PeriodicThread {
    /// # Errors
    ///
    /// `InvalidPeriod` if `period_ns <= 0`.
    pub fn new(name: impl Into<String>, period_ns: i64) -> Result<Self, ThreadError> {
        let name = name.into();
        if period_ns <= 0 {
            return Err(ThreadError::InvalidPeriod { name, period_ns });
        }
        Ok(Self {
            name,
            period_ns,
            functions: Vec::new(),
            stats: CycleStats::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period_ns(&self) -> i64 {
        self.period_ns
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Append a function. Functions run in insertion order.
    pub fn add_function(&mut self, function: Box<dyn RtFunction>) {
        debug!(thread = %self.name, function = function.name(), "function added");
        self.functions.push(function);
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name())
    }

    /// Run every function once with the nominal period.
    #[inline]
    pub fn run_once(&mut self) {
        for function in self.functions.iter_mut() {
            function.call(self.period_ns);
        }
    }

    /// Run on a dedicated OS thread until `running` goes false.
    ///
    /// The join handle returns the thread with its final statistics.
    pub fn spawn(self, running: Arc<AtomicBool>) -> Result<JoinHandle<Self>, ThreadError> {
        let name = self.name.clone();
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut this = self;
                this.run_until(&running);
                this
            })
            .map_err(|source| ThreadError::Spawn { name, source })
    }

    fn run_until(&mut self, running: &AtomicBool) {
        let period = Duration::from_nanos(self.period_ns as u64);
        info!(
            thread = %self.name,
            period_ns = self.period_ns,
            functions = self.functions.len(),
            "periodic thread started"
        );

        let mut next_wake = Instant::now() + period;
        while running.load(Ordering::Acquire) {
            let cycle_start = Instant::now();
            self.run_once();
            let end = Instant::now();
            self.stats
                .record(end.duration_since(cycle_start).as_nanos() as i64);

            if end > next_wake {
                self.stats.overruns += 1;
                next_wake = end + period;
                continue;
            }
            std::thread::sleep(next_wake - end);
            next_wake += period;
        }

        if self.stats.overruns > 0 {
            warn!(thread = %self.name, overruns = self.stats.overruns, "periodic thread overran");
        }
        info!(
            thread = %self.name,
            cycles = self.stats.cycle_count,
            max_cycle_ns = self.stats.max_cycle_ns,
            "periodic thread stopped"
        );
    }
}

impl fmt::Debug for PeriodicThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicThread")
            .field("name", &self.name)
            .field("period_ns", &self.period_ns)
            .field("functions", &self.function_names().collect::<Vec<_>>())
            .field("stats", &self.stats)
            .finish()
    }
}
