//! Worker phase profiling.
//!
//! With the `trace` feature enabled, workers account wall-clock time to the
//! phases of the scheduling loop: executing a task, spinning for work
//! before sleeping, and sitting suspended in a fiber wait. Finished samples
//! are folded straight into a global per-worker, per-phase profile, so
//! memory stays constant no matter how long the scheduler runs and reading
//! the profile needs no end-of-run collection step.
//!
//! [`write_report`] renders the profile as a plain text table; [`snapshot`]
//! exposes the raw numbers for programmatic use.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Phase of the worker loop a sample is attributed to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum TracePhase {
    /// Running a user task.
    Task,
    /// Spinning (and attempting steals) before parking on the condition
    /// variable.
    Spin,
    /// A fiber blocked in a wait, measured from parking to resumption.
    Suspend,
}

impl TracePhase {
    fn label(self) -> &'static str {
        match self {
            TracePhase::Task => "task",
            TracePhase::Spin => "spin",
            TracePhase::Suspend => "suspend",
        }
    }
}

/// Accumulated samples for one worker/phase pair.
#[derive(Clone, Copy, Default, Debug)]
pub struct PhaseStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

lazy_static::lazy_static! {
    static ref PROFILE: Mutex<BTreeMap<(usize, TracePhase), PhaseStats>> =
        Mutex::new(BTreeMap::new());
}

/// Folds one finished sample into the profile.
pub fn record(worker: usize, phase: TracePhase, elapsed: Duration) {
    let mut profile = PROFILE.lock();
    let stats = profile.entry((worker, phase)).or_default();
    stats.count += 1;
    stats.total += elapsed;
    stats.max = stats.max.max(elapsed);
}

/// The profile accumulated so far, ordered by worker id then phase.
pub fn snapshot() -> Vec<(usize, TracePhase, PhaseStats)> {
    PROFILE
        .lock()
        .iter()
        .map(|(&(worker, phase), &stats)| (worker, phase, stats))
        .collect()
}

/// Discards all accumulated samples.
pub fn reset() {
    PROFILE.lock().clear();
}

/// Writes the profile as an aligned table, one row per worker/phase pair.
/// Single-threaded (bound) workers show up as `-`.
pub fn write_report(out: &mut dyn Write) -> io::Result<()> {
    writeln!(
        out,
        "{:>8}  {:>8}  {:>10}  {:>14}  {:>14}",
        "worker", "phase", "samples", "total", "max"
    )?;
    for (worker, phase, stats) in snapshot() {
        let worker = if worker == usize::MAX {
            "-".to_string()
        } else {
            worker.to_string()
        };
        writeln!(
            out,
            "{:>8}  {:>8}  {:>10}  {:>14?}  {:>14?}",
            worker,
            phase.label(),
            stats.count,
            stats.total,
            stats.max
        )?;
    }
    Ok(())
}

/// Times one phase, folding the sample into the profile when dropped.
pub struct PhaseTimer {
    worker: usize,
    phase: TracePhase,
    start: Instant,
}

impl PhaseTimer {
    pub fn start(worker: usize, phase: TracePhase) -> Self {
        PhaseTimer {
            worker,
            phase,
            start: Instant::now(),
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        record(self.worker, self.phase, self.start.elapsed());
    }
}
