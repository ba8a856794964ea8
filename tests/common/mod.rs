//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use taskweave::{Config, Scheduler};

/// Worker-pool sizes the scheduler-facing tests run against.
pub const POOL_SIZES: &[usize] = &[0, 1, 2, 8];

/// Runs `f` on a thread bound to a scheduler with `worker_count` workers,
/// unbinding and draining afterwards even if `f` panics.
pub fn with_scheduler(worker_count: usize, f: impl FnOnce()) {
    let scheduler = Scheduler::new(Config::new().worker_threads(worker_count));
    scheduler.bind();
    taskweave::defer!(Scheduler::unbind());
    f();
}
