//! # taskweave — fiber-based task scheduler
//!
//! A user-space cooperative scheduler providing task parallelism with
//! coroutine-style blocking primitives. Tasks are scheduled across a fixed
//! pool of worker threads; when a task blocks on one of the built-in
//! primitives ([`ConditionVariable`], [`Event`], [`WaitGroup`], [`Dag`]),
//! only its *fiber* is suspended — the worker thread switches to another
//! ready task instead of parking.
//!
//! Fibers are pinned: a suspended task always resumes on the worker that
//! ran it. Plain tasks may be work-stolen between workers before they
//! start; tasks flagged [`TaskFlags::SAME_THREAD`] never move.
//!
//! ## Example
//!
//! ```
//! use taskweave::{schedule, Config, Scheduler, WaitGroup};
//!
//! let scheduler = Scheduler::new(Config::new().worker_threads(4));
//! scheduler.bind();
//!
//! let wg = WaitGroup::new(1);
//! let done = wg.clone();
//! schedule(move || {
//!     // runs on a worker thread
//!     done.done();
//! });
//! wg.wait();
//!
//! Scheduler::unbind();
//! // Dropping the scheduler drains and joins the worker pool.
//! ```
//!
//! Threads interact with a scheduler through [`Scheduler::bind`]: binding
//! registers the calling thread so it can [`schedule`] work and block on
//! the primitives. Every bound thread must call [`Scheduler::unbind`]
//! before the scheduler is dropped.

pub mod affinity;
pub mod condvar;
pub mod dag;
pub mod defer;
pub mod event;
pub mod scheduler;
pub mod task;
#[cfg(feature = "trace")]
pub mod trace;
pub mod wait_group;

mod fiber;
mod waiting;
mod worker;

pub use condvar::ConditionVariable;
pub use dag::{Dag, DagBuilder, DagNode};
pub use event::{Event, EventMode};
pub use scheduler::{schedule, schedule_task, Config, Scheduler, WorkerInitializer};
pub use task::{Task, TaskFlags};
pub use wait_group::WaitGroup;

/// The mutex type the fiber-aware primitives synchronize through, and its
/// scoped lock. Re-exported so predicates and guards line up with
/// [`ConditionVariable`]'s API.
pub use parking_lot::{Mutex, MutexGuard};

/// Runs `f` on a dedicated OS thread while the calling fiber yields, so
/// operations that block the thread (file I/O, foreign calls, OS mutexes)
/// do not stall the worker. Returns `f`'s result.
///
/// When the calling thread is bound to a scheduler, the helper thread is
/// bound to the same scheduler for the duration of `f`, so `f` may
/// schedule follow-up work.
///
/// ```no_run
/// use taskweave::blocking_call;
///
/// let contents = blocking_call(|| std::fs::read_to_string("config.toml"));
/// ```
pub fn blocking_call<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    let core = scheduler::thread_scheduler();
    let wg = WaitGroup::new(1);
    let mut result = None;
    std::thread::scope(|scope| {
        let done = wg.clone();
        let core = core.clone();
        let result = &mut result;
        scope.spawn(move || {
            let bound = core.is_some();
            if let Some(core) = &core {
                core.bind();
            }
            crate::defer!({
                if bound {
                    crate::scheduler::SchedulerCore::unbind();
                }
                done.done();
            });
            *result = Some(f());
        });
        // A fiber-aware wait: the worker thread keeps serving other tasks
        // while the helper thread blocks.
        wg.wait();
    });
    result.expect("blocking_call worker produced no result")
}

/// Runs the given closures in parallel through the bound scheduler: all but
/// the first are scheduled, the first runs on the calling fiber, and the
/// macro returns once every closure has finished.
///
/// ```no_run
/// # let (a, b, c) = (1, 2, 3);
/// taskweave::parallelize!(
///     || drop(a),
///     move || drop(b),
///     move || drop(c),
/// );
/// ```
#[macro_export]
macro_rules! parallelize {
    ($f0:expr $(, $rest:expr)* $(,)?) => {{
        let __wg = $crate::WaitGroup::new(0);
        $(
            __wg.add(1);
            let __done = __wg.clone();
            let __f = $rest;
            $crate::schedule(move || {
                __f();
                __done.done();
            });
        )*
        ($f0)();
        __wg.wait();
    }};
}
