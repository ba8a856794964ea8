//! Scheduler: worker pool ownership, task routing and thread binding.
//!
//! A [`Scheduler`] owns a fixed array of MultiThreaded workers (possibly
//! empty) plus a registry of SingleThreaded workers, one per thread that
//! called [`Scheduler::bind`]. Dropping the scheduler blocks until every
//! bound thread has unbound, then stops the pool in reverse order, draining
//! all remaining work.

use crate::affinity::AffinityPolicy;
use crate::task::{Task, TaskFlags};
use crate::worker::{Worker, WorkerMode};
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// Upper bound on the MultiThreaded worker pool.
const MAX_WORKER_THREADS: usize = 256;

/// Size of the spinning-hint ring. Slots hold the ids of workers currently
/// spinning for work, as first-choice enqueue destinations.
const SPINNING_RING_SIZE: usize = 8;
const NO_SPINNER: isize = -1;

thread_local! {
    static BOUND_SCHEDULER: RefCell<Option<Arc<SchedulerCore>>> = const { RefCell::new(None) };
}

pub(crate) fn set_thread_scheduler(core: Option<Arc<SchedulerCore>>) {
    BOUND_SCHEDULER.with(|bound| *bound.borrow_mut() = core);
}

pub(crate) fn thread_scheduler() -> Option<Arc<SchedulerCore>> {
    BOUND_SCHEDULER.with(|bound| bound.borrow().clone())
}

/// Worker-thread initializer, called on each MultiThreaded worker's thread
/// before it processes any task.
pub type WorkerInitializer = Arc<dyn Fn(usize) + Send + Sync>;

/// Scheduler configuration.
#[derive(Clone)]
pub struct Config {
    /// Number of MultiThreaded workers. Zero means tasks only run on
    /// threads bound via [`Scheduler::bind`].
    pub worker_count: usize,
    /// Stack size for each worker fiber, in bytes.
    pub fiber_stack_size: usize,
    /// Callback invoked on every worker thread before it starts working.
    pub initializer: Option<WorkerInitializer>,
    /// Per-worker CPU affinity policy; None leaves placement to the OS.
    pub affinity: Option<Arc<dyn AffinityPolicy>>,
}

impl Config {
    /// Default stack size for worker fibers.
    pub const DEFAULT_FIBER_STACK_SIZE: usize = 1024 * 1024;

    pub fn new() -> Self {
        Config {
            worker_count: 0,
            fiber_stack_size: Self::DEFAULT_FIBER_STACK_SIZE,
            initializer: None,
            affinity: None,
        }
    }

    /// A configuration with one worker per logical CPU.
    pub fn all_cores() -> Self {
        let count = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new().worker_threads(count)
    }

    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn fiber_stack_size(mut self, bytes: usize) -> Self {
        self.fiber_stack_size = bytes;
        self
    }

    pub fn thread_initializer<F>(mut self, init: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(init));
        self
    }

    pub fn affinity_policy(mut self, policy: Arc<dyn AffinityPolicy>) -> Self {
        self.affinity = Some(policy);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared scheduler state, referenced by workers and bound threads.
pub(crate) struct SchedulerCore {
    cfg: Config,
    /// Immutable after construction.
    workers: Vec<Arc<Worker>>,
    spinning_workers: [CachePadded<AtomicIsize>; SPINNING_RING_SIZE],
    /// Single ring cursor: incremented by spinners announcing themselves,
    /// decremented by enqueuers harvesting a hint.
    next_spinning_index: AtomicUsize,
    next_enqueue_index: AtomicUsize,
    single_threaded: SingleThreadedWorkers,
}

/// Registry of workers adopted by user threads via `bind()`.
struct SingleThreadedWorkers {
    by_tid: Mutex<HashMap<ThreadId, Arc<Worker>>>,
    unbind: Condvar,
}

impl SchedulerCore {
    pub(crate) fn config(&self) -> &Config {
        &self.cfg
    }

    /// Routes `task` to a worker. Spinning workers are preferred so they
    /// pick the task up without a wakeup; otherwise workers are chosen
    /// round-robin, skipping any whose queue lock is contended.
    pub(crate) fn enqueue(&self, task: Task) {
        if task.is(TaskFlags::SAME_THREAD) {
            if let Some(worker) = Worker::current() {
                worker.enqueue_task(task);
                return;
            }
        }
        if !self.workers.is_empty() {
            loop {
                let slot = self
                    .next_spinning_index
                    .fetch_sub(1, Ordering::SeqCst)
                    .wrapping_sub(1)
                    % SPINNING_RING_SIZE;
                let mut index = self.spinning_workers[slot].swap(NO_SPINNER, Ordering::SeqCst);
                if index < 0 {
                    index = (self.next_enqueue_index.fetch_add(1, Ordering::SeqCst)
                        % self.workers.len()) as isize;
                }
                let worker = &self.workers[index as usize];
                match worker.try_lock_work() {
                    Some(guard) => {
                        worker.enqueue_task_locked(guard, task);
                        return;
                    }
                    None => continue,
                }
            }
        } else if let Some(worker) = Worker::current() {
            worker.enqueue_task(task);
        } else {
            panic!(
                "no worker found for this thread; did you forget to call Scheduler::bind()?"
            );
        }
    }

    /// Attempts to steal a task from the worker selected by `from` on
    /// behalf of worker `thief`. Fibers and SameThread tasks never move.
    pub(crate) fn steal_work(&self, thief: usize, from: u64) -> Option<Task> {
        if self.workers.is_empty() {
            return None;
        }
        let victim = (from % self.workers.len() as u64) as usize;
        if victim == thief {
            return None;
        }
        self.workers[victim].steal()
    }

    /// Publishes `worker_id` as a spinning worker, making it the preferred
    /// destination for the next enqueue.
    pub(crate) fn on_begin_spinning(&self, worker_id: usize) {
        let slot = self.next_spinning_index.fetch_add(1, Ordering::SeqCst) % SPINNING_RING_SIZE;
        self.spinning_workers[slot].store(worker_id as isize, Ordering::SeqCst);
    }

    /// Registers the calling thread as a SingleThreaded worker.
    pub(crate) fn bind(self: &Arc<Self>) {
        assert!(
            thread_scheduler().is_none(),
            "a scheduler is already bound to this thread"
        );
        set_thread_scheduler(Some(self.clone()));
        let worker = Worker::new(
            Arc::downgrade(self),
            WorkerMode::SingleThreaded,
            usize::MAX, // ids are only meaningful for pool workers
            self.cfg.fiber_stack_size,
        );
        worker.start();
        self.single_threaded
            .by_tid
            .lock()
            .insert(thread::current().id(), worker);
    }

    /// Unregisters the calling thread's SingleThreaded worker, draining its
    /// queue first.
    pub(crate) fn unbind() {
        let core = thread_scheduler().expect("no scheduler bound to this thread");
        let worker = Worker::current().expect("no single-threaded worker for this thread");
        debug_assert_eq!(worker.mode(), WorkerMode::SingleThreaded);
        worker.stop();
        {
            let mut by_tid = core.single_threaded.by_tid.lock();
            let removed = by_tid.remove(&thread::current().id());
            assert!(removed.is_some(), "single-threaded worker not registered");
            if by_tid.is_empty() {
                core.single_threaded.unbind.notify_one();
            }
        }
        set_thread_scheduler(None);
    }

    /// Blocks until all bound threads have unbound, then stops the pool in
    /// reverse index order. Stopping drains remaining work.
    fn destroy(&self) {
        {
            let mut by_tid = self.single_threaded.by_tid.lock();
            while !by_tid.is_empty() {
                self.single_threaded.unbind.wait(&mut by_tid);
            }
        }
        for worker in self.workers.iter().rev() {
            worker.stop();
        }
    }
}

/// Owner handle for a worker pool. See the crate docs for the lifecycle:
/// construct, `bind()` from any thread that wants to schedule or wait,
/// `unbind()` those threads, then drop.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl Scheduler {
    /// Creates a scheduler and immediately starts `config.worker_count`
    /// worker threads.
    pub fn new(config: Config) -> Self {
        assert!(
            config.worker_count <= MAX_WORKER_THREADS,
            "worker_count {} exceeds the maximum of {}",
            config.worker_count,
            MAX_WORKER_THREADS
        );
        assert!(config.fiber_stack_size > 0, "fiber_stack_size must be non-zero");
        let core = Arc::new_cyclic(|weak: &Weak<SchedulerCore>| {
            let workers = (0..config.worker_count)
                .map(|id| {
                    Worker::new(
                        weak.clone(),
                        WorkerMode::MultiThreaded,
                        id,
                        config.fiber_stack_size,
                    )
                })
                .collect();
            SchedulerCore {
                cfg: config,
                workers,
                spinning_workers: std::array::from_fn(|_| {
                    CachePadded::new(AtomicIsize::new(NO_SPINNER))
                }),
                next_spinning_index: AtomicUsize::new(0x8000_0000),
                next_enqueue_index: AtomicUsize::new(0),
                single_threaded: SingleThreadedWorkers {
                    by_tid: Mutex::new(HashMap::new()),
                    unbind: Condvar::new(),
                },
            }
        });
        for worker in &core.workers {
            worker.start();
        }
        Scheduler { core }
    }

    /// The configuration this scheduler was built with.
    pub fn config(&self) -> &Config {
        self.core.config()
    }

    /// Registers the calling thread with this scheduler so it can call
    /// [`schedule`] and block on the fiber-aware primitives.
    ///
    /// Panics if any scheduler is already bound to this thread.
    pub fn bind(&self) {
        self.core.bind();
    }

    /// Undoes [`Scheduler::bind`] for the calling thread, draining any
    /// SameThread work queued for it.
    ///
    /// Panics if no scheduler is bound to this thread.
    pub fn unbind() {
        SchedulerCore::unbind();
    }

    /// Routes a task to a worker. Unlike [`schedule`], this may be called
    /// from unbound threads when the pool is non-empty.
    pub fn enqueue(&self, task: Task) {
        self.core.enqueue(task);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.core.destroy();
    }
}

/// Schedules a closure on the scheduler bound to the current thread.
///
/// Panics if the thread has no bound scheduler.
pub fn schedule<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    schedule_task(Task::new(f));
}

/// Schedules a pre-built [`Task`] on the scheduler bound to the current
/// thread, honoring its flags.
///
/// Panics if the thread has no bound scheduler.
pub fn schedule_task(task: Task) {
    let core = thread_scheduler()
        .expect("no scheduler bound to this thread; did you forget to call Scheduler::bind()?");
    core.enqueue(task);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::new();
        assert_eq!(config.worker_count, 0);
        assert_eq!(config.fiber_stack_size, Config::DEFAULT_FIBER_STACK_SIZE);
        assert!(config.initializer.is_none());
        assert!(config.affinity.is_none());
    }

    #[test]
    fn test_config_all_cores() {
        let config = Config::all_cores();
        assert!(config.worker_count >= 1);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new().worker_threads(10).fiber_stack_size(9999);
        assert_eq!(config.worker_count, 10);
        assert_eq!(config.fiber_stack_size, 9999);
    }
}
