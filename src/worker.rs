//! Worker implementation.
//!
//! A worker couples one OS thread (or one user-bound thread) with a task
//! queue, a fiber-ready queue and the set of fibers pinned to that thread.
//! Tasks run on whichever fiber is current; when a task blocks on a
//! fiber-aware primitive, the worker switches to another runnable fiber
//! instead of parking the thread.
//!
//! Locking discipline: everything mutable hangs off the [`Work`] record
//! behind one mutex. The running fiber holds that mutex except while it
//! invokes a user callable, sleeps on the condition variable, or swaps
//! stacks; state and queue updates always complete before a swap, so the
//! unlocked window only ever exposes consistent state.

use crate::fiber::{FiberArena, FiberId, FiberState, FiberYielder, MAIN_FIBER};
use crate::scheduler::{self, SchedulerCore};
use crate::task::{Task, TaskFlags};
use crate::waiting::WaitingFibers;
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult};
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::{RefCell, UnsafeCell};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// How long a worker spins for new work before sleeping on its condition
/// variable, and the shape of the spin bursts. Empirical tunables.
const SPIN_DURATION: Duration = Duration::from_millis(1);
const SPIN_BURSTS: usize = 256;
const SPIN_RELAXES_PER_BURST: usize = 32;

thread_local! {
    static CURRENT_WORKER: RefCell<Option<Arc<Worker>>> = const { RefCell::new(None) };
}

pub(crate) fn set_current_worker(worker: Option<Arc<Worker>>) {
    CURRENT_WORKER.with(|current| *current.borrow_mut() = worker);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum WorkerMode {
    /// The worker drives its own background thread.
    MultiThreaded,
    /// The worker runs on a user thread bound via `Scheduler::bind()`; it
    /// only makes progress while that thread waits or unbinds.
    SingleThreaded,
}

/// Mutable worker state, all guarded by one mutex.
pub(crate) struct Work {
    tasks: VecDeque<Task>,
    fibers: VecDeque<FiberId>,
    waiting: WaitingFibers,
    /// Fiber states, indexed by fiber id.
    states: Vec<FiberState>,
    idle_fibers: HashSet<FiberId>,
    num_blocked_fibers: u64,
    /// True while a thread sleeps (or is about to sleep) on the condition
    /// variable, so enqueuers know a signal is worthwhile.
    notify_added: bool,
    shutdown: bool,
}

impl Work {
    fn new() -> Self {
        Work {
            tasks: VecDeque::new(),
            fibers: VecDeque::new(),
            waiting: WaitingFibers::new(),
            states: vec![FiberState::Running],
            idle_fibers: HashSet::new(),
            num_blocked_fibers: 0,
            notify_added: true,
            shutdown: false,
        }
    }

    fn state(&self, fiber: FiberId) -> FiberState {
        self.states[fiber.0 as usize]
    }

    fn set_state(&mut self, fiber: FiberId, to: FiberState) {
        self.states[fiber.0 as usize] = to;
    }

    fn change_state(&mut self, fiber: FiberId, from: FiberState, to: FiberState) {
        debug_assert_eq!(
            self.state(fiber),
            from,
            "fiber {} was in state {:?}, expected {:?}",
            fiber.0,
            self.state(fiber),
            from
        );
        self.set_state(fiber, to);
    }
}

pub(crate) struct Worker {
    pub(crate) id: usize,
    mode: WorkerMode,
    scheduler: Weak<SchedulerCore>,
    fiber_stack_size: usize,
    work: Mutex<Work>,
    added: Condvar,
    /// Mirror of `work.tasks.len() + work.fibers.len()`, written under the
    /// work mutex, read lock-free by `steal` and the spin loop.
    num: CachePadded<AtomicU64>,
    /// Fibers and the current-fiber pointer. Owner thread only.
    arena: UnsafeCell<FiberArena>,
    /// Steal-victim PRNG. Owner thread only.
    rng: UnsafeCell<XorShift64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

// SAFETY: the UnsafeCell fields (arena, rng) are only touched by the owner
// thread while it is alive, and by the tearing-down thread strictly after
// the owner thread has been joined (or, for single-threaded workers, *is*
// the tearing-down thread). Everything else is lock- or atomic-guarded.
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    pub(crate) fn new(
        scheduler: Weak<SchedulerCore>,
        mode: WorkerMode,
        id: usize,
        fiber_stack_size: usize,
    ) -> Arc<Worker> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15)
            ^ (id as u64).wrapping_mul(0x2545f4914f6cdd1d);
        Arc::new(Worker {
            id,
            mode,
            scheduler,
            fiber_stack_size,
            work: Mutex::new(Work::new()),
            added: Condvar::new(),
            num: CachePadded::new(AtomicU64::new(0)),
            arena: UnsafeCell::new(FiberArena::new()),
            rng: UnsafeCell::new(XorShift64::new(seed)),
            thread: Mutex::new(None),
        })
    }

    /// The worker bound to the calling thread, if any.
    pub(crate) fn current() -> Option<Arc<Worker>> {
        CURRENT_WORKER.with(|current| current.borrow().clone())
    }

    pub(crate) fn mode(&self) -> WorkerMode {
        self.mode
    }

    /// Starts the worker. MultiThreaded workers spawn their thread here;
    /// SingleThreaded workers adopt the calling thread.
    pub(crate) fn start(self: &Arc<Self>) {
        match self.mode {
            WorkerMode::MultiThreaded => {
                let core = self
                    .scheduler
                    .upgrade()
                    .expect("scheduler destroyed before workers started");
                let worker = self.clone();
                let handle = thread::Builder::new()
                    .name(format!("taskweave-worker-{:02}", self.id))
                    .spawn(move || worker.thread_main(core))
                    .expect("failed to spawn worker thread");
                *self.thread.lock() = Some(handle);
            }
            WorkerMode::SingleThreaded => {
                set_current_worker(Some(self.clone()));
            }
        }
    }

    /// Stops the worker, draining all remaining work. Blocks until every
    /// submitted task and every in-flight blocked fiber has completed.
    pub(crate) fn stop(self: &Arc<Self>) {
        match self.mode {
            WorkerMode::MultiThreaded => {
                let worker = self.clone();
                // SameThread keeps the stop request from being stolen; the
                // explicit signal covers a worker already asleep when the
                // flag lands.
                self.enqueue_task(Task::with_flags(
                    move || {
                        worker.work.lock().shutdown = true;
                        worker.added.notify_one();
                    },
                    TaskFlags::SAME_THREAD,
                ));
                let handle = self
                    .thread
                    .lock()
                    .take()
                    .expect("worker stopped more than once");
                handle.join().expect("worker thread panicked");
            }
            WorkerMode::SingleThreaded => {
                let mut work = self.work.lock();
                work.shutdown = true;
                let work = self.run_until_shutdown(work);
                drop(work);
                set_current_worker(None);
            }
        }
    }

    fn thread_main(self: Arc<Self>, core: Arc<SchedulerCore>) {
        if let Some(policy) = &core.config().affinity {
            let cores = policy.get(self.id);
            // Pinning to a set wider than one core is left to the OS.
            if cores.len() == 1 {
                core_affinity::set_for_current(cores[0]);
            }
        }
        if let Some(init) = &core.config().initializer {
            init(self.id);
        }
        scheduler::set_thread_scheduler(Some(core));
        set_current_worker(Some(self.clone()));
        {
            let work = self.work.lock();
            let work = self.run(work);
            drop(work);
        }
        set_current_worker(None);
        scheduler::set_thread_scheduler(None);
    }

    // ---- run loop ----------------------------------------------------

    /// Processes work until shutdown. Entry point of every fiber, main and
    /// worker alike.
    fn run<'a>(&'a self, mut work: MutexGuard<'a, Work>) -> MutexGuard<'a, Work> {
        if self.mode == WorkerMode::MultiThreaded {
            self.work_wait(&mut work, |work| {
                self.num() > 0 || !work.waiting.is_empty() || work.shutdown
            });
        }
        debug_assert_eq!(work.state(self.current_fiber()), FiberState::Running);
        let mut work = self.run_until_shutdown(work);

        // Hand control back to the thread's root stack. The main fiber just
        // returns; a worker fiber parks itself for good and wakes the main
        // fiber, which re-checks the exit condition in its own frame.
        let current = self.current_fiber();
        if current != MAIN_FIBER {
            work.change_state(current, FiberState::Running, FiberState::Yielded);
            let was_idle = work.idle_fibers.remove(&MAIN_FIBER);
            debug_assert!(was_idle, "main fiber not parked idle at shutdown");
            work.change_state(MAIN_FIBER, FiberState::Idle, FiberState::Running);
            work = self.switch_to(work, MAIN_FIBER);
            // Not reached: nothing ever resumes a fiber parked above.
        }
        work
    }

    fn run_until_shutdown<'a>(&'a self, mut work: MutexGuard<'a, Work>) -> MutexGuard<'a, Work> {
        while !work.shutdown || self.num() > 0 || work.num_blocked_fibers > 0 {
            work = self.wait_for_work(work);
            work = self.run_until_idle(work);
        }
        work
    }

    /// Blocks until there is something to do: ready work, a shutdown that
    /// can complete, or an expired fiber deadline.
    fn wait_for_work<'a>(&'a self, mut work: MutexGuard<'a, Work>) -> MutexGuard<'a, Work> {
        debug_assert_eq!(
            self.num(),
            (work.fibers.len() + work.tasks.len()) as u64,
            "work.num out of sync"
        );
        if self.num() > 0 {
            return work;
        }
        if self.mode == WorkerMode::MultiThreaded {
            if let Some(core) = self.scheduler.upgrade() {
                core.on_begin_spinning(self.id);
                MutexGuard::unlocked(&mut work, || self.spin_for_work(&core));
            }
        }
        self.work_wait(&mut work, |work| {
            self.num() > 0 || (work.shutdown && work.num_blocked_fibers == 0)
        });
        if !work.waiting.is_empty() {
            self.enqueue_fiber_timeouts(&mut work);
        }
        work
    }

    /// Sleeps on the condition variable until `pred` holds or the next
    /// fiber deadline expires. `notify_added` is raised for the duration so
    /// enqueuers know a signal is worthwhile.
    fn work_wait(&self, work: &mut MutexGuard<'_, Work>, pred: impl Fn(&Work) -> bool) {
        work.notify_added = true;
        loop {
            if pred(&**work) {
                break;
            }
            match work.waiting.next_deadline() {
                Some(deadline) => {
                    if self.added.wait_until(work, deadline).timed_out() {
                        break;
                    }
                }
                None => self.added.wait(work),
            }
        }
        work.notify_added = false;
    }

    /// Moves every waiting fiber whose deadline has passed into the
    /// fiber-ready queue.
    fn enqueue_fiber_timeouts(&self, work: &mut MutexGuard<'_, Work>) {
        let now = Instant::now();
        while let Some(fiber) = work.waiting.take(now) {
            work.change_state(fiber, FiberState::Waiting, FiberState::Queued);
            work.fibers.push_back(fiber);
            self.num.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Drains the fiber-ready queue and the task queue.
    fn run_until_idle<'a>(&'a self, mut work: MutexGuard<'a, Work>) -> MutexGuard<'a, Work> {
        debug_assert_eq!(work.state(self.current_fiber()), FiberState::Running);
        while !work.fibers.is_empty() || !work.tasks.is_empty() {
            // Ready fibers take priority over fresh tasks. Park the current
            // fiber for reuse and hand off; resuming a fiber can queue more
            // fibers, so loop until the queue stays empty.
            while let Some(fiber) = work.fibers.pop_front() {
                self.num.fetch_sub(1, Ordering::SeqCst);
                let current = self.current_fiber();
                debug_assert_ne!(fiber, current, "dequeued fiber is currently running");
                debug_assert!(
                    !work.idle_fibers.contains(&fiber),
                    "dequeued fiber is idle"
                );
                work.change_state(current, FiberState::Running, FiberState::Idle);
                let parked = work.idle_fibers.insert(current);
                debug_assert!(parked, "fiber already idle");
                work.change_state(fiber, FiberState::Queued, FiberState::Running);
                work = self.switch_to(work, fiber);
                // Resumed: whoever switched here took us out of the idle
                // set and marked us Running again.
            }

            if let Some(task) = work.tasks.pop_front() {
                self.num.fetch_sub(1, Ordering::SeqCst);
                MutexGuard::unlocked(&mut work, || {
                    #[cfg(feature = "trace")]
                    let _sample = crate::trace::PhaseTimer::start(self.id, crate::trace::TracePhase::Task);
                    // Invoke (and destroy) the callable without the lock. A
                    // panicking task must not take the worker down with it.
                    let result =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run()));
                    if let Err(payload) = result {
                        let msg = payload
                            .downcast_ref::<&str>()
                            .copied()
                            .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()));
                        eprintln!(
                            "taskweave: task panicked: {}",
                            msg.unwrap_or("unknown panic payload")
                        );
                    }
                });
            }
        }
        work
    }

    // ---- suspension and resumption -----------------------------------

    /// Suspends the current fiber until it is enqueued again (or, with a
    /// deadline, until the deadline passes). Execution continues on another
    /// runnable fiber; a fresh one is created if none exists.
    fn suspend<'a>(
        &'a self,
        mut work: MutexGuard<'a, Work>,
        deadline: Option<Instant>,
    ) -> MutexGuard<'a, Work> {
        // Accounts the whole parked interval, from here until the fiber is
        // switched back in.
        #[cfg(feature = "trace")]
        let _sample = crate::trace::PhaseTimer::start(self.id, crate::trace::TracePhase::Suspend);
        let current = self.current_fiber();
        match deadline {
            Some(deadline) => {
                work.change_state(current, FiberState::Running, FiberState::Waiting);
                work.waiting.add(deadline, current);
            }
            None => work.change_state(current, FiberState::Running, FiberState::Yielded),
        }

        // Wait until this worker has something else to do.
        work = self.wait_for_work(work);
        work.num_blocked_fibers += 1;

        let reusable = work.idle_fibers.iter().next().copied();
        let target = if let Some(fiber) = work.fibers.pop_front() {
            self.num.fetch_sub(1, Ordering::SeqCst);
            work.change_state(fiber, FiberState::Queued, FiberState::Running);
            fiber
        } else if let Some(fiber) = reusable {
            work.idle_fibers.remove(&fiber);
            work.change_state(fiber, FiberState::Idle, FiberState::Running);
            fiber
        } else {
            // Nothing to resume: spin up a new fiber running the work loop.
            self.create_worker_fiber(&mut work)
        };

        work = self.switch_to(work, target);
        work.num_blocked_fibers -= 1;
        debug_assert_eq!(work.state(self.current_fiber()), FiberState::Running);
        work
    }

    /// Moves `fiber` into the ready queue, resuming it on its owner worker.
    /// Callable from any thread; a no-op if the fiber is already running or
    /// queued.
    pub(crate) fn enqueue_fiber(&self, fiber: FiberId) {
        let notify;
        {
            let mut work = self.work.lock();
            match work.state(fiber) {
                FiberState::Running | FiberState::Queued => return,
                FiberState::Waiting => work.waiting.erase(fiber),
                FiberState::Idle => {
                    let removed = work.idle_fibers.remove(&fiber);
                    debug_assert!(removed, "idle fiber missing from idle set");
                }
                FiberState::Yielded => {}
            }
            notify = work.notify_added;
            work.fibers.push_back(fiber);
            self.num.fetch_add(1, Ordering::SeqCst);
            #[cfg(debug_assertions)]
            debug_assert!(
                !work.waiting.contains(fiber),
                "fiber is unexpectedly in the waiting index"
            );
            work.set_state(fiber, FiberState::Queued);
        }
        if notify {
            self.added.notify_one();
        }
    }

    /// Suspends the current fiber until `pred` holds, releasing `guard`
    /// across the suspension. Returns false if the deadline passed with the
    /// predicate still false; the guard is held again either way.
    ///
    /// The worker mutex is taken *before* the user lock is released, so a
    /// concurrent notify either observes the fiber as suspended or blocks
    /// until it is; a wakeup can never fall between the two.
    pub(crate) fn wait_fiber<T, F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        deadline: Option<Instant>,
        mut pred: F,
    ) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        while !pred(&mut **guard) {
            let work = self.work.lock();
            let mutex = MutexGuard::mutex(guard);
            // SAFETY: we own the lock through `guard`. The guard is not
            // touched again until the raw re-lock below restores ownership.
            unsafe { mutex.force_unlock() };

            let work = self.suspend(work, deadline);
            drop(work);

            // Re-acquire the user lock before pred runs again. The fresh
            // guard is forgotten so ownership flows back through `guard`.
            std::mem::forget(mutex.lock());

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    // One last look under the re-acquired lock.
                    return pred(&mut **guard);
                }
            }
        }
        true
    }

    // ---- task queue --------------------------------------------------

    pub(crate) fn enqueue_task(&self, task: Task) {
        let work = self.work.lock();
        self.enqueue_task_locked(work, task);
    }

    pub(crate) fn try_lock_work(&self) -> Option<MutexGuard<'_, Work>> {
        self.work.try_lock()
    }

    pub(crate) fn enqueue_task_locked(&self, mut work: MutexGuard<'_, Work>, task: Task) {
        let notify = work.notify_added;
        work.tasks.push_back(task);
        self.num.fetch_add(1, Ordering::SeqCst);
        drop(work);
        if notify {
            self.added.notify_one();
        }
    }

    /// Takes the task at the head of the queue for another worker, unless
    /// it is pinned with `SAME_THREAD`. Never blocks: bails if the queue
    /// lock is contended.
    pub(crate) fn steal(&self) -> Option<Task> {
        if self.num() == 0 {
            return None;
        }
        let mut work = self.work.try_lock()?;
        if work.tasks.front().map_or(true, |task| task.is(TaskFlags::SAME_THREAD)) {
            return None;
        }
        self.num.fetch_sub(1, Ordering::SeqCst);
        work.tasks.pop_front()
    }

    /// Spins briefly before sleeping: watches `num`, and attempts one
    /// random-victim steal per burst round.
    fn spin_for_work(&self, core: &SchedulerCore) {
        #[cfg(feature = "trace")]
        let _sample = crate::trace::PhaseTimer::start(self.id, crate::trace::TracePhase::Spin);
        // SAFETY: rng is owner-thread-only and we are the owner thread.
        let rng = unsafe { &mut *self.rng.get() };
        let start = Instant::now();
        while start.elapsed() < SPIN_DURATION {
            for _ in 0..SPIN_BURSTS {
                for _ in 0..SPIN_RELAXES_PER_BURST {
                    std::hint::spin_loop();
                }
                if self.num() > 0 {
                    return;
                }
            }
            if let Some(task) = core.steal_work(self.id, rng.next()) {
                let mut work = self.work.lock();
                work.tasks.push_back(task);
                self.num.fetch_add(1, Ordering::SeqCst);
                return;
            }
            thread::yield_now();
        }
    }

    fn num(&self) -> u64 {
        self.num.load(Ordering::SeqCst)
    }

    // ---- fibers ------------------------------------------------------

    /// Id of the fiber currently executing on this worker. Owner thread
    /// only.
    pub(crate) fn current_fiber(&self) -> FiberId {
        // SAFETY: arena is owner-thread-only.
        unsafe { (*self.arena.get()).current() }
    }

    /// Creates a fresh worker fiber whose entry is the work loop, already
    /// in the Running state (its creator switches to it immediately).
    fn create_worker_fiber(&self, work: &mut MutexGuard<'_, Work>) -> FiberId {
        let stack =
            DefaultStack::new(self.fiber_stack_size).expect("failed to allocate fiber stack");
        let ptr = WorkerPtr(self as *const Worker);
        // SAFETY: arena is owner-thread-only.
        let arena = unsafe { &mut *self.arena.get() };
        let id = arena.add(move |id| {
            Coroutine::with_stack(stack, move |yielder, _: ()| {
                // SAFETY: workers are pinned behind an Arc and outlive every
                // fiber they own.
                let worker = unsafe { &*ptr.0 };
                worker.fiber_entry(id, yielder);
            })
        });
        work.states.push(FiberState::Running);
        debug_assert_eq!(work.states.len(), arena.len());
        id
    }

    fn fiber_entry(&self, id: FiberId, yielder: &FiberYielder) {
        {
            // SAFETY: arena is owner-thread-only.
            let arena = unsafe { &*self.arena.get() };
            arena.slot(id).set_yielder(yielder);
        }
        let work = self.work.lock();
        let work = self.run(work);
        drop(work);
        // run() only returns on the main fiber; worker fibers park inside.
        unreachable!("worker fiber resumed after shutdown parking");
    }

    /// Switches execution to `to`. The caller must already have completed
    /// every queue and state transition (including marking `to` Running and
    /// the current fiber whatever it becomes); this only swaps stacks.
    fn switch_to<'a>(&'a self, work: MutexGuard<'a, Work>, to: FiberId) -> MutexGuard<'a, Work> {
        let from;
        {
            // SAFETY: arena is owner-thread-only; the borrow ends before
            // any stack swap below.
            let arena = unsafe { &mut *self.arena.get() };
            from = arena.current();
            if from == to {
                return work;
            }
            arena.set_current(to);
        }
        drop(work);

        // SAFETY: arena is owner-thread-only; no reference is held across a
        // swap (raw pointers only), and slot allocations are pinned.
        unsafe {
            if (*self.arena.get()).slot(from).is_main() {
                // Host stack: drive coroutines until control comes back.
                let mut next = to;
                loop {
                    let coroutine = (*self.arena.get()).slot(next).coroutine_ptr();
                    match (*coroutine).resume(()) {
                        CoroutineResult::Yield(target) if target == MAIN_FIBER => break,
                        CoroutineResult::Yield(target) => next = target,
                        CoroutineResult::Return(()) => {
                            unreachable!("worker fiber returned from its run loop")
                        }
                    }
                }
            } else {
                // Suspend this stack; the yielded target propagates to the
                // trampoline above, which resumes it. The yielder pointer is
                // taken first so no arena reference survives the swap.
                let yielder = (*self.arena.get()).slot(from).yielder_ptr();
                debug_assert!(!yielder.is_null(), "fiber suspended before entry ran");
                (*yielder).suspend(to);
            }
        }
        self.work.lock()
    }
}

/// Raw worker pointer that fiber coroutines capture. The worker is pinned
/// behind an `Arc` for at least as long as its fibers exist.
struct WorkerPtr(*const Worker);

// SAFETY: fibers only run on their owner worker's thread, and the pointee
// outlives them.
unsafe impl Send for WorkerPtr {}

/// Cross-thread handle to one fiber, used by the synchronization primitives
/// to park and resume waiters.
#[derive(Clone)]
pub(crate) struct FiberRef {
    worker: Arc<Worker>,
    fiber: FiberId,
}

impl FiberRef {
    /// The fiber currently executing on this thread, or None when the
    /// thread is not running inside a worker.
    pub(crate) fn current() -> Option<FiberRef> {
        Worker::current().map(|worker| {
            let fiber = worker.current_fiber();
            FiberRef { worker, fiber }
        })
    }

    /// Reschedules the fiber on its owner worker. Callable from any thread.
    pub(crate) fn notify(&self) {
        self.worker.enqueue_fiber(self.fiber);
    }

    /// Suspends this fiber until `pred` holds or the deadline passes; see
    /// [`Worker::wait_fiber`]. Must be called from the fiber itself.
    pub(crate) fn wait<T, F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        deadline: Option<Instant>,
        pred: F,
    ) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        debug_assert!(
            self.is_current(),
            "wait() must be called on the currently executing fiber"
        );
        self.worker.wait_fiber(guard, deadline, pred)
    }

    pub(crate) fn same(&self, other: &FiberRef) -> bool {
        Arc::ptr_eq(&self.worker, &other.worker) && self.fiber == other.fiber
    }

    fn is_current(&self) -> bool {
        Worker::current().is_some_and(|w| Arc::ptr_eq(&w, &self.worker))
            && self.worker.current_fiber() == self.fiber
    }
}

/// xorshift64: fast, worker-local victim selection for stealing. Quality is
/// irrelevant; speed and statelessness across workers are the point.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        XorShift64 { state: seed | 1 }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

#[cfg(test)]
mod tests {
    use super::XorShift64;

    #[test]
    fn test_xorshift_never_zero() {
        let mut rng = XorShift64::new(0);
        for _ in 0..1000 {
            assert_ne!(rng.next(), 0);
        }
    }

    #[test]
    fn test_xorshift_seeds_diverge() {
        let mut a = XorShift64::new(1);
        let mut b = XorShift64::new(2);
        let same = (0..100).filter(|_| a.next() == b.next()).count();
        assert_eq!(same, 0);
    }
}
