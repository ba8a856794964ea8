//! Fiber-aware condition variable.
//!
//! Inside a worker, waiting suspends the current fiber so the thread keeps
//! executing other tasks; outside, it falls back to an OS condition
//! variable. Notifications try parked fibers first, then OS waiters.
//!
//! All waiters of one `ConditionVariable` must synchronize through the same
//! mutex, as with [`parking_lot::Condvar`].

use crate::worker::FiberRef;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct ConditionVariable {
    /// Fibers currently blocked in a wait.
    waiting: Mutex<Vec<FiberRef>>,
    /// Fallback for waiters running outside any worker.
    condition: Condvar,
    num_waiting: AtomicUsize,
    num_waiting_on_condition: AtomicUsize,
}

impl ConditionVariable {
    pub fn new() -> Self {
        ConditionVariable {
            waiting: Mutex::new(Vec::new()),
            condition: Condvar::new(),
            num_waiting: AtomicUsize::new(0),
            num_waiting_on_condition: AtomicUsize::new(0),
        }
    }

    /// Wakes one waiter, if any: a parked fiber when one exists, otherwise
    /// an OS waiter.
    pub fn notify_one(&self) {
        if self.num_waiting.load(Ordering::SeqCst) == 0 {
            return;
        }
        {
            let waiting = self.waiting.lock();
            if let Some(fiber) = waiting.first() {
                fiber.notify();
                return;
            }
        }
        if self.num_waiting_on_condition.load(Ordering::SeqCst) > 0 {
            self.condition.notify_one();
        }
    }

    /// Wakes every waiter, fibers and OS threads alike.
    pub fn notify_all(&self) {
        if self.num_waiting.load(Ordering::SeqCst) == 0 {
            return;
        }
        {
            let waiting = self.waiting.lock();
            for fiber in waiting.iter() {
                fiber.notify();
            }
        }
        if self.num_waiting_on_condition.load(Ordering::SeqCst) > 0 {
            self.condition.notify_all();
        }
    }

    /// Blocks until `pred` holds. The guard is released while blocked and
    /// held again whenever `pred` runs and when the call returns. Spurious
    /// wakeups are absorbed by re-evaluating `pred`.
    pub fn wait<T, F>(&self, guard: &mut MutexGuard<'_, T>, pred: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_impl(guard, None, pred);
    }

    /// Like [`wait`](Self::wait), giving up after `duration`. Returns false
    /// if the predicate was still false at the deadline.
    pub fn wait_for<T, F>(&self, guard: &mut MutexGuard<'_, T>, duration: Duration, pred: F) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_impl(guard, Some(Instant::now() + duration), pred)
    }

    /// Like [`wait`](Self::wait), giving up at `deadline`. Returns false if
    /// the predicate was still false at the deadline.
    pub fn wait_until<T, F>(&self, guard: &mut MutexGuard<'_, T>, deadline: Instant, pred: F) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_impl(guard, Some(deadline), pred)
    }

    fn wait_impl<T, F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        deadline: Option<Instant>,
        mut pred: F,
    ) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        if pred(&mut **guard) {
            return true;
        }
        self.num_waiting.fetch_add(1, Ordering::SeqCst);
        let result = if let Some(fiber) = FiberRef::current() {
            // Register before the user lock can be released so a notify
            // racing with the suspension finds this fiber in the list.
            self.waiting.lock().push(fiber.clone());
            let result = fiber.wait(guard, deadline, &mut pred);
            self.remove_waiter(&fiber);
            result
        } else {
            self.num_waiting_on_condition.fetch_add(1, Ordering::SeqCst);
            let result = self.wait_condition(guard, deadline, &mut pred);
            self.num_waiting_on_condition.fetch_sub(1, Ordering::SeqCst);
            result
        };
        self.num_waiting.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn wait_condition<T, F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        deadline: Option<Instant>,
        pred: &mut F,
    ) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        loop {
            if pred(&mut **guard) {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if self.condition.wait_until(guard, deadline).timed_out() {
                        // One last look under the lock.
                        return pred(&mut **guard);
                    }
                }
                None => self.condition.wait(guard),
            }
        }
    }

    fn remove_waiter(&self, fiber: &FiberRef) {
        let mut waiting = self.waiting.lock();
        if let Some(index) = waiting.iter().position(|waiter| waiter.same(fiber)) {
            waiting.swap_remove(index);
        }
    }
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_os_wait_and_notify() {
        let state = Arc::new((Mutex::new(false), ConditionVariable::new()));
        let state2 = state.clone();

        let waiter = thread::spawn(move || {
            let (mutex, cv) = &*state2;
            let mut guard = mutex.lock();
            cv.wait(&mut guard, |ready| *ready);
            assert!(*guard);
        });

        thread::sleep(Duration::from_millis(20));
        {
            let (mutex, cv) = &*state;
            *mutex.lock() = true;
            cv.notify_one();
        }
        waiter.join().unwrap();
    }

    #[test]
    fn test_os_wait_for_times_out() {
        let mutex = Mutex::new(());
        let cv = ConditionVariable::new();
        let mut guard = mutex.lock();
        let start = Instant::now();
        assert!(!cv.wait_for(&mut guard, Duration::from_millis(20), |_| false));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_pred_already_true_returns_immediately() {
        let mutex = Mutex::new(());
        let cv = ConditionVariable::new();
        let mut guard = mutex.lock();
        assert!(cv.wait_for(&mut guard, Duration::from_secs(10), |_| true));
    }

    #[test]
    fn test_notify_without_waiters_is_noop() {
        let cv = ConditionVariable::new();
        cv.notify_one();
        cv.notify_all();
    }
}
