//! Wait groups: count down a set of concurrent jobs and wait for zero.

use crate::condvar::ConditionVariable;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A counter that tasks decrement as they finish; waiters block until it
/// reaches zero.
///
/// Clones share the same counter, so a wait group can be handed to each
/// task by value. Dropping the last clone does not implicitly count down.
#[derive(Clone)]
pub struct WaitGroup {
    data: Arc<Data>,
}

struct Data {
    count: AtomicU32,
    mutex: Mutex<()>,
    cv: ConditionVariable,
}

impl WaitGroup {
    /// Creates a wait group with the given initial count.
    pub fn new(initial_count: u32) -> Self {
        WaitGroup {
            data: Arc::new(Data {
                count: AtomicU32::new(initial_count),
                mutex: Mutex::new(()),
                cv: ConditionVariable::new(),
            }),
        }
    }

    /// Increments the counter by `count`.
    pub fn add(&self, count: u32) {
        self.data.count.fetch_add(count, Ordering::SeqCst);
    }

    /// Decrements the counter by one, waking all waiters when it reaches
    /// zero. Returns true when this call brought the counter to zero.
    ///
    /// Panics if the counter is already zero.
    pub fn done(&self) -> bool {
        let previous = self.data.count.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "WaitGroup::done() called too many times");
        if previous == 1 {
            let _lock = self.data.mutex.lock();
            self.data.cv.notify_all();
            return true;
        }
        false
    }

    /// The current counter value.
    pub fn count(&self) -> u32 {
        self.data.count.load(Ordering::SeqCst)
    }

    /// Blocks until the counter reaches zero. Inside a worker this
    /// suspends the calling fiber; elsewhere it blocks the thread.
    pub fn wait(&self) {
        let data = &self.data;
        let mut guard = data.mutex.lock();
        data.cv
            .wait(&mut guard, |_| data.count.load(Ordering::SeqCst) == 0);
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        WaitGroup::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_done_reports_zero_crossing() {
        let wg = WaitGroup::new(2);
        assert!(!wg.done());
        assert!(wg.done());
        assert_eq!(wg.count(), 0);
    }

    #[test]
    fn test_zero_count_wait_returns_immediately() {
        let wg = WaitGroup::new(0);
        wg.wait();
    }

    #[test]
    fn test_clones_share_the_counter() {
        let wg = WaitGroup::new(0);
        let clone = wg.clone();
        wg.add(2);
        assert_eq!(clone.count(), 2);
        clone.done();
        clone.done();
        wg.wait();
    }

    #[test]
    fn test_wait_blocks_until_done() {
        let wg = WaitGroup::new(1);
        let signaller = wg.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.done();
        });
        wg.wait();
        assert_eq!(wg.count(), 0);
        handle.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "done() called too many times")]
    fn test_done_underflow_panics() {
        let wg = WaitGroup::new(0);
        wg.done();
    }
}
