//! Events: level- or edge-triggered signals with fan-in composition.

use crate::condvar::ConditionVariable;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reset behavior of an [`Event`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventMode {
    /// A successful wait consumes the signal, and one `signal()` wakes
    /// exactly one waiter.
    Auto,
    /// The signal persists until [`Event::clear`]; `signal()` wakes every
    /// waiter.
    Manual,
}

/// A synchronization primitive that blocks waiters until signalled.
///
/// Events are cheap shared handles: clones refer to the same underlying
/// signal. Waiting from inside a worker suspends the fiber; waiting from
/// other threads blocks them on an OS condition variable.
#[derive(Clone)]
pub struct Event {
    shared: Arc<Shared>,
}

struct Shared {
    mode: EventMode,
    cv: ConditionVariable,
    state: Mutex<State>,
}

struct State {
    signalled: bool,
    /// Events to cascade a signal into, built by [`Event::any`].
    deps: Vec<Arc<Shared>>,
}

impl Event {
    pub fn new(mode: EventMode) -> Self {
        Self::with_state(mode, false)
    }

    /// Creates an event that may start already signalled.
    pub fn with_state(mode: EventMode, signalled: bool) -> Self {
        Event {
            shared: Arc::new(Shared {
                mode,
                cv: ConditionVariable::new(),
                state: Mutex::new(State {
                    signalled,
                    deps: Vec::new(),
                }),
            }),
        }
    }

    /// Signals the event, waking one waiter (Auto) or all waiters (Manual),
    /// then cascades into any dependent events. Signalling an already
    /// signalled event is a no-op.
    pub fn signal(&self) {
        self.shared.signal();
    }

    /// Clears the signalled state.
    pub fn clear(&self) {
        self.shared.state.lock().signalled = false;
    }

    /// Blocks until the event is signalled. In Auto mode the signal is
    /// consumed on return.
    pub fn wait(&self) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        shared.cv.wait(&mut state, |state| state.signalled);
        if shared.mode == EventMode::Auto {
            state.signalled = false;
        }
    }

    /// Blocks until the event is signalled or `duration` elapses. Returns
    /// false on timeout.
    pub fn wait_for(&self, duration: Duration) -> bool {
        self.wait_until(Instant::now() + duration)
    }

    /// Blocks until the event is signalled or `deadline` passes. Returns
    /// false on timeout.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if !shared
            .cv
            .wait_until(&mut state, deadline, |state| state.signalled)
        {
            return false;
        }
        if shared.mode == EventMode::Auto {
            state.signalled = false;
        }
        true
    }

    /// Returns the signalled state, consuming it in Auto mode.
    pub fn test(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.signalled {
            return false;
        }
        if self.shared.mode == EventMode::Auto {
            state.signalled = false;
        }
        true
    }

    /// Returns the signalled state without consuming it.
    pub fn is_signalled(&self) -> bool {
        self.shared.state.lock().signalled
    }

    /// Creates an event that fires as soon as any of `events` is signalled,
    /// including those already signalled on entry.
    pub fn any_of(mode: EventMode, events: &[Event]) -> Event {
        let any = Event::new(mode);
        for event in events {
            let signalled = {
                let mut state = event.shared.state.lock();
                state.deps.push(any.shared.clone());
                state.signalled
            };
            if signalled {
                any.signal();
            }
        }
        any
    }

    /// [`Event::any_of`] with the default Auto mode.
    pub fn any(events: &[Event]) -> Event {
        Self::any_of(EventMode::Auto, events)
    }
}

impl Shared {
    fn signal(&self) {
        let deps;
        {
            let mut state = self.state.lock();
            if state.signalled {
                return;
            }
            state.signalled = true;
            match self.mode {
                EventMode::Auto => self.cv.notify_one(),
                EventMode::Manual => self.cv.notify_all(),
            }
            deps = state.deps.clone();
        }
        // Cascade outside the lock; dependents take their own.
        for dep in deps {
            dep.signal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_auto_signal_is_consumed() {
        let event = Event::new(EventMode::Auto);
        event.signal();
        assert!(event.is_signalled());
        assert!(event.test());
        assert!(!event.is_signalled());
        assert!(!event.test());
    }

    #[test]
    fn test_manual_signal_persists() {
        let event = Event::new(EventMode::Manual);
        event.signal();
        assert!(event.test());
        assert!(event.test());
        event.clear();
        assert!(!event.test());
    }

    #[test]
    fn test_initial_state() {
        let event = Event::with_state(EventMode::Manual, true);
        assert!(event.is_signalled());
    }

    #[test]
    fn test_wait_for_timeout() {
        let event = Event::new(EventMode::Auto);
        assert!(!event.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_crosses_threads() {
        let event = Event::new(EventMode::Auto);
        let signaller = event.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal();
        });
        event.wait();
        handle.join().unwrap();
    }

    #[test]
    fn test_any_fires_on_member_signal() {
        for i in 0..3 {
            let events = [
                Event::new(EventMode::Auto),
                Event::new(EventMode::Auto),
                Event::new(EventMode::Auto),
            ];
            let any = Event::any(&events);
            assert!(!any.is_signalled());
            events[i].signal();
            assert!(any.is_signalled());
        }
    }

    #[test]
    fn test_any_observes_pre_signalled_member() {
        let events = [Event::new(EventMode::Auto), Event::new(EventMode::Auto)];
        events[1].signal();
        let any = Event::any(&events);
        assert!(any.is_signalled());
    }
}
