//! Deadline index for fibers blocked in timed waits.

use crate::fiber::FiberId;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

/// Per-worker index of fibers waiting with a deadline.
///
/// Two views are kept in sync: an ordered set of `(deadline, fiber)` pairs
/// for "who expires next", and a reverse map for O(1) removal when a fiber
/// is resumed early by a notify.
#[derive(Default)]
pub(crate) struct WaitingFibers {
    timeouts: BTreeSet<(Instant, FiberId)>,
    fibers: HashMap<FiberId, Instant>,
}

impl WaitingFibers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Removes and returns the next fiber whose deadline is at or before
    /// `now`, if any.
    pub(crate) fn take(&mut self, now: Instant) -> Option<FiberId> {
        let &(deadline, fiber) = self.timeouts.iter().next()?;
        if now < deadline {
            return None;
        }
        self.timeouts.remove(&(deadline, fiber));
        let removed = self.fibers.remove(&fiber).is_some();
        debug_assert!(removed, "deadline index views out of sync");
        Some(fiber)
    }

    /// The earliest pending deadline. Only valid when non-empty.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timeouts.iter().next().map(|&(deadline, _)| deadline)
    }

    pub(crate) fn add(&mut self, deadline: Instant, fiber: FiberId) {
        let added = self.fibers.insert(fiber, deadline).is_none();
        debug_assert!(added, "fiber is already waiting");
        self.timeouts.insert((deadline, fiber));
    }

    /// Drops `fiber` from the index if present (it may already have been
    /// taken by a timeout sweep).
    pub(crate) fn erase(&mut self, fiber: FiberId) {
        if let Some(deadline) = self.fibers.remove(&fiber) {
            let erased = self.timeouts.remove(&(deadline, fiber));
            debug_assert!(erased, "deadline index views out of sync");
        }
    }

    #[cfg(debug_assertions)]
    pub(crate) fn contains(&self, fiber: FiberId) -> bool {
        self.fibers.contains_key(&fiber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_take_in_deadline_order() {
        let mut waiting = WaitingFibers::new();
        let base = Instant::now();
        waiting.add(base + Duration::from_millis(30), FiberId(3));
        waiting.add(base + Duration::from_millis(10), FiberId(1));
        waiting.add(base + Duration::from_millis(20), FiberId(2));

        assert_eq!(waiting.next_deadline(), Some(base + Duration::from_millis(10)));

        let late = base + Duration::from_millis(25);
        assert_eq!(waiting.take(late), Some(FiberId(1)));
        assert_eq!(waiting.take(late), Some(FiberId(2)));
        assert_eq!(waiting.take(late), None);
        assert!(!waiting.is_empty());
    }

    #[test]
    fn test_erase_keeps_views_in_sync() {
        let mut waiting = WaitingFibers::new();
        let base = Instant::now();
        waiting.add(base, FiberId(1));
        waiting.add(base, FiberId(2));

        waiting.erase(FiberId(1));
        // Erasing a fiber that is no longer present is a no-op.
        waiting.erase(FiberId(1));

        assert_eq!(waiting.take(base + Duration::from_millis(1)), Some(FiberId(2)));
        assert!(waiting.is_empty());
        assert_eq!(waiting.next_deadline(), None);
    }

    #[test]
    fn test_same_deadline_distinct_fibers() {
        let mut waiting = WaitingFibers::new();
        let base = Instant::now();
        waiting.add(base, FiberId(7));
        waiting.add(base, FiberId(5));

        let mut taken = Vec::new();
        while let Some(fiber) = waiting.take(base) {
            taken.push(fiber);
        }
        // Ties break on fiber id, and both entries survive the tie.
        assert_eq!(taken, vec![FiberId(5), FiberId(7)]);
    }
}
