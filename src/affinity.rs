//! Worker-thread CPU affinity policies.
//!
//! A policy maps a worker id to the set of cores that worker may run on.
//! The scheduler treats policies as opaque: it queries the set once at
//! worker startup and applies it via `core_affinity`.

pub use core_affinity::CoreId;
use std::sync::Arc;

/// Decides which CPU cores each worker is allowed to run on.
pub trait AffinityPolicy: Send + Sync {
    /// The cores worker `worker_id` should be pinned to. An empty result or
    /// a set wider than one core leaves placement to the OS.
    fn get(&self, worker_id: usize) -> Vec<CoreId>;
}

/// All cores currently available to this process.
pub fn all_cores() -> Vec<CoreId> {
    core_affinity::get_core_ids().unwrap_or_default()
}

/// A policy handing the full `cores` set to every worker.
pub fn any_of(cores: Vec<CoreId>) -> Arc<dyn AffinityPolicy> {
    Arc::new(AnyOf { cores })
}

/// A policy pinning worker `i` to the single core `cores[i % cores.len()]`.
pub fn one_of(cores: Vec<CoreId>) -> Arc<dyn AffinityPolicy> {
    Arc::new(OneOf { cores })
}

struct AnyOf {
    cores: Vec<CoreId>,
}

impl AffinityPolicy for AnyOf {
    fn get(&self, _worker_id: usize) -> Vec<CoreId> {
        self.cores.clone()
    }
}

struct OneOf {
    cores: Vec<CoreId>,
}

impl AffinityPolicy for OneOf {
    fn get(&self, worker_id: usize) -> Vec<CoreId> {
        if self.cores.is_empty() {
            return Vec::new();
        }
        vec![self.cores[worker_id % self.cores.len()]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cores(ids: &[usize]) -> Vec<CoreId> {
        ids.iter().map(|&id| CoreId { id }).collect()
    }

    #[test]
    fn test_any_of_returns_full_set() {
        let policy = any_of(cores(&[0, 1, 2]));
        assert_eq!(policy.get(0).len(), 3);
        assert_eq!(policy.get(7).len(), 3);
    }

    #[test]
    fn test_one_of_wraps_modulo() {
        let policy = one_of(cores(&[0, 2, 4]));
        assert_eq!(policy.get(0), cores(&[0]));
        assert_eq!(policy.get(1), cores(&[2]));
        assert_eq!(policy.get(3), cores(&[0]));
        assert_eq!(policy.get(5), cores(&[4]));
    }

    #[test]
    fn test_one_of_empty_is_unpinned() {
        let policy = one_of(Vec::new());
        assert!(policy.get(0).is_empty());
    }
}
