//! Directed acyclic graphs of tasks.
//!
//! A [`DagBuilder`] records nodes and dependency edges; [`build`]
//! (DagBuilder::build) freezes them into an immutable [`Dag`] that can be
//! executed any number of times, concurrently if desired: every run
//! allocates its own fan-in counters.
//!
//! Node index 0 is the root. It carries no work and is where every run
//! starts; only nodes reachable from it execute.

use crate::scheduler::schedule;
use crate::wait_group::WaitGroup;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const ROOT_INDEX: usize = 0;

type NodeWork<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Handle to a node within one builder. Copyable; only meaningful for the
/// builder that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DagNode(usize);

struct Node<T> {
    work: Option<NodeWork<T>>,
    /// Slot in the per-run counters array; assigned at build time to every
    /// node with two or more incoming edges.
    counter_index: Option<usize>,
    outs: Vec<usize>,
}

/// Builder for a [`Dag`].
pub struct DagBuilder<T = ()> {
    nodes: Vec<Node<T>>,
    num_ins: Vec<u32>,
}

impl<T> DagBuilder<T> {
    pub fn new() -> Self {
        DagBuilder {
            nodes: vec![Node {
                work: None,
                counter_index: None,
                outs: Vec::new(),
            }],
            num_ins: vec![0],
        }
    }

    /// The root node every run starts from.
    pub fn root(&self) -> DagNode {
        DagNode(ROOT_INDEX)
    }

    /// Adds a node with no dependencies. Attach it with
    /// [`add_dependency`](Self::add_dependency) (or create it via
    /// [`node_after`](Self::node_after) / [`then`](Self::then)); nodes left
    /// unreachable from the root never run.
    pub fn node<F>(&mut self, work: F) -> DagNode
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        debug_assert_eq!(self.num_ins.len(), self.nodes.len());
        let index = self.nodes.len();
        self.nodes.push(Node {
            work: Some(Box::new(work)),
            counter_index: None,
            outs: Vec::new(),
        });
        self.num_ins.push(0);
        DagNode(index)
    }

    /// Adds a node that runs once every node in `after` has finished.
    pub fn node_after<F>(&mut self, after: &[DagNode], work: F) -> DagNode
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let node = self.node(work);
        for &parent in after {
            self.add_dependency(parent, node);
        }
        node
    }

    /// Adds a node depending on `parent` alone.
    pub fn then<F>(&mut self, parent: DagNode, work: F) -> DagNode
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.node_after(&[parent], work)
    }

    /// Records that `child` must not start before `parent` has finished.
    pub fn add_dependency(&mut self, parent: DagNode, child: DagNode) {
        self.num_ins[child.0] += 1;
        self.nodes[parent.0].outs.push(child.0);
    }

    /// Freezes the graph. Nodes with fan-in of two or more get a counter
    /// slot pre-initialized to their fan-in.
    pub fn build(mut self) -> Dag<T> {
        let mut initial_counters = Vec::new();
        for (index, &fan_in) in self.num_ins.iter().enumerate() {
            if fan_in > 1 {
                self.nodes[index].counter_index = Some(initial_counters.len());
                initial_counters.push(fan_in);
            }
        }
        Dag {
            inner: Arc::new(Inner {
                nodes: self.nodes,
                initial_counters,
            }),
        }
    }
}

impl<T> Default for DagBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner<T> {
    nodes: Vec<Node<T>>,
    initial_counters: Vec<u32>,
}

/// Ephemeral state of a single run: the shared data plus this run's fan-in
/// counters.
struct RunContext<T> {
    data: T,
    counters: Vec<AtomicU32>,
}

/// An immutable graph of tasks. Cheap to clone; runs may overlap.
#[derive(Clone)]
pub struct Dag<T = ()> {
    inner: Arc<Inner<T>>,
}

impl<T> Dag<T>
where
    T: Send + Sync + 'static,
{
    /// Executes the graph, passing `&data` to every node, and returns once
    /// all reachable nodes have completed.
    ///
    /// Must be called on a thread bound to a scheduler, as fan-out goes
    /// through [`schedule`].
    pub fn run(&self, data: T) {
        let ctx = Arc::new(RunContext {
            data,
            counters: self
                .inner
                .initial_counters
                .iter()
                .map(|&count| AtomicU32::new(count))
                .collect(),
        });
        let wg = WaitGroup::new(0);
        invoke(&self.inner, &ctx, ROOT_INDEX, &wg);
        wg.wait();
    }
}

/// Runs one node, then fans out into the children it unblocked. One child
/// is kept for direct invocation on the current stack; the rest go through
/// the scheduler, tracked by `wg`.
fn invoke<T>(inner: &Arc<Inner<T>>, ctx: &Arc<RunContext<T>>, index: usize, wg: &WaitGroup)
where
    T: Send + Sync + 'static,
{
    let node = &inner.nodes[index];
    if let Some(work) = &node.work {
        work(&ctx.data);
    }

    let mut local: Option<usize> = None;
    for &child in &node.outs {
        if ready(inner, ctx, child) {
            if let Some(previous) = local.replace(child) {
                wg.add(1);
                let inner = inner.clone();
                let ctx = ctx.clone();
                let wg = wg.clone();
                schedule(move || {
                    invoke(&inner, &ctx, previous, &wg);
                    wg.done();
                });
            }
        }
    }
    if let Some(child) = local {
        invoke(inner, ctx, child, wg);
    }
}

/// Counts down `index`'s fan-in; true when the node may fire.
fn ready<T>(inner: &Inner<T>, ctx: &RunContext<T>, index: usize) -> bool {
    match inner.nodes[index].counter_index {
        None => true,
        Some(slot) => ctx.counters[slot].fetch_sub(1, Ordering::SeqCst) == 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_assigns_counters_to_fan_in() {
        let mut builder = DagBuilder::<()>::new();
        let root = builder.root();
        let a = builder.then(root, |_| {});
        let b = builder.then(root, |_| {});
        let join = builder.node_after(&[a, b], |_| {});
        let single = builder.then(join, |_| {});
        let dag = builder.build();

        assert_eq!(dag.inner.initial_counters, vec![2]);
        assert_eq!(dag.inner.nodes[join.0].counter_index, Some(0));
        assert_eq!(dag.inner.nodes[single.0].counter_index, None);
    }

    #[test]
    fn test_root_has_no_work() {
        let builder = DagBuilder::<()>::new();
        assert!(builder.nodes[builder.root().0].work.is_none());
    }
}
