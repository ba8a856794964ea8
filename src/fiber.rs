//! Fiber identity, state machine, and the per-worker fiber arena.
//!
//! Fibers are lightweight execution contexts built on `corosensei`
//! coroutines. Each is owned by exactly one worker and never migrates; a
//! fiber is therefore identified by a small integer unique within its
//! worker. The fiber with id 0 is the "main" fiber: it adopts the host
//! thread's own stack and has no coroutine of its own.
//!
//! Coroutines are asymmetric (they suspend back to whoever resumed them),
//! so a fiber-to-fiber switch is expressed as yielding the *target* fiber
//! id back to the host stack, which immediately resumes the target. The
//! extra bounce is invisible to the fibers themselves.

use corosensei::{Coroutine, Yielder};
use std::cell::{Cell, UnsafeCell};

pub(crate) type FiberCoroutine = Coroutine<(), FiberId, ()>;
pub(crate) type FiberYielder = Yielder<(), FiberId>;

/// Identifies a fiber within its owning worker. Because fibers never
/// migrate, a `(worker, FiberId)` pair names a fiber globally.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub(crate) struct FiberId(pub(crate) u32);

/// The fiber adopting the host thread's stack.
pub(crate) const MAIN_FIBER: FiberId = FiberId(0);

/// Fiber lifecycle states. Guarded by the owning worker's work mutex.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum FiberState {
    /// Parked in the worker's idle set, available for reuse.
    Idle,
    /// Blocked in a wait with no deadline.
    Yielded,
    /// Blocked in a wait with a deadline; present in the deadline index.
    Waiting,
    /// In the worker's fiber-ready queue.
    Queued,
    /// Currently executing. Exactly one fiber per worker is Running.
    Running,
}

/// One fiber's execution resources.
///
/// The coroutine sits in an `UnsafeCell` because the slot is aliased: a
/// suspended fiber's own frames hold shared references to it while the
/// trampoline resumes it through a raw pointer.
pub(crate) struct FiberSlot {
    /// `None` for the main fiber, which runs on the host thread's stack.
    coroutine: UnsafeCell<Option<FiberCoroutine>>,
    /// Stashed by the coroutine entry on first resume. Only dereferenced
    /// from the fiber's own stack, while the coroutine is live.
    yielder: Cell<*const FiberYielder>,
}

impl FiberSlot {
    pub(crate) fn is_main(&self) -> bool {
        // SAFETY: the cell is only mutated through `coroutine_ptr` by the
        // owner thread, never concurrently with this read.
        unsafe { (*self.coroutine.get()).is_none() }
    }

    /// Pointer to the coroutine for the trampoline to resume.
    ///
    /// # Safety
    ///
    /// Only the owner thread may call this, and the coroutine must not be
    /// currently executing.
    pub(crate) unsafe fn coroutine_ptr(&self) -> *mut FiberCoroutine {
        (*self.coroutine.get())
            .as_mut()
            .expect("the main fiber cannot be resumed through the trampoline")
    }

    pub(crate) fn set_yielder(&self, yielder: &FiberYielder) {
        self.yielder.set(yielder as *const FiberYielder);
    }

    /// The yielder stored by the coroutine entry; null until the fiber has
    /// run for the first time. Suspending through the raw pointer keeps
    /// slot references from being held across a stack swap.
    pub(crate) fn yielder_ptr(&self) -> *const FiberYielder {
        self.yielder.get()
    }
}

/// All fibers of one worker. Accessed only from the owner thread. Slots
/// live behind raw pointers so their addresses stay stable while the index
/// grows, and so suspended fibers may keep references to their own slot
/// while the arena is mutated around them.
pub(crate) struct FiberArena {
    current: FiberId,
    slots: Vec<*mut FiberSlot>,
}

impl FiberArena {
    /// Creates the arena holding just the main fiber.
    pub(crate) fn new() -> Self {
        FiberArena {
            current: MAIN_FIBER,
            slots: vec![Box::into_raw(Box::new(FiberSlot {
                coroutine: UnsafeCell::new(None),
                yielder: Cell::new(std::ptr::null()),
            }))],
        }
    }

    pub(crate) fn current(&self) -> FiberId {
        self.current
    }

    pub(crate) fn set_current(&mut self, id: FiberId) {
        self.current = id;
    }

    pub(crate) fn slot(&self, id: FiberId) -> &FiberSlot {
        // SAFETY: slots are only freed when the arena drops, and ids are
        // never exposed past their worker's lifetime.
        unsafe { &*self.slots[id.0 as usize] }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Registers a new worker fiber. `make` receives the id the fiber will
    /// be known by, so the coroutine entry can find its own slot.
    pub(crate) fn add(&mut self, make: impl FnOnce(FiberId) -> FiberCoroutine) -> FiberId {
        let id = FiberId(self.slots.len() as u32);
        self.slots.push(Box::into_raw(Box::new(FiberSlot {
            coroutine: UnsafeCell::new(Some(make(id))),
            yielder: Cell::new(std::ptr::null()),
        })));
        id
    }
}

impl Drop for FiberArena {
    fn drop(&mut self) {
        for &slot in &self.slots {
            // SAFETY: each pointer came from Box::into_raw and is dropped
            // exactly once. Dropping a suspended coroutine unwinds its
            // stack; by this point no fiber holds locks or queue entries.
            drop(unsafe { Box::from_raw(slot) });
        }
    }
}
