//! Task definitions.
//!
//! A task is the scheduler's basic unit of work: a boxed closure plus a
//! small flag set that influences routing (see [`TaskFlags`]).

/// Flag set attached to a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskFlags(u8);

impl TaskFlags {
    /// No special handling.
    pub const NONE: TaskFlags = TaskFlags(0);

    /// The task must execute on the worker that enqueued it. Tasks carrying
    /// this flag are never work-stolen.
    pub const SAME_THREAD: TaskFlags = TaskFlags(1);

    /// Returns true if all bits of `flag` are set in `self`.
    pub fn contains(self, flag: TaskFlags) -> bool {
        (self.0 & flag.0) == flag.0
    }
}

impl std::ops::BitOr for TaskFlags {
    type Output = TaskFlags;

    fn bitor(self, rhs: TaskFlags) -> TaskFlags {
        TaskFlags(self.0 | rhs.0)
    }
}

/// A unit of work to be executed by the scheduler.
pub struct Task {
    function: Box<dyn FnOnce() + Send>,
    flags: TaskFlags,
}

impl Task {
    /// Creates a task from a closure, with no flags.
    pub fn new<F>(function: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            function: Box::new(function),
            flags: TaskFlags::NONE,
        }
    }

    /// Creates a task from a closure with an explicit flag set.
    pub fn with_flags<F>(function: F, flags: TaskFlags) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            function: Box::new(function),
            flags,
        }
    }

    /// Returns true if the task was created with `flag`.
    pub fn is(&self, flag: TaskFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Consumes the task and invokes its closure.
    pub(crate) fn run(self) {
        (self.function)();
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("flags", &self.flags).finish()
    }
}
