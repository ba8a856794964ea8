//! Scope-exit helpers.

/// Runs its closure when dropped, including during unwinding.
pub struct Finally<F: FnOnce()> {
    func: Option<F>,
}

impl<F: FnOnce()> Drop for Finally<F> {
    fn drop(&mut self) {
        if let Some(func) = self.func.take() {
            func();
        }
    }
}

/// Creates a guard that runs `func` when it goes out of scope.
pub fn make_finally<F: FnOnce()>(func: F) -> Finally<F> {
    Finally { func: Some(func) }
}

/// Runs a statement block at scope exit. Multiple `defer!`s in one scope
/// run in reverse declaration order.
///
/// ```
/// use taskweave::defer;
///
/// let log = std::cell::RefCell::new(Vec::new());
/// {
///     defer!(log.borrow_mut().push("cleanup"));
///     log.borrow_mut().push("work");
/// }
/// assert_eq!(*log.borrow(), ["work", "cleanup"]);
/// ```
#[macro_export]
macro_rules! defer {
    ($($body:tt)*) => {
        let _deferred = $crate::defer::make_finally(|| {
            $($body)*
        });
    };
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    #[test]
    fn test_runs_at_scope_exit() {
        let log = RefCell::new(Vec::new());
        {
            defer!(log.borrow_mut().push("deferred"));
            log.borrow_mut().push("body");
        }
        assert_eq!(*log.borrow(), vec!["body", "deferred"]);
    }

    #[test]
    fn test_reverse_order() {
        let log = RefCell::new(Vec::new());
        {
            defer!(log.borrow_mut().push(1));
            defer!(log.borrow_mut().push(2));
        }
        assert_eq!(*log.borrow(), vec![2, 1]);
    }

    #[test]
    fn test_runs_on_unwind() {
        let hit = std::sync::atomic::AtomicBool::new(false);
        let result = std::panic::catch_unwind(|| {
            defer!(hit.store(true, std::sync::atomic::Ordering::SeqCst));
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(hit.load(std::sync::atomic::Ordering::SeqCst));
    }
}
