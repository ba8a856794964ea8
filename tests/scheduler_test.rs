//! Scheduler lifecycle, routing and draining tests.

mod common;

use common::{with_scheduler, POOL_SIZES};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use taskweave::{schedule, schedule_task, Config, Scheduler, Task, TaskFlags, WaitGroup};

#[test]
fn test_construct_and_destruct() {
    let _scheduler = Scheduler::new(Config::new());
}

#[test]
fn test_construct_and_destruct_with_workers() {
    let _scheduler = Scheduler::new(Config::new().worker_threads(4));
}

#[test]
fn test_bind_and_unbind() {
    let scheduler = Scheduler::new(Config::new());
    scheduler.bind();
    Scheduler::unbind();
    // The thread can bind again after unbinding.
    scheduler.bind();
    Scheduler::unbind();
}

#[test]
#[should_panic(expected = "no scheduler bound")]
fn test_schedule_without_bind_panics() {
    schedule(|| {});
}

#[test]
fn test_enqueue_from_unbound_thread() {
    let scheduler = Scheduler::new(Config::new().worker_threads(2));
    let wg = WaitGroup::new(1);
    let done = wg.clone();
    scheduler.enqueue(Task::new(move || {
        done.done();
    }));
    wg.wait();
}

#[test]
fn test_tasks_only_run_on_worker_threads() {
    with_scheduler(8, || {
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let wg = WaitGroup::new(10_000);
        for _ in 0..10_000 {
            let threads = threads.clone();
            let wg = wg.clone();
            schedule(move || {
                threads.lock().unwrap().insert(thread::current().id());
                wg.done();
            });
        }
        wg.wait();

        let threads = threads.lock().unwrap();
        assert!(threads.len() <= 8, "ran on {} threads", threads.len());
        assert!(!threads.contains(&thread::current().id()));
    });
}

#[test]
fn test_single_threaded_mode_runs_on_this_thread() {
    with_scheduler(0, || {
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let wg = WaitGroup::new(100);
        for _ in 0..100 {
            let threads = threads.clone();
            let wg = wg.clone();
            schedule(move || {
                threads.lock().unwrap().insert(thread::current().id());
                wg.done();
            });
        }
        wg.wait();

        let threads = threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert!(threads.contains(&thread::current().id()));
    });
}

#[test]
fn test_same_thread_task_runs_on_enqueuing_thread() {
    with_scheduler(4, || {
        let home = thread::current().id();
        let wg = WaitGroup::new(1);
        let done = wg.clone();
        schedule_task(Task::with_flags(
            move || {
                assert_eq!(thread::current().id(), home);
                done.done();
            },
            TaskFlags::SAME_THREAD,
        ));
        // The pinned task runs while this thread waits.
        wg.wait();
    });
}

#[test]
fn test_destruct_with_pending_tasks() {
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let scheduler = Scheduler::new(Config::new().worker_threads(4));
        scheduler.bind();
        for _ in 0..1000 {
            let counter = counter.clone();
            schedule(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        Scheduler::unbind();
        // Dropping the scheduler drains everything still queued.
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
}

#[test]
fn test_destruct_with_pending_fibers() {
    for &workers in &[1usize, 8] {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = Scheduler::new(Config::new().worker_threads(workers));
            scheduler.bind();
            let gate = WaitGroup::new(1);
            for _ in 0..500 {
                let counter = counter.clone();
                let gate = gate.clone();
                schedule(move || {
                    gate.wait();
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            // One task unblocks every waiting fiber.
            let gate_done = gate.clone();
            schedule(move || {
                gate_done.done();
            });
            Scheduler::unbind();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 500, "workers = {workers}");
    }
}

#[test]
fn test_nested_schedule() {
    for &workers in POOL_SIZES {
        with_scheduler(workers, || {
            let wg = WaitGroup::new(2);
            let outer_done = wg.clone();
            let inner_done = wg.clone();
            schedule(move || {
                // Worker threads are bound, so tasks can schedule more work.
                schedule(move || {
                    inner_done.done();
                });
                outer_done.done();
            });
            wg.wait();
        });
    }
}

#[test]
fn test_worker_initializer_runs_per_worker() {
    let ids = Arc::new(Mutex::new(HashSet::new()));
    {
        let seen = ids.clone();
        let config = Config::new()
            .worker_threads(4)
            .thread_initializer(move |worker_id| {
                seen.lock().unwrap().insert(worker_id);
            });
        let _scheduler = Scheduler::new(config);
    }
    let ids = ids.lock().unwrap();
    assert_eq!(*ids, HashSet::from([0, 1, 2, 3]));
}

#[test]
fn test_fiber_stack_size_is_configurable() {
    let scheduler = Scheduler::new(
        Config::new()
            .worker_threads(1)
            .fiber_stack_size(256 * 1024),
    );
    assert_eq!(scheduler.config().fiber_stack_size, 256 * 1024);
    scheduler.bind();
    let wg = WaitGroup::new(1);
    let gate = WaitGroup::new(1);
    {
        let wg = wg.clone();
        let gate = gate.clone();
        schedule(move || {
            // Force a fiber suspension so a worker fiber is actually built
            // on the configured stack size.
            gate.wait();
            wg.done();
        });
    }
    let gate_done = gate.clone();
    schedule(move || {
        gate_done.done();
    });
    wg.wait();
    Scheduler::unbind();
}

#[test]
fn test_many_blocking_fibers_per_worker() {
    with_scheduler(2, || {
        let gate = taskweave::Event::new(taskweave::EventMode::Manual);
        let wg = WaitGroup::new(100);
        for _ in 0..100 {
            let gate = gate.clone();
            let wg = wg.clone();
            schedule(move || {
                gate.wait();
                wg.done();
            });
        }
        thread::sleep(Duration::from_millis(50));
        gate.signal();
        wg.wait();
    });
}

#[test]
fn test_two_schedulers_on_different_threads() {
    let a = Scheduler::new(Config::new().worker_threads(1));
    let b = Arc::new(Scheduler::new(Config::new().worker_threads(1)));

    a.bind();
    let b_remote = b.clone();
    let handle = thread::spawn(move || {
        b_remote.bind();
        let wg = WaitGroup::new(1);
        let done = wg.clone();
        schedule(move || {
            done.done();
        });
        wg.wait();
        Scheduler::unbind();
    });
    let wg = WaitGroup::new(1);
    let done = wg.clone();
    schedule(move || {
        done.done();
    });
    wg.wait();
    handle.join().unwrap();
    Scheduler::unbind();
}
