//! Keyed executor ordering and parallelism.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use keypath_store::{ExecutorConfig, KeyedExecutor, TaskError};
use parking_lot::Mutex;

fn executor<K>(threads: usize) -> Arc<KeyedExecutor<K>>
where
    K: Eq + std::hash::Hash + Clone + Send + 'static,
{
    Arc::new(KeyedExecutor::new(ExecutorConfig::with_threads(threads)).unwrap())
}

// ============================================================================
// Serialization per key
// ============================================================================

#[test]
fn no_lost_updates_from_many_submitters() {
    const SUBMITTERS: usize = 8;
    const PER_SUBMITTER: usize = 250;

    let executor = executor::<&'static str>(6);
    // Deliberately unsynchronized read-modify-write; only the key serializes it.
    let counter = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(SUBMITTERS));

    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|_| {
            let executor = executor.clone();
            let counter = counter.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..PER_SUBMITTER)
                    .map(|_| {
                        let counter = counter.clone();
                        executor
                            .submit("user-1", move || {
                                let seen = counter.load(Ordering::Relaxed);
                                thread::yield_now();
                                counter.store(seen + 1, Ordering::Relaxed);
                                seen + 1
                            })
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut results = Vec::new();
    for submitter in submitters {
        for handle in submitter.join().unwrap() {
            results.push(handle.join().unwrap());
        }
    }

    assert_eq!(counter.load(Ordering::SeqCst), SUBMITTERS * PER_SUBMITTER);
    results.sort_unstable();
    assert_eq!(results, (1..=SUBMITTERS * PER_SUBMITTER).collect::<Vec<_>>());
}

#[test]
fn each_submitter_sees_its_own_order() {
    let executor = executor::<u8>(4);
    let log = Arc::new(Mutex::new(Vec::new()));

    let submitters: Vec<_> = (0..4)
        .map(|s| {
            let executor = executor.clone();
            let log = log.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    let log = log.clone();
                    executor.execute(1, move || log.lock().push((s, i))).unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }
    executor.shutdown();

    let log = log.lock();
    assert_eq!(log.len(), 400);
    let mut last: HashMap<i32, i32> = HashMap::new();
    for &(s, i) in log.iter() {
        if let Some(prev) = last.insert(s, i) {
            assert!(prev < i, "submitter {} ran {} after {}", s, i, prev);
        }
    }
}

#[test]
fn unkeyed_submissions_serialize_together() {
    let executor = executor::<String>(4);
    let running = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..40)
        .map(|_| {
            let running = running.clone();
            executor
                .submit_unkeyed(move || {
                    let overlap = running.fetch_add(1, Ordering::SeqCst) > 0;
                    thread::sleep(Duration::from_millis(1));
                    running.fetch_sub(1, Ordering::SeqCst);
                    overlap
                })
                .unwrap()
        })
        .collect();
    assert!(handles.into_iter().all(|h| !h.join().unwrap()));
}

// ============================================================================
// Parallelism across keys
// ============================================================================

#[test]
fn distinct_keys_approach_pool_throughput() {
    const KEYS: u64 = 16;
    const THREADS: usize = 4;
    const SLEEP: Duration = Duration::from_millis(50);

    let executor = executor::<u64>(THREADS);
    let counters = Arc::new(Mutex::new(HashMap::new()));

    let start = Instant::now();
    let handles: Vec<_> = (0..KEYS)
        .map(|key| {
            let counters = counters.clone();
            executor
                .submit(key, move || {
                    thread::sleep(SLEEP);
                    *counters.lock().entry(key).or_insert(0) += 1;
                })
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let elapsed = start.elapsed();

    // Sequential would take KEYS * SLEEP (800ms); the pool needs about a quarter.
    let sequential = SLEEP * KEYS as u32;
    assert!(
        elapsed < sequential / 2,
        "took {:?}, sequential would be {:?}",
        elapsed,
        sequential
    );
    assert!(counters.lock().values().all(|&n| n == 1));
}

#[test]
fn a_slow_key_does_not_block_others() {
    let executor = executor::<&'static str>(2);
    let gate = Arc::new(Barrier::new(2));

    let inner = gate.clone();
    let slow = executor.submit("slow", move || inner.wait()).unwrap();
    let queued_behind = executor.submit("slow", || "after").unwrap();
    let fast = executor.submit("fast", || "done").unwrap();

    assert_eq!(fast.join_timeout(Duration::from_secs(5)), Ok("done"));
    assert!(!queued_behind.is_finished());
    gate.wait();
    slow.join().unwrap();
    assert_eq!(queued_behind.join(), Ok("after"));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn panics_do_not_break_the_key() {
    let executor = executor::<u32>(2);
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = {
        let order = order.clone();
        executor.submit(1, move || order.lock().push("first")).unwrap()
    };
    let broken = executor.submit(1, || -> u8 { panic!("bad input") }).unwrap();
    let last = {
        let order = order.clone();
        executor.submit(1, move || order.lock().push("last")).unwrap()
    };

    first.join().unwrap();
    assert_eq!(broken.join(), Err(TaskError::Panicked("bad input".to_string())));
    last.join().unwrap();
    assert_eq!(*order.lock(), vec!["first", "last"]);
}

#[test]
fn dropping_the_executor_runs_queued_work() {
    let count = Arc::new(AtomicUsize::new(0));
    {
        let executor = KeyedExecutor::<u8>::new(ExecutorConfig::with_threads(2)).unwrap();
        for i in 0..30 {
            let count = count.clone();
            executor
                .execute(i % 4, move || {
                    thread::sleep(Duration::from_millis(1));
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
    }
    assert_eq!(count.load(Ordering::SeqCst), 30);
}

#[test]
fn worker_threads_are_named() {
    let config = ExecutorConfig {
        threads: 1,
        thread_name: "ledger".to_string(),
    };
    let executor = KeyedExecutor::<u8>::new(config).unwrap();
    let name = executor
        .submit(0, || thread::current().name().map(str::to_string))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(name.as_deref(), Some("ledger-0"));
}
