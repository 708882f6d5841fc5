/*!
 * Synchronization Primitives Integration Tests
 *
 * Multi-threaded conservation and ordering checks for the stack, stamped
 * cell and striped counter
 */

use lockfree_prims::{
    AtomicCell, BackoffConfig, CounterConfig, LockFreeStack, StampedCell, StripedCounter,
};
use pretty_assertions::assert_eq;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_stack_lifo_single_thread() {
    let stack = LockFreeStack::new();
    let values: Vec<u32> = (1..=50).collect();

    for v in &values {
        stack.push(*v).unwrap();
    }

    let popped: Vec<u32> = std::iter::from_fn(|| stack.pop()).collect();
    let expected: Vec<u32> = values.into_iter().rev().collect();
    assert_eq!(popped, expected);
    assert!(stack.is_empty());
}

#[test]
fn test_stack_conservation_concurrent() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 5_000;

    let stack = Arc::new(LockFreeStack::with_backoff(BackoffConfig::high_contention()));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let stack = stack.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    stack.push((t, i)).unwrap();
                }
                let mut popped = Vec::with_capacity(PER_THREAD);
                for _ in 0..PER_THREAD {
                    // Every thread pushed before popping, so there is always
                    // at least one value per outstanding pop
                    popped.push(stack.pop().expect("stack drained early"));
                }
                popped
            })
        })
        .collect();

    let mut counts: HashMap<(usize, usize), usize> = HashMap::new();
    for handle in handles {
        for v in handle.join().unwrap() {
            *counts.entry(v).or_default() += 1;
        }
    }

    assert!(stack.is_empty());
    assert_eq!(counts.len(), THREADS * PER_THREAD);
    assert!(counts.values().all(|&n| n == 1), "value popped twice");
}

#[test]
fn test_stack_interleaved_stress() {
    const THREADS: usize = 16;
    const OPS: usize = 10_000;

    let stack = Arc::new(LockFreeStack::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let stack = stack.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut popped = Vec::new();
                for i in 0..OPS {
                    stack.push(t * OPS + i).unwrap();
                    if i % 3 != 0 {
                        if let Some(v) = stack.pop() {
                            popped.push(v);
                        }
                    }
                }
                popped
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for v in handle.join().unwrap() {
            assert!(seen.insert(v), "value {} popped twice", v);
        }
    }
    while let Some(v) = stack.pop() {
        assert!(seen.insert(v), "value {} popped twice", v);
    }

    assert_eq!(seen.len(), THREADS * OPS);
}

#[test]
fn test_stack_example_scenario() {
    let stack = Arc::new(LockFreeStack::new());

    let handles: Vec<_> = (0..4u64)
        .map(|tid| {
            let stack = stack.clone();
            thread::spawn(move || {
                for i in 0..1000u64 {
                    stack.push((tid << 32) | i).unwrap();
                }
                (0..1000).filter_map(|_| stack.pop()).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }

    let unique: HashSet<u64> = all.iter().copied().collect();
    assert_eq!(all.len(), 4000);
    assert_eq!(unique.len(), 4000);
    assert!(stack.is_empty());
}

#[test]
fn test_stamped_cell_aba_scenario() {
    let cell = Arc::new(StampedCell::new(10, 0));
    let barrier = Arc::new(Barrier::new(2));

    // Thread A observes (10, 0), then waits for B and C to finish
    let a = {
        let cell = cell.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            let (value, stamp) = cell.get();
            assert_eq!((value, stamp), (10, 0));
            barrier.wait();
            cell.compare_and_swap(&value, 99, stamp, stamp + 1)
        })
    };

    let b = {
        let cell = cell.clone();
        thread::spawn(move || cell.compare_and_swap(&10, 20, 0, 1))
    };
    assert!(b.join().unwrap());

    let c = {
        let cell = cell.clone();
        thread::spawn(move || cell.compare_and_swap(&20, 10, 1, 2))
    };
    assert!(c.join().unwrap());

    barrier.wait();
    assert!(!a.join().unwrap(), "stale stamp must not win");
    assert_eq!(cell.get(), (10, 2));
}

#[test]
fn test_plain_cell_misses_aba() {
    // Contrast: without a stamp the same interleaving goes unnoticed
    let cell = AtomicCell::new(10i64);
    let seen = cell.load();
    assert!(cell.compare_and_swap(10, 20));
    assert!(cell.compare_and_swap(20, 10));
    assert!(cell.compare_and_swap(seen, 99));
}

#[test]
fn test_stamped_cell_snapshot_publishing() {
    #[derive(Debug, Clone, PartialEq)]
    struct Snapshot {
        version: u64,
        replicas: Vec<u64>,
    }

    let cell = Arc::new(StampedCell::new(
        Arc::new(Snapshot {
            version: 0,
            replicas: vec![0; 4],
        }),
        0,
    ));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let cell = cell.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    cell.update(|current| {
                        let next = current.version + 1;
                        Arc::new(Snapshot {
                            version: next,
                            replicas: vec![next; 4],
                        })
                    });
                }
            })
        })
        .collect();

    let reader = {
        let cell = cell.clone();
        thread::spawn(move || {
            for _ in 0..5_000 {
                let (snapshot, stamp) = cell.get();
                // Snapshots are published whole, together with their stamp
                assert_eq!(snapshot.version, stamp);
                assert!(snapshot.replicas.iter().all(|&r| r == snapshot.version));
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    let (snapshot, stamp) = cell.get();
    assert_eq!(stamp, 1000);
    assert_eq!(snapshot.version, 1000);
}

#[test]
fn test_striped_counter_conservation() {
    const THREADS: usize = 8;
    const N: i64 = 50_000;

    let counter = Arc::new(StripedCounter::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = counter.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..N {
                    counter.add(1);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counter.sum(), THREADS as i64 * N);
    assert!(counter.stripes() <= counter.max_stripes());
}

#[test]
fn test_striped_counter_respects_configured_ceiling() {
    let config = CounterConfig::from_json(r#"{"max_stripes": 2}"#).unwrap();
    let counter = Arc::new(StripedCounter::with_config(config));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..20_000 {
                    counter.increment();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counter.sum(), 160_000);
    assert!(counter.stripes() <= 2);
    assert!(counter.resize_events() <= 1);
}

#[test]
fn test_striped_counter_uncontended_stays_flat() {
    let counter = StripedCounter::new();
    for i in 0..10_000 {
        if i % 2 == 0 {
            counter.increment();
        } else {
            counter.add(3);
        }
    }

    assert_eq!(counter.sum(), 5_000 + 15_000);
    assert_eq!(counter.resize_events(), 0);
    assert_eq!(counter.stripes(), 0);
}

#[test]
fn test_striped_counter_sum_then_reset_during_writes() {
    const THREADS: usize = 4;
    const N: i64 = 25_000;

    let counter = Arc::new(StripedCounter::new());

    let writers: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..N {
                    counter.increment();
                }
            })
        })
        .collect();

    // Every increment ends up either in a drained batch or in the remainder
    let mut drained = 0;
    for _ in 0..100 {
        drained += counter.sum_then_reset();
        thread::yield_now();
    }

    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(drained + counter.sum(), THREADS as i64 * N);
}
