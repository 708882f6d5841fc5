/*!
 * Lock-Free Primitives - Demo Entry Point
 *
 * Drives the primitives the way their typical callers do:
 * - Task scheduler handing work items through a lock-free stack
 * - Rate limiter counting requests with a striped counter
 * - Config hot-swap publishing versioned snapshots through a stamped cell
 */

use anyhow::{ensure, Context, Result};
use lockfree_prims::{init_tracing, CounterConfig, LockFreeStack, StampedCell, StripedCounter};
use std::sync::Arc;
use std::thread;
use tracing::info;

/// JSON counter tuning, e.g. `{"max_stripes": 8}`
const COUNTER_CONFIG_ENV: &str = "LOCKFREE_COUNTER_CONFIG";

const WORKERS: usize = 4;
const JOBS_PER_WORKER: usize = 1000;

fn main() -> Result<()> {
    init_tracing();

    let counter_config = match std::env::var(COUNTER_CONFIG_ENV) {
        Ok(json) => CounterConfig::from_json(&json)
            .with_context(|| format!("parsing {}", COUNTER_CONFIG_ENV))?,
        Err(_) => CounterConfig::default(),
    };
    info!(?counter_config, "Lock-free primitives demo starting");

    run_task_scheduler()?;
    run_rate_limiter(counter_config)?;
    run_config_hot_swap()?;

    info!("Demo complete");
    Ok(())
}

/// Workers push their own jobs, then drain whatever is on the shared stack
fn run_task_scheduler() -> Result<()> {
    let queue = LockFreeStack::new();
    let executed = StripedCounter::new();

    thread::scope(|s| -> Result<()> {
        let handles: Vec<_> = (0..WORKERS)
            .map(|worker| {
                let queue = &queue;
                let executed = &executed;
                s.spawn(move || -> Result<()> {
                    for job in 0..JOBS_PER_WORKER {
                        queue
                            .push((worker, job))
                            .map_err(lockfree_prims::LockFreeError::from)?;
                    }
                    while queue.pop().is_some() {
                        executed.increment();
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("scheduler worker panicked"))??;
        }
        Ok(())
    })?;

    ensure!(queue.is_empty(), "scheduler queue not drained");
    ensure!(
        executed.sum() == (WORKERS * JOBS_PER_WORKER) as i64,
        "executed {} jobs, expected {}",
        executed.sum(),
        WORKERS * JOBS_PER_WORKER
    );
    info!(
        jobs = executed.sum(),
        contention = queue.contention(),
        "Task scheduler finished"
    );
    Ok(())
}

/// Approximate admission control: the limit may be overshot by racing adds
fn run_rate_limiter(config: CounterConfig) -> Result<()> {
    const LIMIT: i64 = 5_000;
    const REQUESTS_PER_CLIENT: usize = 2_000;

    let window = StripedCounter::with_config(config);
    let admitted = StripedCounter::with_config(config);
    let rejected = StripedCounter::with_config(config);

    thread::scope(|s| {
        for _ in 0..WORKERS {
            s.spawn(|| {
                for _ in 0..REQUESTS_PER_CLIENT {
                    if window.sum() < LIMIT {
                        window.increment();
                        admitted.increment();
                    } else {
                        rejected.increment();
                    }
                }
            });
        }
    });

    let total = admitted.sum() + rejected.sum();
    ensure!(
        total == (WORKERS * REQUESTS_PER_CLIENT) as i64,
        "lost requests: {} accounted",
        total
    );
    info!(
        admitted = admitted.sum(),
        rejected = rejected.sum(),
        stripes = window.stripes(),
        "Rate limiter window closed"
    );

    window.reset();
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct Config {
    max_connections: u32,
    timeout_ms: u64,
}

/// One publisher bumps the config; readers only ever see whole snapshots
fn run_config_hot_swap() -> Result<()> {
    const UPDATES: u32 = 100;

    let config = StampedCell::new(
        Arc::new(Config {
            max_connections: 0,
            timeout_ms: 1000,
        }),
        0,
    );

    thread::scope(|s| -> Result<()> {
        s.spawn(|| {
            for _ in 0..UPDATES {
                config.update(|current| {
                    Arc::new(Config {
                        max_connections: current.max_connections + 1,
                        ..Config::clone(current)
                    })
                });
            }
        });

        let readers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let config = &config;
                s.spawn(move || -> Result<()> {
                    let mut last_stamp = 0;
                    for _ in 0..1000 {
                        let (snapshot, stamp) = config.get();
                        ensure!(stamp >= last_stamp, "stamp went backwards");
                        ensure!(
                            u64::from(snapshot.max_connections) == stamp,
                            "snapshot {} published with stamp {}",
                            snapshot.max_connections,
                            stamp
                        );
                        last_stamp = stamp;
                    }
                    Ok(())
                })
            })
            .collect();

        for reader in readers {
            reader
                .join()
                .map_err(|_| anyhow::anyhow!("config reader panicked"))??;
        }
        Ok(())
    })?;

    let (snapshot, stamp) = config.get();
    ensure!(stamp == u64::from(UPDATES), "expected stamp {}, got {}", UPDATES, stamp);
    info!(stamp, ?snapshot, "Config hot-swap finished");
    Ok(())
}
