/*!
 * Bounded Exponential Backoff for CAS Retry Loops
 *
 * A failed CAS means another thread won the race. Retrying immediately keeps
 * the cache line bouncing between cores, so retries are spaced out:
 *
 * 1. **Spin phase** (step <= spin_limit): `2^step` `spin_loop()` hints
 * 2. **Yield phase** (step > spin_limit): `yield_now()` once per retry
 *
 * The step counter saturates at `yield_limit`, so the cost of one retry is
 * bounded. Nothing here parks the thread or takes a lock.
 */

use super::config::BackoffConfig;
use std::cell::Cell;
use std::fmt;
use std::hint;
use std::thread;
use tracing::trace;

/// Per-operation backoff state
///
/// Create one at the start of a retry loop and call [`Backoff::snooze`]
/// after every lost race.
pub struct Backoff {
    step: Cell<u32>,
    config: BackoffConfig,
}

impl Backoff {
    /// Create with default limits
    #[inline]
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    /// Create with explicit limits, clamped into the valid range
    #[inline]
    pub fn with_config(config: BackoffConfig) -> Self {
        Self {
            step: Cell::new(0),
            config: config.clamped(),
        }
    }

    /// Reset to the tight-spin phase
    #[inline]
    pub fn reset(&self) {
        self.step.set(0);
    }

    /// Spin only; never yields
    ///
    /// For loops where the other party is known to finish within a few
    /// instructions.
    #[inline]
    pub fn spin(&self) {
        let step = self.step.get().min(self.config.spin_limit);
        for _ in 0..1u32 << step {
            hint::spin_loop();
        }

        if self.step.get() <= self.config.spin_limit {
            self.step.set(self.step.get() + 1);
        }
    }

    /// Spin, then escalate to yielding the time slice
    #[inline]
    pub fn snooze(&self) {
        let step = self.step.get();
        if step <= self.config.spin_limit {
            for _ in 0..1u32 << step {
                hint::spin_loop();
            }
        } else {
            if step == self.config.spin_limit + 1 {
                trace!(step, "backoff escalating from spin to yield");
            }
            thread::yield_now();
        }

        if step <= self.config.yield_limit {
            self.step.set(step + 1);
        }
    }

    /// True once the backoff has passed `yield_limit`
    ///
    /// Callers with an alternative path (e.g. rehashing to another stripe)
    /// should take it instead of retrying the same location.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.step.get() > self.config.yield_limit
    }

    /// Current step, for diagnostics
    #[inline]
    pub fn step(&self) -> u32 {
        self.step.get()
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backoff")
            .field("step", &self.step.get())
            .field("is_completed", &self.is_completed())
            .finish()
    }
}
