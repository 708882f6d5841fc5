/*!
 * Stamped Cell
 *
 * ABA-safe CAS over a `(value, stamp)` pair.
 *
 * ## Problem
 *
 * Plain CAS only checks the bit pattern of the current value:
 * ```text
 * Thread A: reads 10
 * Thread B: 10 -> 20
 * Thread C: 20 -> 10
 * Thread A: CAS(10 -> 99) succeeds, although the value changed twice
 * ```
 *
 * ## Solution
 *
 * Every write carries a stamp that only moves forward. A CAS must match
 * both the value and the stamp it observed, so A's CAS with stamp 0 fails
 * against the current stamp 2.
 *
 * ## Layout
 *
 * The pair is immutable and lives behind an epoch-managed pointer. A write
 * allocates a fresh pair and swings the pointer, and the old pair is freed
 * once no pinned reader can still see it. Comparing two pair pointers is
 * sufficient because a pointer cannot be recycled while the comparing
 * thread holds its guard.
 */

use crate::core::sync::backoff::Backoff;
use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use std::fmt;
use std::sync::atomic::Ordering;

/// Immutable (value, stamp) snapshot
struct Pair<T> {
    value: T,
    stamp: u64,
}

/// Value paired with a monotonically increasing stamp
///
/// # Example
///
/// ```
/// use lockfree_prims::core::sync::StampedCell;
///
/// let cell = StampedCell::new(10, 0);
/// let (value, stamp) = cell.get();
///
/// assert!(cell.compare_and_swap(&value, 20, stamp, stamp + 1));
/// assert!(cell.compare_and_swap(&20, 10, 1, 2));
///
/// // Same value as first observed, but the stamp moved on
/// assert!(!cell.compare_and_swap(&value, 99, stamp, stamp + 1));
/// ```
pub struct StampedCell<T> {
    current: Atomic<Pair<T>>,
}

impl<T> StampedCell<T> {
    pub fn new(value: T, stamp: u64) -> Self {
        Self {
            current: Atomic::new(Pair { value, stamp }),
        }
    }

    /// Current stamp
    #[inline]
    pub fn stamp(&self) -> u64 {
        let guard = epoch::pin();
        let pair = self.current.load(Ordering::Acquire, &guard);
        // Safety: never null after construction; the guard keeps it alive
        unsafe { pair.deref().stamp }
    }

    /// Install `(new_value, new_stamp)` iff the current pair is
    /// `(expected_value, expected_stamp)`
    ///
    /// `new_stamp` should be strictly greater than `expected_stamp`; reusing
    /// a stamp gives up the ABA protection.
    pub fn compare_and_swap(
        &self,
        expected_value: &T,
        new_value: T,
        expected_stamp: u64,
        new_stamp: u64,
    ) -> bool
    where
        T: PartialEq,
    {
        debug_assert!(
            new_stamp > expected_stamp,
            "stamp must advance: {} -> {}",
            expected_stamp,
            new_stamp
        );

        let guard = epoch::pin();
        let current = self.current.load(Ordering::Acquire, &guard);
        // Safety: never null after construction; the guard keeps it alive
        let pair = unsafe { current.deref() };

        if pair.stamp != expected_stamp || pair.value != *expected_value {
            return false;
        }

        self.install(
            current,
            Owned::new(Pair {
                value: new_value,
                stamp: new_stamp,
            }),
            &guard,
        )
    }

    /// Advance the stamp iff the current value is `expected_value`
    pub fn attempt_stamp(&self, expected_value: &T, new_stamp: u64) -> bool
    where
        T: PartialEq + Clone,
    {
        let guard = epoch::pin();
        let current = self.current.load(Ordering::Acquire, &guard);
        // Safety: never null after construction; the guard keeps it alive
        let pair = unsafe { current.deref() };

        if pair.value != *expected_value {
            return false;
        }
        if pair.stamp == new_stamp {
            return true;
        }

        self.install(
            current,
            Owned::new(Pair {
                value: pair.value.clone(),
                stamp: new_stamp,
            }),
            &guard,
        )
    }

    /// Unconditionally publish a new pair
    pub fn set(&self, value: T, stamp: u64) {
        let guard = epoch::pin();
        let old = self
            .current
            .swap(Owned::new(Pair { value, stamp }), Ordering::AcqRel, &guard);
        // Safety: old is unlinked and only reachable by pinned readers
        unsafe {
            guard.defer_destroy(old);
        }
    }

    /// Replace the value with `f(current)` and bump the stamp by one
    ///
    /// Retries until the CAS lands and returns the installed pair. `f` may
    /// run several times under contention.
    pub fn update<F>(&self, mut f: F) -> (T, u64)
    where
        T: Clone,
        F: FnMut(&T) -> T,
    {
        let backoff = Backoff::new();
        let guard = epoch::pin();

        loop {
            let current = self.current.load(Ordering::Acquire, &guard);
            // Safety: never null after construction; the guard keeps it alive
            let pair = unsafe { current.deref() };

            let value = f(&pair.value);
            let stamp = pair.stamp.wrapping_add(1);
            let next = Owned::new(Pair {
                value: value.clone(),
                stamp,
            });

            if self.install(current, next, &guard) {
                return (value, stamp);
            }
            backoff.snooze();
        }
    }

    /// Swing the pointer from `current` to `next`, retiring `current`
    fn install(
        &self,
        current: Shared<'_, Pair<T>>,
        next: Owned<Pair<T>>,
        guard: &epoch::Guard,
    ) -> bool {
        match self.current.compare_exchange(
            current,
            next,
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(_) => {
                // Safety: current is unlinked and only reachable by pinned readers
                unsafe {
                    guard.defer_destroy(current);
                }
                true
            }
            Err(_) => false,
        }
    }
}

impl<T: Clone> StampedCell<T> {
    /// Atomic read of the pair as one unit
    pub fn get(&self) -> (T, u64) {
        let guard = epoch::pin();
        let pair = self.current.load(Ordering::Acquire, &guard);
        // Safety: never null after construction; the guard keeps it alive
        let pair = unsafe { pair.deref() };
        (pair.value.clone(), pair.stamp)
    }

    /// Current value
    #[inline]
    pub fn value(&self) -> T {
        self.get().0
    }
}

impl<T: Default> Default for StampedCell<T> {
    fn default() -> Self {
        Self::new(T::default(), 0)
    }
}

impl<T: fmt::Debug> fmt::Debug for StampedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = epoch::pin();
        let pair = self.current.load(Ordering::Acquire, &guard);
        // Safety: never null after construction; the guard keeps it alive
        let pair = unsafe { pair.deref() };
        f.debug_struct("StampedCell")
            .field("value", &pair.value)
            .field("stamp", &pair.stamp)
            .finish()
    }
}

impl<T> Drop for StampedCell<T> {
    fn drop(&mut self) {
        // Safety: &mut self means no other thread can reach the pair
        unsafe {
            let guard = epoch::unprotected();
            let pair = self.current.load(Ordering::Relaxed, guard);
            drop(pair.into_owned());
        }
    }
}

// Safety: pairs are shared immutably across threads and dropped on whichever
// thread advances the epoch
unsafe impl<T: Send + Sync> Send for StampedCell<T> {}
unsafe impl<T: Send + Sync> Sync for StampedCell<T> {}
