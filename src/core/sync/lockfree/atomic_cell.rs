/*!
 * Atomic Cell
 *
 * Single-word atomic location with load, store and compare-and-swap.
 * Every other primitive in this module is built on top of it.
 *
 * # Memory Ordering
 *
 * - `load`: Acquire
 * - `store`: Release
 * - `swap` / CAS success: AcqRel, CAS failure: Acquire
 *
 * A load therefore observes everything the thread that stored the value had
 * written before its store. Reads never tear: only whole values written by
 * `new`, `store` or a successful CAS are ever observed.
 */

use crate::core::sync::backoff::Backoff;
use std::fmt;
use std::sync::atomic::{
    AtomicBool, AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicPtr, AtomicU16,
    AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering,
};

/// A machine-word value with a native atomic counterpart
///
/// Comparison in CAS is bit-equality on the word, which for pointers means
/// identity rather than equality of the pointee.
pub trait AtomicWord: Copy + Eq + 'static {
    /// Backing `std::sync::atomic` type
    type Atomic: Send + Sync;

    fn new_atomic(value: Self) -> Self::Atomic;
    fn load(atomic: &Self::Atomic, order: Ordering) -> Self;
    fn store(atomic: &Self::Atomic, value: Self, order: Ordering);
    fn swap(atomic: &Self::Atomic, value: Self, order: Ordering) -> Self;
    fn compare_exchange(
        atomic: &Self::Atomic,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;
    fn into_inner(atomic: Self::Atomic) -> Self;
}

macro_rules! impl_atomic_word {
    ($($value:ty => $atomic:ty),* $(,)?) => {
        $(
            impl AtomicWord for $value {
                type Atomic = $atomic;

                #[inline(always)]
                fn new_atomic(value: Self) -> Self::Atomic {
                    <$atomic>::new(value)
                }

                #[inline(always)]
                fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
                    atomic.load(order)
                }

                #[inline(always)]
                fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
                    atomic.store(value, order)
                }

                #[inline(always)]
                fn swap(atomic: &Self::Atomic, value: Self, order: Ordering) -> Self {
                    atomic.swap(value, order)
                }

                #[inline(always)]
                fn compare_exchange(
                    atomic: &Self::Atomic,
                    current: Self,
                    new: Self,
                    success: Ordering,
                    failure: Ordering,
                ) -> Result<Self, Self> {
                    atomic.compare_exchange(current, new, success, failure)
                }

                #[inline(always)]
                fn into_inner(atomic: Self::Atomic) -> Self {
                    atomic.into_inner()
                }
            }
        )*
    };
}

impl_atomic_word! {
    bool => AtomicBool,
    i8 => AtomicI8,
    i16 => AtomicI16,
    i32 => AtomicI32,
    i64 => AtomicI64,
    isize => AtomicIsize,
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
}

impl<U: 'static> AtomicWord for *mut U {
    type Atomic = AtomicPtr<U>;

    #[inline(always)]
    fn new_atomic(value: Self) -> Self::Atomic {
        AtomicPtr::new(value)
    }

    #[inline(always)]
    fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
        atomic.load(order)
    }

    #[inline(always)]
    fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
        atomic.store(value, order)
    }

    #[inline(always)]
    fn swap(atomic: &Self::Atomic, value: Self, order: Ordering) -> Self {
        atomic.swap(value, order)
    }

    #[inline(always)]
    fn compare_exchange(
        atomic: &Self::Atomic,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self> {
        atomic.compare_exchange(current, new, success, failure)
    }

    #[inline(always)]
    fn into_inner(atomic: Self::Atomic) -> Self {
        atomic.into_inner()
    }
}

/// Atomic single-word cell
///
/// # Example
///
/// ```
/// use lockfree_prims::core::sync::AtomicCell;
///
/// let cell = AtomicCell::new(5i64);
/// assert!(cell.compare_and_swap(5, 6));
/// assert!(!cell.compare_and_swap(5, 7));
/// assert_eq!(cell.load(), 6);
/// ```
#[repr(transparent)]
pub struct AtomicCell<T: AtomicWord> {
    inner: T::Atomic,
}

impl<T: AtomicWord> AtomicCell<T> {
    #[inline]
    pub fn new(value: T) -> Self {
        Self {
            inner: T::new_atomic(value),
        }
    }

    /// Atomic read (Acquire)
    #[inline(always)]
    pub fn load(&self) -> T {
        T::load(&self.inner, Ordering::Acquire)
    }

    /// Atomic write (Release)
    #[inline(always)]
    pub fn store(&self, value: T) {
        T::store(&self.inner, value, Ordering::Release)
    }

    /// Replace the value, returning the previous one
    #[inline]
    pub fn swap(&self, value: T) -> T {
        T::swap(&self.inner, value, Ordering::AcqRel)
    }

    /// Install `new` iff the current value is bit-equal to `expected`
    ///
    /// Returns whether the swap happened. A `false` result only means another
    /// write got there first.
    #[inline]
    pub fn compare_and_swap(&self, expected: T, new: T) -> bool {
        self.compare_exchange(expected, new).is_ok()
    }

    /// Like [`compare_and_swap`](Self::compare_and_swap), but reports the
    /// value that was witnessed: `Ok(previous)` on success, `Err(current)`
    /// on failure.
    #[inline]
    pub fn compare_exchange(&self, expected: T, new: T) -> Result<T, T> {
        T::compare_exchange(
            &self.inner,
            expected,
            new,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
    }

    /// Apply `f` in a CAS loop until it lands; returns the previous value
    ///
    /// `f` may run several times under contention, so it must be pure.
    pub fn fetch_update<F>(&self, mut f: F) -> T
    where
        F: FnMut(T) -> T,
    {
        let backoff = Backoff::new();
        let mut current = self.load();
        loop {
            match self.compare_exchange(current, f(current)) {
                Ok(previous) => return previous,
                Err(witnessed) => {
                    current = witnessed;
                    backoff.snooze();
                }
            }
        }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        T::into_inner(self.inner)
    }
}

impl<T: AtomicWord + Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: AtomicWord + fmt::Debug> fmt::Debug for AtomicCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicCell")
            .field("value", &self.load())
            .finish()
    }
}

impl<T: AtomicWord> From<T> for AtomicCell<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
