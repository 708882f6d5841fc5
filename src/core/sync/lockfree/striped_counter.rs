/*!
 * Striped Counter
 *
 * High-throughput counter that spreads contended updates across padded cells.
 *
 * ## Problem
 *
 * A single atomic counter bounces its cache line between every core that
 * updates it:
 * ```text
 * Core 1: CAS(base)  -> line moves to Core 1
 * Core 2: CAS(base)  -> line moves to Core 2, Core 1's next CAS fails
 * ```
 *
 * ## Solution
 *
 * Start with a plain `base` cell. The first time a CAS on it fails, install
 * a table of cells and let each thread update the cell its probe hashes to:
 * ```text
 * Core 1: CAS(cells[1])
 * Core 2: CAS(cells[0])   -> no shared line, no failed CAS
 * sum() = base + cells[0] + cells[1]
 * ```
 *
 * When two threads keep colliding on one cell, the loser first rehashes its
 * probe and, if it collides again, doubles the table, up to the stripe
 * ceiling. A counter that is never contended never allocates a table.
 *
 * ## Guarantees
 *
 * - After all writers are joined, `sum()` is exactly the sum of all deltas
 *   (wrapping, like any two's-complement accumulator).
 * - `sum()` and `reset()` touch the cells one at a time; concurrent `add`
 *   calls may be missed by a sum, or lost/double counted across a reset.
 *   Use for statistics, never for exact quotas.
 *
 * ## Resizing
 *
 * A `resizing` flag is taken with a single CAS around table creation and
 * doubling. Nobody waits on it: a thread that cannot take it rehashes or
 * falls back to `base`. Existing cells are shared between the old and new
 * table, so no update can land in a cell that the new table forgets. The
 * old table itself is retired through crossbeam-epoch.
 */

use super::atomic_cell::AtomicCell;
use crate::core::sync::backoff::Backoff;
use crate::core::sync::config::{BackoffConfig, CounterConfig};
use crate::core::sync::management::ShardManager;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use std::cell::Cell as ThreadCell;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Accumulator cell padded to its own pair of cache lines
#[repr(align(128))]
#[derive(Default)]
struct Cell {
    value: AtomicCell<i64>,
}

impl Cell {
    fn new(value: i64) -> Self {
        Self {
            value: AtomicCell::new(value),
        }
    }

    /// One CAS attempt; false means another thread updated the cell first
    #[inline(always)]
    fn try_add(&self, delta: i64) -> bool {
        let current = self.value.load();
        self.value.compare_and_swap(current, current.wrapping_add(delta))
    }
}

/// Cell table; cells are shared with the table it replaced
struct Table {
    cells: Box<[Arc<Cell>]>,
}

impl Table {
    #[inline(always)]
    fn cell(&self, probe: u32) -> &Cell {
        &self.cells[probe as usize & (self.cells.len() - 1)]
    }
}

thread_local! {
    /// Per-thread hash used to pick a cell; 0 means "not yet seeded"
    static PROBE: ThreadCell<u32> = const { ThreadCell::new(0) };
}

/// Current thread's probe, seeding it on first use
#[inline]
fn probe() -> u32 {
    PROBE.with(|probe| {
        let mut h = probe.get();
        if h == 0 {
            let seed =
                BuildHasher::hash_one(&ahash::RandomState::new(), std::thread::current().id());
            h = (seed as u32) | 1;
            probe.set(h);
        }
        h
    })
}

/// Move the current thread to a different cell (xorshift step)
#[inline]
fn advance_probe(mut h: u32) -> u32 {
    h ^= h << 13;
    h ^= h >> 17;
    h ^= h << 5;
    PROBE.with(|probe| probe.set(h));
    h
}

/// Contention-adaptive striped counter
///
/// # Performance
///
/// - **Uncontended**: one CAS on `base`, no allocation
/// - **Contended**: one CAS on a thread-private-ish cell
/// - **Reads**: O(stripes) loads
///
/// # Example
///
/// ```
/// use lockfree_prims::core::sync::StripedCounter;
///
/// let requests = StripedCounter::new();
/// requests.increment();
/// requests.add(41);
/// assert_eq!(requests.sum(), 42);
///
/// requests.reset();
/// assert_eq!(requests.sum(), 0);
/// ```
pub struct StripedCounter {
    base: Cell,
    table: Atomic<Table>,
    /// Try-lock around table creation and doubling
    resizing: AtomicCell<bool>,
    resize_events: AtomicCell<u64>,
    max_stripes: usize,
    backoff: BackoffConfig,
}

impl StripedCounter {
    /// Create a counter with the CPU-derived stripe ceiling
    pub fn new() -> Self {
        Self::with_config(CounterConfig::default())
    }

    /// Create a counter with explicit tuning
    ///
    /// A ceiling below 2 or not a power of two is rounded up to the next
    /// power of two >= 2, and the backoff limits are clamped.
    pub fn with_config(config: CounterConfig) -> Self {
        Self {
            base: Cell::default(),
            table: Atomic::null(),
            resizing: AtomicCell::new(false),
            resize_events: AtomicCell::new(0),
            max_stripes: config
                .normalized_max_stripes()
                .unwrap_or_else(ShardManager::stripe_ceiling),
            backoff: config.backoff.clamped(),
        }
    }

    /// Add `delta` to the counter
    #[inline]
    pub fn add(&self, delta: i64) {
        let guard = epoch::pin();
        let table = self.table.load(Ordering::Acquire, &guard);

        // Safety: a non-null table stays alive while the guard is pinned
        match unsafe { table.as_ref() } {
            None => {
                if self.base.try_add(delta) {
                    return;
                }
                self.accumulate(delta, true, &guard);
            }
            Some(table) => {
                if table.cell(probe()).try_add(delta) {
                    return;
                }
                self.accumulate(delta, false, &guard);
            }
        }
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    #[inline]
    pub fn decrement(&self) {
        self.add(-1);
    }

    /// Best-effort total: `base + Σ cells`
    ///
    /// Exact once all writers have finished; otherwise may miss updates
    /// racing with the read.
    pub fn sum(&self) -> i64 {
        let guard = epoch::pin();
        let mut total = self.base.value.load();
        if let Some(table) = unsafe { self.table.load(Ordering::Acquire, &guard).as_ref() } {
            for cell in table.cells.iter() {
                total = total.wrapping_add(cell.value.load());
            }
        }
        total
    }

    /// Zero the base and every cell; not atomic as a whole
    pub fn reset(&self) {
        let guard = epoch::pin();
        self.base.value.store(0);
        if let Some(table) = unsafe { self.table.load(Ordering::Acquire, &guard).as_ref() } {
            for cell in table.cells.iter() {
                cell.value.store(0);
            }
        }
    }

    /// Sum while zeroing each cell; same caveats as `sum` and `reset`
    ///
    /// Each cell is swapped, so an update is either included in the returned
    /// total or left in the counter, never both.
    pub fn sum_then_reset(&self) -> i64 {
        let guard = epoch::pin();
        let mut total = self.base.value.swap(0);
        if let Some(table) = unsafe { self.table.load(Ordering::Acquire, &guard).as_ref() } {
            for cell in table.cells.iter() {
                total = total.wrapping_add(cell.value.swap(0));
            }
        }
        total
    }

    /// Current number of cells; 0 while only `base` is in use
    pub fn stripes(&self) -> usize {
        let guard = epoch::pin();
        unsafe { self.table.load(Ordering::Acquire, &guard).as_ref() }
            .map_or(0, |table| table.cells.len())
    }

    /// Stripe ceiling for this counter
    #[inline]
    pub fn max_stripes(&self) -> usize {
        self.max_stripes
    }

    /// How many times the table has been installed or doubled
    #[inline]
    pub fn resize_events(&self) -> u64 {
        self.resize_events.load()
    }

    /// Contended slow path
    ///
    /// `was_uncontended` is false when the caller already failed a CAS on
    /// its current cell, in which case the first move is a rehash.
    #[cold]
    fn accumulate(&self, delta: i64, mut was_uncontended: bool, guard: &Guard) {
        let backoff = Backoff::with_config(self.backoff);
        let mut h = probe();
        let mut collide = false;

        loop {
            let current = self.table.load(Ordering::Acquire, guard);

            // Safety: a non-null table stays alive while the guard is pinned
            if let Some(table) = unsafe { current.as_ref() } {
                if !was_uncontended {
                    was_uncontended = true;
                } else if table.cell(h).try_add(delta) {
                    return;
                } else if table.cells.len() >= self.max_stripes {
                    // At the ceiling, spreading further is not possible
                    collide = false;
                    backoff.snooze();
                } else if self.table.load(Ordering::Acquire, guard) != current {
                    collide = false;
                } else if !collide {
                    collide = true;
                } else if self.try_grow(current, guard) {
                    collide = false;
                    continue;
                }
                h = advance_probe(h);
            } else if self.try_install(delta, h, guard) {
                return;
            } else if self.base.try_add(delta) {
                return;
            } else {
                backoff.snooze();
            }
        }
    }

    /// Install the first table with `delta` already applied to this
    /// thread's cell; false if the table exists or the flag is held
    fn try_install(&self, delta: i64, h: u32, guard: &Guard) -> bool {
        if !self.resizing.compare_and_swap(false, true) {
            return false;
        }

        let mut installed = false;
        if self.table.load(Ordering::Acquire, guard).is_null() {
            let mut cells: Vec<Arc<Cell>> = (0..2).map(|_| Arc::new(Cell::default())).collect();
            cells[(h & 1) as usize] = Arc::new(Cell::new(delta));
            self.table.store(
                Owned::new(Table {
                    cells: cells.into_boxed_slice(),
                }),
                Ordering::Release,
            );
            self.record_resize(2);
            installed = true;
        }

        self.resizing.store(false);
        installed
    }

    /// Double `current` if it is still the live table and below the ceiling
    ///
    /// Returns true if this call or a concurrent one replaced `current`.
    fn try_grow(&self, current: Shared<'_, Table>, guard: &Guard) -> bool {
        if !self.resizing.compare_and_swap(false, true) {
            return false;
        }

        let live = self.table.load(Ordering::Acquire, guard);
        let mut grown = live != current;
        if !grown {
            // Safety: current is the live table and the guard is pinned
            let table = unsafe { current.deref() };
            let len = table.cells.len();
            if len < self.max_stripes {
                let cells: Vec<Arc<Cell>> = table
                    .cells
                    .iter()
                    .cloned()
                    .chain((len..len * 2).map(|_| Arc::new(Cell::default())))
                    .collect();
                self.table.store(
                    Owned::new(Table {
                        cells: cells.into_boxed_slice(),
                    }),
                    Ordering::Release,
                );
                // Safety: unlinked above; cells live on through the new table
                unsafe {
                    guard.defer_destroy(current);
                }
                self.record_resize(len * 2);
                grown = true;
            }
        }

        self.resizing.store(false);
        grown
    }

    fn record_resize(&self, stripes: usize) {
        let events = self.resize_events.fetch_update(|n| n + 1) + 1;
        debug!(
            stripes,
            max_stripes = self.max_stripes,
            resize_events = events,
            "striped counter table resized"
        );
    }
}

impl Default for StripedCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StripedCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripedCounter")
            .field("sum", &self.sum())
            .field("stripes", &self.stripes())
            .field("max_stripes", &self.max_stripes)
            .finish()
    }
}

impl fmt::Display for StripedCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sum())
    }
}

impl Drop for StripedCounter {
    fn drop(&mut self) {
        // Safety: &mut self means no other thread can reach the table
        unsafe {
            let guard = epoch::unprotected();
            let table = self.table.load(Ordering::Relaxed, guard);
            if !table.is_null() {
                drop(table.into_owned());
            }
        }
    }
}
