/*!
 * Lock-Free Synchronization Primitives
 *
 * Non-blocking building blocks; every mutation is a CAS, never a lock:
 * - Atomic cell for single-word load/store/CAS
 * - Stamped cell for ABA-safe CAS on (value, stamp) pairs
 * - Treiber stack with epoch-based node reclamation
 * - Striped counter for contended accumulation
 */

mod atomic_cell;
mod stack;
mod stamped;
mod striped_counter;

// Re-export public API
pub use atomic_cell::{AtomicCell, AtomicWord};
pub use stack::LockFreeStack;
pub use stamped::StampedCell;
pub use striped_counter::StripedCounter;
