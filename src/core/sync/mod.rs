/*!
 * Synchronization Primitives
 *
 * Lock-free primitives for multi-threaded hot paths:
 * - `AtomicCell` / `StampedCell` for publishing values with CAS
 * - `LockFreeStack` for LIFO hand-off between threads
 * - `StripedCounter` for statistics under heavy write contention
 *
 * # Architecture
 *
 * Every retry loop shares one `Backoff` policy (spin, then yield), tuned
 * through `BackoffConfig`. Nothing in this module blocks on a lock or a
 * condition variable.
 *
 * # Use Cases
 *
 * - **Work hand-off**: schedulers pushing and popping work items
 * - **Rate limiting**: per-endpoint request counters
 * - **Hot config swap**: publishing immutable snapshots with a version stamp
 */

mod backoff;
mod config;
pub mod lockfree;
pub mod management;

pub use backoff::Backoff;
pub use config::{BackoffConfig, CounterConfig};
pub use lockfree::{AtomicCell, AtomicWord, LockFreeStack, StampedCell, StripedCounter};
pub use management::ShardManager;
