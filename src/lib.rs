/*!
 * Lock-Free Primitives Library
 *
 * Non-blocking concurrency primitives: atomic and stamped cells, a Treiber
 * stack with epoch-based reclamation, and a contention-adaptive striped
 * counter.
 */

pub mod core;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{LockFreeError, LockFreeResult, PushError};
pub use crate::core::sync::{
    AtomicCell, AtomicWord, Backoff, BackoffConfig, CounterConfig, LockFreeStack, ShardManager,
    StampedCell, StripedCounter,
};
pub use crate::monitoring::{init_tracing, try_init_tracing};
