/*!
 * Synchronization Management
 *
 * CPU-topology-aware bounds for striped data structures
 */

mod shard_manager;

// Re-export public API
pub use shard_manager::ShardManager;
