/*!
 * Stripe Configuration
 *
 * CPU-topology-aware bounds for striped data structures. Adding stripes
 * beyond the number of threads that can actually run at once only costs
 * memory and makes reads slower, so the ceiling tracks the CPU count.
 *
 * # Design: Pure Functions Over Singleton
 *
 * `available_parallelism` is cheap and the results are tiny, so these are
 * plain functions rather than a lazily-initialised global.
 */

/// Hardware-aware stripe bounds (pure functions)
pub struct ShardManager;

impl ShardManager {
    /// Logical CPU count, falling back to 8 if detection fails
    #[inline]
    pub fn cpu_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or_else(|_| {
                log::warn!("Failed to detect CPU count, defaulting to 8");
                8
            })
    }

    /// Cache line size assumed for padding
    ///
    /// 64 bytes on x86-64, ARM64 and RISC-V. Padded types align to twice
    /// this because adjacent-line prefetchers pull lines in pairs.
    #[inline(always)]
    pub const fn cache_line_size() -> usize {
        64
    }

    /// Maximum stripe count for a counter on this host
    ///
    /// Power of two (index via `hash & (n - 1)`), at least 2 so a contended
    /// counter on a single-CPU host can still leave its base cell.
    #[inline]
    pub fn stripe_ceiling() -> usize {
        Self::cpu_count().next_power_of_two().max(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_ceiling() {
        let ceiling = ShardManager::stripe_ceiling();
        assert!(ceiling.is_power_of_two(), "Ceiling must be power of 2");
        assert!(ceiling >= 2);
        assert!(ceiling >= ShardManager::cpu_count());
    }

    #[test]
    fn test_consistency() {
        assert_eq!(ShardManager::cpu_count(), ShardManager::cpu_count());
        assert_eq!(
            ShardManager::cache_line_size(),
            ShardManager::cache_line_size()
        );
    }
}
