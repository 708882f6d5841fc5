/*!
 * Synchronization Configuration
 *
 * Runtime tuning for retry backoff and counter striping
 */

use crate::core::errors::{LockFreeError, LockFreeResult};
use serde::{Deserialize, Serialize};

/// Largest spin exponent accepted; `1 << 16` spins is already far past any useful wait
pub(crate) const MAX_SPIN_LIMIT: u32 = 16;

/// Backoff configuration for CAS retry loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Step after which spinning gives way to yielding (spin count is `2^step`)
    pub spin_limit: u32,
    /// Step after which the backoff reports itself completed
    pub yield_limit: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            spin_limit: 6,
            yield_limit: 10,
        }
    }
}

impl BackoffConfig {
    /// Short waits expected: spin briefly, yield early
    pub const fn low_latency() -> Self {
        Self {
            spin_limit: 3,
            yield_limit: 6,
        }
    }

    /// Many threads hammering one location: spin longer before yielding
    pub const fn high_contention() -> Self {
        Self {
            spin_limit: 8,
            yield_limit: 14,
        }
    }

    /// Clamp into the range `validate` accepts
    ///
    /// `spin_limit` is capped at 16 and `yield_limit` is raised to at least
    /// `spin_limit`.
    pub fn clamped(self) -> Self {
        let spin_limit = self.spin_limit.min(MAX_SPIN_LIMIT);
        Self {
            spin_limit,
            yield_limit: self.yield_limit.max(spin_limit),
        }
    }

    /// Check the limits are ordered and bounded
    pub fn validate(&self) -> LockFreeResult<()> {
        if self.spin_limit > MAX_SPIN_LIMIT {
            return Err(LockFreeError::InvalidConfig(format!(
                "spin_limit {} exceeds maximum {}",
                self.spin_limit, MAX_SPIN_LIMIT
            )));
        }
        if self.yield_limit < self.spin_limit {
            return Err(LockFreeError::InvalidConfig(format!(
                "yield_limit {} is below spin_limit {}",
                self.yield_limit, self.spin_limit
            )));
        }
        Ok(())
    }
}

/// Striped counter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Stripe ceiling; `None` derives it from the CPU count
    pub max_stripes: Option<usize>,
    /// Backoff used by the per-cell retry loop
    pub backoff: BackoffConfig,
}

impl CounterConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> LockFreeResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LockFreeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Stripe ceiling rounded up to a power of two >= 2, if set
    pub fn normalized_max_stripes(&self) -> Option<usize> {
        const LARGEST: usize = 1 << (usize::BITS - 1);
        self.max_stripes.map(|max| {
            max.max(2)
                .checked_next_power_of_two()
                .unwrap_or(LARGEST)
        })
    }

    /// Check the stripe ceiling and backoff limits
    pub fn validate(&self) -> LockFreeResult<()> {
        if let Some(max) = self.max_stripes {
            if max < 2 || !max.is_power_of_two() {
                return Err(LockFreeError::InvalidConfig(format!(
                    "max_stripes {} must be a power of two >= 2",
                    max
                )));
            }
        }
        self.backoff.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for config in [
            BackoffConfig::default(),
            BackoffConfig::low_latency(),
            BackoffConfig::high_contention(),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
    }

    #[test]
    fn test_backoff_rejects_inverted_limits() {
        let config = BackoffConfig {
            spin_limit: 8,
            yield_limit: 4,
        };
        assert!(matches!(
            config.validate(),
            Err(LockFreeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_clamped_backoff_validates() {
        let config = BackoffConfig {
            spin_limit: 40,
            yield_limit: 3,
        }
        .clamped();

        assert_eq!(config.spin_limit, MAX_SPIN_LIMIT);
        assert_eq!(config.yield_limit, MAX_SPIN_LIMIT);
        assert!(config.validate().is_ok());
        assert_eq!(BackoffConfig::default().clamped(), BackoffConfig::default());
    }

    #[test]
    fn test_normalized_max_stripes() {
        let with = |max| CounterConfig {
            max_stripes: max,
            ..Default::default()
        };

        assert_eq!(with(None).normalized_max_stripes(), None);
        assert_eq!(with(Some(0)).normalized_max_stripes(), Some(2));
        assert_eq!(with(Some(1)).normalized_max_stripes(), Some(2));
        assert_eq!(with(Some(6)).normalized_max_stripes(), Some(8));
        assert_eq!(with(Some(16)).normalized_max_stripes(), Some(16));
    }

    #[test]
    fn test_counter_config_from_json() {
        let config = CounterConfig::from_json(r#"{"max_stripes": 16}"#).unwrap();
        assert_eq!(config.max_stripes, Some(16));
        assert_eq!(config.backoff, BackoffConfig::default());

        assert!(CounterConfig::from_json(r#"{"max_stripes": 12}"#).is_err());
        assert!(CounterConfig::from_json(r#"{"max_stripes": 1}"#).is_err());
        assert!(CounterConfig::from_json("not json").is_err());
    }
}
