//! Configuration Module - collector tuning parameters
//!
//! Carries every tunable the collector and monitor layer read at
//! construction time. Values have conservative fixed defaults; this crate
//! manages a bounded in-process heap rather than the whole address space, so
//! unlike a production JVM-scale sizer it does not probe `/proc/meminfo` or
//! CPU topology to pick defaults.

use crate::error::{GcError, Result};
use std::env;

/// Tuning parameters for a [`crate::Collector`].
///
/// # Examples
///
/// ```rust
/// use vmgc::GcConfig;
///
/// let config = GcConfig::default();
/// assert!(config.validate().is_ok());
///
/// let low_latency = GcConfig {
///     verbose: 1,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Number of buckets in the monitor's address-keyed hash table.
    /// Default: 64, matching the reference implementation.
    pub max_lock_buckets: usize,

    /// Numerator of the liveness ratio used by the collector's skip
    /// heuristic: a non-forced cycle is skipped when
    /// `liveness_numerator * allocmem < liveness_denominator * totalmem`.
    pub liveness_numerator: u64,

    /// Denominator of the liveness ratio. Default 1:4 (numerator 4,
    /// denominator 1), matching the reference's literal `4*allocmem <
    /// totalmem` inequality.
    pub liveness_denominator: u64,

    /// Soft byte budget for the heap. Once `heap_total` reaches this value
    /// the skip heuristic's liveness gate no longer applies and every
    /// triggered cycle runs.
    pub heap_limit_bytes: usize,

    /// Number of units placed in each freshly allocated heap block.
    pub heap_block_capacity: usize,

    /// Hard ceiling on total heap bytes the in-crate heap adapter will
    /// commit; allocations beyond this fail with `OutOfMemory`.
    pub max_heap_bytes: usize,

    /// Verbose-GC level: 0 = silent, 1 = one line per cycle, 2 = additional
    /// per-class live object/byte counts.
    pub verbose: u8,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_lock_buckets: 64,
            liveness_numerator: 4,
            liveness_denominator: 1,
            heap_limit_bytes: 64 * 1024 * 1024,
            heap_block_capacity: 256,
            max_heap_bytes: 512 * 1024 * 1024,
            verbose: 0,
        }
    }
}

impl GcConfig {
    /// Validate the configuration, rejecting degenerate values that would
    /// make the bucket table or block allocator meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_lock_buckets == 0 {
            return Err(GcError::Configuration(
                "max_lock_buckets must be non-zero".into(),
            ));
        }
        if self.liveness_denominator == 0 {
            return Err(GcError::Configuration(
                "liveness_denominator must be non-zero".into(),
            ));
        }
        if self.heap_block_capacity == 0 {
            return Err(GcError::Configuration(
                "heap_block_capacity must be non-zero".into(),
            ));
        }
        if self.max_heap_bytes == 0 {
            return Err(GcError::Configuration(
                "max_heap_bytes must be non-zero".into(),
            ));
        }
        if self.verbose > 2 {
            return Err(GcError::Configuration(format!(
                "verbose level {} is out of range 0..=2",
                self.verbose
            )));
        }
        Ok(())
    }

    /// Overlay environment variables onto the defaults:
    /// `GC_MAX_HEAP_BYTES`, `GC_HEAP_LIMIT_BYTES`, `GC_MAX_LOCK_BUCKETS`,
    /// `GC_VERBOSE`. Unset or unparsable variables are left at their default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("GC_MAX_HEAP_BYTES") {
            if let Ok(v) = v.parse() {
                config.max_heap_bytes = v;
            }
        }
        if let Ok(v) = env::var("GC_HEAP_LIMIT_BYTES") {
            if let Ok(v) = v.parse() {
                config.heap_limit_bytes = v;
            }
        }
        if let Ok(v) = env::var("GC_MAX_LOCK_BUCKETS") {
            if let Ok(v) = v.parse() {
                config.max_lock_buckets = v;
            }
        }
        if let Ok(v) = env::var("GC_VERBOSE") {
            if let Ok(v) = v.parse() {
                config.verbose = v;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(GcConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_buckets() {
        let config = GcConfig {
            max_lock_buckets: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_liveness_denominator() {
        let config = GcConfig {
            liveness_denominator: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_verbose() {
        let config = GcConfig {
            verbose: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
