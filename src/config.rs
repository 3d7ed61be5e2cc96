//! Engine configuration
//!
//! A plain owned struct holding every tunable the engine recognizes.
//! Components receive it by reference at construction; there is no
//! process-wide mutable configuration state.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Fixed block size in bytes. The unit of transfer between worker, cache,
/// and backing store.
pub const BLOCK_SIZE: usize = 4096;

/// Configuration for the engine and all of its components
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker cores (threads)
    pub cores: usize,

    /// Per-core segment size in MiB
    pub segment_mb: u64,

    /// Ring log size in MiB
    pub cache_mb: u64,

    /// Page cache capacity in entries
    pub max_cache_entries: usize,

    /// Load-imbalance threshold for migration (>= 1)
    pub migration_threshold: usize,

    /// Lower bound for the prior-ratio level selector
    pub compression_min_level: i32,

    /// Upper bound for the prior-ratio level selector
    pub compression_max_level: i32,

    /// Ratio cutoff between "compressible" and "not" (0 < x < 1)
    pub adaptive_threshold: f64,

    /// Path of the backing file
    pub storage_path: PathBuf,

    /// Queue depth above which a core is considered loaded
    pub load_threshold: usize,

    /// Delay between iterations when loaded
    pub high_load_delay: Duration,

    /// Delay between iterations when not loaded (at the load-check interval)
    pub low_load_delay: Duration,

    /// Base delay between ordinary iterations
    pub base_load_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cores: 4,
            segment_mb: 512,
            cache_mb: 128,
            max_cache_entries: 32768,
            migration_threshold: 5,
            compression_min_level: 1,
            compression_max_level: 5,
            adaptive_threshold: 0.8,
            storage_path: PathBuf::from("./storage_swap.img"),
            load_threshold: 50,
            high_load_delay: Duration::from_nanos(20_000_000),
            low_load_delay: Duration::from_nanos(10_000_000),
            base_load_delay: Duration::from_nanos(5_000_000),
        }
    }
}

impl EngineConfig {
    /// Per-core segment size in bytes
    pub fn segment_bytes(&self) -> u64 {
        self.segment_mb * 1024 * 1024
    }

    /// Total backing-file size in bytes across all cores
    pub fn total_bytes(&self) -> u64 {
        self.segment_bytes() * self.cores as u64
    }

    /// Ring log size in bytes
    pub fn ring_bytes(&self) -> usize {
        (self.cache_mb * 1024 * 1024) as usize
    }

    /// Blocks per core segment
    pub fn blocks_per_segment(&self) -> u64 {
        self.segment_bytes() / BLOCK_SIZE as u64
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cores == 0 {
            return Err(Error::InvalidParameter("cores must be >= 1".into()));
        }
        if self.segment_bytes() < BLOCK_SIZE as u64 {
            return Err(Error::InvalidParameter(
                "segment must hold at least one block".into(),
            ));
        }
        if self.max_cache_entries == 0 {
            return Err(Error::InvalidParameter(
                "max_cache_entries must be >= 1".into(),
            ));
        }
        if self.migration_threshold == 0 {
            return Err(Error::InvalidParameter(
                "migration_threshold must be >= 1".into(),
            ));
        }
        if self.compression_min_level < 1 || self.compression_max_level > 22 {
            return Err(Error::InvalidParameter(
                "compression levels must lie in 1..=22".into(),
            ));
        }
        if self.compression_min_level > self.compression_max_level {
            return Err(Error::InvalidParameter(
                "compression_min_level must not exceed compression_max_level".into(),
            ));
        }
        if !(self.adaptive_threshold > 0.0 && self.adaptive_threshold < 1.0) {
            return Err(Error::InvalidParameter(
                "adaptive_threshold must lie in (0, 1)".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_bytes(), 4 * 512 * 1024 * 1024);
        assert_eq!(config.blocks_per_segment(), 512 * 1024 * 1024 / 4096);
    }

    #[test]
    fn test_zero_cores_rejected() {
        let config = EngineConfig {
            cores: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::InvalidParameter(_)));
    }

    #[test]
    fn test_inverted_levels_rejected() {
        let config = EngineConfig {
            compression_min_level: 9,
            compression_max_level: 3,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::InvalidParameter(_)));
    }

    #[test]
    fn test_threshold_bounds() {
        let config = EngineConfig {
            adaptive_threshold: 1.0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::InvalidParameter(_)));
    }
}
