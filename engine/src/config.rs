//! Engine configuration.
//!
//! Configuration arrives as a semicolon-separated `name=value` string, the
//! format the front-end passes to `initialize`. Unknown names and
//! malformed values are rejected rather than ignored.

use cache_core::{EngineError, EngineResult};
use cache_slab::SlabConfig;

/// Default initial hash-table power (2^16 buckets).
pub const DEFAULT_HASH_POWER: u8 = 16;

/// Parsed engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memory budget in bytes.
    pub cache_size: usize,
    /// Reserve the whole budget at initialization.
    pub preallocate: bool,
    /// Slab growth factor.
    pub factor: f64,
    /// Base chunk size of the smallest class.
    pub chunk_size: usize,
    /// Maximum value size in bytes.
    pub item_size_max: usize,
    /// Evict on memory pressure; with this off the engine reports
    /// out-of-memory instead.
    pub eviction: bool,
    /// Whether items carry a caller-visible CAS stamp.
    pub cas_enabled: bool,
    /// Diagnostic level; gates the chattier log sites.
    pub verbose: u32,
    /// Initial hash-table power of two.
    pub hash_power: u8,
    /// Defer reclamation to the maintenance thread when every eviction
    /// candidate is pinned, instead of failing synchronously.
    pub defer_reclaim: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_size: cache_slab::DEFAULT_CACHE_SIZE,
            preallocate: false,
            factor: cache_slab::DEFAULT_GROWTH_FACTOR,
            chunk_size: cache_slab::DEFAULT_CHUNK_SIZE,
            item_size_max: cache_slab::DEFAULT_ITEM_SIZE_MAX,
            eviction: true,
            cas_enabled: true,
            verbose: 0,
            hash_power: DEFAULT_HASH_POWER,
            defer_reclaim: true,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration string.
    ///
    /// The empty string yields the defaults. Pairs are separated by `;`,
    /// names and values by `=`. Empty pairs are tolerated so trailing
    /// semicolons are fine.
    pub fn parse(config_str: &str) -> EngineResult<Self> {
        let mut config = Self::default();

        for pair in config_str.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair
                .split_once('=')
                .ok_or(EngineError::InvalidArguments)?;
            let name = name.trim();
            let value = value.trim();

            match name {
                "cache_size" => config.cache_size = parse_usize(value)?,
                "preallocate" => config.preallocate = parse_bool(value)?,
                "factor" => config.factor = parse_f64(value)?,
                "chunk_size" => config.chunk_size = parse_usize(value)?,
                "item_size_max" => config.item_size_max = parse_usize(value)?,
                "eviction" => config.eviction = parse_bool(value)?,
                "cas_enabled" => config.cas_enabled = parse_bool(value)?,
                "verbose" => config.verbose = parse_usize(value)? as u32,
                "hash_power" => config.hash_power = parse_usize(value)? as u8,
                "defer_reclaim" => config.defer_reclaim = parse_bool(value)?,
                _ => return Err(EngineError::InvalidArguments),
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.cache_size == 0
            || self.chunk_size == 0
            || self.item_size_max == 0
            || !(self.factor > 1.0 && self.factor.is_finite())
            || !(4..=28).contains(&self.hash_power)
        {
            return Err(EngineError::InvalidArguments);
        }
        Ok(())
    }

    /// The slab geometry this configuration describes.
    pub fn slab_config(&self) -> SlabConfig {
        SlabConfig {
            cache_size: self.cache_size,
            chunk_size: self.chunk_size,
            growth_factor: self.factor,
            item_size_max: self.item_size_max,
            preallocate: self.preallocate,
        }
    }
}

fn parse_usize(value: &str) -> EngineResult<usize> {
    value.parse().map_err(|_| EngineError::InvalidArguments)
}

fn parse_f64(value: &str) -> EngineResult<f64> {
    value.parse().map_err(|_| EngineError::InvalidArguments)
}

fn parse_bool(value: &str) -> EngineResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(EngineError::InvalidArguments),
    }
}
