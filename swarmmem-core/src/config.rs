//! Configuration types for the swarm memory engine.
//!
//! One enumerated configuration record — `SwarmMemConfig` — with every
//! recognized option spelled out as a field. No dynamic option bag: see
//! `DESIGN.md` for why.

use crate::error::SwarmMemError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Master configuration struct. All values are required — `from_env()`
/// fills unset variables with the documented defaults, it does not leave
/// fields unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmMemConfig {
    /// Path to the SQLite database file backing the persistent store.
    pub db_path: String,
    /// `PRAGMA busy_timeout` applied to the writer connection.
    #[serde(with = "duration_millis")]
    pub busy_timeout: Duration,
    /// Size of the reader connection pool.
    pub reader_pool_size: u32,

    /// Minimum plaintext size before compression is attempted.
    pub compression_threshold_bytes: u64,
    /// Combined `key` + `namespace` length limit enforced by `put`.
    pub max_key_namespace_bytes: usize,

    /// L1 in-process cache capacity, by entry count.
    pub l1_max_entries: usize,
    /// L1 in-process cache capacity, by running byte budget.
    pub l1_max_bytes: u64,
    /// Path to the LMDB environment backing the L2 shared cache tier.
    /// `None` disables L2; the cache degrades to L1+L3.
    pub l2_lmdb_path: Option<String>,
    /// L2 entry TTL — the upper bound on staleness if pub/sub invalidation
    /// is temporarily unavailable.
    #[serde(with = "duration_secs")]
    pub l2_ttl: Duration,

    /// ACL decision cache capacity (count of cached decisions).
    pub acl_cache_capacity: usize,
    /// ACL decision cache TTL.
    #[serde(with = "duration_secs")]
    pub acl_cache_ttl: Duration,

    /// Interval between scheduled key rotations.
    #[serde(with = "duration_secs")]
    pub key_rotation_interval: Duration,
    /// How often the rotation background task checks whether the active
    /// key has aged past `key_rotation_interval`.
    #[serde(with = "duration_secs")]
    pub key_rotation_check_interval: Duration,
    /// Batch size for the lazy re-encryption sweep.
    pub reencrypt_batch_size: usize,

    /// Batch size for the TTL expiry sweep.
    pub ttl_sweep_batch_size: usize,
    /// Interval between TTL expiry sweeps.
    #[serde(with = "duration_secs")]
    pub ttl_sweep_interval: Duration,

    /// Deadline applied to user-facing operations before they abort and
    /// surface `Timeout`.
    #[serde(with = "duration_millis")]
    pub operation_timeout: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl Default for SwarmMemConfig {
    fn default() -> Self {
        Self {
            db_path: "swarmmem.db".to_string(),
            busy_timeout: Duration::from_secs(5),
            reader_pool_size: 4,

            compression_threshold_bytes: 1024,
            max_key_namespace_bytes: 4096,

            l1_max_entries: 1000,
            l1_max_bytes: 100 * 1024 * 1024,
            l2_lmdb_path: None,
            l2_ttl: Duration::from_secs(600),

            acl_cache_capacity: 10_000,
            acl_cache_ttl: Duration::from_secs(300),

            key_rotation_interval: Duration::from_secs(90 * 24 * 3600),
            key_rotation_check_interval: Duration::from_secs(3600),
            reencrypt_batch_size: 500,

            ttl_sweep_batch_size: 1000,
            ttl_sweep_interval: Duration::from_secs(60),

            operation_timeout: Duration::from_millis(5000),
        }
    }
}

impl SwarmMemConfig {
    /// Build a `SwarmMemConfig` from `SWARMMEM_*` environment variables,
    /// falling back to `Default::default()` for anything unset.
    ///
    /// Environment variables:
    /// - `SWARMMEM_DB_PATH`
    /// - `SWARMMEM_BUSY_TIMEOUT_MS`
    /// - `SWARMMEM_READER_POOL_SIZE`
    /// - `SWARMMEM_COMPRESSION_THRESHOLD_BYTES`
    /// - `SWARMMEM_MAX_KEY_NAMESPACE_BYTES`
    /// - `SWARMMEM_L1_MAX_ENTRIES`
    /// - `SWARMMEM_L1_MAX_BYTES`
    /// - `SWARMMEM_L2_LMDB_PATH`
    /// - `SWARMMEM_L2_TTL_SECS`
    /// - `SWARMMEM_ACL_CACHE_CAPACITY`
    /// - `SWARMMEM_ACL_CACHE_TTL_SECS`
    /// - `SWARMMEM_KEY_ROTATION_INTERVAL_SECS`
    /// - `SWARMMEM_KEY_ROTATION_CHECK_INTERVAL_SECS`
    /// - `SWARMMEM_REENCRYPT_BATCH_SIZE`
    /// - `SWARMMEM_TTL_SWEEP_BATCH_SIZE`
    /// - `SWARMMEM_TTL_SWEEP_INTERVAL_SECS`
    /// - `SWARMMEM_OPERATION_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }

        Self {
            db_path: std::env::var("SWARMMEM_DB_PATH").unwrap_or(defaults.db_path),
            busy_timeout: Duration::from_millis(env_or(
                "SWARMMEM_BUSY_TIMEOUT_MS",
                defaults.busy_timeout.as_millis() as u64,
            )),
            reader_pool_size: env_or("SWARMMEM_READER_POOL_SIZE", defaults.reader_pool_size),

            compression_threshold_bytes: env_or(
                "SWARMMEM_COMPRESSION_THRESHOLD_BYTES",
                defaults.compression_threshold_bytes,
            ),
            max_key_namespace_bytes: env_or(
                "SWARMMEM_MAX_KEY_NAMESPACE_BYTES",
                defaults.max_key_namespace_bytes,
            ),

            l1_max_entries: env_or("SWARMMEM_L1_MAX_ENTRIES", defaults.l1_max_entries),
            l1_max_bytes: env_or("SWARMMEM_L1_MAX_BYTES", defaults.l1_max_bytes),
            l2_lmdb_path: std::env::var("SWARMMEM_L2_LMDB_PATH").ok(),
            l2_ttl: Duration::from_secs(env_or(
                "SWARMMEM_L2_TTL_SECS",
                defaults.l2_ttl.as_secs(),
            )),

            acl_cache_capacity: env_or(
                "SWARMMEM_ACL_CACHE_CAPACITY",
                defaults.acl_cache_capacity,
            ),
            acl_cache_ttl: Duration::from_secs(env_or(
                "SWARMMEM_ACL_CACHE_TTL_SECS",
                defaults.acl_cache_ttl.as_secs(),
            )),

            key_rotation_interval: Duration::from_secs(env_or(
                "SWARMMEM_KEY_ROTATION_INTERVAL_SECS",
                defaults.key_rotation_interval.as_secs(),
            )),
            key_rotation_check_interval: Duration::from_secs(env_or(
                "SWARMMEM_KEY_ROTATION_CHECK_INTERVAL_SECS",
                defaults.key_rotation_check_interval.as_secs(),
            )),
            reencrypt_batch_size: env_or(
                "SWARMMEM_REENCRYPT_BATCH_SIZE",
                defaults.reencrypt_batch_size,
            ),

            ttl_sweep_batch_size: env_or(
                "SWARMMEM_TTL_SWEEP_BATCH_SIZE",
                defaults.ttl_sweep_batch_size,
            ),
            ttl_sweep_interval: Duration::from_secs(env_or(
                "SWARMMEM_TTL_SWEEP_INTERVAL_SECS",
                defaults.ttl_sweep_interval.as_secs(),
            )),

            operation_timeout: Duration::from_millis(env_or(
                "SWARMMEM_OPERATION_TIMEOUT_MS",
                defaults.operation_timeout.as_millis() as u64,
            )),
        }
    }

    /// Validate the configuration, rejecting zero/negative values that
    /// would otherwise fail silently deep inside the store or cache.
    pub fn validate(&self) -> Result<(), SwarmMemError> {
        if self.db_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "db_path".to_string(),
                value: self.db_path.clone(),
                reason: "db_path must not be empty".to_string(),
            }
            .into());
        }

        if self.reader_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reader_pool_size".to_string(),
                value: "0".to_string(),
                reason: "reader_pool_size must be at least 1".to_string(),
            }
            .into());
        }

        if self.max_key_namespace_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_key_namespace_bytes".to_string(),
                value: "0".to_string(),
                reason: "max_key_namespace_bytes must be positive".to_string(),
            }
            .into());
        }

        if self.l1_max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "l1_max_entries".to_string(),
                value: "0".to_string(),
                reason: "l1_max_entries must be positive".to_string(),
            }
            .into());
        }

        if self.acl_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "acl_cache_capacity".to_string(),
                value: "0".to_string(),
                reason: "acl_cache_capacity must be positive".to_string(),
            }
            .into());
        }

        if self.operation_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "operation_timeout".to_string(),
                value: "0".to_string(),
                reason: "operation_timeout must be positive".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// Configuration-specific error variants, composed into `SwarmMemError` via
/// the `StoreError`-style `#[from]` plumbing used across the crate.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl From<ConfigError> for SwarmMemError {
    fn from(e: ConfigError) -> Self {
        SwarmMemError::Internal {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SwarmMemConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_db_path() {
        let mut config = SwarmMemConfig::default();
        config.db_path = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_l1_capacity() {
        let mut config = SwarmMemConfig::default();
        config.l1_max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_l2_disabled() {
        let config = SwarmMemConfig::default();
        assert!(config.l2_lmdb_path.is_none());
    }
}
