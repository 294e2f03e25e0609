//! Pool configuration, loadable from TOML.
//!
//! ```toml
//! steady_pool_size = 8
//! max_pool_size = 32
//! resize_quantity = 2
//! idle_timeout = "300s"
//! max_wait = "60s"
//! prefer_validate_over_recreate = false
//! storage = "free-list"
//! validate_on_borrow = true
//! validate_at_most_once = "10s"
//! max_usage = 0
//! fail_all_on_error = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PoolError, PoolResult};
use crate::properties::PoolProperties;

/// How a pool keeps its free resources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// Shared free list; any borrower may take any free handle.
    #[default]
    FreeList,
    /// Handles stay associated with the thread that last borrowed them.
    ThreadAffine,
}

/// Configuration for a single resource pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Resources kept alive at rest (default: 8).
    pub steady_pool_size: usize,
    /// Upper bound on live resources (default: 32).
    pub max_pool_size: usize,
    /// Resources removed per forced scale-down pass (default: 2).
    pub resize_quantity: usize,
    /// Idle time before a free resource may be evicted; also the resizer
    /// period. Zero disables the resizer (default: 300s).
    #[serde(with = "duration_str")]
    pub idle_timeout: Duration,
    /// How long `acquire` waits for a resource when the pool is full (default: 60s).
    #[serde(with = "duration_str")]
    pub max_wait: Duration,
    /// Re-validate idle resources up to the steady size instead of recreating them.
    pub prefer_validate_over_recreate: bool,
    /// Free-resource storage strategy.
    pub storage: StorageKind,
    /// Check a free resource with its allocator before lending it out.
    pub validate_on_borrow: bool,
    /// Skip the borrow-time check for a resource validated less than this
    /// long ago. Zero checks on every borrow.
    #[serde(with = "duration_str")]
    pub validate_at_most_once: Duration,
    /// Destroy a resource on release once it has been borrowed this many
    /// times. Zero means unlimited.
    pub max_usage: u64,
    /// Any resource error (or failed borrow-time check) destroys every
    /// resource and refills the pool.
    pub fail_all_on_error: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            steady_pool_size: 8,
            max_pool_size: 32,
            resize_quantity: 2,
            idle_timeout: Duration::from_secs(300),
            max_wait: Duration::from_secs(60),
            prefer_validate_over_recreate: false,
            storage: StorageKind::FreeList,
            validate_on_borrow: false,
            validate_at_most_once: Duration::ZERO,
            max_usage: 0,
            fail_all_on_error: false,
        }
    }
}

impl PoolConfig {
    pub fn from_file(path: &Path) -> PoolResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> PoolResult<Self> {
        let config: PoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no pool can honour.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_pool_size == 0 {
            return Err(PoolError::Config("max_pool_size must be at least 1".to_string()));
        }
        if self.steady_pool_size > self.max_pool_size {
            return Err(PoolError::Config(format!(
                "steady_pool_size ({}) exceeds max_pool_size ({})",
                self.steady_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    /// Snapshot these settings for one sweep.
    pub fn properties(&self, wait_queue_length: usize) -> PoolProperties {
        PoolProperties {
            steady_pool_size: self.steady_pool_size,
            max_pool_size: self.max_pool_size,
            resize_quantity: self.resize_quantity,
            idle_timeout: self.idle_timeout,
            wait_queue_length,
            prefer_validate_over_recreate: self.prefer_validate_over_recreate,
        }
    }
}

/// Parse a duration string like "500ms", "30s", "5m", or bare seconds.
pub fn parse_duration(s: &str) -> PoolResult<Duration> {
    let s = s.trim();
    let invalid = || PoolError::Config(format!("invalid duration: {s:?}"));

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins = mins.trim().parse::<u64>().map_err(|_| invalid())?;
        mins.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid)
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}

mod duration_str {
    use super::*;

    pub(super) fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if d.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", d.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", d.as_millis()))
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.steady_pool_size, 8);
        assert_eq!(config.max_pool_size, 32);
        assert_eq!(config.resize_quantity, 2);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert!(!config.prefer_validate_over_recreate);
        assert_eq!(config.storage, StorageKind::FreeList);
        assert!(!config.validate_on_borrow);
        assert_eq!(config.max_usage, 0);
        assert!(!config.fail_all_on_error);
    }

    #[test]
    fn parse_full_toml() {
        let config = PoolConfig::from_toml_str(
            r#"
            steady_pool_size = 2
            max_pool_size = 4
            resize_quantity = 1
            idle_timeout = "100ms"
            max_wait = "5s"
            prefer_validate_over_recreate = true
            storage = "thread-affine"
            validate_on_borrow = true
            validate_at_most_once = "2m"
            max_usage = 50
            fail_all_on_error = true
            "#,
        )
        .unwrap();

        assert_eq!(config.steady_pool_size, 2);
        assert!(config.validate_on_borrow);
        assert_eq!(config.validate_at_most_once, Duration::from_secs(120));
        assert_eq!(config.max_usage, 50);
        assert!(config.fail_all_on_error);
        assert_eq!(config.max_pool_size, 4);
        assert_eq!(config.idle_timeout, Duration::from_millis(100));
        assert_eq!(config.max_wait, Duration::from_secs(5));
        assert!(config.prefer_validate_over_recreate);
        assert_eq!(config.storage, StorageKind::ThreadAffine);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = PoolConfig::from_toml_str("steady_pool_size = 1").unwrap();
        assert_eq!(config.steady_pool_size, 1);
        assert_eq!(config.max_pool_size, 32);
    }

    #[test]
    fn steady_above_max_is_rejected() {
        let err = PoolConfig::from_toml_str("steady_pool_size = 10\nmax_pool_size = 4").unwrap_err();
        assert!(err.to_string().contains("exceeds max_pool_size"));
    }

    #[test]
    fn bad_duration_is_rejected() {
        assert!(PoolConfig::from_toml_str(r#"idle_timeout = "soon""#).is_err());
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn huge_minute_values_are_rejected() {
        let huge = format!("{}m", u64::MAX / 2);
        assert!(matches!(parse_duration(&huge), Err(PoolError::Config(_))));
        let err = PoolConfig::from_toml_str(&format!("idle_timeout = \"{huge}\"")).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn toml_roundtrip_keeps_durations() {
        let config = PoolConfig {
            idle_timeout: Duration::from_millis(1500),
            ..PoolConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("idle_timeout = \"1500ms\""));
        assert_eq!(PoolConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn properties_snapshot_carries_wait_queue() {
        let props = PoolConfig::default().properties(3);
        assert_eq!(props.wait_queue_length, 3);
        assert_eq!(props.steady_pool_size, 8);
    }
}
