//! Store configuration.
//!
//! [`StoreConfig`] is constructed through a validating builder or
//! deserialized and then checked with [`StoreConfig::validate`].

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Configuration validation error.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Configuration for a term dictionary store.
///
/// # Validation Rules
///
/// - all three cache sizes must be non-zero
///
/// # Example
///
/// ```no_run
/// # use tripledb_types::config::StoreConfig;
/// let config = StoreConfig::builder()
///     .node_to_id_cache_size(10_000)
///     .sync_on_commit(false)
///     .build()
///     .expect("valid store config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// Capacity of the term → identifier cache.
    #[serde(default = "default_node_to_id_cache_size")]
    pub node_to_id_cache_size: usize,
    /// Capacity of the identifier → term cache.
    #[serde(default = "default_id_to_node_cache_size")]
    pub id_to_node_cache_size: usize,
    /// Capacity of the cache of terms known to be absent.
    #[serde(default = "default_node_miss_cache_size")]
    pub node_miss_cache_size: usize,
    /// Whether commit syncs the base table files before truncating the journal.
    #[serde(default = "default_sync_on_commit")]
    pub sync_on_commit: bool,
    /// How long `begin(WRITE)` waits for the writer slot. Zero fails immediately.
    #[serde(default = "default_write_admission_timeout")]
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub write_admission_timeout: Duration,
}

#[bon::bon]
impl StoreConfig {
    /// Creates a new store configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any cache size is zero.
    #[builder]
    pub fn new(
        #[builder(default = default_node_to_id_cache_size())] node_to_id_cache_size: usize,
        #[builder(default = default_id_to_node_cache_size())] id_to_node_cache_size: usize,
        #[builder(default = default_node_miss_cache_size())] node_miss_cache_size: usize,
        #[builder(default = default_sync_on_commit())] sync_on_commit: bool,
        #[builder(default = default_write_admission_timeout())] write_admission_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            node_to_id_cache_size,
            id_to_node_cache_size,
            node_miss_cache_size,
            sync_on_commit,
            write_admission_timeout,
        };
        config.validate()?;
        Ok(config)
    }
}

impl StoreConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any cache size is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("node_to_id_cache_size", self.node_to_id_cache_size),
            ("id_to_node_cache_size", self.id_to_node_cache_size),
            ("node_miss_cache_size", self.node_miss_cache_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation { message: format!("{name} must be > 0") });
            }
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            node_to_id_cache_size: default_node_to_id_cache_size(),
            id_to_node_cache_size: default_id_to_node_cache_size(),
            node_miss_cache_size: default_node_miss_cache_size(),
            sync_on_commit: default_sync_on_commit(),
            write_admission_timeout: default_write_admission_timeout(),
        }
    }
}

fn default_node_to_id_cache_size() -> usize {
    100_000
}

fn default_id_to_node_cache_size() -> usize {
    500_000
}

fn default_node_miss_cache_size() -> usize {
    1_000
}

fn default_sync_on_commit() -> bool {
    true
}

fn default_write_admission_timeout() -> Duration {
    Duration::ZERO
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
