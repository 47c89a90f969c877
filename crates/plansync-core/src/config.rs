//! Engine configuration
//!
//! Loaded from TOML; every field has a default so a partial file is valid.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Reconciliation engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent plan loads in `load_many`
    pub max_concurrent_plans: usize,
    /// Concurrent writes per association kind
    pub max_in_flight_per_kind: usize,
    /// Emit remove + add when a kept association's attributes changed
    pub replace_on_attribute_change: bool,
    /// Report duplicate adds and missing removes as already satisfied
    pub duplicate_is_satisfied: bool,
    /// Maximum cached list-view summary rows
    pub summary_cache_capacity: u64,
    /// Summary row time-to-live in seconds
    pub summary_cache_ttl_secs: u64,
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With plan load concurrency
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_plans(mut self, max: usize) -> Self {
        self.max_concurrent_plans = max;
        self
    }

    /// With write concurrency per kind
    #[inline]
    #[must_use]
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight_per_kind = max;
        self
    }

    /// With replacement on attribute change
    #[inline]
    #[must_use]
    pub fn with_replace_on_attribute_change(mut self, enabled: bool) -> Self {
        self.replace_on_attribute_change = enabled;
        self
    }

    /// With duplicate handling
    #[inline]
    #[must_use]
    pub fn with_duplicate_is_satisfied(mut self, enabled: bool) -> Self {
        self.duplicate_is_satisfied = enabled;
        self
    }

    /// With summary cache limits
    #[inline]
    #[must_use]
    pub fn with_summary_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.summary_cache_capacity = capacity;
        self.summary_cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Summary row time-to-live
    #[inline]
    #[must_use]
    pub fn summary_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.summary_cache_ttl_secs)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded sync config from {}", path.display());
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_plans == 0 {
            return Err(ConfigError::Invalid("max_concurrent_plans must be at least 1".into()));
        }
        if self.max_in_flight_per_kind == 0 {
            return Err(ConfigError::Invalid("max_in_flight_per_kind must be at least 1".into()));
        }
        if self.summary_cache_capacity == 0 {
            return Err(ConfigError::Invalid("summary_cache_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_plans: 4,
            max_in_flight_per_kind: 8,
            replace_on_attribute_change: true,
            duplicate_is_satisfied: true,
            summary_cache_capacity: 1024,
            summary_cache_ttl_secs: 300,
        }
    }
}
