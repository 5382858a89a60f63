//! Engine configuration.
//!
//! All durations are expressed in milliseconds when deserialized, so an
//! embedding application can load a `Config` from its own settings source:
//!
//! ```json
//! { "max_retries": 5, "retry_base_delay_ms": 10, "cache": { "ttl_ms": 60000 } }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`crate::StoreRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Attempts a top-level unit of work gets before giving up on conflicts.
    pub max_retries: u32,

    /// Back-off unit; attempt `n` sleeps `n * retry_base_delay` before retrying.
    #[serde(rename = "retry_base_delay_ms", with = "millis")]
    pub retry_base_delay: Duration,

    /// Cache settings.
    pub cache: CacheConfig,

    /// Export settings.
    pub export: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_base_delay: Duration::from_millis(20),
            cache: CacheConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn max_retries(mut self, value: u32) -> Self {
        self.max_retries = value;
        self
    }

    /// Sets the back-off unit.
    #[must_use]
    pub const fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Replaces the cache settings.
    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the export settings.
    #[must_use]
    pub const fn export(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, cached stores pass every call straight through.
    pub enabled: bool,

    /// Entries older than this are reloaded. `None` keeps entries until evicted.
    #[serde(rename = "ttl_ms", with = "opt_millis")]
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: None,
        }
    }
}

impl CacheConfig {
    /// A configuration with caching turned off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ttl: None,
        }
    }

    /// Sets the time-to-live.
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Export settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Pretty-print dump documents.
    pub pretty: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { pretty: true }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.retry_base_delay, Duration::from_millis(20));
        assert!(config.cache.enabled);
        assert!(config.cache.ttl.is_none());
        assert!(config.export.pretty);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .max_retries(3)
            .retry_base_delay(Duration::from_millis(1))
            .cache(CacheConfig::disabled());

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(1));
        assert!(!config.cache.enabled);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"max_retries": 4, "cache": {"ttl_ms": 1500}}"#).unwrap();
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.retry_base_delay, Duration::from_millis(20));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn serialized_config_reads_back() {
        let config = Config::new().cache(CacheConfig::default().ttl(Duration::from_secs(2)));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"retry_base_delay_ms\":20"));
        assert_eq!(serde_json::from_str::<Config>(&json).unwrap(), config);
    }
}
