/// Feed configuration
///
/// Per-feed and global settings for multi-feed ingestion, loadable from a
/// YAML file or from repeated `--feed host:port` CLI arguments.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("no feeds configured")]
    NoFeeds,

    #[error("invalid feed '{name}': {reason}")]
    InvalidFeed { name: String, reason: String },

    #[error("duplicate origin id {0}")]
    DuplicateOrigin(u32),

    #[error("{field} must be a power of two (got {value})")]
    NotPowerOfTwo { field: &'static str, value: u64 },

    #[error("invalid feed spec '{0}' (expected host:port)")]
    InvalidFeedSpec(String),
}

/// Configuration for a single feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Unique feed identifier carried in every fan-in slot
    pub origin_id: u32,
    /// Primary vs backup feed; informs failover marking only
    pub is_primary: bool,
    pub heartbeat_interval_ms: u32,
    /// Dead threshold = heartbeat_interval_ms * timeout_multiplier
    pub timeout_multiplier: u32,
    /// Per-feed local ring capacity (power of two)
    pub buffer_capacity: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            name: String::new(),
            host: "127.0.0.1".to_string(),
            port: 9001,
            origin_id: 0,
            is_primary: true,
            heartbeat_interval_ms: 1000,
            timeout_multiplier: 3,
            buffer_capacity: 65536,
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: &str| ConfigError::InvalidFeed {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.is_empty() {
            return Err(fail("name cannot be empty"));
        }
        if self.host.is_empty() {
            return Err(fail("host cannot be empty"));
        }
        if self.port == 0 {
            return Err(fail("port cannot be zero"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(fail("heartbeat_interval_ms cannot be zero"));
        }
        if self.timeout_multiplier == 0 {
            return Err(fail("timeout_multiplier cannot be zero"));
        }
        if !(self.buffer_capacity as u64).is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "buffer_capacity",
                value: self.buffer_capacity as u64,
            });
        }
        Ok(())
    }

    /// Dead threshold in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.heartbeat_interval_ms as u64 * self.timeout_multiplier as u64
    }
}

/// Global multi-feed settings plus the feed list.
#[derive(Debug, Clone)]
pub struct MultiFeedConfig {
    pub feeds: Vec<FeedConfig>,
    /// Shared fan-in ring capacity (power of two)
    pub global_buffer_capacity: u32,
    pub dispatcher_threads: u32,
    pub max_seconds: u32,
    pub max_messages: u64,
    pub health_check_interval_ms: u32,
}

impl Default for MultiFeedConfig {
    fn default() -> Self {
        MultiFeedConfig {
            feeds: Vec::new(),
            global_buffer_capacity: 262144,
            dispatcher_threads: 1,
            max_seconds: 0,
            max_messages: 0,
            health_check_interval_ms: 100,
        }
    }
}

// Serde-facing file schema: a `global` mapping plus a `feeds` sequence.
// `name` and `origin_id` default from the feed's position.

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GlobalSection {
    buffer_capacity: Option<u32>,
    dispatcher_threads: Option<u32>,
    max_seconds: Option<u32>,
    max_messages: Option<u64>,
    health_check_interval_ms: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FeedEntry {
    name: Option<String>,
    host: String,
    port: u16,
    origin_id: Option<u32>,
    is_primary: bool,
    heartbeat_interval_ms: u32,
    timeout_multiplier: u32,
    buffer_capacity: u32,
}

impl Default for FeedEntry {
    fn default() -> Self {
        let defaults = FeedConfig::default();
        FeedEntry {
            name: None,
            host: defaults.host,
            port: defaults.port,
            origin_id: None,
            is_primary: defaults.is_primary,
            heartbeat_interval_ms: defaults.heartbeat_interval_ms,
            timeout_multiplier: defaults.timeout_multiplier,
            buffer_capacity: defaults.buffer_capacity,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    global: GlobalSection,
    feeds: Vec<FeedEntry>,
}

impl MultiFeedConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(contents)?;

        let mut config = MultiFeedConfig::default();
        if let Some(v) = file.global.buffer_capacity {
            config.global_buffer_capacity = v;
        }
        if let Some(v) = file.global.dispatcher_threads {
            config.dispatcher_threads = v;
        }
        if let Some(v) = file.global.max_seconds {
            config.max_seconds = v;
        }
        if let Some(v) = file.global.max_messages {
            config.max_messages = v;
        }
        if let Some(v) = file.global.health_check_interval_ms {
            config.health_check_interval_ms = v;
        }

        for (index, entry) in file.feeds.into_iter().enumerate() {
            let origin_id = entry.origin_id.unwrap_or(index as u32);
            config.feeds.push(FeedConfig {
                name: entry.name.unwrap_or_else(|| format!("feed_{origin_id}")),
                host: entry.host,
                port: entry.port,
                origin_id,
                is_primary: entry.is_primary,
                heartbeat_interval_ms: entry.heartbeat_interval_ms,
                timeout_multiplier: entry.timeout_multiplier,
                buffer_capacity: entry.buffer_capacity,
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Build a config from repeated `host:port` specs. The first feed is
    /// the primary, the rest are backups.
    pub fn from_cli_feeds(specs: &[String]) -> Result<Self, ConfigError> {
        let mut config = MultiFeedConfig::default();
        for (index, spec) in specs.iter().enumerate() {
            let (host, port) = spec
                .rsplit_once(':')
                .ok_or_else(|| ConfigError::InvalidFeedSpec(spec.clone()))?;
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::InvalidFeedSpec(spec.clone()))?;
            if host.is_empty() || port == 0 {
                return Err(ConfigError::InvalidFeedSpec(spec.clone()));
            }
            config.feeds.push(FeedConfig {
                name: format!("feed_{index}"),
                host: host.to_string(),
                port,
                origin_id: index as u32,
                is_primary: index == 0,
                ..Default::default()
            });
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }
        let mut origins = HashSet::new();
        for feed in &self.feeds {
            feed.validate()?;
            if !origins.insert(feed.origin_id) {
                return Err(ConfigError::DuplicateOrigin(feed.origin_id));
            }
        }
        if !(self.global_buffer_capacity as u64).is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "global_buffer_capacity",
                value: self.global_buffer_capacity as u64,
            });
        }
        if self.dispatcher_threads == 0 {
            return Err(ConfigError::InvalidFeed {
                name: "global".to_string(),
                reason: "dispatcher_threads cannot be zero".to_string(),
            });
        }
        if self.health_check_interval_ms == 0 {
            return Err(ConfigError::InvalidFeed {
                name: "global".to_string(),
                reason: "health_check_interval_ms cannot be zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
global:
  buffer_capacity: 1024
  max_seconds: 30
  health_check_interval_ms: 50
feeds:
  - name: primary
    host: 10.0.0.1
    port: 9001
    is_primary: true
  - name: backup
    host: 10.0.0.2
    port: 9002
    is_primary: false
    heartbeat_interval_ms: 500
"#;

    #[test]
    fn test_yaml_round_trip() {
        let config = MultiFeedConfig::from_yaml_str(SAMPLE_YAML).unwrap();
        assert_eq!(config.global_buffer_capacity, 1024);
        assert_eq!(config.max_seconds, 30);
        assert_eq!(config.health_check_interval_ms, 50);
        assert_eq!(config.feeds.len(), 2);

        assert_eq!(config.feeds[0].name, "primary");
        assert_eq!(config.feeds[0].origin_id, 0);
        assert!(config.feeds[0].is_primary);

        assert_eq!(config.feeds[1].host, "10.0.0.2");
        assert_eq!(config.feeds[1].origin_id, 1);
        assert_eq!(config.feeds[1].heartbeat_interval_ms, 500);
        assert!(!config.feeds[1].is_primary);
    }

    #[test]
    fn test_yaml_defaults_fill_in() {
        let config = MultiFeedConfig::from_yaml_str("feeds:\n  - port: 9100\n").unwrap();
        assert_eq!(config.feeds[0].name, "feed_0");
        assert_eq!(config.feeds[0].host, "127.0.0.1");
        assert_eq!(config.feeds[0].buffer_capacity, 65536);
        assert_eq!(config.global_buffer_capacity, 262144);
    }

    #[test]
    fn test_empty_feed_list_rejected() {
        assert!(matches!(
            MultiFeedConfig::from_yaml_str("global:\n  max_seconds: 5\n"),
            Err(ConfigError::NoFeeds)
        ));
    }

    #[test]
    fn test_duplicate_origin_rejected() {
        let yaml = "feeds:\n  - port: 9001\n    origin_id: 3\n  - port: 9002\n    origin_id: 3\n";
        assert!(matches!(
            MultiFeedConfig::from_yaml_str(yaml),
            Err(ConfigError::DuplicateOrigin(3))
        ));
    }

    #[test]
    fn test_non_power_of_two_rejected() {
        let yaml = "feeds:\n  - port: 9001\n    buffer_capacity: 1000\n";
        assert!(matches!(
            MultiFeedConfig::from_yaml_str(yaml),
            Err(ConfigError::NotPowerOfTwo { .. })
        ));

        let yaml = "global:\n  buffer_capacity: 100\nfeeds:\n  - port: 9001\n";
        assert!(matches!(
            MultiFeedConfig::from_yaml_str(yaml),
            Err(ConfigError::NotPowerOfTwo { .. })
        ));
    }

    #[test]
    fn test_cli_feed_specs() {
        let specs = vec!["127.0.0.1:9001".to_string(), "10.1.2.3:9002".to_string()];
        let config = MultiFeedConfig::from_cli_feeds(&specs).unwrap();
        assert_eq!(config.feeds.len(), 2);
        assert!(config.feeds[0].is_primary);
        assert!(!config.feeds[1].is_primary);
        assert_eq!(config.feeds[1].host, "10.1.2.3");
        assert_eq!(config.feeds[1].port, 9002);
    }

    #[test]
    fn test_bad_cli_spec_rejected() {
        for spec in ["nohost", "host:", "host:notaport", ":9001"] {
            let specs = vec![spec.to_string()];
            assert!(
                MultiFeedConfig::from_cli_feeds(&specs).is_err(),
                "spec '{spec}' should be rejected"
            );
        }
    }
}
