use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};

/// Root broker configuration, matching the shape named in the external
/// interface: `{ redis: {host, port}, log: {enabled, options}, monitor:
/// {enabled, host, port} }`. Only `redis` is consulted by this crate;
/// `log` and `monitor` are carried so a deployment has one typed place
/// to configure the logging facility and the monitor server, both of
/// which live outside this crate.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub redis: RedisConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl BrokerConfig {
    /// Load a TOML configuration file, falling back to defaults if the
    /// path does not exist. Deliberately thin: the actual launch glue
    /// that resolves a config path from the environment lives outside
    /// this crate.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| BrokerError::Configuration(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| BrokerError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_redis_url_points_at_localhost() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.redis.url(), "redis://127.0.0.1:6379");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = BrokerConfig::from_file("/nonexistent/broker.toml").unwrap();
        assert_eq!(cfg.redis.port, 6379);
    }
}
