use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::ConfigError;

/// Structure representing the monitor configuration. Contains the server address and
/// the polling/display limits. Configs are serializable and deserializable to YAML
/// using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Base URL of the DABC http server, e.g. `http://localhost:8090`
    pub server_url: String,
    /// Period of the regular check tick in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum number of trailing history entries kept per item
    pub history_limit: usize,
    /// Ceiling on the number of eagerly rendered hierarchy nodes
    pub expand_ceiling: usize,
    /// When true, items that are already drawn keep re-fetching newer versions
    pub monitoring: bool,
    /// Number of transport worker threads
    pub n_workers: usize,
    /// Value of the `compact` query parameter on hierarchy requests
    pub compact: u32,
}

impl Default for MonitorConfig {
    /// Generate a new MonitorConfig with the stock DABC http server defaults
    fn default() -> Self {
        Self {
            server_url: String::from("http://localhost:8090"),
            poll_interval_ms: 1000,
            history_limit: 100,
            expand_ceiling: 200,
            monitoring: true,
            n_workers: 2,
            compact: 3,
        }
    }
}

impl MonitorConfig {
    /// Read the configuration in a YAML file
    /// Returns a MonitorConfig if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check the limits for obviously broken values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.is_empty() {
            return Err(ConfigError::BadValue("server_url"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::BadValue("poll_interval_ms"));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::BadValue("history_limit"));
        }
        if self.expand_ceiling == 0 {
            return Err(ConfigError::BadValue("expand_ceiling"));
        }
        if self.n_workers == 0 {
            return Err(ConfigError::BadValue("n_workers"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = MonitorConfig::default();
        if config.validate().is_err() {
            panic!();
        }
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = MonitorConfig::default();
        let yaml_str = serde_yaml::to_string(&config).unwrap();
        let back: MonitorConfig = serde_yaml::from_str(&yaml_str).unwrap();
        assert_eq!(back.server_url, config.server_url);
        assert_eq!(back.history_limit, config.history_limit);
        assert_eq!(back.expand_ceiling, config.expand_ceiling);
    }

    #[test]
    fn test_bad_values_rejected() {
        let mut config = MonitorConfig::default();
        config.n_workers = 0;
        if config.validate().is_ok() {
            panic!();
        }
    }
}
