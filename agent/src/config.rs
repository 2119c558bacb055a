//! Agent configuration options.
//!
//! We use `serde` to parse these options from the TOML config file,
//! and to write the default configuration to the TOML config file,
//! therefore the structs derive [`serde::Deserialize`] and [`serde::Serialize`].

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// General config options.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Time between two measurements of the sources.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Path to the procfs mount.
    pub procfs_path: PathBuf,
    /// Whether to report the load of each CPU, in addition to the aggregated load.
    ///
    /// If unset, it is enabled when the machine has more than one CPU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_cpus: Option<bool>,
    pub statsd: StatsdConfig,
    pub server: ServerConfig,
    pub coturn: CoturnConfig,
    /// JSON endpoints to poll.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpSourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatsdConfig {
    /// If false, the measurements are only logged.
    pub enabled: bool,
    /// Address of the statsd server. A missing host, as in `:8125`, means localhost.
    pub address: String,
    /// Prefix of every metric name.
    pub prefix: String,
    /// Adds the outbound IP address of the machine to the prefix.
    pub prefix_ip: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoturnConfig {
    pub enabled: bool,
    pub host: String,
    /// Port of the telnet CLI.
    pub port: u16,
    pub password: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(with = "humantime_serde", default = "default_http_timeout")]
    pub timeout: Duration,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            procfs_path: PathBuf::from("/proc"),
            all_cpus: None,
            statsd: StatsdConfig::default(),
            server: ServerConfig::default(),
            coturn: CoturnConfig::default(),
            http: Vec::new(),
        }
    }
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: String::from(":8125"),
            prefix: String::new(),
            prefix_ip: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { enabled: true, port: 80 }
    }
}

impl Default for CoturnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::from("127.0.0.1"),
            port: 5558,
            password: String::new(),
            timeout: Duration::from_secs(1),
        }
    }
}

impl AgentConfig {
    /// Parses a configuration from a TOML string.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid configuration")
    }

    /// Serializes the configuration to a TOML string.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialize the configuration")
    }

    /// Loads the configuration file at `path`.
    ///
    /// If the file does not exist and `write_default` is true, the default configuration
    /// is written to `path` and returned. Otherwise, a missing file is an error.
    pub fn load(path: &Path, write_default: bool) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).with_context(|| format!("could not parse {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound && write_default => {
                let config = Self::default();
                config
                    .save(path)
                    .with_context(|| format!("config file {} does not exist", path.display()))?;
                log::info!("Default configuration file written to: {}", path.display());
                Ok(config)
            }
            Err(e) => Err(e).with_context(|| format!("could not read config file {}", path.display())),
        }
    }

    /// Writes the configuration to `path`, overwriting the file if it exists.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content).with_context(|| format!("could not write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_config_round_trip() {
        let config = AgentConfig::default();
        let parsed = AgentConfig::parse(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_config() {
        let config = AgentConfig::parse(indoc! {r#"
            poll_interval = "500ms"
            all_cpus = false

            [statsd]
            address = "10.0.0.1:8125"
            prefix = "media"

            [coturn]
            enabled = true
            password = "secret"

            [[http]]
            name = "janus"
            url = "http://127.0.0.1:7088/admin"
            prefix = "janus"

            [[http]]
            name = "other"
            url = "http://127.0.0.1:9000/stats"
            timeout = "1s"
        "#})
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.all_cpus, Some(false));
        assert_eq!(config.procfs_path, PathBuf::from("/proc"));
        assert_eq!(config.statsd.address, "10.0.0.1:8125");
        assert!(config.statsd.enabled);
        assert!(config.coturn.enabled);
        assert_eq!(config.coturn.port, 5558);
        assert_eq!(config.coturn.timeout, Duration::from_secs(1));
        assert_eq!(config.http.len(), 2);
        assert_eq!(config.http[0].prefix.as_deref(), Some("janus"));
        assert_eq!(config.http[0].timeout, Duration::from_secs(5));
        assert_eq!(config.http[1].timeout, Duration::from_secs(1));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(AgentConfig::parse("pol_interval = \"1s\"").is_err());
        assert!(AgentConfig::parse("[statsd]\nadress = \":8125\"").is_err());
    }

    #[test]
    fn load_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machinestatsd.toml");

        assert!(AgentConfig::load(&path, false).is_err());
        assert!(!path.exists());

        let config = AgentConfig::load(&path, true).unwrap();
        assert_eq!(config, AgentConfig::default());
        assert!(path.exists());
        assert_eq!(AgentConfig::load(&path, false).unwrap(), config);
    }
}
