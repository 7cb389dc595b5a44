//! Configuration file handling for airctrl

use airctrl_client::ClientConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the CLI tool
///
/// ```toml
/// host = "192.168.1.40"
/// output = "table"
/// profiles = ["/etc/airctrl/profiles.yaml"]
///
/// [client]
/// request_timeout_ms = 3000
/// poll_interval_ms = 15000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default device host
    pub host: Option<String>,
    /// Default CoAP port
    pub port: Option<u16>,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
    /// Extra YAML profile files
    #[serde(default)]
    pub profiles: Vec<PathBuf>,
    /// Client policy (timeouts, polling, backoff)
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("airctrl");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: ArgOverrides<'_>) -> MergedConfig {
        let mut profiles = self.profiles.clone();
        profiles.extend(args.profiles.iter().cloned());

        MergedConfig {
            host: args
                .host
                .map(String::from)
                .or_else(|| self.host.clone()),
            port: args.port.or(self.port),
            output: args
                .output
                .map(String::from)
                .or_else(|| self.output.clone())
                .unwrap_or_else(|| "table".to_string()),
            no_color: args.no_color || self.no_color.unwrap_or(false),
            profiles,
            client: self.client.clone(),
        }
    }
}

/// Values given on the command line
#[derive(Debug, Default, Clone, Copy)]
pub struct ArgOverrides<'a> {
    pub host: Option<&'a str>,
    pub port: Option<u16>,
    pub output: Option<&'a str>,
    pub no_color: bool,
    pub profiles: &'a [PathBuf],
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub output: String,
    pub no_color: bool,
    pub profiles: Vec<PathBuf>,
    pub client: ClientConfig,
}

impl MergedConfig {
    pub fn require_host(&self) -> Result<&str> {
        self.host
            .as_deref()
            .context("No device host given (pass one or set `host` in the config file)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_parse_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
host = "10.0.0.7"
output = "json"
profiles = ["/tmp/extra.yaml"]

[client]
poll_interval_ms = 15000
max_reconnect_attempts = 5
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.host.as_deref(), Some("10.0.0.7"));
        assert_eq!(config.output.as_deref(), Some("json"));
        assert_eq!(config.profiles, vec![PathBuf::from("/tmp/extra.yaml")]);
        assert_eq!(config.client.poll_interval_ms, 15000);
        assert_eq!(config.client.max_reconnect_attempts, Some(5));
        // Unset client fields keep their defaults
        assert_eq!(
            config.client.request_timeout_ms,
            ClientConfig::default().request_timeout_ms
        );
    }

    #[test]
    fn test_invalid_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = [").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_args_override_file() {
        let config = Config {
            host: Some("10.0.0.7".to_string()),
            port: Some(5684),
            output: Some("json".to_string()),
            no_color: None,
            profiles: vec![PathBuf::from("a.yaml")],
            client: ClientConfig::default(),
        };
        let extra = [PathBuf::from("b.yaml")];

        let merged = config.merge_with_args(ArgOverrides {
            host: Some("10.0.0.9"),
            output: Some("table"),
            profiles: &extra,
            ..Default::default()
        });
        assert_eq!(merged.host.as_deref(), Some("10.0.0.9"));
        assert_eq!(merged.port, Some(5684));
        assert_eq!(merged.output, "table");
        assert!(!merged.no_color);
        assert_eq!(
            merged.profiles,
            vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]
        );
    }

    #[test]
    fn test_missing_host() {
        let merged = Config::default().merge_with_args(ArgOverrides::default());
        assert_eq!(merged.output, "table");
        assert!(merged.require_host().is_err());
    }
}
