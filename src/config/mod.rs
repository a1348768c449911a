//! Configuration loading
//!
//! YAML file found through the usual fallback chain, then adjusted by the
//! `RMF_ENV` profile and `RMF_*` environment overrides.

pub mod profile;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gateway::GatewaySettings;
use crate::registry::{BackendDescriptor, RetryPolicy};

pub use profile::{Profile, apply_env_overrides};

const PROJECT_NAME: &str = "rmf";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote_mcps: Vec<RemoteMcpConfig>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// One backend entry under `remote_mcps`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMcpConfig {
    pub name: String,
    pub base_url: String,
    pub namespace: String,
    /// Per-attempt timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_backend_timeout() -> f64 {
    5.0
}

/// Backoff settings; delays in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: f64,
    pub max_delay: f64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: 0.1,
            max_delay: 1.0,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub sse_enabled: bool,
    /// Reconnect hint for event clients, in milliseconds
    pub sse_retry_timeout: u64,
    pub max_concurrent_requests: usize,
    /// Whole-call deadline in seconds
    pub request_timeout: f64,
    /// Periodic refresh in seconds; no periodic refresh when unset
    pub refresh_interval: Option<f64>,
    pub refresh_concurrency: usize,
    pub event_capacity: usize,
    pub socket_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sse_enabled: true,
            sse_retry_timeout: 3000,
            max_concurrent_requests: 10,
            request_timeout: 30.0,
            refresh_interval: None,
            refresh_concurrency: 8,
            event_capacity: 256,
            socket_path: None,
        }
    }
}

impl ServerConfig {
    /// Socket path for `rmf serve`, defaulting under the local data dir
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(PROJECT_NAME)
                .join(format!("{}.sock", PROJECT_NAME))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| eyre::eyre!("{} must be a non-negative number of seconds, got {}", field, value))
}

impl RemoteMcpConfig {
    pub fn to_descriptor(&self) -> Result<BackendDescriptor> {
        let retry = RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: seconds("retry.initial_delay", self.retry.initial_delay)?,
            max_delay: seconds("retry.max_delay", self.retry.max_delay)?,
            multiplier: self.retry.multiplier,
            jitter: self.retry.jitter,
        };
        let mut descriptor = BackendDescriptor::new(&self.name, &self.base_url, &self.namespace)
            .with_timeout(seconds("timeout", self.timeout)?)
            .with_retry(retry);
        descriptor.headers = self.headers.clone();
        Ok(descriptor)
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply the environment
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        let profile = Profile::from_env();
        profile.apply(&mut config);
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        log::info!("Applied '{}' profile", profile.as_str());
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/rmf/rmf.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(PROJECT_NAME).join(format!("{}.yml", PROJECT_NAME));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./rmf.yml
        let fallback_config = PathBuf::from(format!("{}.yml", PROJECT_NAME));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config = Self::from_yaml(&content)?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// Server-level checks; per-backend checks happen when the registry loads
    pub fn validate(&self) -> Result<()> {
        if self.server.max_concurrent_requests == 0 {
            eyre::bail!("server.max_concurrent_requests must be > 0");
        }
        if !(self.server.request_timeout > 0.0) {
            eyre::bail!("server.request_timeout must be > 0");
        }
        if self.server.refresh_interval.is_some_and(|secs| !(secs > 0.0)) {
            eyre::bail!("server.refresh_interval must be > 0");
        }
        if self.server.refresh_concurrency == 0 {
            eyre::bail!("server.refresh_concurrency must be > 0");
        }
        if self.server.event_capacity == 0 {
            eyre::bail!("server.event_capacity must be > 0");
        }
        Ok(())
    }

    pub fn descriptors(&self) -> Result<Vec<BackendDescriptor>> {
        self.remote_mcps
            .iter()
            .map(|mcp| {
                mcp.to_descriptor()
                    .context(format!("Invalid remote_mcps entry '{}'", mcp.name))
            })
            .collect()
    }

    pub fn gateway_settings(&self) -> Result<GatewaySettings> {
        self.validate()?;
        let refresh_interval = match self.server.refresh_interval {
            Some(secs) => Some(seconds("server.refresh_interval", secs)?),
            None => None,
        };
        Ok(GatewaySettings {
            events_enabled: self.server.sse_enabled,
            event_retry_ms: self.server.sse_retry_timeout,
            event_capacity: self.server.event_capacity,
            max_concurrent_requests: self.server.max_concurrent_requests,
            request_timeout: seconds("server.request_timeout", self.server.request_timeout)?,
            refresh_concurrency: self.server.refresh_concurrency,
            refresh_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
remote_mcps:
  - name: "Fetch MCP"
    base_url: "http://localhost:8003"
    namespace: "fetch"
    timeout: 2.5
    retry: { max_attempts: 4, initial_delay: 0.2 }
    headers: { Authorization: "Bearer token" }
  - name: "Search MCP"
    base_url: "http://localhost:8004"
    namespace: "search"
server:
  max_concurrent_requests: 20
  refresh_interval: 300
logging:
  level: debug
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.remote_mcps.is_empty());
        assert!(config.server.sse_enabled);
        assert_eq!(config.server.sse_retry_timeout, 3000);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.remote_mcps.len(), 2);
        assert_eq!(config.server.max_concurrent_requests, 20);
        assert_eq!(config.server.request_timeout, 30.0);
        assert_eq!(config.logging.level, "debug");

        let descriptors = config.descriptors().unwrap();
        let fetch = &descriptors[0];
        assert_eq!(fetch.namespace, "fetch");
        assert_eq!(fetch.timeout, Duration::from_millis(2500));
        assert_eq!(fetch.retry.max_attempts, 4);
        assert_eq!(fetch.retry.initial_delay, Duration::from_millis(200));
        assert_eq!(fetch.retry.max_delay, Duration::from_secs(1));
        assert_eq!(fetch.headers["Authorization"], "Bearer token");
        assert_eq!(descriptors[1].timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_gateway_settings() {
        let settings = Config::from_yaml(SAMPLE).unwrap().gateway_settings().unwrap();
        assert_eq!(settings.max_concurrent_requests, 20);
        assert_eq!(settings.refresh_interval, Some(Duration::from_secs(300)));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert!(settings.events_enabled);
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let yaml = r#"
remote_mcps:
  - name: "Bad"
    base_url: "http://localhost:1"
    namespace: "bad"
    timeout: -1
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let err = config.descriptors().unwrap_err();
        assert!(err.to_string().contains("Bad"));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.server.max_concurrent_requests = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.refresh_interval = Some(0.0);
        assert!(config.gateway_settings().is_err());
    }

    #[test]
    fn test_missing_required_field() {
        let yaml = "remote_mcps:\n  - name: \"No URL\"\n    namespace: x\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let path = file.path().to_path_buf();

        let config = Config::load_file(Some(&path)).unwrap();
        assert_eq!(config.remote_mcps[1].namespace, "search");
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/rmf.yml");
        assert!(Config::load_file(Some(&path)).is_err());
    }

    #[test]
    fn test_socket_path_override() {
        let mut server = ServerConfig::default();
        assert!(server.socket_path().ends_with("rmf.sock"));
        server.socket_path = Some(PathBuf::from("/tmp/custom.sock"));
        assert_eq!(server.socket_path(), PathBuf::from("/tmp/custom.sock"));
    }
}
