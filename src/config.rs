//! Poll configuration and the sources the scheduler reads it from.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_INTERVAL_MS: u64 = 15_000;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which transfer encoding the grabber asks the upstream for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingPreference {
    #[default]
    Gzip,
    Identity,
}

impl EncodingPreference {
    /// Value sent in the `Accept-Encoding` request header.
    pub fn header_value(self) -> &'static str {
        match self {
            EncodingPreference::Gzip => "gzip",
            EncodingPreference::Identity => "identity",
        }
    }
}

/// Endpoint and cadence for the position feed.
///
/// Deserialized from the `dataGrabber` section of the config file:
/// ```json
/// {
///   "dataGrabber": {
///     "host": "dadosabertos.rio.rj.gov.br",
///     "path": "/apiTransporte/apresentacao/rest/index.cfm/onibus",
///     "intervalTime": 15000
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub accept_encoding: EncodingPreference,
    #[serde(rename = "intervalTime", default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(rename = "requestTimeout", default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(rename = "dataGrabber")]
    data_grabber: PollConfig,
}

impl PollConfig {
    /// Builds a config with default encoding, interval and timeout.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            port: None,
            tls: false,
            accept_encoding: EncodingPreference::default(),
            interval_ms: DEFAULT_INTERVAL_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Loads and validates the `dataGrabber` section of a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(path, &content)
    }

    /// Async variant of [`PollConfig::load`] for use on the runtime.
    pub async fn load_async(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(path, &content)
    }

    fn from_json(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        file.data_grabber.validate()?;
        Ok(file.data_grabber)
    }

    /// Rejects configs the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "path must start with '/', got {:?}",
                self.path
            )));
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("intervalTime must be positive".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("requestTimeout must be positive".into()));
        }
        Ok(())
    }

    /// Full feed URL, e.g. `http://host:8080/path`.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}{}", self.host, self.path),
            None => format!("{scheme}://{}{}", self.host, self.path),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Read-only accessor the scheduler consults at the start of every cycle.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn current(&self) -> PollConfig;
}

/// Configuration loaded once at startup.
#[derive(Debug, Clone)]
pub struct StaticConfig(PollConfig);

impl StaticConfig {
    pub fn new(config: PollConfig) -> Self {
        Self(config)
    }
}

#[async_trait]
impl ConfigSource for StaticConfig {
    async fn current(&self) -> PollConfig {
        self.0.clone()
    }
}

/// Re-reads the config file on every cycle so endpoint and interval changes
/// apply without a restart. A failed read keeps the last good config.
#[derive(Debug)]
pub struct FileConfig {
    path: PathBuf,
    last_good: Mutex<PollConfig>,
}

impl FileConfig {
    /// Loads the file once; the initial read must succeed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let initial = PollConfig::load(&path)?;
        Ok(Self {
            path,
            last_good: Mutex::new(initial),
        })
    }
}

#[async_trait]
impl ConfigSource for FileConfig {
    async fn current(&self) -> PollConfig {
        let reloaded = PollConfig::load_async(&self.path).await;

        let mut last_good = match self.last_good.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match reloaded {
            Ok(config) => {
                if *last_good != config {
                    debug!(path = %self.path.display(), "Config changed on disk");
                }
                *last_good = config;
            }
            Err(e) => {
                warn!(error = %e, "Config reload failed, keeping previous config");
            }
        }

        last_good.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    #[test]
    fn test_load_applies_defaults() {
        let path = temp_path("riobus_grabber_config_defaults.json");
        fs::write(
            &path,
            r#"{"dataGrabber": {"host": "example.org", "path": "/onibus"}}"#,
        )
        .unwrap();

        let config = PollConfig::load(&path).unwrap();
        assert_eq!(config.interval(), Duration::from_millis(15_000));
        assert_eq!(config.request_timeout(), Duration::from_millis(10_000));
        assert_eq!(config.accept_encoding, EncodingPreference::Gzip);
        assert_eq!(config.url(), "http://example.org/onibus");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_reads_all_fields() {
        let path = temp_path("riobus_grabber_config_full.json");
        fs::write(
            &path,
            r#"{"dataGrabber": {
                "host": "example.org", "path": "/onibus", "port": 8443, "tls": true,
                "intervalTime": 5000, "requestTimeout": 2500, "acceptEncoding": "identity"
            }}"#,
        )
        .unwrap();

        let config = PollConfig::load(&path).unwrap();
        assert_eq!(config.url(), "https://example.org:8443/onibus");
        assert_eq!(config.interval(), Duration::from_millis(5000));
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.accept_encoding.header_value(), "identity");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let result = PollConfig::load(temp_path("riobus_grabber_does_not_exist.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = PollConfig::new("example.org", "/onibus").with_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_relative_path() {
        let config = PollConfig::new("example.org", "onibus");
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_async_matches_load() {
        let path = temp_path("riobus_grabber_config_async.json");
        fs::write(
            &path,
            r#"{"dataGrabber": {"host": "example.org", "path": "/onibus", "port": 8080}}"#,
        )
        .unwrap();

        let config = PollConfig::load_async(&path).await.unwrap();
        assert_eq!(config, PollConfig::load(&path).unwrap());
        assert_eq!(config.url(), "http://example.org:8080/onibus");

        fs::remove_file(&path).unwrap();
        assert!(matches!(
            PollConfig::load_async(&path).await,
            Err(ConfigError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_config_keeps_last_good_on_bad_reload() {
        let path = temp_path("riobus_grabber_config_reload.json");
        fs::write(
            &path,
            r#"{"dataGrabber": {"host": "a.example", "path": "/x", "intervalTime": 1000}}"#,
        )
        .unwrap();
        let source = FileConfig::open(&path).unwrap();

        fs::write(
            &path,
            r#"{"dataGrabber": {"host": "b.example", "path": "/x", "intervalTime": 2000}}"#,
        )
        .unwrap();
        assert_eq!(source.current().await.host, "b.example");

        fs::write(&path, "{ not json").unwrap();
        let config = source.current().await;
        assert_eq!(config.host, "b.example");
        assert_eq!(config.interval(), Duration::from_millis(2000));

        fs::remove_file(&path).unwrap();
    }
}
