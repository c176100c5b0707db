// Server Configuration
//
// Loaded from an optional TOML file, then overridden from the environment,
// then validated. Every field has a default so an empty file is valid.

use crate::services::llm::LlmConfig;
use crate::storage::libsql::ConnectionMode;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Fixed-window request limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Requests allowed per window
    pub max_requests: u32,

    /// Window length (in seconds)
    #[serde(rename = "window_secs", with = "serde_duration")]
    pub window: Duration,
}

impl LimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub addr: SocketAddr,

    /// libsql database file
    pub database_path: PathBuf,

    /// Remote primary to replicate from; the local file becomes an embedded replica
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_url: Option<String>,

    /// Auth token for `replica_url`, taken from the environment only
    #[serde(skip)]
    pub replica_token: Option<String>,

    /// Public origin used to build share links
    pub base_url: String,

    /// Bearer token for the admin endpoint; open when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_key: Option<String>,

    /// Accepted upload years, inclusive
    pub min_year: i32,
    pub max_year: i32,

    /// Uploads per client address
    pub upload_limit: LimitConfig,

    /// Text enhancements per page session
    pub enhance_limit: LimitConfig,

    /// Interval between rate-limit sweeps (in seconds)
    #[serde(rename = "sweep_interval_secs", with = "serde_duration")]
    pub sweep_interval: Duration,

    pub llm: LlmConfig,
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Default database location under the platform data directory
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("yearwrap")
        .join("yearwrap.db")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_path: default_database_path(),
            replica_url: None,
            replica_token: None,
            base_url: "http://localhost:3000".to_string(),
            admin_key: None,
            min_year: 2020,
            max_year: 2030,
            upload_limit: LimitConfig::new(5, 3600), // 1 hour
            enhance_limit: LimitConfig::new(50, 300), // 5 minutes
            sweep_interval: Duration::from_secs(600),
            llm: LlmConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults or `path`, then environment overrides, then validation
    ///
    /// The file is validated only after the environment is applied, since
    /// some values (the replica token) can only come from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                let contents = std::fs::read_to_string(path)?;
                toml::from_str::<ServerConfig>(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `YEARWRAP_*`, `BASE_URL`, `ADMIN_KEY`, `LIBSQL_AUTH_TOKEN`
    /// and `OPENAI_API_KEY` overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(addr) = env_var("YEARWRAP_ADDR") {
            self.addr = addr.parse().map_err(|e| {
                ConfigError::ValidationError(format!("YEARWRAP_ADDR '{}': {}", addr, e))
            })?;
        }
        if let Some(path) = env_var("YEARWRAP_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(url) = env_var("YEARWRAP_REPLICA_URL") {
            self.replica_url = Some(url);
        }
        if let Some(token) = env_var("LIBSQL_AUTH_TOKEN") {
            self.replica_token = Some(token);
        }
        if let Some(base_url) = env_var("BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(admin_key) = env_var("ADMIN_KEY") {
            self.admin_key = Some(admin_key);
        }
        if let Some(api_key) = env_var("OPENAI_API_KEY") {
            self.llm.api_key = api_key;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_year > self.max_year {
            return Err(ConfigError::ValidationError(format!(
                "min_year ({}) must not exceed max_year ({})",
                self.min_year, self.max_year
            )));
        }

        self.validate_limit("upload_limit", &self.upload_limit)?;
        self.validate_limit("enhance_limit", &self.enhance_limit)?;

        if self.sweep_interval < Duration::from_secs(1) {
            return Err(ConfigError::ValidationError(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.replica_url.is_some() && self.replica_token.is_none() {
            return Err(ConfigError::ValidationError(
                "replica_url requires LIBSQL_AUTH_TOKEN".to_string(),
            ));
        }

        if self.llm.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "llm.max_tokens must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_limit(&self, name: &str, limit: &LimitConfig) -> Result<(), ConfigError> {
        if limit.max_requests == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{}: max_requests must be at least 1",
                name
            )));
        }
        if limit.window < Duration::from_secs(1) {
            return Err(ConfigError::ValidationError(format!(
                "{}: window_secs must be at least 1",
                name
            )));
        }
        Ok(())
    }

    /// Connection mode for the configured database
    pub fn connection_mode(&self) -> ConnectionMode {
        let path = self.database_path.to_string_lossy().into_owned();
        match (&self.replica_url, &self.replica_token) {
            (Some(url), Some(token)) => ConnectionMode::EmbeddedReplica {
                path,
                url: url.clone(),
                token: token.clone(),
            },
            _ => ConnectionMode::Local(path),
        }
    }

    /// Whether `year` is accepted for upload
    pub fn accepts_year(&self, year: i32) -> bool {
        (self.min_year..=self.max_year).contains(&year)
    }

    /// Share link for a stored record
    pub fn share_url(&self, year: i32, id: &str) -> String {
        format!("{}/{}/{}", self.base_url.trim_end_matches('/'), year, id)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.accepts_year(2024));
        assert!(!config.accepts_year(2019));
        assert!(!config.accepts_year(2031));
    }

    #[test]
    fn test_validate_year_range() {
        let mut config = ServerConfig::default();
        config.min_year = 2025;
        config.max_year = 2024;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("min_year"));
    }

    #[test]
    fn test_validate_limit_zero() {
        let mut config = ServerConfig::default();
        config.upload_limit.max_requests = 0;

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("upload_limit: max_requests"));
    }

    #[test]
    fn test_from_toml() {
        let toml_str = r#"
            addr = "0.0.0.0:8080"
            base_url = "https://wrapped.example.com/"
            max_year = 2026

            [upload_limit]
            max_requests = 10
            window_secs = 60

            [llm]
            model = "gpt-4o"
        "#;

        let config = ServerConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.max_year, 2026);
        assert_eq!(config.min_year, 2020);
        assert_eq!(config.upload_limit, LimitConfig::new(10, 60));
        assert_eq!(config.enhance_limit, LimitConfig::new(50, 300));
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 100);
        assert_eq!(
            config.share_url(2024, "abcd1234"),
            "https://wrapped.example.com/2024/abcd1234"
        );
    }

    #[test]
    fn test_connection_mode() {
        let mut config = ServerConfig::default();
        config.database_path = PathBuf::from("/tmp/wrap.db");
        assert!(matches!(config.connection_mode(), ConnectionMode::Local(ref p) if p == "/tmp/wrap.db"));

        config.replica_url = Some("libsql://wrap.example.com".to_string());
        assert!(config.validate().is_err());

        config.replica_token = Some("token".to_string());
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.connection_mode(),
            ConnectionMode::EmbeddedReplica { ref url, .. } if url == "libsql://wrap.example.com"
        ));
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        let result = ServerConfig::from_toml("sweep_interval_secs = 0");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = ServerConfig::from_toml("min_year = \"soon\"");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("YEARWRAP_ADDR", "127.0.0.1:4100");
        std::env::set_var("ADMIN_KEY", "letmein");
        std::env::set_var("BASE_URL", "");

        let config = ServerConfig::load(None).unwrap();
        assert_eq!(config.addr.port(), 4100);
        assert_eq!(config.admin_key.as_deref(), Some("letmein"));
        assert_eq!(config.base_url, "http://localhost:3000");

        std::env::set_var("YEARWRAP_ADDR", "not an address");
        assert!(ServerConfig::load(None).is_err());

        std::env::remove_var("YEARWRAP_ADDR");
        std::env::remove_var("ADMIN_KEY");
        std::env::remove_var("BASE_URL");
    }

    #[test]
    #[serial]
    fn test_load_replica_url_from_file_with_env_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yearwrap.toml");
        std::fs::write(&path, "replica_url = \"libsql://wrap.example.com\"\n").unwrap();

        std::env::remove_var("LIBSQL_AUTH_TOKEN");
        assert!(matches!(
            ServerConfig::load(Some(&path)),
            Err(ConfigError::ValidationError(_))
        ));

        std::env::set_var("LIBSQL_AUTH_TOKEN", "token");
        let config = ServerConfig::load(Some(&path)).unwrap();
        std::env::remove_var("LIBSQL_AUTH_TOKEN");

        assert_eq!(config.replica_url.as_deref(), Some("libsql://wrap.example.com"));
        assert!(matches!(
            config.connection_mode(),
            ConnectionMode::EmbeddedReplica { .. }
        ));
    }
}
