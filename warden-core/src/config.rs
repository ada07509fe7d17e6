//! Configuration management
//!
//! Layered as defaults, then an optional TOML file, then `WARDEN_*` environment
//! variables (`__` separates nested keys, e.g. `WARDEN_REMOTE__URL`).

use crate::error::{ErrorContext, WardenError, WardenResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Values that mark a remote setting as copied from a template rather than configured
const PLACEHOLDER_MARKERS: [&str; 4] = ["your-project-url", "your-anon-key", "your-", "placeholder"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub startup: StartupSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote identity backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Endpoint URL of the hosted identity service
    pub url: Option<String>,
    /// Public (anonymous) API key
    pub api_key: Option<String>,
    /// Elevated key required for user provisioning and deletion
    pub service_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            service_key: None,
            timeout_seconds: 30,
        }
    }
}

impl RemoteSettings {
    /// Whether both the endpoint and the key look like real values.
    /// Absent, empty or placeholder values force local mode.
    pub fn is_configured(&self) -> bool {
        let (Some(url), Some(key)) = (self.url.as_deref(), self.api_key.as_deref()) else {
            return false;
        };

        if is_placeholder(url) || is_placeholder(key) {
            return false;
        }

        url::Url::parse(url).is_ok()
    }
}

fn is_placeholder(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value.is_empty() || PLACEHOLDER_MARKERS.iter().any(|m| value.contains(m))
}

/// Local storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Base directory for local data (`~` is expanded)
    pub data_dir: String,
    /// SQLite database file name inside `data_dir`
    pub database_file: String,
    /// Directory name inside `data_dir` for client key/value storage
    pub client_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.warden".to_string(),
            database_file: "warden.db".to_string(),
            client_dir: "client".to_string(),
        }
    }
}

impl StorageSettings {
    /// Data directory with `~` expanded to the home directory
    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_path().join(&self.database_file)
    }

    pub fn client_path(&self) -> PathBuf {
        self.data_path().join(&self.client_dir)
    }
}

/// Startup readiness guard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupSettings {
    /// How long the surrounding application waits for initialization
    pub readiness_timeout_seconds: u64,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            readiness_timeout_seconds: 15,
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches(['/', '\\'])),
        _ => PathBuf::from(path),
    }
}

impl WardenConfig {
    /// Load configuration from defaults, an optional file, and the environment
    pub fn load(path: Option<&Path>) -> WardenResult<Self> {
        let defaults = config::Config::try_from(&WardenConfig::default()).map_err(|e| {
            WardenError::Config {
                message: format!("Failed to build default configuration: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("config").with_operation("defaults"),
            }
        })?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<WardenConfig>())
            .map_err(|e| WardenError::Config {
                message: format!("Failed to load configuration: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("config")
                    .with_operation("load")
                    .with_suggestion("Check TOML syntax and WARDEN_* environment variables"),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file only
    pub fn from_file<P: AsRef<Path>>(path: P) -> WardenResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| WardenError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: WardenConfig = toml::from_str(&content).map_err(|e| WardenError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> WardenResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| WardenError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| WardenError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> WardenResult<()> {
        if self.remote.timeout_seconds == 0 {
            return Err(WardenError::Config {
                message: "Remote timeout_seconds must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set remote.timeout_seconds to a positive value"),
            });
        }

        if self.startup.readiness_timeout_seconds == 0 {
            return Err(WardenError::Config {
                message: "Startup readiness_timeout_seconds must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set startup.readiness_timeout_seconds to a positive value"),
            });
        }

        if self.storage.database_file.trim().is_empty() {
            return Err(WardenError::Config {
                message: "Storage database_file must not be empty".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set storage.database_file, e.g. \"warden.db\""),
            });
        }

        Ok(())
    }
}
