//! Server configuration.
//!
//! Configuration is layered:
//! - The first TOML file found among [`CONFIG_PATHS`]
//! - Environment variables (`WHISPER_*`, nested keys joined with `__`)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use whisper_core::HubConfig;

/// Files probed by [`Config::load`], in order.
pub const CONFIG_PATHS: [&str; 3] = [
    "whisper.toml",
    "/etc/whisper/whisper.toml",
    "~/.config/whisper/whisper.toml",
];

const ENV_PREFIX: &str = "WHISPER";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Chat history storage.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Hub tuning.
    #[serde(default)]
    pub hub: HubSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Token verification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access tokens. Required.
    #[serde(default)]
    pub jwt_secret: String,
}

/// Chat history storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://whisper.db?mode=rwc`. Empty keeps
    /// history in memory.
    #[serde(default)]
    pub url: String,
}

/// Hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Depth of each hub command channel.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/api/ws".to_string()
}

fn default_command_capacity() -> usize {
    1024
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            hub: HubSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first existing file plus the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is
    /// incomplete (see [`Config::validate`]).
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        let config = Self::layered(file.as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Merge an optional file with `WHISPER_*` environment overrides.
    fn layered(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            tracing::debug!(path, "Loading config file");
            builder = builder.add_source(config::File::new(path, config::FileFormat::Toml));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Reject configurations the server cannot start with.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWT secret is empty or the socket path does
    /// not start with `/`.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            bail!("auth.jwt_secret must be set (e.g. WHISPER_AUTH__JWT_SECRET)");
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!(
                "transport.websocket_path must start with '/': {}",
                self.transport.websocket_path
            );
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Hub settings in the form the hub takes them.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            command_capacity: self.hub.command_capacity,
        }
    }
}
