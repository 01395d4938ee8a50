//! Service configuration
//!
//! Loaded once at startup from a YAML file and validated before anything
//! runs. Everything downstream receives immutable, already-checked values.

use lettre::message::Mailbox;
use recon_common::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::convert::ChannelProfile;
use crate::remote::RemoteEndpoint;

// ============================================================================
// Defaults
// ============================================================================

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "RECON_CONFIG";

/// Configuration file used when neither `--config` nor `RECON_CONFIG` is set
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn default_temp_root() -> PathBuf {
    PathBuf::from("./tmp")
}

fn default_connect_secs() -> u64 {
    30
}

fn default_io_secs() -> u64 {
    120
}

fn default_retry_iterations() -> u32 {
    1
}

fn default_sweep_interval() -> u64 {
    3600 // 1 hour
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Configuration errors; all are fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: '{0}'. Pass --config or set RECON_CONFIG.")]
    FileNotFound(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}. Check the file syntax at the indicated line/column.")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Configuration Types
// ============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the local staging tree
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// SMTP delivery; absent means outcomes are only logged
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,

    pub channels: Vec<ChannelConfig>,

    #[serde(default)]
    pub logging: Option<LogConfig>,
}

/// Remote session timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    /// Read/write timeout applied to the socket and the SSH session
    #[serde(default = "default_io_secs")]
    pub io_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            io_secs: default_io_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn io(&self) -> Duration {
        Duration::from_secs(self.io_secs)
    }
}

/// Email notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub smtp: SmtpConfig,
    pub receivers: Vec<String>,
}

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTlsMode {
    /// Plain text
    None,
    /// STARTTLS when the relay offers it
    #[default]
    Opportunistic,
    /// STARTTLS, fail if unavailable
    Required,
    /// Implicit TLS from the first byte (port 465)
    Wrapper,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Recon <recon@example.com>`
    pub from: String,
    #[serde(default)]
    pub tls: SmtpTlsMode,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
    /// Probe the relay once before the scheduler starts
    #[serde(default = "default_true")]
    pub verify_on_startup: bool,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("timeout_secs", &self.timeout_secs)
            .field("verify_on_startup", &self.verify_on_startup)
            .finish()
    }
}

/// One partner channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Partner name, used in notifications, logs and the staging tree
    pub name: String,
    pub profile: ChannelProfile,

    pub source_path: String,
    pub destination_path: String,
    pub backup_path: String,

    /// Seconds between pipeline ticks
    pub interval_secs: u64,
    /// Pipeline invocations per tick
    #[serde(default = "default_retry_iterations")]
    pub retry_iterations: u32,
    /// Seconds between invocations within one tick
    #[serde(default)]
    pub retry_delay_secs: u64,

    /// Archived files older than this are purged
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    pub source: RemoteEndpoint,
    pub destination: RemoteEndpoint,
}

impl ChannelConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        let name = &self.name;
        if name.trim().is_empty() {
            return Err(ConfigError::invalid("channel name must not be empty"));
        }
        // The name becomes a staging directory component.
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ConfigError::invalid(format!(
                "channel '{}': name must not contain path separators",
                name
            )));
        }

        for (field, value) in [
            ("source_path", &self.source_path),
            ("destination_path", &self.destination_path),
            ("backup_path", &self.backup_path),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "channel '{}': {} must not be empty",
                    name, field
                )));
            }
        }

        for (field, value) in [
            ("interval_secs", self.interval_secs),
            ("retention_secs", self.retention_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("retry_iterations", u64::from(self.retry_iterations)),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(format!(
                    "channel '{}': {} must be greater than zero",
                    name, field
                )));
            }
        }

        for (role, endpoint) in [("source", &self.source), ("destination", &self.destination)] {
            if endpoint.host.trim().is_empty() || endpoint.user.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "channel '{}': {} host and user must be set",
                    name, role
                )));
            }
            if endpoint.port == 0 {
                return Err(ConfigError::invalid(format!(
                    "channel '{}': {} port must not be zero",
                    name, role
                )));
            }
        }

        Ok(())
    }
}

impl NotificationConfig {
    fn validate(&self) -> Result<()> {
        if self.smtp.host.trim().is_empty() {
            return Err(ConfigError::invalid("notifications.smtp.host must be set"));
        }
        if self.smtp.port == 0 {
            return Err(ConfigError::invalid("notifications.smtp.port must not be zero"));
        }
        self.smtp.from.parse::<Mailbox>().map_err(|e| {
            ConfigError::invalid(format!("notifications.smtp.from '{}': {}", self.smtp.from, e))
        })?;

        if self.receivers.is_empty() {
            return Err(ConfigError::invalid("notifications.receivers must not be empty"));
        }
        for receiver in &self.receivers {
            receiver.parse::<Mailbox>().map_err(|e| {
                ConfigError::invalid(format!("notifications.receivers '{}': {}", receiver, e))
            })?;
        }
        Ok(())
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a configuration document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(ConfigError::invalid("at least one channel must be configured"));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            channel.validate()?;
            if !seen.insert(channel.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate channel name '{}'",
                    channel.name
                )));
            }
        }

        if self.timeouts.connect_secs == 0 || self.timeouts.io_secs == 0 {
            return Err(ConfigError::invalid("timeouts must be greater than zero"));
        }

        if let Some(notifications) = &self.notifications {
            notifications.validate()?;
        }

        Ok(())
    }

    /// Look up a channel by name
    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }
}
