//! Layered configuration: built-in defaults, an optional TOML file, then
//! `PWD_PORT__*` environment variables.

use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use pwd_protocol::PacketSize;
use serde::{Deserialize, Serialize};

use crate::diagnostic::DEFAULT_LOG_PATH;
use crate::error::{PortError, PortResult};

pub const APP_NAME: &str = "pwd-port";

/// Prefix for environment overrides, e.g. `PWD_PORT__CHANNEL__PACKET=2`.
pub const ENV_PREFIX: &str = "PWD_PORT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub logging: LoggingConfig,
    pub diagnostic: DiagnosticConfig,
    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for the stderr subscriber when no CLI flag overrides it.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticConfig {
    /// Append-only diagnostic log file. `~` and `$VARS` are expanded.
    pub path: String,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_LOG_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Length header width in bytes; must match the host's `{packet, N}`.
    pub packet: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { packet: 4 }
    }
}

impl PortConfig {
    /// Load from `path` (missing file is fine) and the environment.
    pub fn load(path: &Path) -> PortResult<Self> {
        let defaults = PortConfig::default();
        let built = Config::builder()
            .set_default("logging.level", defaults.logging.level)?
            .set_default("diagnostic.path", defaults.diagnostic.path)?
            .set_default("channel.packet", i64::from(defaults.channel.packet))?
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: PortConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PortResult<()> {
        self.packet_size()?;
        if self.diagnostic.path.trim().is_empty() {
            return Err(PortError::InvalidConfig(
                "diagnostic.path must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn packet_size(&self) -> PortResult<PacketSize> {
        PacketSize::try_from(self.channel.packet).map_err(|_| {
            PortError::InvalidConfig(format!(
                "channel.packet must be 1, 2 or 4, got {}",
                self.channel.packet
            ))
        })
    }

    /// Diagnostic log path with `~` and environment variables expanded.
    pub fn diagnostic_path(&self) -> PortResult<PathBuf> {
        expand_str_path(&self.diagnostic.path)
    }
}

pub fn expand_str_path(text: &str) -> PortResult<PathBuf> {
    let expanded = shellexpand::full(text)
        .map_err(|err| PortError::InvalidConfig(format!("expanding path {text:?}: {err}")))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// `$XDG_CONFIG_HOME/pwd-port/config.toml`, falling back to the platform
/// config directory and then `~/.config`.
pub fn default_config_path() -> PortResult<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME).join("config.toml"));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME).join("config.toml"));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME).join("config.toml"))
        .ok_or_else(|| {
            PortError::InvalidConfig("unable to determine configuration directory".into())
        })
}
