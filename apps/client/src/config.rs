//! Uploader configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/splitup/client.toml`
//! - Windows: `%APPDATA%/splitup/client.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use splitup_client::{ClientConfig, ConnectPolicy, RoundPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// `host:port` of the upload server.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_secret")]
    pub secret: String,

    #[serde(default)]
    pub retry: Retry,
}

/// Connection and round retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Retry {
    pub connect_attempts: u32,
    pub connect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_rounds: u32,
    pub round_delay_ms: u64,
    pub round_max_delay_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        let connect = ConnectPolicy::default();
        let rounds = RoundPolicy::default();
        Self {
            connect_attempts: connect.attempts,
            connect_delay_ms: connect.retry_delay.as_millis() as u64,
            connect_timeout_ms: connect.connect_timeout.as_millis() as u64,
            max_rounds: rounds.max_rounds,
            round_delay_ms: rounds.initial_delay.as_millis() as u64,
            round_max_delay_ms: rounds.max_delay.as_millis() as u64,
        }
    }
}

fn default_server_addr() -> String {
    ClientConfig::default().server_addr
}

fn default_user() -> String {
    ClientConfig::default().user
}

fn default_secret() -> String {
    ClientConfig::default().secret
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            user: default_user(),
            secret: default_secret(),
            retry: Retry::default(),
        }
    }
}

impl Config {
    /// Loads the configuration, writing a default file on first run.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        let retry = &self.retry;
        ClientConfig {
            server_addr: self.server_addr.clone(),
            user: self.user.clone(),
            secret: self.secret.clone(),
            connect: ConnectPolicy {
                attempts: retry.connect_attempts,
                retry_delay: Duration::from_millis(retry.connect_delay_ms),
                connect_timeout: Duration::from_millis(retry.connect_timeout_ms),
            },
            rounds: RoundPolicy {
                max_rounds: retry.max_rounds,
                initial_delay: Duration::from_millis(retry.round_delay_ms),
                max_delay: Duration::from_millis(retry.round_max_delay_ms),
                ..RoundPolicy::default()
            },
            ..ClientConfig::default()
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("splitup").join("client.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("splitup")
            .join("client.toml")
    }
}
