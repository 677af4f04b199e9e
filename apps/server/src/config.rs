//! Daemon configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/splitup/server.toml`
//! - Windows: `%APPDATA%/splitup/server.toml`

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use splitup_protocol::{
    CONTROL_IDLE_TIMEOUT, DEFAULT_SEGMENT_SIZE, LOGIN_TIMEOUT, READ_TIMEOUT, WRITE_TIMEOUT,
};
use splitup_server::{DEFAULT_PORT, DEFAULT_SECRET, DEFAULT_USER, ServerConfig};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Address to listen on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Where segments and assembled uploads are written.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Segment size offered to clients, in bytes.
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_secret")]
    pub secret: String,

    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Deadlines in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    pub login: u64,
    pub read: u64,
    pub write: u64,
    pub idle: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login: LOGIN_TIMEOUT.as_secs(),
            read: READ_TIMEOUT.as_secs(),
            write: WRITE_TIMEOUT.as_secs(),
            idle: CONTROL_IDLE_TIMEOUT.as_secs(),
        }
    }
}

fn default_bind_addr() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_segment_size() -> u64 {
    DEFAULT_SEGMENT_SIZE
}

fn default_user() -> String {
    DEFAULT_USER.into()
}

fn default_secret() -> String {
    DEFAULT_SECRET.into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            storage_dir: default_storage_dir(),
            segment_size: default_segment_size(),
            user: default_user(),
            secret: default_secret(),
            timeouts: Timeouts::default(),
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

        // The file holds the login secret.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let bind_addr: SocketAddr = self
            .bind_addr
            .parse()
            .with_context(|| format!("invalid bind address {:?}", self.bind_addr))?;
        anyhow::ensure!(self.segment_size > 0, "segment_size must be positive");

        Ok(ServerConfig {
            bind_addr,
            storage_dir: self.storage_dir.clone(),
            segment_size: self.segment_size,
            login_timeout: Duration::from_secs(self.timeouts.login),
            read_timeout: Duration::from_secs(self.timeouts.read),
            write_timeout: Duration::from_secs(self.timeouts.write),
            idle_timeout: Duration::from_secs(self.timeouts.idle),
        })
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("splitup").join("server.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("splitup")
            .join("server.toml")
    }
}
