//! Gateway configuration and config-file loading

use crate::Settings;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name searched in the working directory
const LOCAL_CONFIG: &str = "synth-gate.toml";

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host address to listen on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect and idle-read timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Upper bound on one upstream response in seconds (default: 120)
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
            stream_timeout_secs: default_stream_timeout(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8848
}

fn default_timeout() -> u64 {
    30
}

fn default_stream_timeout() -> u64 {
    120
}

/// Contents of a `synth-gate.toml` file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub provider: Settings,
    pub gateway: GatewayConfig,
}

impl ConfigFile {
    /// Parse a config file
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load `explicit` if given, else the first default location that exists.
    ///
    /// Returns the defaults when no file is found; an explicit path that
    /// cannot be read is an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_locations().into_iter().find(|p| p.exists()),
        };
        match path {
            Some(path) => {
                tracing::info!("Loading config from {}", path.display());
                Ok((Self::from_path(&path)?, Some(path)))
            }
            None => {
                tracing::info!("No config file found, using defaults");
                Ok((Self::default(), None))
            }
        }
    }
}

/// `./synth-gate.toml`, then `~/.config/synth-gate/config.toml`
fn default_locations() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join("synth-gate").join("config.toml"));
    }
    paths
}
