//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration. File: ~/.config/jdremote/config.toml or /etc/jdremote/config.toml.
/// Env overrides: JDREMOTE_API_URL, JDREMOTE_APP_KEY, JDREMOTE_TIMEOUT_SECS,
/// JDREMOTE_DIRECT_CONNECTION, JDREMOTE_LOCAL_URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Relay base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Application key sent on connect.
    #[serde(default = "default_app_key")]
    pub app_key: String,
    /// `apiVer` of device envelopes.
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    /// Per-request network timeout in seconds (default 3).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Try direct device endpoints before the relay.
    #[serde(default = "default_direct_connection")]
    pub direct_connection: bool,
    /// Base URL of a device reachable without the relay.
    #[serde(default = "default_local_url")]
    pub local_url: String,
}

fn default_api_url() -> String {
    "https://api.jdownloader.org".to_string()
}
fn default_app_key() -> String {
    "jdremote".to_string()
}
fn default_api_version() -> u32 {
    jdremote_core::protocol::API_VERSION
}
fn default_timeout_secs() -> u64 {
    3
}
fn default_direct_connection() -> bool {
    true
}
fn default_local_url() -> String {
    "http://localhost:3128".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            app_key: default_app_key(),
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
            direct_connection: default_direct_connection(),
            local_url: default_local_url(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Parse a TOML file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply JDREMOTE_* overrides from `var`. Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = var("JDREMOTE_API_URL") {
            self.api_url = s;
        }
        if let Some(s) = var("JDREMOTE_APP_KEY") {
            self.app_key = s;
        }
        if let Some(s) = var("JDREMOTE_TIMEOUT_SECS") {
            if let Ok(t) = s.parse::<u64>() {
                self.timeout_secs = t;
            }
        }
        if let Some(s) = var("JDREMOTE_DIRECT_CONNECTION") {
            if let Ok(b) = s.parse::<bool>() {
                self.direct_connection = b;
            }
        }
        if let Some(s) = var("JDREMOTE_LOCAL_URL") {
            self.local_url = s;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/jdremote/config.toml"));
    }
    out.push(PathBuf::from("/etc/jdremote/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match Config::from_file(&path) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring config file");
            None
        }
    }
}
