//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, which authentication deployment the server uses, where
//! credentials are kept, and timeouts.
//!
//! Configuration is stored at `~/.config/alumni/config.json`. Environment
//! variables (`ALUMNI_API_URL`, `ALUMNI_AUTH_MODE`, `ALUMNI_STORE`,
//! `ALUMNI_EMAIL`) override the file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application name used for config/data directory paths
const APP_NAME: &str = "alumni";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// API served by the development backend.
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api/";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on a refresh call. A stalled refresh blocks every request
/// waiting to be retried, so this is kept well below the request timeout.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

pub const ENV_API_URL: &str = "ALUMNI_API_URL";
pub const ENV_AUTH_MODE: &str = "ALUMNI_AUTH_MODE";
pub const ENV_STORE: &str = "ALUMNI_STORE";
pub const ENV_EMAIL: &str = "ALUMNI_EMAIL";

/// How the server authenticates requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Access token held by the client and sent as `Authorization: Bearer`.
    #[default]
    Bearer,
    /// httpOnly session cookies managed by the server.
    Cookie,
}

/// Where credentials are persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl FromStr for AuthMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bearer" | "token" => Ok(AuthMode::Bearer),
            "cookie" | "cookies" => Ok(AuthMode::Cookie),
            other => Err(UnknownVariant {
                kind: "auth mode",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Bearer => f.write_str("bearer"),
            AuthMode::Cookie => f.write_str("cookie"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" | "keychain" => Ok(StoreBackend::Keyring),
            "file" => Ok(StoreBackend::File),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(UnknownVariant {
                kind: "credential store",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub auth_mode: AuthMode,
    pub store: StoreBackend,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_mode: AuthMode::default(),
            store: StoreBackend::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `ALUMNI_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(mode) = lookup(ENV_AUTH_MODE) {
            self.auth_mode = mode.parse()?;
        }
        if let Some(store) = lookup(ENV_STORE) {
            self.store = store.parse()?;
        }
        if let Some(email) = lookup(ENV_EMAIL) {
            self.last_email = Some(email);
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Parsed API base URL, always ending in `/` so relative paths join
    /// underneath it instead of replacing the last segment.
    pub fn base_url(&self) -> Result<Url> {
        let mut url = Url::parse(self.api_url.trim())
            .with_context(|| format!("Invalid API URL '{}'", self.api_url))?;
        if url.cannot_be_a_base() {
            anyhow::bail!("API URL '{}' cannot be used as a base", self.api_url);
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Origin (`scheme://host:port`) the credentials belong to.
    pub fn origin(&self) -> Result<String> {
        Ok(self.base_url()?.origin().ascii_serialization())
    }

    /// Per-origin data directory, e.g. `~/.local/share/alumni/http_localhost_5000`.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(origin_slug(&self.origin()?)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

fn origin_slug(origin: &str) -> String {
    let slug: String = origin
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let mut collapsed = String::with_capacity(slug.len());
    for c in slug.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim_matches('_').to_string()
}
