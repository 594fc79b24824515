//! Client configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! includes the API base URL, platform headers, the storage backend and the
//! device identifier sent at sign-in.
//!
//! Configuration is stored at `~/.config/bottleplug/config.json`; a few
//! settings can be overridden from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "bottleplug";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// `X-Platform` value when the file leaves the platform unset
pub const DEFAULT_PLATFORM: &str = "web";

/// Backend used when no base URL is configured
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";

/// Origin prepended to path-only base URLs such as `/api/v1`
const DEFAULT_BACKEND_HOST: &str = "http://localhost";
const DEFAULT_BACKEND_PORT: u16 = 8000;

/// Fixed wall-clock bound for every API call.
/// A timed-out call is a failure and is not retried.
const REQUEST_TIMEOUT_SECS: u64 = 10;

pub const ENV_API_BASE_URL: &str = "BOTTLEPLUG_API_BASE_URL";
pub const ENV_ANONYMOUS_TOKEN: &str = "BOTTLEPLUG_ANON_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Encrypted,
    Keychain,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Raw base URL as configured; see `resolve_api_base_url`
    pub api_base_url: Option<String>,
    /// Value of the `X-Platform` header; `None` means the caller's default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Value of the `X-App-Version` header
    pub app_version: String,
    /// Token used for anonymous catalog access when nobody is signed in
    pub anonymous_token: Option<String>,
    pub timeout_secs: u64,
    pub device_id: Option<String>,
    /// Notification socket URL; derived from the API base URL when unset
    pub notifications_url: Option<String>,
    pub storage: StorageBackend,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            platform: None,
            app_version: "1.0.0".to_string(),
            anonymous_token: None,
            timeout_secs: REQUEST_TIMEOUT_SECS,
            device_id: None,
            notifications_url: None,
            storage: StorageBackend::default(),
        }
    }
}

/// Resolve a configured base URL into an absolute URL without a trailing slash.
///
/// - empty or missing: the default backend
/// - `http(s)://...`: used as is
/// - `/api/v1`: attached to the default backend host and port
/// - `:9000/api/v1`: attached to the default backend host
/// - anything else: the default backend
pub fn resolve_api_base_url(raw: Option<&str>) -> String {
    let base = raw.map(str::trim).unwrap_or_default();
    if base.is_empty() {
        return DEFAULT_API_BASE_URL.to_string();
    }

    let lower = base.to_ascii_lowercase();
    let resolved = if lower.starts_with("http://") || lower.starts_with("https://") {
        base.to_string()
    } else if base.starts_with('/') {
        format!("{}:{}{}", DEFAULT_BACKEND_HOST, DEFAULT_BACKEND_PORT, base)
    } else if base.starts_with(':') {
        format!("{}{}", DEFAULT_BACKEND_HOST, base)
    } else {
        return DEFAULT_API_BASE_URL.to_string();
    };

    resolved.trim_end_matches('/').to_string()
}

/// Derive the notification socket URL from an API base URL:
/// `http://host:8000/api/v1` becomes `ws://host:8000/ws/notifications/`.
pub fn notifications_url_for(api_base_url: &str) -> String {
    let (scheme, rest) = if let Some(rest) = api_base_url.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = api_base_url.strip_prefix("http://") {
        ("ws", rest)
    } else {
        ("ws", api_base_url)
    };
    let host = rest.split('/').next().unwrap_or(rest);
    format!("{}://{}/ws/notifications/", scheme, host)
}

fn generate_device_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("device_{}_{}", Utc::now().timestamp_millis(), suffix.to_ascii_lowercase())
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: Some(api_base_url.into()),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for persistent token storage
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply environment overrides on top of the file configuration
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_BASE_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = Some(url);
            }
        }
        if let Ok(token) = std::env::var(ENV_ANONYMOUS_TOKEN) {
            if !token.is_empty() {
                self.anonymous_token = Some(token);
            }
        }
    }

    /// Absolute API base URL without a trailing slash
    pub fn api_base_url(&self) -> String {
        resolve_api_base_url(self.api_base_url.as_deref())
    }

    pub fn notifications_url(&self) -> String {
        self.notifications_url
            .clone()
            .unwrap_or_else(|| notifications_url_for(&self.api_base_url()))
    }

    /// Configured platform, falling back to `DEFAULT_PLATFORM`
    pub fn platform(&self) -> &str {
        self.platform.as_deref().unwrap_or(DEFAULT_PLATFORM)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Device identifier sent at sign-in, generated on first use
    pub fn device_id_or_generate(&mut self) -> String {
        self.device_id.get_or_insert_with(generate_device_id).clone()
    }
}
