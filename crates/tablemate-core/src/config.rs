//! Client configuration management.
//!
//! This module handles loading the client configuration: the API base URL,
//! the origin the client runs under, cookie and header names used for
//! session auth, endpoint paths, and timeouts.
//!
//! Configuration is stored at `~/.config/tablemate/config.json` and can be
//! overridden with `TABLEMATE_API_URL` / `TABLEMATE_APP_ORIGIN`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Application name used for config directory paths
const APP_NAME: &str = "tablemate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const ENV_API_URL: &str = "TABLEMATE_API_URL";

/// Environment variable overriding the app origin
pub const ENV_APP_ORIGIN: &str = "TABLEMATE_APP_ORIGIN";

/// Default anti-CSRF header name
pub const DEFAULT_CSRF_HEADER: &str = "X-CSRF-Token";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL every request path is resolved against.
    pub api_base_url: String,
    /// Origin the client is deployed under. `None` means same-origin with the API.
    pub app_origin: Option<String>,
    pub csrf_header: String,
    /// CSRF cookie names in lookup order.
    pub csrf_cookie_names: Vec<String>,
    /// Cookie whose presence means a refresh can be attempted.
    pub refresh_cookie: String,
    /// Non-HttpOnly companion of the session cookie.
    pub session_hint_cookie: String,
    /// Legacy directly-readable session token cookie.
    pub session_token_cookie: String,
    /// Optional endpoint handing out CSRF tokens.
    pub csrf_endpoint: Option<String>,
    pub login_path: String,
    pub logout_path: String,
    pub refresh_path: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            app_origin: None,
            csrf_header: DEFAULT_CSRF_HEADER.to_string(),
            csrf_cookie_names: vec!["__Host-csrf_token".to_string(), "csrf_token".to_string()],
            refresh_cookie: "refresh_token".to_string(),
            session_hint_cookie: "logged_in".to_string(),
            session_token_cookie: "session_token".to_string(),
            csrf_endpoint: None,
            login_path: "/login".to_string(),
            logout_path: "/logout".to_string(),
            refresh_path: "/refresh".to_string(),
            request_timeout_secs: 30,
            refresh_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    /// Config pointing at the given API base URL, everything else defaulted.
    pub fn for_api(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    /// Load config from disk, falling back to defaults, then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
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

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Ok(origin) = std::env::var(ENV_APP_ORIGIN) {
            self.app_origin = Some(origin).filter(|o| !o.is_empty());
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.api_base_url))
    }

    /// Resolve a request path against the API base URL.
    ///
    /// Absolute URLs are accepted only on the API origin, so session
    /// credentials never leave it.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let url = Url::parse(path).with_context(|| format!("Invalid URL: {}", path))?;
            if url.origin() != self.base_url()?.origin() {
                anyhow::bail!(
                    "Refusing to send credentials to foreign origin: {}",
                    url.origin().ascii_serialization()
                );
            }
            return Ok(url);
        }
        let base = self.api_base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let joined = format!("{}/{}", base, path);
        Url::parse(&joined).with_context(|| format!("Invalid request path: {}", joined))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}
