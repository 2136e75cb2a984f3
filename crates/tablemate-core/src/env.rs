//! Environment detection for auth mode selection.
//!
//! The request client never inspects cookies directly. Everything it needs
//! to know about the surrounding environment goes through an
//! [`EnvironmentProbe`], so tests can simulate cross-origin deployments and
//! missing cookies without a real cookie jar.

use std::sync::Arc;

use cookie::Cookie;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;

use crate::config::ClientConfig;

pub trait EnvironmentProbe: Send + Sync {
    /// True when the client origin differs from the API origin.
    fn is_cross_origin(&self) -> bool;

    /// Best-effort hint that an HttpOnly session cookie is present.
    fn has_session_cookie_heuristic(&self) -> bool;

    fn read_csrf_cookie(&self) -> Option<String>;

    /// True when a refresh-capability cookie is present.
    fn has_refresh_cookie(&self) -> bool;

    /// Legacy directly-readable session token, if the deployment sets one.
    fn read_session_token_cookie(&self) -> Option<String> {
        None
    }
}

/// Probe backed by the cookie jar shared with the cookie-mode HTTP client.
pub struct CookieJarProbe {
    jar: Arc<Jar>,
    api_url: Url,
    app_origin: Option<Url>,
    csrf_cookie_names: Vec<String>,
    refresh_cookie: String,
    session_hint_cookie: String,
    session_token_cookie: String,
}

impl CookieJarProbe {
    pub fn new(jar: Arc<Jar>, config: &ClientConfig) -> anyhow::Result<Self> {
        let api_url = config.base_url()?;
        let app_origin = match config.app_origin.as_deref() {
            Some(origin) => Some(
                Url::parse(origin)
                    .map_err(|e| anyhow::anyhow!("Invalid app origin {}: {}", origin, e))?,
            ),
            None => None,
        };

        Ok(Self {
            jar,
            api_url,
            app_origin,
            csrf_cookie_names: config.csrf_cookie_names.clone(),
            refresh_cookie: config.refresh_cookie.clone(),
            session_hint_cookie: config.session_hint_cookie.clone(),
            session_token_cookie: config.session_token_cookie.clone(),
        })
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let header = self.jar.cookies(&self.api_url)?;
        let header = header.to_str().ok()?;
        find_cookie(header, name)
    }
}

impl EnvironmentProbe for CookieJarProbe {
    fn is_cross_origin(&self) -> bool {
        match self.app_origin {
            Some(ref origin) => origin.origin() != self.api_url.origin(),
            None => false,
        }
    }

    fn has_session_cookie_heuristic(&self) -> bool {
        self.cookie(&self.session_hint_cookie).is_some()
    }

    fn read_csrf_cookie(&self) -> Option<String> {
        self.csrf_cookie_names
            .iter()
            .find_map(|name| self.cookie(name))
    }

    fn has_refresh_cookie(&self) -> bool {
        self.cookie(&self.refresh_cookie).is_some()
    }

    fn read_session_token_cookie(&self) -> Option<String> {
        self.cookie(&self.session_token_cookie)
    }
}

/// Find a non-empty cookie value in a `Cookie:` header string.
/// Surrounding double quotes are stripped from the value.
pub(crate) fn find_cookie(header: &str, name: &str) -> Option<String> {
    Cookie::split_parse(header)
        .filter_map(Result::ok)
        .filter(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value_trimmed().to_string())
        .find(|value| !value.is_empty())
}
