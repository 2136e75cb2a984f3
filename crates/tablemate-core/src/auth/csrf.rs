use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Method, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::request::Body;
use crate::api::transport::{Credentials, OutgoingRequest, Transport};
use crate::env::EnvironmentProbe;

#[derive(Debug, Deserialize)]
struct CsrfBody {
    #[serde(alias = "csrfToken", alias = "csrf_token")]
    token: String,
}

/// Methods that change server state and therefore need a CSRF token.
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Last-writer-wins cache of the anti-CSRF token.
///
/// A stale value costs one rejected request, so updates are unconditional
/// and unordered.
pub struct CsrfCache {
    header: HeaderName,
    token: RwLock<Option<String>>,
    probe: Arc<dyn EnvironmentProbe>,
    endpoint: Option<Url>,
    transport: Arc<dyn Transport>,
}

impl CsrfCache {
    pub fn new(
        header: HeaderName,
        probe: Arc<dyn EnvironmentProbe>,
        endpoint: Option<Url>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            header,
            token: RwLock::new(None),
            probe,
            endpoint,
            transport,
        }
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header
    }

    pub fn current(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn update(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }

    /// Cache the token echoed in a response, if any. Returns true if one was found.
    pub fn observe(&self, headers: &HeaderMap) -> bool {
        match headers.get(&self.header).and_then(|v| v.to_str().ok()) {
            Some(token) if !token.is_empty() => {
                debug!("CSRF token rotated by response header");
                self.update(token);
                true
            }
            _ => false,
        }
    }

    /// Re-read the CSRF cookie, overwriting the cache when it is present.
    pub fn reload_from_cookie(&self) -> Option<String> {
        let token = self.probe.read_csrf_cookie()?;
        self.update(token.clone());
        Some(token)
    }

    /// Token to attach for `method`. Non-mutating methods need none.
    pub async fn ensure_for(&self, method: &Method) -> Option<String> {
        if !is_mutating(method) {
            return None;
        }
        if let Some(token) = self.current() {
            return Some(token);
        }
        if let Some(token) = self.reload_from_cookie() {
            return Some(token);
        }
        self.fetch_from_endpoint().await
    }

    async fn fetch_from_endpoint(&self) -> Option<String> {
        let url = self.endpoint.clone()?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let request = OutgoingRequest {
            method: Method::GET,
            url,
            headers,
            body: Body::Empty,
            credentials: Credentials::Include,
        };

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to fetch CSRF token");
                return None;
            }
        };

        if self.observe(response.headers()) {
            return self.current();
        }
        if !response.is_success() {
            warn!(status = %response.status(), "CSRF endpoint returned an error");
            return None;
        }
        match response.json::<CsrfBody>() {
            Ok(body) => {
                self.update(body.token.clone());
                Some(body.token)
            }
            Err(e) => {
                warn!(error = %e, "CSRF endpoint response carried no token");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::api::response::ApiResponse;
    use reqwest::StatusCode;

    struct CookieProbe(Option<&'static str>);

    impl EnvironmentProbe for CookieProbe {
        fn is_cross_origin(&self) -> bool {
            false
        }
        fn has_session_cookie_heuristic(&self) -> bool {
            false
        }
        fn read_csrf_cookie(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
        fn has_refresh_cookie(&self) -> bool {
            false
        }
    }

    struct JsonTransport(&'static str);

    #[async_trait::async_trait]
    impl Transport for JsonTransport {
        async fn send(&self, request: OutgoingRequest) -> Result<ApiResponse, ApiError> {
            assert_eq!(request.method, Method::GET);
            Ok(ApiResponse::new(
                StatusCode::OK,
                HeaderMap::new(),
                self.0.as_bytes().to_vec().into(),
            ))
        }
    }

    fn cache(cookie: Option<&'static str>, endpoint: Option<&str>, body: &'static str) -> CsrfCache {
        CsrfCache::new(
            HeaderName::from_static("x-csrf-token"),
            Arc::new(CookieProbe(cookie)),
            endpoint.map(|e| Url::parse(e).unwrap()),
            Arc::new(JsonTransport(body)),
        )
    }

    #[test]
    fn test_is_mutating() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::PUT));
        assert!(is_mutating(&Method::PATCH));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::HEAD));
    }

    #[tokio::test]
    async fn test_get_needs_no_token() {
        let cache = cache(Some("from-cookie"), None, "");
        cache.update("cached");
        assert_eq!(cache.ensure_for(&Method::GET).await, None);
        assert_eq!(cache.ensure_for(&Method::HEAD).await, None);
    }

    #[tokio::test]
    async fn test_post_prefers_cached_then_cookie() {
        let cache = cache(Some("from-cookie"), None, "");
        assert_eq!(cache.ensure_for(&Method::POST).await.as_deref(), Some("from-cookie"));
        cache.update("cached");
        assert_eq!(cache.ensure_for(&Method::POST).await.as_deref(), Some("cached"));
    }

    #[tokio::test]
    async fn test_falls_back_to_endpoint() {
        let cache = cache(None, Some("http://api.test/csrf"), r#"{"csrfToken":"from-endpoint"}"#);
        assert_eq!(
            cache.ensure_for(&Method::DELETE).await.as_deref(),
            Some("from-endpoint")
        );
        assert_eq!(cache.current().as_deref(), Some("from-endpoint"));
    }

    #[tokio::test]
    async fn test_no_source_yields_none() {
        let cache = cache(None, None, "");
        assert_eq!(cache.ensure_for(&Method::POST).await, None);
    }

    #[test]
    fn test_observe_overwrites() {
        let cache = cache(None, None, "");
        cache.update("old");
        let mut headers = HeaderMap::new();
        headers.insert("x-csrf-token", HeaderValue::from_static("new"));
        assert!(cache.observe(&headers));
        assert_eq!(cache.current().as_deref(), Some("new"));
        assert!(!cache.observe(&HeaderMap::new()));
        assert_eq!(cache.current().as_deref(), Some("new"));
    }
}
