//! Authenticated request client for the tablemate API.
//!
//! Every request picks cookie or bearer auth afresh, attaches the matching
//! headers, and recovers at most once from an expired cookie session by
//! joining the shared session refresh and resending.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::flow::{can_fall_back, interpret, select_mode, Attempt, RequestState, Verdict};
use super::request::{AuthMode, Body, Request};
use super::response::ApiResponse;
use super::transport::{Credentials, OutgoingRequest, ReqwestTransport, Transport};
use super::ApiError;
use crate::auth::{CredentialStore, CsrfCache, MemoryStorage, RefreshCoordinator, SessionContext, TokenStorage};
use crate::config::ClientConfig;
use crate::env::{CookieJarProbe, EnvironmentProbe};
use crate::signal::{TerminalReason, TracingHandler, UnauthenticatedHandler, UnauthenticatedSignal};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct LoginResponse {
    #[serde(alias = "accessToken", alias = "access_token")]
    token: Option<String>,
}

/// API client for the tablemate service.
/// Clone is cheap - all state lives behind an Arc.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    context: Arc<SessionContext>,
    transport: Arc<dyn Transport>,
    refresher: RefreshCoordinator,
    on_unauthenticated: Arc<dyn UnauthenticatedHandler>,
}

/// Assembles an `ApiClient`, filling anything not supplied with the
/// cookie-jar backed defaults.
pub struct ApiClientBuilder {
    config: ClientConfig,
    jar: Option<Arc<Jar>>,
    storage: Option<Box<dyn TokenStorage>>,
    probe: Option<Arc<dyn EnvironmentProbe>>,
    transport: Option<Arc<dyn Transport>>,
    on_unauthenticated: Option<Arc<dyn UnauthenticatedHandler>>,
}

impl ApiClientBuilder {
    pub fn jar(mut self, jar: Arc<Jar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn storage(mut self, storage: Box<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn EnvironmentProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn on_unauthenticated(mut self, handler: Arc<dyn UnauthenticatedHandler>) -> Self {
        self.on_unauthenticated = Some(handler);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let config = self.config;
        let jar = self.jar.unwrap_or_default();

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(Arc::clone(&jar), config.request_timeout())
                    .context("Failed to build HTTP client")?,
            ),
        };
        let probe: Arc<dyn EnvironmentProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(CookieJarProbe::new(jar, &config)?),
        };
        let storage = self
            .storage
            .unwrap_or_else(|| Box::new(MemoryStorage::default()));

        let csrf_header = reqwest::header::HeaderName::from_bytes(config.csrf_header.as_bytes())
            .with_context(|| format!("Invalid CSRF header name: {}", config.csrf_header))?;
        let csrf_endpoint = match config.csrf_endpoint.as_deref() {
            Some(path) => Some(config.resolve(path)?),
            None => None,
        };

        let credentials = CredentialStore::new(storage, Arc::clone(&probe));
        let csrf = CsrfCache::new(csrf_header, Arc::clone(&probe), csrf_endpoint, Arc::clone(&transport));
        let context = Arc::new(SessionContext::new(credentials, csrf, probe));

        let handler = self
            .on_unauthenticated
            .unwrap_or_else(|| Arc::new(TracingHandler));

        ApiClient::with_context(config, context, transport, handler)
    }
}

impl ApiClient {
    /// Create a client with the default cookie jar, reqwest transport and
    /// in-memory token storage.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            jar: None,
            storage: None,
            probe: None,
            transport: None,
            on_unauthenticated: None,
        }
    }

    /// Create a client over an existing session context.
    pub fn with_context(
        config: ClientConfig,
        context: Arc<SessionContext>,
        transport: Arc<dyn Transport>,
        on_unauthenticated: Arc<dyn UnauthenticatedHandler>,
    ) -> Result<Self> {
        let refresh_url = config.resolve(&config.refresh_path)?;
        let refresher = RefreshCoordinator::new(
            Arc::clone(&context),
            Arc::clone(&transport),
            refresh_url,
            config.refresh_timeout(),
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                context,
                transport,
                refresher,
                on_unauthenticated,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.inner.context
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.context.credentials
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.inner.refresher
    }

    // ========================================================================
    // Request dispatch
    // ========================================================================

    /// Send a request with session auth, refreshing and retrying at most
    /// once on an expired cookie session. Non-auth statuses come back
    /// untouched; only transport failures become errors.
    pub async fn fetch(&self, request: Request) -> Result<ApiResponse, ApiError> {
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.inner.config.request_timeout());

        match tokio::time::timeout(timeout, self.drive(&request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(method = %request.method, path = %request.path, "Request timed out");
                Err(ApiError::Timeout)
            }
        }
    }

    async fn drive(&self, request: &Request) -> Result<ApiResponse, ApiError> {
        let url = self
            .inner
            .config
            .resolve(&request.path)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

        let mut attempt = Attempt::default();
        let mut state = RequestState::Init;
        loop {
            state = match state {
                RequestState::Done(response) => return Ok(response),
                RequestState::Failed(error) => return Err(error),
                state => self.step(request, &url, state, &mut attempt).await,
            };
        }
    }

    /// One transition of the request state machine.
    async fn step(
        &self,
        request: &Request,
        url: &Url,
        state: RequestState,
        attempt: &mut Attempt,
    ) -> RequestState {
        let context = &self.inner.context;

        match state {
            RequestState::Init => {
                let mode = select_mode(
                    request.has_explicit_auth(),
                    context.force_bearer(),
                    context.probe.is_cross_origin(),
                    context.credentials.get().is_some(),
                );
                debug!(method = %request.method, path = %request.path, ?mode, "Auth mode selected");
                RequestState::ModeSelected(mode)
            }

            RequestState::ModeSelected(mode) => match self.send(request, url, mode).await {
                Ok((mode, response)) => RequestState::Sent { mode, response },
                Err(error) => {
                    let has_bearer = context.credentials.get().is_some();
                    if can_fall_back(mode, &error, *attempt, has_bearer) {
                        warn!(
                            path = %request.path,
                            error = %error,
                            "Cookie request failed at network level, retrying with bearer token"
                        );
                        attempt.fell_back = true;
                        context.set_force_bearer(true);
                        RequestState::ModeSelected(AuthMode::Bearer)
                    } else {
                        RequestState::Failed(error)
                    }
                }
            },

            RequestState::Sent { mode, response } => {
                context.csrf.observe(response.headers());
                if mode == AuthMode::Cookie && response.is_success() {
                    context.credentials.note_authenticated();
                }

                match interpret(mode, response.status(), attempt.retried()) {
                    Verdict::PassThrough => RequestState::Done(response),
                    Verdict::Refresh => RequestState::Retrying { response },
                    Verdict::Terminal(reason) => {
                        self.signal_unauthenticated(request, &response, reason);
                        RequestState::Done(response)
                    }
                }
            }

            RequestState::Retrying { response } => {
                attempt.refreshed = true;
                if self.inner.refresher.refresh().await {
                    debug!(path = %request.path, "Session refreshed, resending request");
                    RequestState::ModeSelected(AuthMode::Cookie)
                } else {
                    self.signal_unauthenticated(request, &response, TerminalReason::RefreshFailed);
                    RequestState::Done(response)
                }
            }

            done @ (RequestState::Done(_) | RequestState::Failed(_)) => done,
        }
    }

    /// Attach mode-specific headers and put the request on the wire.
    /// Returns the mode actually used.
    async fn send(
        &self,
        request: &Request,
        url: &Url,
        mode: AuthMode,
    ) -> Result<(AuthMode, ApiResponse), ApiError> {
        let context = &self.inner.context;
        let mut headers = request.headers.clone();
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }
        if matches!(request.body, Body::Json(_)) && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let bearer = match mode {
            AuthMode::Bearer => context.credentials.get(),
            _ => None,
        };

        let (mode, credentials) = match (mode, bearer) {
            (AuthMode::Explicit, _) => (AuthMode::Explicit, Credentials::Omit),
            (AuthMode::Bearer, Some(credential)) => {
                if credential.is_expiring_soon() {
                    debug!(
                        expires_in = ?credential.expires_in_seconds(),
                        path = %request.path,
                        "Bearer token expiring soon"
                    );
                }
                headers.insert(AUTHORIZATION, bearer_header(&credential.value)?);
                (AuthMode::Bearer, Credentials::Omit)
            }
            (AuthMode::Bearer, None) | (AuthMode::Cookie, _) => {
                if mode == AuthMode::Bearer {
                    debug!("Bearer token disappeared, falling back to cookie auth");
                }
                self.attach_csrf(&request.method, &mut headers).await;
                (AuthMode::Cookie, Credentials::Include)
            }
        };

        let outgoing = OutgoingRequest {
            method: request.method.clone(),
            url: url.clone(),
            headers,
            body: request.body.clone(),
            credentials,
        };

        let response = self.inner.transport.send(outgoing).await?;
        debug!(
            method = %request.method,
            path = %request.path,
            status = %response.status(),
            ?mode,
            "Response received"
        );
        Ok((mode, response))
    }

    async fn attach_csrf(&self, method: &Method, headers: &mut HeaderMap) {
        let csrf = &self.inner.context.csrf;
        if headers.contains_key(csrf.header_name()) {
            return;
        }
        if let Some(token) = csrf.ensure_for(method).await {
            match HeaderValue::from_str(&token) {
                Ok(value) => {
                    headers.insert(csrf.header_name().clone(), value);
                }
                Err(_) => warn!("Cached CSRF token is not a valid header value"),
            }
        }
    }

    fn signal_unauthenticated(&self, request: &Request, response: &ApiResponse, reason: TerminalReason) {
        let signal = UnauthenticatedSignal {
            method: request.method.clone(),
            path: request.path.clone(),
            status: response.status(),
            reason,
        };
        self.inner.on_unauthenticated.on_unauthenticated(&signal);
    }

    // ========================================================================
    // Session flows
    // ========================================================================

    /// Log in with email and password. The server sets the session cookie;
    /// a token in the response body is kept for bearer mode.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let config = &self.inner.config;
        let context = &self.inner.context;
        let url = config.resolve(&config.login_path)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.attach_csrf(&Method::POST, &mut headers).await;

        let body = serde_json::to_value(LoginRequest { email, password })?;
        let request = OutgoingRequest {
            method: Method::POST,
            url,
            headers,
            body: Body::Json(body),
            credentials: Credentials::Include,
        };

        let response = self
            .inner
            .transport
            .send(request)
            .await
            .context("Failed to send login request")?;

        if !context.csrf.observe(response.headers()) {
            context.csrf.reload_from_cookie();
        }
        let response = response.error_for_status()?;

        let login: LoginResponse = match response.json() {
            Ok(login) => login,
            Err(e) => {
                debug!(error = %e, "Login response body carried no token");
                LoginResponse::default()
            }
        };
        if let Some(token) = login.token {
            context.credentials.set(&token);
        }
        context.credentials.note_authenticated();
        info!("Logged in");
        Ok(())
    }

    /// Log out on the server, then drop all local auth state whatever the
    /// server said.
    pub async fn logout(&self) -> Result<()> {
        let path = self.inner.config.logout_path.clone();
        let result = self.fetch(Request::post(path)).await;
        self.inner.context.reset();

        match result {
            Ok(response) if response.is_success() => {
                info!("Logged out");
                Ok(())
            }
            Ok(response) => {
                warn!(status = %response.status(), "Server rejected logout, local session cleared");
                Ok(())
            }
            Err(e) => Err(e).context("Failed to send logout request"),
        }
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .fetch(Request::get(path))
            .await
            .with_context(|| format!("Failed to send GET request to {}", path))?
            .error_for_status()?;
        response
            .json()
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    pub(crate) async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .fetch(Request::post(path).json(body)?)
            .await
            .with_context(|| format!("Failed to send POST request to {}", path))?
            .error_for_status()?;
        response
            .json()
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }
}

fn bearer_header(token: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ApiError::InvalidRequest("bearer token is not a valid header value".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}
