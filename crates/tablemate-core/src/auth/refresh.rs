use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::SessionContext;
use crate::api::request::Body;
use crate::api::transport::{Credentials, OutgoingRequest, Transport};

type PendingRefresh = Shared<BoxFuture<'static, bool>>;

#[derive(Debug, Default, Deserialize)]
struct RefreshBody {
    #[serde(alias = "accessToken", alias = "access_token")]
    token: Option<String>,
}

/// Collapses concurrent "refresh my session" requests into one network call.
///
/// The refresh runs on its own task, so a caller that gives up waiting
/// does not cancel it for the others.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    context: Arc<SessionContext>,
    transport: Arc<dyn Transport>,
    url: Url,
    timeout: Duration,
    pending: Mutex<Option<PendingRefresh>>,
}

impl RefreshCoordinator {
    pub fn new(
        context: Arc<SessionContext>,
        transport: Arc<dyn Transport>,
        url: Url,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                transport,
                url,
                timeout,
                pending: Mutex::new(None),
            }),
        }
    }

    /// True while a refresh is in flight.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    /// Refresh the session, joining the in-flight refresh if there is one.
    pub async fn refresh(&self) -> bool {
        let pending = {
            let mut slot = self.inner.pending.lock();
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight session refresh");
                    pending.clone()
                }
                None => {
                    if !self.inner.context.probe.has_refresh_cookie() {
                        debug!("No refresh cookie, skipping session refresh");
                        return false;
                    }
                    let inner = Arc::clone(&self.inner);
                    // The slot lock is held until the shared handle is stored,
                    // so the task cannot clear the slot before it is filled.
                    let task = tokio::spawn(async move {
                        let refreshed = inner.run().await;
                        *inner.pending.lock() = None;
                        refreshed
                    });
                    let pending = async move { task.await.unwrap_or(false) }
                        .boxed()
                        .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }
}

impl Inner {
    async fn run(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.send()).await {
            Ok(refreshed) => refreshed,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Session refresh timed out");
                false
            }
        }
    }

    async fn send(&self) -> bool {
        let context = &self.context;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = context.csrf.ensure_for(&Method::POST).await {
            match HeaderValue::from_str(&token) {
                Ok(value) => {
                    headers.insert(context.csrf.header_name().clone(), value);
                }
                Err(_) => warn!("Cached CSRF token is not a valid header value"),
            }
        }

        let request = OutgoingRequest {
            method: Method::POST,
            url: self.url.clone(),
            headers,
            body: Body::Empty,
            credentials: Credentials::Include,
        };

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Session refresh request failed");
                return false;
            }
        };

        if !context.csrf.observe(response.headers()) {
            context.csrf.reload_from_cookie();
        }

        if !response.is_success() {
            info!(status = %response.status(), "Session refresh rejected");
            return false;
        }

        match response.json::<RefreshBody>() {
            Ok(RefreshBody { token: Some(token) }) => context.credentials.set(&token),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Refresh response body carried no token"),
        }
        context.credentials.note_authenticated();
        info!("Session refreshed");
        true
    }
}
