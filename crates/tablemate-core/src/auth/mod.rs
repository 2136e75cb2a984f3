//! Authentication state shared by every request.
//!
//! This module provides:
//! - `CredentialStore`: the client-visible bearer token and session hint
//! - `CsrfCache`: the current anti-CSRF token
//! - `RefreshCoordinator`: single-flight session refresh
//! - `SessionContext`: the bundle of the above plus the sticky bearer flag,
//!   passed explicitly into the request client

pub mod credentials;
pub mod csrf;
pub mod refresh;
pub mod storage;
pub mod token;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::header::HeaderName;
use reqwest::Url;

pub use credentials::CredentialStore;
pub use csrf::CsrfCache;
pub use refresh::RefreshCoordinator;
pub use storage::{KeyringStorage, MemoryStorage, TokenStorage};
pub use token::SessionCredential;

use crate::api::transport::Transport;
use crate::env::EnvironmentProbe;

/// Session-wide mutable auth state. One per logical client session.
pub struct SessionContext {
    pub credentials: CredentialStore,
    pub csrf: CsrfCache,
    pub probe: Arc<dyn EnvironmentProbe>,
    force_bearer: AtomicBool,
}

impl SessionContext {
    pub fn new(credentials: CredentialStore, csrf: CsrfCache, probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self {
            credentials,
            csrf,
            probe,
            force_bearer: AtomicBool::new(false),
        }
    }

    /// Context with an in-memory credential store.
    pub fn in_memory(
        probe: Arc<dyn EnvironmentProbe>,
        csrf_header: HeaderName,
        csrf_endpoint: Option<Url>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let credentials = CredentialStore::in_memory(Arc::clone(&probe));
        let csrf = CsrfCache::new(csrf_header, Arc::clone(&probe), csrf_endpoint, transport);
        Self::new(credentials, csrf, probe)
    }

    /// Whether a previous cookie attempt failed at the network level,
    /// pinning later requests to bearer mode.
    pub fn force_bearer(&self) -> bool {
        self.force_bearer.load(Ordering::SeqCst)
    }

    pub fn set_force_bearer(&self, forced: bool) {
        self.force_bearer.store(forced, Ordering::SeqCst);
    }

    /// Drop every piece of local auth state.
    pub fn reset(&self) {
        self.credentials.clear();
        self.csrf.clear();
        self.set_force_bearer(false);
    }
}
