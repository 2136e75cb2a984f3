use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::storage::{MemoryStorage, TokenStorage};
use super::token::SessionCredential;
use crate::env::EnvironmentProbe;

/// Owns the client-visible auth signal: a stored bearer token and the
/// "a session is probably live" hint used when the real session cookie
/// is HttpOnly.
pub struct CredentialStore {
    storage: Box<dyn TokenStorage>,
    probe: Arc<dyn EnvironmentProbe>,
    current: RwLock<Option<SessionCredential>>,
    authenticated: AtomicBool,
}

impl CredentialStore {
    /// Create a store over the given storage, loading any persisted token.
    /// A storage that cannot be read leaves the store in cookie mode.
    pub fn new(storage: Box<dyn TokenStorage>, probe: Arc<dyn EnvironmentProbe>) -> Self {
        let current = match storage.load() {
            Ok(token) => token.map(SessionCredential::new),
            Err(e) => {
                warn!(error = %e, "Token storage unavailable, falling back to cookie auth");
                None
            }
        };

        Self {
            storage,
            probe,
            current: RwLock::new(current),
            authenticated: AtomicBool::new(false),
        }
    }

    pub fn in_memory(probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self::new(Box::new(MemoryStorage::default()), probe)
    }

    /// The bearer credential, if one is known. Falls back to a legacy
    /// readable session token cookie when nothing is stored.
    pub fn get(&self) -> Option<SessionCredential> {
        if let Some(cred) = self.current.read().clone() {
            return Some(cred);
        }
        self.probe
            .read_session_token_cookie()
            .map(SessionCredential::new)
    }

    /// Persist a token for bearer-mode reuse. Storage failures are logged
    /// and leave the store without a token.
    pub fn set(&self, token: &str) {
        match self.storage.save(token) {
            Ok(()) => {
                debug!("Stored bearer token");
                *self.current.write() = Some(SessionCredential::new(token));
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist bearer token, staying in cookie mode");
                *self.current.write() = None;
            }
        }
    }

    pub fn clear(&self) {
        *self.current.write() = None;
        self.authenticated.store(false, Ordering::SeqCst);
        if let Err(e) = self.storage.remove() {
            warn!(error = %e, "Failed to remove stored bearer token");
        }
    }

    /// Record that an authenticated call just succeeded.
    pub fn note_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }

    /// Best-effort guess whether a session is live. Only the server knows.
    pub fn has_session(&self) -> bool {
        self.get().is_some()
            || self.probe.has_session_cookie_heuristic()
            || self.authenticated.load(Ordering::SeqCst)
    }

    pub fn expires_in_seconds(&self) -> Option<i64> {
        self.get().and_then(|cred| cred.expires_in_seconds())
    }
}
