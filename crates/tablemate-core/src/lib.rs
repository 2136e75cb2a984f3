//! tablemate-core - authenticated API client for the tablemate
//! dinner-matching service.
//!
//! The crate decides per request between cookie-session and bearer-token
//! auth, attaches CSRF protection, shares a single in-flight session
//! refresh across concurrent callers, and retries once after a
//! recoverable authentication failure.

pub mod api;
pub mod auth;
pub mod config;
pub mod env;
pub mod models;
pub mod signal;

pub use api::{ApiClient, ApiError, ApiResponse, AuthMode, Request};
pub use auth::{CredentialStore, CsrfCache, RefreshCoordinator, SessionContext};
pub use config::ClientConfig;
pub use env::{CookieJarProbe, EnvironmentProbe};
pub use signal::{ChannelHandler, TerminalReason, TracingHandler, UnauthenticatedHandler, UnauthenticatedSignal};
