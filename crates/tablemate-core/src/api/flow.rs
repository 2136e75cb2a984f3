//! Per-request state machine.
//!
//! `Init -> ModeSelected -> Sent -> [Retrying -> ModeSelected -> Sent] -> Done | Failed`
//!
//! The decisions are pure functions so the retry rules can be tested
//! without any I/O. `ApiClient` drives the transitions.

use reqwest::StatusCode;

use super::request::AuthMode;
use super::response::{is_unauthenticated_status, ApiResponse};
use super::ApiError;
use crate::signal::TerminalReason;

#[derive(Debug)]
pub(crate) enum RequestState {
    Init,
    ModeSelected(AuthMode),
    Sent {
        mode: AuthMode,
        response: ApiResponse,
    },
    Retrying {
        response: ApiResponse,
    },
    Done(ApiResponse),
    Failed(ApiError),
}

/// What a request has already used up. A logical request is resent at
/// most once, whichever recovery triggered the resend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attempt {
    /// The session was refreshed and the request resent.
    pub refreshed: bool,
    /// A network failure in cookie mode was retried in bearer mode.
    pub fell_back: bool,
}

impl Attempt {
    pub fn retried(&self) -> bool {
        self.refreshed || self.fell_back
    }
}

/// Outcome of inspecting a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    PassThrough,
    Refresh,
    Terminal(TerminalReason),
}

/// Pick the auth mode for one request.
///
/// An explicit `Authorization` header always wins. Bearer mode needs a
/// stored credential and either the sticky bearer flag or a cross-origin
/// deployment. Everything else uses the session cookie.
pub fn select_mode(
    explicit_auth: bool,
    force_bearer: bool,
    cross_origin: bool,
    has_bearer: bool,
) -> AuthMode {
    if explicit_auth {
        AuthMode::Explicit
    } else if has_bearer && (force_bearer || cross_origin) {
        AuthMode::Bearer
    } else {
        AuthMode::Cookie
    }
}

/// Decide what to do with a response received in `mode`. `retried` is set
/// once the request has already been resent.
pub fn interpret(mode: AuthMode, status: StatusCode, retried: bool) -> Verdict {
    if !is_unauthenticated_status(status) {
        return Verdict::PassThrough;
    }
    match mode {
        AuthMode::Explicit => Verdict::PassThrough,
        AuthMode::Bearer => Verdict::Terminal(TerminalReason::BearerRejected),
        AuthMode::Cookie if retried => Verdict::Terminal(TerminalReason::RetryRejected),
        AuthMode::Cookie => Verdict::Refresh,
    }
}

/// Whether a transport error in `mode` may be retried once in bearer mode.
pub(crate) fn can_fall_back(mode: AuthMode, error: &ApiError, attempt: Attempt, has_bearer: bool) -> bool {
    mode == AuthMode::Cookie && !attempt.retried() && has_bearer && error.is_network_failure()
}
