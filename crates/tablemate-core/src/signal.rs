//! Terminal "unauthenticated" notifications.
//!
//! The request client performs no navigation or UI work itself. When a
//! session is irrecoverably invalid it hands an [`UnauthenticatedSignal`] to
//! whatever handler the application registered.

use reqwest::{Method, StatusCode};
use tokio::sync::mpsc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// A bearer token was rejected; there is no cookie to rotate.
    BearerRejected,
    /// The shared session refresh failed or could not be attempted.
    RefreshFailed,
    /// The retry after a successful refresh was rejected again.
    RetryRejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnauthenticatedSignal {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    pub reason: TerminalReason,
}

pub trait UnauthenticatedHandler: Send + Sync {
    fn on_unauthenticated(&self, signal: &UnauthenticatedSignal);
}

/// Default handler: log and move on.
pub struct TracingHandler;

impl UnauthenticatedHandler for TracingHandler {
    fn on_unauthenticated(&self, signal: &UnauthenticatedSignal) {
        warn!(
            method = %signal.method,
            path = %signal.path,
            status = %signal.status,
            reason = ?signal.reason,
            "Session is no longer authenticated"
        );
    }
}

impl<F> UnauthenticatedHandler for F
where
    F: Fn(&UnauthenticatedSignal) + Send + Sync,
{
    fn on_unauthenticated(&self, signal: &UnauthenticatedSignal) {
        self(signal)
    }
}

/// Forwards signals to a channel for an async UI loop to consume.
pub struct ChannelHandler(pub mpsc::Sender<UnauthenticatedSignal>);

impl UnauthenticatedHandler for ChannelHandler {
    fn on_unauthenticated(&self, signal: &UnauthenticatedSignal) {
        if let Err(e) = self.0.try_send(signal.clone()) {
            error!(error = %e, "Failed to deliver unauthenticated signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn signal() -> UnauthenticatedSignal {
        UnauthenticatedSignal {
            method: Method::GET,
            path: "/profile".to_string(),
            status: StatusCode::UNAUTHORIZED,
            reason: TerminalReason::RefreshFailed,
        }
    }

    #[test]
    fn test_closure_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler = move |s: &UnauthenticatedSignal| {
            assert_eq!(s.reason, TerminalReason::RefreshFailed);
            seen.fetch_add(1, Ordering::SeqCst);
        };
        handler.on_unauthenticated(&signal());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_handler() {
        let (tx, mut rx) = mpsc::channel(4);
        ChannelHandler(tx).on_unauthenticated(&signal());
        assert_eq!(rx.recv().await, Some(signal()));
    }

    #[test]
    fn test_channel_handler_full_does_not_panic() {
        let (tx, _rx) = mpsc::channel(1);
        let handler = ChannelHandler(tx);
        handler.on_unauthenticated(&signal());
        handler.on_unauthenticated(&signal()); // dropped and logged
    }
}
