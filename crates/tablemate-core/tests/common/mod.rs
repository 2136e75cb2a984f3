#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use reqwest::cookie::Jar;
use reqwest::Url;
use tablemate_core::{ApiClient, ClientConfig, TerminalReason, UnauthenticatedSignal};
use wiremock::MockServer;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A client wired to a mock server, recording unauthenticated signals.
pub struct TestContext {
    pub server: MockServer,
    pub jar: Arc<Jar>,
    pub client: ApiClient,
    pub signals: Arc<Mutex<Vec<UnauthenticatedSignal>>>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut ClientConfig)) -> Self {
        init_logging();
        let server = MockServer::start().await;

        let mut config = ClientConfig::for_api(server.uri());
        config.refresh_timeout_secs = 5;
        config.request_timeout_secs = 10;
        configure(&mut config);

        let jar = Arc::new(Jar::default());
        let signals = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&signals);

        let client = ApiClient::builder(config)
            .jar(Arc::clone(&jar))
            .on_unauthenticated(Arc::new(move |signal: &UnauthenticatedSignal| {
                recorded.lock().unwrap().push(signal.clone());
            }))
            .build()
            .expect("client should build");

        Self {
            server,
            jar,
            client,
            signals,
        }
    }

    /// Put cookies in the jar as if the server had set them.
    pub fn seed_cookies(&self, cookies: &[&str]) {
        let url = Url::parse(&self.server.uri()).unwrap();
        for cookie in cookies {
            self.jar.add_cookie_str(cookie, &url);
        }
    }

    pub fn signal_reasons(&self) -> Vec<TerminalReason> {
        self.signals.lock().unwrap().iter().map(|s| s.reason).collect()
    }

    pub async fn requests_to(&self, path: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == path)
            .collect()
    }
}
