//! Network boundary of the request client.
//!
//! `ReqwestTransport` keeps two connection pools: one wired to the shared
//! cookie jar (`Credentials::Include`) and one with no cookie provider at
//! all (`Credentials::Omit`). A bearer request therefore cannot pick up the
//! ambient session cookie.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Url};

use super::request::Body;
use super::response::ApiResponse;
use super::ApiError;

/// Whether the ambient cookies travel with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    Include,
    Omit,
}

/// A request ready to go on the wire.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Body,
    pub credentials: Credentials,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<ApiResponse, ApiError>;
}

/// Transport over reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    with_cookies: Client,
    without_cookies: Client,
}

impl ReqwestTransport {
    pub fn new(jar: Arc<Jar>, timeout: Duration) -> Result<Self, ApiError> {
        let with_cookies = Client::builder()
            .timeout(timeout)
            .cookie_provider(jar)
            .build()?;
        let without_cookies = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            with_cookies,
            without_cookies,
        })
    }

    fn client(&self, credentials: Credentials) -> &Client {
        match credentials {
            Credentials::Include => &self.with_cookies,
            Credentials::Omit => &self.without_cookies,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .client(request.credentials)
            .request(request.method, request.url)
            .headers(request.headers);

        builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => {
                let bytes = serde_json::to_vec(&value)
                    .map_err(|e| ApiError::InvalidRequest(format!("body serialization: {}", e)))?;
                builder.body(bytes)
            }
            Body::Text(text) => builder.body(text),
            Body::Form(fields) => builder.form(&fields),
        };

        let response = builder.send().await?;
        ApiResponse::from_reqwest(response).await
    }
}
