//! REST API client module for the tablemate service.
//!
//! This module provides the `ApiClient` for talking to the tablemate
//! backend. Requests authenticate with the HttpOnly session cookie by
//! default and fall back to a bearer token for cross-origin deployments
//! or when cookies cannot be sent.

pub mod client;
mod endpoints;
pub mod error;
pub mod flow;
pub mod request;
pub mod response;
pub mod transport;

pub use client::{ApiClient, ApiClientBuilder};
pub use error::ApiError;
pub use flow::{interpret, select_mode, Verdict};
pub use request::{AuthMode, Body, Request};
pub use response::ApiResponse;
pub use transport::{Credentials, OutgoingRequest, ReqwestTransport, Transport};
