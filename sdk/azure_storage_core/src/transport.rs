//! The boundary between the pipeline and the network.
//!
//! [`HttpClient`] sends one request and returns one fully-read response.
//! `reqwest::Client` implements it; [`default_http_client`] returns a
//! process-wide instance that is built once and shared read-only.

use std::error::Error as _;
use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult, TransportErrorKind};
use crate::http::{Body, Request, Response};

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends a single HTTP request.
#[async_trait]
pub trait HttpClient: Send + Sync + fmt::Debug {
    async fn send_request(&self, request: Request) -> StorageResult<Response>;
}

#[async_trait]
impl HttpClient for reqwest::Client {
    async fn send_request(&self, request: Request) -> StorageResult<Response> {
        let mut builder = self
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Body::Bytes(bytes) = request.body() {
            builder = builder.body(bytes.clone());
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| StorageError::Parse {
            message: format!("failed to read response body: {e}"),
            incomplete: true,
        })?;

        Ok(Response::new(status, headers, body))
    }
}

static DEFAULT_HTTP_CLIENT: OnceLock<Arc<dyn HttpClient>> = OnceLock::new();

/// The shared default HTTP client, built on first use.
pub fn default_http_client() -> Arc<dyn HttpClient> {
    DEFAULT_HTTP_CLIENT
        .get_or_init(|| {
            let client = reqwest::Client::builder()
                .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "falling back to an unconfigured HTTP client");
                    reqwest::Client::new()
                });
            Arc::new(client)
        })
        .clone()
}

/// Map a `reqwest` failure to a structured transport error.
pub fn classify_reqwest_error(err: reqwest::Error) -> StorageError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if let Some(kind) = io_error_kind(&err) {
        kind
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_request() || err.is_body() {
        TransportErrorKind::Send
    } else {
        TransportErrorKind::Other
    };

    StorageError::transport(kind, err.to_string())
}

/// Walk the source chain looking for an I/O error.
fn io_error_kind(err: &reqwest::Error) -> Option<TransportErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::TimedOut => Some(TransportErrorKind::Timeout),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    Some(TransportErrorKind::ConnectionReset)
                }
                io::ErrorKind::ConnectionRefused => Some(TransportErrorKind::ConnectionRefused),
                io::ErrorKind::BrokenPipe => Some(TransportErrorKind::BrokenPipe),
                _ => None,
            };
        }
        source = cause.source();
    }
    None
}
