//! Request and response values that travel through the pipeline.

use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::abort::AbortSignal;
use crate::error::{StorageError, StorageResult};

/// Header names produced or consumed by the storage policies.
pub mod headers {
    pub const AUTHORIZATION: &str = "authorization";
    pub const CONTENT_ENCODING: &str = "content-encoding";
    pub const CONTENT_LANGUAGE: &str = "content-language";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_MD5: &str = "content-md5";
    pub const CONTENT_RANGE: &str = "content-range";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const COOKIE: &str = "cookie";
    pub const DATE: &str = "date";
    pub const ETAG: &str = "etag";
    pub const IF_MATCH: &str = "if-match";
    pub const IF_MODIFIED_SINCE: &str = "if-modified-since";
    pub const IF_NONE_MATCH: &str = "if-none-match";
    pub const IF_UNMODIFIED_SINCE: &str = "if-unmodified-since";
    pub const LAST_MODIFIED: &str = "last-modified";
    pub const RANGE: &str = "range";
    pub const USER_AGENT: &str = "user-agent";

    /// Prefix shared by every storage-specific header.
    pub const PREFIX_FOR_STORAGE: &str = "x-ms-";
    pub const X_MS_BLOB_TYPE: &str = "x-ms-blob-type";
    pub const X_MS_CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
    pub const X_MS_DATE: &str = "x-ms-date";
    pub const X_MS_ERROR_CODE: &str = "x-ms-error-code";
    pub const X_MS_META_PREFIX: &str = "x-ms-meta-";
    pub const X_MS_RANGE: &str = "x-ms-range";
    pub const X_MS_REQUEST_ID: &str = "x-ms-request-id";
    pub const X_MS_VERSION: &str = "x-ms-version";
}

/// Query parameters produced by the storage policies.
pub mod query {
    /// Server-side timeout hint, in seconds.
    pub const TIMEOUT: &str = "timeout";
    /// Cache-busting timestamp added in browser contexts.
    pub const FORCE_BROWSER_NO_CACHE: &str = "_";
}

/// Request body. Cloning shares the underlying buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
}

impl Body {
    /// Exact length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Bytes(bytes) => bytes,
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// An outgoing HTTP request.
///
/// Policies receive requests by value. The retry policy clones the caller's
/// request for every attempt so mutations made further down the chain never
/// leak into the next attempt.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Body,
    abort_signal: Option<AbortSignal>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
            abort_signal: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    pub fn abort_signal(&self) -> Option<&AbortSignal> {
        self.abort_signal.as_ref()
    }

    pub fn set_abort_signal(&mut self, signal: AbortSignal) {
        self.abort_signal = Some(signal);
    }

    /// Whether the method only reads state and may be served by a secondary host.
    pub fn is_read(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// Value of a header as a string. Header names match case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replace every value of `name` with `value`.
    pub fn insert_header(&mut self, name: &str, value: impl AsRef<str>) -> StorageResult<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| StorageError::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value.as_ref())
            .map_err(|e| StorageError::InvalidHeader(format!("{name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Add a value for `name`, keeping existing values.
    pub fn append_header(&mut self, name: &str, value: impl AsRef<str>) -> StorageResult<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| StorageError::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value.as_ref())
            .map_err(|e| StorageError::InvalidHeader(format!("{name}: {e}")))?;
        self.headers.append(name, value);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    /// Set a query parameter, replacing any existing value for the same key.
    pub fn set_query_parameter(&mut self, key: &str, value: &str) {
        set_url_parameter(&mut self.url, key, value);
    }

    /// Value of a query parameter, percent-decoded.
    pub fn query_parameter(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

/// Characters left unescaped in query components.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Set `key=value` on `url`, replacing any existing values of `key`.
///
/// Works on the raw query so the encoding of the other parameters is kept
/// byte for byte; the shared-key signature covers them.
pub fn set_url_parameter(url: &mut Url, key: &str, value: &str) {
    let encoded_key = utf8_percent_encode(key, QUERY_ENCODE_SET).to_string();
    let mut parts: Vec<String> = url
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|part| !part.is_empty())
        .filter(|part| part.split_once('=').map_or(*part, |(k, _)| k) != encoded_key)
        .map(str::to_string)
        .collect();
    parts.push(format!(
        "{encoded_key}={}",
        utf8_percent_encode(value, QUERY_ENCODE_SET)
    ));
    url.set_query(Some(&parts.join("&")));
}

/// Replace the host (and port, if given as `host:port`) of `url`.
pub fn set_url_host(url: &mut Url, host: &str) -> StorageResult<()> {
    let (name, port) = match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| StorageError::invalid_endpoint(format!("invalid port in host '{host}'")))?;
            (name, Some(port))
        }
        _ => (host, None),
    };

    url.set_host(Some(name))
        .map_err(|e| StorageError::invalid_endpoint_with_source(format!("invalid host '{host}'"), e))?;
    if port.is_some() {
        url.set_port(port)
            .map_err(|_| StorageError::invalid_endpoint(format!("cannot set port on '{url}'")))?;
    }
    Ok(())
}

/// A response received from the transport. The body is read in full.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response with only a status, mostly useful in tests.
    pub fn from_status(status: u16) -> Self {
        Self::new(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            HeaderMap::new(),
            Bytes::new(),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body as UTF-8 text, lossily converted.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
