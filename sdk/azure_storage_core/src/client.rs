//! Base client for Azure Storage services.
//!
//! [`StorageClient`] owns the endpoint, service version and request pipeline.
//! Service crates (`azure_storage_blob`) build requests with it and send them
//! through the pipeline.
//!
//! # Examples
//!
//! ## Using a Shared Key
//! ```rust,no_run
//! use azure_storage_core::client::StorageClient;
//! use azure_storage_core::auth::StorageCredential;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StorageClient::builder()
//!     .endpoint("https://myaccount.blob.core.windows.net")
//!     .credential(StorageCredential::shared_key("myaccount", "bXkta2V5")?)
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Using Azure CLI Credential
//! ```rust,no_run
//! use azure_storage_core::client::StorageClient;
//! use azure_storage_core::auth::StorageCredential;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StorageClient::builder()
//!     .endpoint("https://myaccount.blob.core.windows.net")
//!     .credential(StorageCredential::azure_cli()?)
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Tuning retries
//! ```rust,no_run
//! use std::time::Duration;
//! use azure_storage_core::client::StorageClient;
//! use azure_storage_core::policies::{RetryOptions, StorageRetryPolicyType};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StorageClient::builder()
//!     .endpoint("https://myaccount.blob.core.windows.net")
//!     .retry_options(RetryOptions {
//!         policy_type: StorageRetryPolicyType::Fixed,
//!         max_tries: 6,
//!         try_timeout: Some(Duration::from_secs(30)),
//!         secondary_host: Some("myaccount-secondary.blob.core.windows.net".into()),
//!         ..Default::default()
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use url::Url;

use crate::auth::StorageCredential;
use crate::error::{StorageError, StorageResult};
use crate::http::{headers, Request, Response};
use crate::pipeline::{Pipeline, Policy, PolicyPosition, StoragePipelineOptions};
use crate::policies::{RetryOptions, Runtime, TelemetryOptions};
use crate::transport::HttpClient;

/// Default storage service version sent as `x-ms-version`.
pub const DEFAULT_SERVICE_VERSION: &str = "2023-11-03";

/// Environment variable consulted when no endpoint is given.
pub const ENDPOINT_ENV: &str = "AZURE_STORAGE_BLOB_ENDPOINT";

/// Storage error body.
///
/// ```xml
/// <?xml version="1.0" encoding="utf-8"?>
/// <Error>
///   <Code>BlobNotFound</Code>
///   <Message>The specified blob does not exist.</Message>
/// </Error>
/// ```
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "Code")]
    code: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

/// The base client for Azure Storage.
///
/// The client is cheaply cloneable and can be shared across threads.
#[derive(Debug, Clone)]
pub struct StorageClient {
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) endpoint: Url,
    /// Query carried by the configured endpoint, such as a SAS token.
    pub(crate) endpoint_query: Option<String>,
    pub(crate) service_version: String,
}

/// Builder for constructing a [`StorageClient`].
///
/// Use [`StorageClient::builder()`] to create a new builder.
#[derive(Debug, Default)]
pub struct StorageClientBuilder {
    endpoint: Option<String>,
    credential: Option<StorageCredential>,
    retry_options: Option<RetryOptions>,
    http_client: Option<Arc<dyn HttpClient>>,
    user_agent_prefix: Option<String>,
    service_version: Option<String>,
    runtime: Option<Runtime>,
    audience: Option<Vec<String>>,
    policies: Vec<(Arc<dyn Policy>, PolicyPosition)>,
}

impl StorageClient {
    /// Create a new builder for configuring a `StorageClient`.
    pub fn builder() -> StorageClientBuilder {
        StorageClientBuilder::default()
    }

    /// Get the base endpoint URL. Always ends with `/` and carries no query;
    /// a query given with the endpoint is added to every request URL instead.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Get the service version being used.
    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    /// The pipeline requests are sent through.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Build a full URL for a resource path relative to the endpoint.
    ///
    /// A leading `/` is ignored, so the account segment of path-style
    /// endpoints (emulators) is preserved. Parameters from the endpoint's
    /// query (a SAS token) are appended unless `path` sets the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined to the endpoint URL.
    pub fn url(&self, path: &str) -> StorageResult<Url> {
        let mut url = self
            .endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| StorageError::invalid_endpoint_with_source("failed to construct URL", e))?;
        if let Some(endpoint_query) = &self.endpoint_query {
            merge_query(&mut url, endpoint_query);
        }
        Ok(url)
    }

    /// Create a request for `path` with the service version header set.
    pub fn request(&self, method: Method, path: &str) -> StorageResult<Request> {
        let mut request = Request::new(method, self.url(path)?);
        request.insert_header(headers::X_MS_VERSION, &self.service_version)?;
        Ok(request)
    }

    /// Send a request through the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the pipeline error once retries are exhausted, or
    /// [`StorageError::Http`] if the final response is not a success.
    pub async fn send(&self, request: Request) -> StorageResult<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let response = self.pipeline.send(request).await?;
        tracing::debug!(
            %method,
            path = url.path(),
            status = response.status().as_u16(),
            request_id = response.header(headers::X_MS_REQUEST_ID).unwrap_or_default(),
            "received response"
        );
        Self::check_response(response)
    }

    /// Maximum length for error messages to prevent sensitive data leaks.
    const MAX_ERROR_MESSAGE_LEN: usize = 1000;

    /// Markers followed by a secret that must never reach an error message.
    const SECRET_MARKERS: [&'static str; 3] = ["Bearer ", "SharedKey ", "sig="];

    /// Sanitize error messages by redacting tokens, signatures and SAS
    /// signatures.
    pub(crate) fn sanitize_error_message(msg: &str) -> String {
        let mut result = msg.to_string();

        for marker in Self::SECRET_MARKERS {
            // Use offset to avoid infinite loops
            let mut search_start = 0;
            while search_start < result.len() {
                let Some(relative_pos) = result[search_start..].find(marker) else {
                    break;
                };
                let secret_start = search_start + relative_pos + marker.len();
                if secret_start >= result.len() {
                    break;
                }

                // Skip if already redacted
                if result[secret_start..].starts_with("[REDACTED]") {
                    search_start = secret_start + 10;
                    continue;
                }

                let secret_end = result[secret_start..]
                    .find(|c: char| {
                        c.is_whitespace() || matches!(c, '"' | '\'' | ',' | '&' | '<')
                    })
                    .map(|pos| secret_start + pos)
                    .unwrap_or(result.len());

                if secret_end > secret_start {
                    result.replace_range(secret_start..secret_end, "[REDACTED]");
                    search_start = secret_start + 10; // "[REDACTED]" is 10 chars
                } else {
                    search_start = secret_start;
                }
            }
        }

        result
    }

    /// Truncate a message if it exceeds the maximum length.
    /// Also sanitizes sensitive data before truncating.
    pub(crate) fn truncate_message(msg: &str) -> String {
        let sanitized = Self::sanitize_error_message(msg);

        if sanitized.len() > Self::MAX_ERROR_MESSAGE_LEN {
            let mut end = Self::MAX_ERROR_MESSAGE_LEN;
            while !sanitized.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated)", &sanitized[..end])
        } else {
            sanitized
        }
    }

    /// Check the response status and return an error if not successful.
    ///
    /// The error code comes from the `x-ms-error-code` header, falling back
    /// to the XML error body; HEAD responses carry only the header.
    pub fn check_response(response: Response) -> StorageResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text();
        let parsed = quick_xml::de::from_str::<ErrorBody>(body.trim_start_matches('\u{feff}')).ok();

        let code = response
            .header(headers::X_MS_ERROR_CODE)
            .map(str::to_string)
            .or_else(|| parsed.as_ref().and_then(|e| e.code.clone()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = parsed
            .and_then(|e| e.message)
            .or_else(|| (!body.is_empty()).then(|| body.clone()))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());

        Err(StorageError::http(
            status.as_u16(),
            code,
            Self::truncate_message(&message),
        ))
    }
}

impl StorageClientBuilder {
    /// Set the service endpoint URL.
    ///
    /// This should be in the format `https://<account>.blob.core.windows.net`,
    /// or `http://127.0.0.1:10000/<account>` for the emulator.
    ///
    /// If not set, the builder will check the `AZURE_STORAGE_BLOB_ENDPOINT`
    /// environment variable.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the credential to use for authorization.
    ///
    /// If not set, the builder will use [`StorageCredential::from_env()`].
    pub fn credential(mut self, credential: StorageCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Set the retry behavior for transient failures.
    pub fn retry_options(mut self, options: RetryOptions) -> Self {
        self.retry_options = Some(options);
        self
    }

    /// Set a custom HTTP client.
    ///
    /// Defaults to a process-wide shared client.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Prepend `prefix` to the `User-Agent` header.
    pub fn user_agent_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.user_agent_prefix = Some(prefix.into());
        self
    }

    /// Set the service version.
    ///
    /// Defaults to [`DEFAULT_SERVICE_VERSION`].
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Override the detected execution context.
    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Override the OAuth scopes requested by bearer credentials.
    pub fn audience(mut self, scopes: Vec<String>) -> Self {
        self.audience = Some(scopes);
        self
    }

    /// Add a custom policy to the pipeline.
    pub fn policy(mut self, policy: Arc<dyn Policy>, position: PolicyPosition) -> Self {
        self.policies.push((policy, position));
        self
    }

    /// Build the `StorageClient`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No endpoint is provided and `AZURE_STORAGE_BLOB_ENDPOINT` is not set
    /// - The endpoint URL is invalid
    /// - The credential or retry options are invalid
    /// - A custom policy is positioned relative to an unknown policy
    pub fn build(self) -> StorageResult<StorageClient> {
        let endpoint_str = self
            .endpoint
            .or_else(|| std::env::var(ENDPOINT_ENV).ok().filter(|v| !v.is_empty()))
            .ok_or_else(|| {
                StorageError::MissingConfig(
                    "endpoint is required. Set it via builder or AZURE_STORAGE_BLOB_ENDPOINT env var."
                        .into(),
                )
            })?;

        let mut endpoint = Url::parse(&endpoint_str)
            .map_err(|e| StorageError::invalid_endpoint_with_source("invalid endpoint URL", e))?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.cannot_be_a_base() {
            return Err(StorageError::invalid_endpoint(format!(
                "endpoint must be an http(s) URL: {endpoint_str}"
            )));
        }
        let endpoint_query = endpoint
            .query()
            .filter(|q| !q.is_empty())
            .map(str::to_string);
        endpoint.set_query(None);
        endpoint.set_fragment(None);
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let credential = self
            .credential
            .map(Ok)
            .unwrap_or_else(StorageCredential::from_env)?;

        let mut pipeline = Pipeline::new(
            credential,
            StoragePipelineOptions {
                retry: self.retry_options.unwrap_or_default(),
                telemetry: TelemetryOptions {
                    user_agent_prefix: self.user_agent_prefix,
                },
                http_client: self.http_client,
                runtime: self.runtime,
                audience: self.audience,
            },
        )?;
        for (policy, position) in self.policies {
            pipeline.add_policy(policy, position)?;
        }

        Ok(StorageClient {
            pipeline: Arc::new(pipeline),
            endpoint,
            endpoint_query,
            service_version: self
                .service_version
                .unwrap_or_else(|| DEFAULT_SERVICE_VERSION.to_string()),
        })
    }
}

/// Append the raw `extra` query parameters whose keys `url` does not
/// already carry. Encoding is kept byte for byte.
fn merge_query(url: &mut Url, extra: &str) {
    let key_of = |part: &str| part.split_once('=').map_or(part, |(k, _)| k).to_string();
    let mut parts: Vec<String> = url
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();
    let present: Vec<String> = parts.iter().map(|part| key_of(part)).collect();
    parts.extend(
        extra
            .split('&')
            .filter(|part| !part.is_empty() && !present.contains(&key_of(part)))
            .map(str::to_string),
    );
    url.set_query(Some(&parts.join("&")));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{setup_mock_client, InjectorPolicy, TEST_ACCOUNT_KEY, TEST_ACCOUNT_NAME};
    use reqwest::StatusCode;
    use serial_test::serial;
    use std::time::Duration;
    use wiremock::matchers::{header, header_exists, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_credential() -> StorageCredential {
        StorageCredential::shared_key("test", TEST_ACCOUNT_KEY).unwrap()
    }

    #[test]
    #[serial]
    fn builder_requires_endpoint() {
        // Clear env var to ensure test isolation
        std::env::remove_var(ENDPOINT_ENV);

        let result = StorageClient::builder()
            .credential(test_credential())
            .build();

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, StorageError::MissingConfig(_)));
    }

    #[test]
    fn builder_accepts_endpoint() {
        let client = StorageClient::builder()
            .endpoint("https://test.blob.core.windows.net")
            .credential(test_credential())
            .build()
            .expect("should build");

        assert_eq!(
            client.endpoint().as_str(),
            "https://test.blob.core.windows.net/"
        );
    }

    #[test]
    fn builder_uses_default_service_version() {
        let client = StorageClient::builder()
            .endpoint("https://test.blob.core.windows.net")
            .credential(test_credential())
            .build()
            .expect("should build");

        assert_eq!(client.service_version(), DEFAULT_SERVICE_VERSION);
    }

    #[test]
    fn builder_accepts_custom_service_version() {
        let client = StorageClient::builder()
            .endpoint("https://test.blob.core.windows.net")
            .credential(test_credential())
            .service_version("2021-12-02")
            .build()
            .expect("should build");

        assert_eq!(client.service_version(), "2021-12-02");
    }

    #[test]
    #[serial]
    fn builder_uses_endpoint_from_env() {
        let original = std::env::var(ENDPOINT_ENV).ok();

        std::env::set_var(ENDPOINT_ENV, "https://env.blob.core.windows.net");

        let client = StorageClient::builder()
            .credential(test_credential())
            .build()
            .expect("should build");

        assert_eq!(
            client.endpoint().as_str(),
            "https://env.blob.core.windows.net/"
        );

        match original {
            Some(val) => std::env::set_var(ENDPOINT_ENV, val),
            None => std::env::remove_var(ENDPOINT_ENV),
        }
    }

    #[test]
    #[serial]
    fn builder_endpoint_overrides_env() {
        let original = std::env::var(ENDPOINT_ENV).ok();

        std::env::set_var(ENDPOINT_ENV, "https://env.blob.core.windows.net");

        let client = StorageClient::builder()
            .endpoint("https://explicit.blob.core.windows.net")
            .credential(test_credential())
            .build()
            .expect("should build");

        assert_eq!(
            client.endpoint().as_str(),
            "https://explicit.blob.core.windows.net/"
        );

        match original {
            Some(val) => std::env::set_var(ENDPOINT_ENV, val),
            None => std::env::remove_var(ENDPOINT_ENV),
        }
    }

    #[test]
    fn builder_invalid_endpoint_url() {
        for endpoint in ["not a valid url", "mailto:someone@example.com"] {
            let result = StorageClient::builder()
                .endpoint(endpoint)
                .credential(test_credential())
                .build();

            assert!(matches!(
                result.unwrap_err(),
                StorageError::InvalidEndpoint { .. }
            ));
        }
    }

    #[test]
    fn builder_rejects_policy_with_unknown_anchor() {
        let result = StorageClient::builder()
            .endpoint("https://test.blob.core.windows.net")
            .credential(test_credential())
            .policy(
                Arc::new(InjectorPolicy::new(|_| None)),
                PolicyPosition::Before("NoSuchPolicy".into()),
            )
            .build();

        assert!(matches!(
            result.unwrap_err(),
            StorageError::InvalidPolicyPosition(_)
        ));
    }

    #[test]
    fn url_joins_path() {
        let client = StorageClient::builder()
            .endpoint("https://test.blob.core.windows.net")
            .credential(test_credential())
            .build()
            .expect("should build");

        assert_eq!(
            client.url("/container/dir/blob.txt").unwrap().as_str(),
            "https://test.blob.core.windows.net/container/dir/blob.txt"
        );
        assert_eq!(
            client.url("container?restype=container").unwrap().as_str(),
            "https://test.blob.core.windows.net/container?restype=container"
        );
    }

    #[test]
    fn url_carries_endpoint_sas_query() {
        let client = StorageClient::builder()
            .endpoint("https://acct.blob.core.windows.net/?sv=2023-11-03&sig=a%2Bb%3D")
            .credential(StorageCredential::Anonymous)
            .build()
            .expect("should build");

        assert_eq!(client.endpoint().as_str(), "https://acct.blob.core.windows.net/");
        assert_eq!(
            client.url("c/b").unwrap().as_str(),
            "https://acct.blob.core.windows.net/c/b?sv=2023-11-03&sig=a%2Bb%3D"
        );
        assert_eq!(
            client.url("c?restype=container&sv=2024-01-01").unwrap().as_str(),
            "https://acct.blob.core.windows.net/c?restype=container&sv=2024-01-01&sig=a%2Bb%3D"
        );
    }

    #[tokio::test]
    async fn sas_endpoint_sends_signature_with_anonymous_credential() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/container/blob"))
            .and(wiremock::matchers::query_param("sv", "2023-11-03"))
            .and(wiremock::matchers::query_param("sig", "a+b="))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = StorageClient::builder()
            .endpoint(format!("{}/?sv=2023-11-03&sig=a%2Bb%3D", server.uri()))
            .credential(StorageCredential::Anonymous)
            .http_client(Arc::new(reqwest::Client::new()))
            .build()
            .unwrap();

        let request = client.request(Method::GET, "container/blob").unwrap();
        client.send(request).await.expect("should succeed");
    }

    #[test]
    fn url_keeps_account_segment_of_path_style_endpoint() {
        let client = StorageClient::builder()
            .endpoint("http://127.0.0.1:10000/devstoreaccount1")
            .credential(test_credential())
            .build()
            .expect("should build");

        assert_eq!(
            client.url("/container/blob").unwrap().as_str(),
            "http://127.0.0.1:10000/devstoreaccount1/container/blob"
        );
    }

    #[test]
    fn request_sets_service_version() {
        let client = StorageClient::builder()
            .endpoint("https://test.blob.core.windows.net")
            .credential(test_credential())
            .build()
            .expect("should build");

        let request = client.request(Method::GET, "container").unwrap();
        assert_eq!(request.header("x-ms-version"), Some(DEFAULT_SERVICE_VERSION));
    }

    #[test]
    fn client_is_cloneable() {
        let client = StorageClient::builder()
            .endpoint("https://test.blob.core.windows.net")
            .credential(test_credential())
            .build()
            .expect("should build");

        let cloned = client.clone();
        assert_eq!(client.endpoint(), cloned.endpoint());
        assert!(Arc::ptr_eq(&client.pipeline, &cloned.pipeline));
    }

    // --- Wiremock integration tests ---

    #[tokio::test]
    async fn send_signs_with_shared_key() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/devstoreaccount1/container/blob"))
            .and(header("x-ms-version", DEFAULT_SERVICE_VERSION))
            .and(header_exists("x-ms-date"))
            .and(header_exists("x-ms-client-request-id"))
            .and(header_regex(
                "authorization",
                "^SharedKey devstoreaccount1:[A-Za-z0-9+/]{43}=$",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let client = setup_mock_client(&server);
        let request = client.request(Method::GET, "container/blob").unwrap();
        let response = client.send(request).await.expect("should succeed");

        assert_eq!(response.status(), 200);
        assert_eq!(response.text(), "hello");
    }

    #[tokio::test]
    async fn send_maps_xml_error_body() {
        let server = MockServer::start().await;

        let error_body = r#"<?xml version="1.0" encoding="utf-8"?><Error><Code>ContainerNotFound</Code><Message>The specified container does not exist.</Message></Error>"#;

        Mock::given(method("GET"))
            .and(path("/devstoreaccount1/missing"))
            .respond_with(
                ResponseTemplate::new(404).set_body_raw(error_body, "application/xml"),
            )
            .mount(&server)
            .await;

        let client = setup_mock_client(&server);
        let request = client.request(Method::GET, "missing").unwrap();
        let err = client.send(request).await.unwrap_err();

        match err {
            StorageError::Http {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 404);
                assert_eq!(code, "ContainerNotFound");
                assert_eq!(message, "The specified container does not exist.");
            }
            _ => panic!("Expected Http error, got {:?}", err),
        }
    }

    #[tokio::test]
    async fn send_uses_error_code_header_for_head() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/devstoreaccount1/container/blob"))
            .respond_with(ResponseTemplate::new(404).insert_header("x-ms-error-code", "BlobNotFound"))
            .mount(&server)
            .await;

        let client = setup_mock_client(&server);
        let request = client.request(Method::HEAD, "container/blob").unwrap();
        let err = client.send(request).await.unwrap_err();

        match err {
            StorageError::Http {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 404);
                assert_eq!(code, "BlobNotFound");
                assert_eq!(message, "Not Found");
            }
            _ => panic!("Expected Http error, got {:?}", err),
        }
    }

    #[tokio::test]
    async fn send_retries_on_503() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/devstoreaccount1/container"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/devstoreaccount1/container"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = setup_mock_client(&server);
        let request = client.request(Method::GET, "container").unwrap();
        let response = client.send(request).await.expect("should succeed after retry");

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn send_does_not_retry_client_errors() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/devstoreaccount1/container"))
            .respond_with(ResponseTemplate::new(409).insert_header("x-ms-error-code", "ContainerAlreadyExists"))
            .expect(1)
            .mount(&server)
            .await;

        let client = setup_mock_client(&server);
        let request = client.request(Method::PUT, "container").unwrap();
        let err = client.send(request).await.unwrap_err();

        assert_eq!(err.status(), Some(409));
    }

    #[tokio::test]
    async fn send_adds_try_timeout_parameter() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/devstoreaccount1/container"))
            .and(wiremock::matchers::query_param("timeout", "30"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = StorageClient::builder()
            .endpoint(format!("{}/{}", server.uri(), TEST_ACCOUNT_NAME))
            .credential(StorageCredential::shared_key(TEST_ACCOUNT_NAME, TEST_ACCOUNT_KEY).unwrap())
            .retry_options(RetryOptions {
                try_timeout: Some(Duration::from_millis(30_500)),
                ..Default::default()
            })
            .http_client(Arc::new(reqwest::Client::new()))
            .build()
            .unwrap();

        let request = client.request(Method::GET, "container").unwrap();
        client.send(request).await.expect("should succeed");
    }

    #[tokio::test]
    async fn custom_policy_runs_before_signing() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/devstoreaccount1/container"))
            .and(header("x-ms-meta-tag", "injected"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        #[derive(Debug)]
        struct TagPolicy;

        #[async_trait::async_trait]
        impl Policy for TagPolicy {
            fn name(&self) -> &str {
                "TagPolicy"
            }

            async fn send(
                &self,
                mut request: Request,
                next: crate::pipeline::Next<'_>,
            ) -> StorageResult<Response> {
                request.insert_header("x-ms-meta-tag", "injected")?;
                next.run(request).await
            }
        }

        let client = StorageClient::builder()
            .endpoint(format!("{}/{}", server.uri(), TEST_ACCOUNT_NAME))
            .credential(StorageCredential::shared_key(TEST_ACCOUNT_NAME, TEST_ACCOUNT_KEY).unwrap())
            .http_client(Arc::new(reqwest::Client::new()))
            .policy(Arc::new(TagPolicy), PolicyPosition::After("StorageRetryPolicy".into()))
            .build()
            .unwrap();

        assert_eq!(
            client.pipeline().policy_names(),
            [
                "TelemetryPolicy",
                "StorageBrowserPolicy",
                "StorageRetryPolicy",
                "TagPolicy",
                "StorageSharedKeyCredentialPolicy"
            ]
        );

        let request = client.request(Method::GET, "container").unwrap();
        client.send(request).await.expect("should succeed");
    }

    #[test]
    fn check_response_falls_back_to_raw_body() {
        let response = Response::new(
            StatusCode::BAD_REQUEST,
            Default::default(),
            bytes::Bytes::from_static(b"plain text failure"),
        );

        let err = StorageClient::check_response(response).unwrap_err();
        match err {
            StorageError::Http { code, message, .. } => {
                assert_eq!(code, "unknown");
                assert_eq!(message, "plain text failure");
            }
            _ => panic!("Expected Http error, got {:?}", err),
        }
    }

    #[test]
    fn test_error_sanitization_removes_bearer_tokens() {
        let msg = "Invalid token: Bearer eyJ0eXAiOiJKV1QiLCJhbGciOi, please refresh";
        let sanitized = StorageClient::sanitize_error_message(msg);

        assert_eq!(sanitized, "Invalid token: Bearer [REDACTED], please refresh");
    }

    #[test]
    fn test_error_sanitization_removes_shared_key_and_sas_signatures() {
        let msg = "Authorization: SharedKey acct:abc123+/= rejected; url https://a/c?sv=2023&sig=secret%2Fvalue&se=1";
        let sanitized = StorageClient::sanitize_error_message(msg);

        assert!(!sanitized.contains("acct:abc123"));
        assert!(!sanitized.contains("secret%2Fvalue"));
        assert!(sanitized.contains("SharedKey [REDACTED] rejected"));
        assert!(sanitized.contains("sig=[REDACTED]&se=1"));
    }

    #[test]
    fn test_sanitization_before_truncation() {
        let token = "x".repeat(2000);
        let msg = format!("Bearer {token}");
        let result = StorageClient::truncate_message(&msg);

        assert_eq!(result, "Bearer [REDACTED]");
    }

    #[test]
    fn test_truncation_of_long_messages() {
        let msg = "é".repeat(800);
        let result = StorageClient::truncate_message(&msg);

        assert!(result.ends_with("... (truncated)"));
        assert!(result.len() <= StorageClient::MAX_ERROR_MESSAGE_LEN + "... (truncated)".len());
    }

    #[test]
    fn test_sanitization_preserves_legitimate_errors() {
        let msg = "The specified blob does not exist.";
        assert_eq!(StorageClient::sanitize_error_message(msg), msg);
    }

    #[test]
    fn test_sanitization_multiple_tokens() {
        let msg = "First: Bearer token1, Second: Bearer token2";
        let sanitized = StorageClient::sanitize_error_message(msg);

        assert_eq!(
            sanitized,
            "First: Bearer [REDACTED], Second: Bearer [REDACTED]"
        );
    }
}
