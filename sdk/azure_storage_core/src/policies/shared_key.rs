//! Shared Key authorization.
//!
//! - [Authorize with Shared Key](https://learn.microsoft.com/rest/api/storageservices/authorize-with-shared-key)

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;

use crate::auth::StorageSharedKeyCredential;
use crate::error::StorageResult;
use crate::http::{headers, Request, Response};
use crate::pipeline::{Next, Policy};

/// Standard headers that take part in the string to sign, in order.
const SIGNED_HEADERS: [&str; 11] = [
    headers::CONTENT_LANGUAGE,
    headers::CONTENT_ENCODING,
    headers::CONTENT_LENGTH,
    headers::CONTENT_MD5,
    headers::CONTENT_TYPE,
    headers::DATE,
    headers::IF_MODIFIED_SINCE,
    headers::IF_MATCH,
    headers::IF_NONE_MATCH,
    headers::IF_UNMODIFIED_SINCE,
    headers::RANGE,
];

/// Signs requests with an account's shared key.
#[derive(Debug, Clone)]
pub struct StorageSharedKeyCredentialPolicy {
    credential: Arc<StorageSharedKeyCredential>,
}

impl StorageSharedKeyCredentialPolicy {
    pub const NAME: &'static str = "StorageSharedKeyCredentialPolicy";

    pub fn new(credential: Arc<StorageSharedKeyCredential>) -> Self {
        Self { credential }
    }

    /// Date, length and authorization headers for a request sent at `now`.
    pub fn sign_request(&self, mut request: Request, now: SystemTime) -> StorageResult<Request> {
        request.insert_header(headers::X_MS_DATE, httpdate::fmt_http_date(now))?;

        let body_len = request.body().len();
        if body_len > 0 {
            request.insert_header(headers::CONTENT_LENGTH, body_len.to_string())?;
        }

        let string_to_sign = self.string_to_sign(&request);
        tracing::debug!(string_to_sign = %string_to_sign.escape_debug(), "signing request");

        let signature = self.credential.compute_hmac_sha256(&string_to_sign)?;
        request.insert_header(
            headers::AUTHORIZATION,
            format!("SharedKey {}:{}", self.credential.account_name(), signature),
        )?;
        if let Some(value) = request.headers_mut().get_mut(headers::AUTHORIZATION) {
            value.set_sensitive(true);
        }

        Ok(request)
    }

    /// Construct the string to sign.
    ///
    /// ```text
    /// VERB + "\n" +
    /// Content-Language + "\n" +
    /// Content-Encoding + "\n" +
    /// Content-Length + "\n" +
    /// Content-MD5 + "\n" +
    /// Content-Type + "\n" +
    /// Date + "\n" +
    /// If-Modified-Since + "\n" +
    /// If-Match + "\n" +
    /// If-None-Match + "\n" +
    /// If-Unmodified-Since + "\n" +
    /// Range + "\n" +
    /// CanonicalizedHeaders +
    /// CanonicalizedResource
    /// ```
    pub fn string_to_sign(&self, request: &Request) -> String {
        let mut s = String::with_capacity(256);
        s.push_str(request.method().as_str());
        s.push('\n');
        for name in SIGNED_HEADERS {
            s.push_str(header_value_to_sign(request, name));
            s.push('\n');
        }
        s.push_str(&canonicalized_headers(request));
        s.push_str(&canonicalized_resource(request, self.credential.account_name()));
        s
    }
}

fn header_value_to_sign<'a>(request: &'a Request, name: &str) -> &'a str {
    match request.header(name) {
        // Since 2015-02-21 a zero Content-Length is signed as an empty string.
        Some("0") if name == headers::CONTENT_LENGTH => "",
        Some(value) => value,
        None => "",
    }
}

/// `x-ms-*` headers, lower-cased, one per name, sorted, each `name:value\n`.
///
/// - [Constructing the canonicalized headers string](https://learn.microsoft.com/rest/api/storageservices/authorize-with-shared-key#constructing-the-canonicalized-headers-string)
fn canonicalized_headers(request: &Request) -> String {
    // HeaderMap keys are already lower-case; `keys()` yields each name once.
    let mut storage_headers: Vec<(&str, &str)> = request
        .headers()
        .keys()
        .map(|name| name.as_str())
        .filter(|name| name.starts_with(headers::PREFIX_FOR_STORAGE))
        .map(|name| (name, request.header(name).unwrap_or_default()))
        .collect();
    storage_headers.sort_by(|a, b| a.0.cmp(b.0));

    let mut s = String::new();
    for (name, value) in storage_headers {
        let _ = writeln!(s, "{}:{}", name.trim_end(), value.trim_start());
    }
    s
}

/// `/account/path`, then `\nkey:value` per query parameter with lower-cased,
/// sorted keys and percent-decoded values.
///
/// - [Constructing the canonicalized resource string](https://learn.microsoft.com/rest/api/storageservices/authorize-with-shared-key#constructing-the-canonicalized-resource-string)
fn canonicalized_resource(request: &Request, account_name: &str) -> String {
    let path = match request.url().path() {
        "" => "/",
        path => path,
    };
    let mut s = format!("/{account_name}{path}");

    let queries: BTreeMap<String, String> = request
        .url()
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            let key = percent_decode_str(key).decode_utf8_lossy().to_lowercase();
            let value = percent_decode_str(value).decode_utf8_lossy().into_owned();
            (key, value)
        })
        .collect();

    for (key, value) in queries {
        let _ = write!(s, "\n{key}:{value}");
    }
    s
}

#[async_trait]
impl Policy for StorageSharedKeyCredentialPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, request: Request, next: Next<'_>) -> StorageResult<Response> {
        let signed = self.sign_request(request, SystemTime::now())?;
        next.run(signed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, TEST_ACCOUNT_KEY};
    use reqwest::Method;
    use std::time::{Duration, UNIX_EPOCH};
    use url::Url;

    /// 2026-10-16T12:00:00Z
    fn fixed_time() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_792_152_000)
    }

    fn policy(account: &str) -> StorageSharedKeyCredentialPolicy {
        let credential = StorageSharedKeyCredential::new(account, TEST_ACCOUNT_KEY).unwrap();
        StorageSharedKeyCredentialPolicy::new(Arc::new(credential))
    }

    fn request(method: Method, url: &str) -> Request {
        Request::new(method, Url::parse(url).unwrap())
    }

    #[test]
    fn golden_signature_for_metadata_get() {
        let policy = policy("account");
        let req = request(
            Method::GET,
            "https://account.blob.core.windows.net/container/blob?comp=metadata",
        );

        let signed = policy.sign_request(req, fixed_time()).unwrap();

        assert_eq!(signed.header("x-ms-date"), Some("Fri, 16 Oct 2026 12:00:00 GMT"));
        assert_eq!(
            policy.string_to_sign(&signed),
            "GET\n\n\n\n\n\n\n\n\n\n\n\n\
             x-ms-date:Fri, 16 Oct 2026 12:00:00 GMT\n\
             /account/container/blob\ncomp:metadata"
        );
        assert_eq!(
            signed.header("authorization"),
            Some("SharedKey account:B8We/yunFB7SDZMF5zP2CYu0NEh8WNeh303o7OuIzsg=")
        );
        assert!(signed.header("content-length").is_none());
    }

    #[test]
    fn golden_signature_with_service_version() {
        let policy = policy("account");
        let mut req = request(
            Method::GET,
            "https://account.blob.core.windows.net/container/blob?comp=metadata",
        );
        req.insert_header("x-ms-version", "2023-11-03").unwrap();

        let signed = policy.sign_request(req, fixed_time()).unwrap();

        assert_eq!(
            signed.header("authorization"),
            Some("SharedKey account:n45PzAOLupNbaN5HEpE4PJGF5nMIutLkILJdWhERFEQ=")
        );
    }

    #[test]
    fn golden_signature_for_upload_sets_content_length() {
        let policy = policy("account");
        let mut req = request(Method::PUT, "https://account.blob.core.windows.net/container/blob");
        req.insert_header("Content-Type", "text/plain").unwrap();
        req.insert_header("x-ms-blob-type", "BlockBlob").unwrap();
        req.set_body("hello");

        let signed = policy.sign_request(req, fixed_time()).unwrap();

        assert_eq!(signed.header("content-length"), Some("5"));
        assert_eq!(
            policy.string_to_sign(&signed),
            "PUT\n\n\n5\n\ntext/plain\n\n\n\n\n\n\n\
             x-ms-blob-type:BlockBlob\n\
             x-ms-date:Fri, 16 Oct 2026 12:00:00 GMT\n\
             /account/container/blob"
        );
        assert_eq!(
            signed.header("authorization"),
            Some("SharedKey account:nfqtMbVqLTehpWrtqIdQyJGNblhlVV08Ho5G7CCCtgY=")
        );
    }

    #[test]
    fn string_to_sign_is_deterministic_and_tracks_signed_headers() {
        let policy = policy("account");
        let mut req = request(
            Method::GET,
            "https://account.blob.core.windows.net/container/blob?comp=metadata",
        );
        req.insert_header("x-ms-date", "Fri, 16 Oct 2026 12:00:00 GMT").unwrap();
        req.insert_header("If-Match", "\"0x1\"").unwrap();

        let first = policy.string_to_sign(&req);
        let second = policy.string_to_sign(&req.clone());
        assert_eq!(first, second);

        req.insert_header("If-Match", "\"0x2\"").unwrap();
        assert_ne!(policy.string_to_sign(&req), first);

        let mut with_meta = req.clone();
        with_meta.insert_header("x-ms-meta-owner", "alice").unwrap();
        assert_ne!(policy.string_to_sign(&with_meta), policy.string_to_sign(&req));
    }

    #[test]
    fn zero_content_length_is_signed_as_empty() {
        let policy = policy("account");
        let mut req = request(Method::PUT, "https://account.blob.core.windows.net/container");
        req.insert_header("Content-Length", "0").unwrap();

        let s = policy.string_to_sign(&req);
        assert!(s.starts_with("PUT\n\n\n\n"), "{s:?}");
    }

    #[test]
    fn canonicalized_headers_are_sorted_lowercased_and_unique() {
        let mut req = request(Method::GET, "https://account.blob.core.windows.net/c");
        req.insert_header("X-MS-Version", "2023-11-03").unwrap();
        req.append_header("x-ms-meta-b", "  second").unwrap();
        req.append_header("x-ms-meta-b", "ignored").unwrap();
        req.insert_header("x-ms-date", "now").unwrap();
        req.insert_header("X-Ms-Meta-A", "first").unwrap();
        req.insert_header("Content-Type", "text/plain").unwrap();

        assert_eq!(
            canonicalized_headers(&req),
            "x-ms-date:now\nx-ms-meta-a:first\nx-ms-meta-b:second\nx-ms-version:2023-11-03\n"
        );
    }

    #[test]
    fn canonicalized_resource_sorts_lowercases_and_decodes_queries() {
        let req = request(
            Method::GET,
            "https://account.blob.core.windows.net/container?restype=container&Comp=list&prefix=a%2Fb%20c",
        );

        assert_eq!(
            canonicalized_resource(&req, "account"),
            "/account/container\ncomp:list\nprefix:a/b c\nrestype:container"
        );
    }

    #[test]
    fn canonicalized_resource_defaults_to_root_path() {
        let req = request(Method::GET, "https://account.blob.core.windows.net?comp=list");
        assert_eq!(canonicalized_resource(&req, "account"), "/account/\ncomp:list");
    }

    #[tokio::test]
    async fn policy_signs_on_the_way_out() {
        let transport = ScriptedTransport::new([]);
        let policies: Vec<Arc<dyn Policy>> = vec![Arc::new(policy("account"))];
        let next = Next::new(&policies, &transport);

        next.run(request(Method::HEAD, "https://account.blob.core.windows.net/c/b"))
            .await
            .unwrap();

        let sent = &transport.requests()[0];
        assert!(sent
            .header("authorization")
            .unwrap()
            .starts_with("SharedKey account:"));
        assert!(sent.header("x-ms-date").is_some());
    }
}
