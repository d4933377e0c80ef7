use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::auth::TokenProvider;
use crate::error::StorageResult;
use crate::http::{headers, Request, Response};
use crate::pipeline::{Next, Policy};

/// Sends requests without authorization, for public containers and SAS URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousCredentialPolicy;

impl AnonymousCredentialPolicy {
    pub const NAME: &'static str = "AnonymousCredentialPolicy";
}

#[async_trait]
impl Policy for AnonymousCredentialPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, request: Request, next: Next<'_>) -> StorageResult<Response> {
        next.run(request).await
    }
}

/// Authorizes requests with an OAuth bearer token.
///
/// A token is requested from the provider on every try; providers are
/// expected to cache.
#[derive(Debug, Clone)]
pub struct BearerTokenPolicy {
    provider: Arc<dyn TokenProvider>,
    scopes: Vec<String>,
}

impl BearerTokenPolicy {
    pub const NAME: &'static str = "BearerTokenPolicy";

    pub fn new(provider: Arc<dyn TokenProvider>, scopes: Vec<String>) -> Self {
        Self { provider, scopes }
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

#[async_trait]
impl Policy for BearerTokenPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, mut request: Request, next: Next<'_>) -> StorageResult<Response> {
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        let token = self.provider.get_token(&scopes).await?;

        request.insert_header(headers::X_MS_DATE, httpdate::fmt_http_date(SystemTime::now()))?;
        request.insert_header(
            headers::AUTHORIZATION,
            format!("Bearer {}", token.expose_secret()),
        )?;
        if let Some(value) = request.headers_mut().get_mut(headers::AUTHORIZATION) {
            value.set_sensitive(true);
        }

        next.run(request).await
    }
}
