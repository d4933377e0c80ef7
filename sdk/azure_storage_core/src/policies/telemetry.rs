use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::http::{headers, Request, Response};
use crate::pipeline::{Next, Policy};
use crate::policies::Runtime;

/// User agent configuration.
#[derive(Debug, Clone, Default)]
pub struct TelemetryOptions {
    /// Prepended to the SDK user agent, separated by a space.
    pub user_agent_prefix: Option<String>,
}

/// Tags requests with a `User-Agent` and an `x-ms-client-request-id`.
///
/// Browsers do not allow setting `User-Agent`, so only the request id is
/// added there.
#[derive(Debug, Clone)]
pub struct TelemetryPolicy {
    user_agent: String,
    runtime: Runtime,
}

impl TelemetryPolicy {
    pub const NAME: &'static str = "TelemetryPolicy";

    pub fn new(options: TelemetryOptions, runtime: Runtime) -> Self {
        let sdk = format!(
            "azsdk-rust-{}/{} ({}-{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH,
        );
        let user_agent = match options.user_agent_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix} {sdk}"),
            _ => sdk,
        };
        Self {
            user_agent,
            runtime,
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[async_trait]
impl Policy for TelemetryPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, mut request: Request, next: Next<'_>) -> StorageResult<Response> {
        if self.runtime == Runtime::Server && request.header(headers::USER_AGENT).is_none() {
            request.insert_header(headers::USER_AGENT, &self.user_agent)?;
        }
        if request.header(headers::X_MS_CLIENT_REQUEST_ID).is_none() {
            request.insert_header(headers::X_MS_CLIENT_REQUEST_ID, new_request_id())?;
        }
        next.run(request).await
    }
}

/// A random version 4 UUID in its hyphenated form.
fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}
