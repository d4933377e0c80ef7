use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Method;

use crate::error::StorageResult;
use crate::http::{headers, query, Request, Response};
use crate::pipeline::{Next, Policy};

/// The execution context the pipeline runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    /// Native process with full control over request headers.
    Server,
    /// Browser host (wasm32), where the fetch layer owns cookies and length.
    Browser,
}

impl Runtime {
    /// `Browser` when compiled for `wasm32`, `Server` otherwise.
    pub fn current() -> Self {
        if cfg!(target_arch = "wasm32") {
            Self::Browser
        } else {
            Self::Server
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::current()
    }
}

/// Works around browser caching and forbidden headers.
///
/// In a browser, GET and HEAD requests get a `_=<epoch millis>` query
/// parameter so cached responses are never reused, and `Cookie` and
/// `Content-Length` are removed. In a server context the request is untouched.
#[derive(Debug, Clone, Copy)]
pub struct StorageBrowserPolicy {
    runtime: Runtime,
}

impl StorageBrowserPolicy {
    pub const NAME: &'static str = "StorageBrowserPolicy";

    pub fn new() -> Self {
        Self::with_runtime(Runtime::current())
    }

    pub fn with_runtime(runtime: Runtime) -> Self {
        Self { runtime }
    }
}

impl Default for StorageBrowserPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Policy for StorageBrowserPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, mut request: Request, next: Next<'_>) -> StorageResult<Response> {
        if self.runtime == Runtime::Server {
            return next.run(request).await;
        }

        if matches!(*request.method(), Method::GET | Method::HEAD) {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            request.set_query_parameter(query::FORCE_BROWSER_NO_CACHE, &millis.to_string());
        }

        request.remove_header(headers::COOKIE);
        request.remove_header(headers::CONTENT_LENGTH);

        next.run(request).await
    }
}
