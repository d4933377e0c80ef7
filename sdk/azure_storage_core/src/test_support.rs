//! Helpers for testing code built on the storage pipeline.
//!
//! Enabled for this crate's tests and, for sibling crates, through the
//! `test-support` feature.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use wiremock::MockServer;

use crate::auth::StorageCredential;
use crate::client::StorageClient;
use crate::error::{StorageError, StorageResult};
use crate::http::{Request, Response};
use crate::pipeline::{Next, Policy};
use crate::policies::RetryOptions;
use crate::transport::HttpClient;

/// Account name used against mock servers.
pub const TEST_ACCOUNT_NAME: &str = "devstoreaccount1";

/// Well-known development storage key (not a secret).
pub const TEST_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

type Fallback = Box<dyn Fn() -> StorageResult<Response> + Send + Sync>;

/// A transport that replays queued outcomes and records every request.
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<StorageResult<Response>>>,
    fallback: Fallback,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    /// Replay `outcomes` in order, then answer 200.
    pub fn new(outcomes: impl IntoIterator<Item = StorageResult<Response>>) -> Self {
        Self {
            queue: Mutex::new(outcomes.into_iter().collect()),
            fallback: Box::new(|| Ok(Response::from_status(200))),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with the outcome produced by `outcome`.
    pub fn repeating(
        outcome: impl Fn() -> StorageResult<Response> + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Box::new(outcome),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("queued", &lock(&self.queue).len())
            .field("received", &self.request_count())
            .finish()
    }
}

#[async_trait]
impl HttpClient for ScriptedTransport {
    async fn send_request(&self, request: Request) -> StorageResult<Response> {
        lock(&self.requests).push(request);
        let next = lock(&self.queue).pop_front();
        next.unwrap_or_else(|| (self.fallback)())
    }
}

type Injector = Box<dyn Fn(&Request) -> Option<StorageError> + Send + Sync>;

/// Fails requests with an injected error before they reach the next policy.
pub struct InjectorPolicy {
    injector: Injector,
}

impl InjectorPolicy {
    pub const NAME: &'static str = "InjectorPolicy";

    /// `injector` is consulted for every request; returning an error fails it.
    pub fn new(injector: impl Fn(&Request) -> Option<StorageError> + Send + Sync + 'static) -> Self {
        Self {
            injector: Box::new(injector),
        }
    }
}

impl fmt::Debug for InjectorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectorPolicy").finish_non_exhaustive()
    }
}

#[async_trait]
impl Policy for InjectorPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, request: Request, next: Next<'_>) -> StorageResult<Response> {
        if let Some(err) = (self.injector)(&request) {
            return Err(err);
        }
        next.run(request).await
    }
}

/// Build a shared-key client pointed at `server` with fast retries.
pub fn setup_mock_client(server: &MockServer) -> StorageClient {
    let credential = StorageCredential::shared_key(TEST_ACCOUNT_NAME, TEST_ACCOUNT_KEY)
        .expect("test key should be valid base64");

    StorageClient::builder()
        .endpoint(format!("{}/{}", server.uri(), TEST_ACCOUNT_NAME))
        .credential(credential)
        .retry_options(RetryOptions {
            retry_delay: std::time::Duration::from_millis(1),
            max_retry_delay: std::time::Duration::from_millis(10),
            ..Default::default()
        })
        .http_client(Arc::new(reqwest::Client::new()))
        .build()
        .expect("should build client")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
