//! Ordered chain of policies in front of an [`HttpClient`].
//!
//! Policies run outermost first. The credential policy always sits innermost,
//! right before the transport, so the signature covers every header and query
//! parameter the other policies add.
//!
//! ```rust,no_run
//! use azure_storage_core::auth::StorageCredential;
//! use azure_storage_core::pipeline::{Pipeline, StoragePipelineOptions};
//! use azure_storage_core::policies::RetryOptions;
//!
//! # fn example() -> azure_storage_core::StorageResult<()> {
//! let options = StoragePipelineOptions {
//!     retry: RetryOptions {
//!         max_tries: 3,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! let pipeline = Pipeline::new(StorageCredential::shared_key("account", "a2V5")?, options)?;
//! assert_eq!(
//!     pipeline.policy_names(),
//!     ["TelemetryPolicy", "StorageBrowserPolicy", "StorageRetryPolicy", "StorageSharedKeyCredentialPolicy"]
//! );
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::abort::run_abortable;
use crate::auth::StorageCredential;
use crate::error::{StorageError, StorageResult};
use crate::http::{Request, Response};
use crate::policies::{
    RetryOptions, Runtime, StorageBrowserPolicy, StorageRetryPolicy, TelemetryOptions,
    TelemetryPolicy,
};
use crate::transport::{default_http_client, HttpClient};

/// A unit of request/response interception.
///
/// Implementations may change the request, then hand it to `next`. Only a
/// recovery policy (retry) may turn an error from `next` into something else.
#[async_trait]
pub trait Policy: Send + Sync + fmt::Debug {
    /// Name used to position other policies relative to this one.
    fn name(&self) -> &str;

    async fn send(&self, request: Request, next: Next<'_>) -> StorageResult<Response>;
}

/// The remainder of the chain below the running policy.
///
/// `Next` is `Copy`; invoking it again re-runs every policy below the caller.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn HttpClient,
}

impl<'a> Next<'a> {
    pub fn new(policies: &'a [Arc<dyn Policy>], transport: &'a dyn HttpClient) -> Self {
        Self {
            policies,
            transport,
        }
    }

    /// Send `request` through the rest of the chain.
    pub async fn run(self, request: Request) -> StorageResult<Response> {
        match self.policies.split_first() {
            Some((policy, rest)) => {
                policy
                    .send(
                        request,
                        Next {
                            policies: rest,
                            transport: self.transport,
                        },
                    )
                    .await
            }
            None => self.transport.send_request(request).await,
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field(
                "policies",
                &self.policies.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Where to insert a policy added with [`Pipeline::add_policy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyPosition {
    /// After every other policy, still ahead of the credential policy.
    Append,
    /// Directly before the named policy.
    Before(String),
    /// Directly after the named policy.
    After(String),
}

/// Options for [`Pipeline::new`].
#[derive(Debug, Clone, Default)]
pub struct StoragePipelineOptions {
    /// Built-in retry policy behavior.
    pub retry: RetryOptions,
    /// User agent details.
    pub telemetry: TelemetryOptions,
    /// HTTP client to send requests with. Defaults to the shared client.
    pub http_client: Option<Arc<dyn HttpClient>>,
    /// Execution context. Defaults to [`Runtime::current`].
    pub runtime: Option<Runtime>,
    /// Scopes requested for bearer tokens. Defaults to the storage scope.
    pub audience: Option<Vec<String>>,
}

/// An ordered set of policies and the transport they end in.
///
/// The chain is stored fully assembled; its last entry is always the
/// credential policy.
#[derive(Debug, Clone)]
pub struct Pipeline {
    policies: Vec<Arc<dyn Policy>>,
    transport: Arc<dyn HttpClient>,
}

impl Pipeline {
    /// Build the default storage pipeline for `credential`:
    /// telemetry, browser compatibility, retry, then the credential policy.
    pub fn new(credential: StorageCredential, options: StoragePipelineOptions) -> StorageResult<Self> {
        let runtime = options.runtime.unwrap_or_else(Runtime::current);
        let transport = options.http_client.unwrap_or_else(default_http_client);

        let policies: Vec<Arc<dyn Policy>> = vec![
            Arc::new(TelemetryPolicy::new(options.telemetry, runtime)),
            Arc::new(StorageBrowserPolicy::with_runtime(runtime)),
            Arc::new(StorageRetryPolicy::new(options.retry)?),
        ];
        let credential_policy = credential.create_policy(options.audience);

        Ok(Self::from_parts(policies, credential_policy, transport))
    }

    /// Build a pipeline from explicit parts.
    pub fn from_parts(
        mut policies: Vec<Arc<dyn Policy>>,
        credential_policy: Arc<dyn Policy>,
        transport: Arc<dyn HttpClient>,
    ) -> Self {
        policies.push(credential_policy);
        Self {
            policies,
            transport,
        }
    }

    /// Insert `policy` at `position`.
    ///
    /// The credential policy cannot be displaced: positioning relative to it
    /// with `After` is rejected, `Before` is treated as `Append`.
    pub fn add_policy(&mut self, policy: Arc<dyn Policy>, position: PolicyPosition) -> StorageResult<()> {
        let credential_index = self.credential_index();
        let credential_name = self.policies[credential_index].name();
        let index = match &position {
            PolicyPosition::Append => credential_index,
            PolicyPosition::Before(name) if name == credential_name => credential_index,
            PolicyPosition::Before(name) => self.index_of(name)?,
            PolicyPosition::After(name) => self.index_of(name)? + 1,
        };
        tracing::debug!(policy = policy.name(), ?position, "adding policy");
        self.policies.insert(index, policy);
        Ok(())
    }

    fn credential_index(&self) -> usize {
        self.policies.len().saturating_sub(1)
    }

    /// Position of `name` among the policies ahead of the credential policy.
    fn index_of(&self, name: &str) -> StorageResult<usize> {
        self.policies[..self.credential_index()]
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| StorageError::InvalidPolicyPosition(name.to_string()))
    }

    /// Policy names in execution order, credential policy last.
    pub fn policy_names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// The HTTP client at the end of the chain.
    pub fn http_client(&self) -> &Arc<dyn HttpClient> {
        &self.transport
    }

    /// Send `request` through every policy and the transport.
    ///
    /// If the request carries an abort signal, firing it fails the whole
    /// operation with [`StorageError::Cancelled`], even mid-send.
    pub async fn send(&self, request: Request) -> StorageResult<Response> {
        let signal = request.abort_signal().cloned();
        let next = Next::new(&self.policies, self.transport.as_ref());

        run_abortable(signal.as_ref(), next.run(request)).await
    }
}
