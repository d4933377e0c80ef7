//! Built-in pipeline policies.

mod browser;
mod credential;
mod retry;
mod shared_key;
mod telemetry;

pub use browser::{Runtime, StorageBrowserPolicy};
pub use credential::{AnonymousCredentialPolicy, BearerTokenPolicy};
pub use retry::{RetryOptions, StorageRetryPolicy, StorageRetryPolicyType};
pub use shared_key::StorageSharedKeyCredentialPolicy;
pub use telemetry::{TelemetryOptions, TelemetryPolicy};
