//! Cooperative cancellation for a logical operation.
//!
//! An [`AbortController`] hands out [`AbortSignal`]s that are attached to a
//! [`Request`](crate::http::Request). The pipeline races the in-flight send and
//! every retry delay against the signal and fails with
//! [`StorageError::Cancelled`] once it fires.
//!
//! ```rust
//! use azure_storage_core::abort::AbortController;
//!
//! let controller = AbortController::new();
//! let signal = controller.signal();
//! assert!(!signal.is_aborted());
//! controller.abort();
//! assert!(signal.is_aborted());
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{StorageError, StorageResult};

/// Owner side of an abort signal.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

/// Observer side of an abort signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortController {
    /// Create a controller whose signal has not fired.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Get a signal tied to this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// Whether the signal has fired.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires.
    ///
    /// Never resolves if the controller is dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Fail with [`StorageError::Cancelled`] if the signal has fired.
    pub fn check(&self) -> StorageResult<()> {
        if self.is_aborted() {
            Err(StorageError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Drive `fut` to completion unless `signal` fires first.
pub async fn run_abortable<F, T>(signal: Option<&AbortSignal>, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match signal {
        None => fut.await,
        Some(signal) => {
            signal.check()?;
            tokio::select! {
                biased;
                _ = signal.aborted() => Err(StorageError::Cancelled),
                result = fut => result,
            }
        }
    }
}

/// Sleep for `duration` unless `signal` fires first.
pub async fn delay(duration: Duration, signal: Option<&AbortSignal>) -> StorageResult<()> {
    run_abortable(signal, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}
