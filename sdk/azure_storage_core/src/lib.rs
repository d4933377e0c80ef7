#![doc = include_str!("../README.md")]

pub mod abort;
pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod policies;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{StorageError, StorageResult};
