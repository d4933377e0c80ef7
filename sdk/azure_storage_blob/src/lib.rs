#![doc = include_str!("../README.md")]

//! ## Modules
//!
//! - [`blob`] - Upload, download, inspect and delete blobs
//! - [`container`] - Create, delete and list containers
//! - [`models`] - Request options and response types

pub mod blob;
pub mod container;
pub mod models;
