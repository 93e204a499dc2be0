//! Shared storage for pipeline runs.
//!
//! This crate provides:
//! - The [`SharedStorage`] trait every stage reads and writes through
//! - [`LocalStorage`], backed by a mounted directory
//! - [`R2Client`], backed by Cloudflare R2 over the S3 API
//! - Key validation for run-scoped namespaces

pub mod client;
pub mod error;
pub mod local;
pub mod shared;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use shared::{validate_key, validate_prefix, SharedStorage};
