//! Uniform blob storage over a local directory tree or a remote object store.
//!
//! Open a backend with [`StorageService::open`] and drive it through the
//! [`BlobStore`] operations. The HTTP surface in [`routes`] exposes the same
//! operations over axum.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use services::storage_service::{
    BlobStore, StorageError, StorageResult, StorageService, StoreOptions, StoreType,
};
