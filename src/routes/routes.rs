//! Defines routes for the blob operations.
//!
//! ## Structure
//! - `GET    /`          list objects (supports prefix, marker, max-keys)
//! - `POST   /_rename`   move a key or prefix (`{"from": .., "to": ..}`)
//! - `PUT    /{*key}`    stream an object in
//! - `GET    /{*key}`    stream an object out (`Range`, `?versionId=`, `?versions`)
//! - `HEAD   /{*key}`    object headers only
//! - `DELETE /{*key}`    delete object
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            delete_object, get_object, head_object, list_objects, put_object, rename_object,
        },
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build and return the router over a `StorageService`.
pub fn routes() -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(list_objects))
        .route("/_rename", post(rename_object))
        .route(
            "/{*key}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
}
