//! The remote object-store client seam.
//!
//! `ObjectClient` is the RPC surface the object-store backend drives: list,
//! get, put, delete, head, copy, versions, and the multipart calls. Errors
//! come back already classified (`NotFound`, `AlreadyExists`,
//! `AccessDenied`, `Transport`, ...). Keys passed here are fully namespaced.

pub mod memory;
pub mod s3;

use crate::models::{
    bucket::BucketLocation,
    metadata::Metadata,
    multipart::CompletedPart,
    object::{DeleteEntry, ObjectVersion},
};
use crate::services::{
    storage_service::{StorageError, StorageResult},
    transfer::ByteStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// One `ListObjects` request (marker pagination).
#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub max_keys: Option<i32>,
}

/// One object in a listing page.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// A page of results. An empty page always ends the listing.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsPage {
    pub contents: Vec<ObjectSummary>,
    pub is_truncated: bool,
}

/// Object header as returned by head/get.
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub version: Option<String>,
    pub metadata: Metadata,
}

/// A get request. `range` is an HTTP byte-range value (`bytes=a-b`).
#[derive(Debug, Clone, Default)]
pub struct GetObjectRequest {
    pub key: String,
    pub range: Option<String>,
    pub version: Option<String>,
}

pub struct ObjectBody {
    pub head: ObjectHead,
    pub body: ByteStream,
}

/// A page of `ListObjectVersions` results.
#[derive(Debug, Clone, Default)]
pub struct VersionsPage {
    pub versions: Vec<ObjectVersion>,
    pub next_key_marker: Option<String>,
    pub next_version_marker: Option<String>,
    pub is_truncated: bool,
}

#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn create_bucket(&self, bucket: &str, region: &str) -> StorageResult<()>;

    async fn list_objects(
        &self,
        bucket: &str,
        request: ListObjectsRequest,
    ) -> StorageResult<ListObjectsPage>;

    async fn get_object(&self, bucket: &str, request: GetObjectRequest)
    -> StorageResult<ObjectBody>;

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> StorageResult<ObjectHead>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: Option<&Metadata>,
    ) -> StorageResult<()>;

    async fn copy_object(&self, bucket: &str, from: &str, to: &str) -> StorageResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str, version: Option<&str>)
    -> StorageResult<()>;

    async fn delete_objects(&self, bucket: &str, entries: &[DeleteEntry]) -> StorageResult<()>;

    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: &str,
        key_marker: Option<&str>,
        version_marker: Option<&str>,
    ) -> StorageResult<VersionsPage>;

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: Option<&Metadata>,
    ) -> StorageResult<String>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()>;
}

/// A client bound to one bucket, with one-time lazy provisioning.
#[derive(Clone)]
pub struct BucketHandle {
    pub client: Arc<dyn ObjectClient>,
    pub location: BucketLocation,
    ready: Arc<OnceCell<()>>,
}

impl BucketHandle {
    pub fn new(client: Arc<dyn ObjectClient>, location: BucketLocation) -> Self {
        Self {
            client,
            location,
            ready: Arc::new(OnceCell::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.location.name
    }

    /// Create the bucket once. "Already exists" and "access denied" count as
    /// ready: the caller may lack provisioning rights but still have
    /// object-level rights.
    pub async fn ensure_ready(&self) -> StorageResult<()> {
        self.ready
            .get_or_try_init(|| async {
                let bucket = &self.location.name;
                match self
                    .client
                    .create_bucket(bucket, &self.location.region)
                    .await
                {
                    Ok(()) => {
                        debug!("created bucket `{}`", bucket);
                        Ok(())
                    }
                    Err(StorageError::AlreadyExists(_)) => Ok(()),
                    Err(StorageError::AccessDenied(reason)) => {
                        warn!("cannot provision bucket `{}` ({}), assuming it exists", bucket, reason);
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            })
            .await
            .map(|_| ())
    }
}
