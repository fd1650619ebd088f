//! S3-compatible client built on `aws-sdk-s3`.
//!
//! Works against AWS S3 and S3-compatible services (MinIO, R2, ...) when a
//! custom endpoint is configured. Credentials come from the standard AWS
//! provider chain.

use super::{
    GetObjectRequest, ListObjectsPage, ListObjectsRequest, ObjectBody, ObjectClient, ObjectHead,
    ObjectSummary, VersionsPage,
};
use crate::models::{
    metadata::Metadata,
    multipart::CompletedPart,
    object::{DeleteEntry, ObjectVersion},
};
use crate::services::storage_service::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Region, http::HttpResponse},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime as AwsDateTime},
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart as AwsCompletedPart,
        CreateBucketConfiguration, Delete, ObjectIdentifier,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tokio_util::io::ReaderStream;

pub struct S3ObjectClient {
    client: Client,
}

impl S3ObjectClient {
    /// Build a client for `region`, optionally against a custom endpoint
    /// (path-style addressing is forced for those).
    pub async fn connect(region: &str, endpoint: Option<String>) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Classify an SDK failure for `subject` using the HTTP status and the
/// service error code.
fn classify<E>(err: SdkError<E, HttpResponse>, subject: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err
        .as_service_error()
        .and_then(|e| e.code())
        .map(str::to_owned);
    match (status, code.as_deref()) {
        (_, Some("NoSuchKey" | "NoSuchBucket" | "NoSuchUpload" | "NoSuchVersion" | "NotFound"))
        | (Some(404), _) => StorageError::NotFound(subject.to_string()),
        (_, Some("BucketAlreadyOwnedByYou" | "BucketAlreadyExists")) | (Some(409), _) => {
            StorageError::AlreadyExists(subject.to_string())
        }
        (_, Some("AccessDenied")) | (Some(403), _) => {
            StorageError::AccessDenied(subject.to_string())
        }
        (_, Some("InvalidRange")) | (Some(416), _) => {
            StorageError::InvalidRange(subject.to_string())
        }
        _ => StorageError::Transport(DisplayErrorContext(&err).to_string()),
    }
}

fn to_chrono(value: Option<&AwsDateTime>) -> DateTime<Utc> {
    value
        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_default()
}

fn to_metadata(value: Option<&HashMap<String, String>>) -> Metadata {
    value
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn to_header_map(metadata: Option<&Metadata>) -> Option<HashMap<String, String>> {
    metadata.map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn build_error(err: impl std::fmt::Display) -> StorageError {
    StorageError::Transport(err.to_string())
}

#[async_trait]
impl ObjectClient for S3ObjectClient {
    async fn create_bucket(&self, bucket: &str, region: &str) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e, bucket))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        request: ListObjectsRequest,
    ) -> StorageResult<ListObjectsPage> {
        let out = self
            .client
            .list_objects()
            .bucket(bucket)
            .set_prefix(request.prefix)
            .set_marker(request.marker)
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(|e| classify(e, bucket))?;

        let contents = out
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    modified: to_chrono(obj.last_modified()),
                })
            })
            .collect();

        Ok(ListObjectsPage {
            contents,
            is_truncated: out.is_truncated().unwrap_or(false),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        request: GetObjectRequest,
    ) -> StorageResult<ObjectBody> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(&request.key)
            .set_range(request.range)
            .set_version_id(request.version)
            .send()
            .await
            .map_err(|e| classify(e, &request.key))?;

        let head = ObjectHead {
            size: out.content_length().unwrap_or(0).max(0) as u64,
            modified: to_chrono(out.last_modified()),
            version: out.version_id().map(str::to_owned),
            metadata: to_metadata(out.metadata()),
        };
        let body = ReaderStream::new(out.body.into_async_read())
            .map_err(StorageError::from)
            .boxed();

        Ok(ObjectBody { head, body })
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> StorageResult<ObjectHead> {
        let out = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version.map(str::to_owned))
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        Ok(ObjectHead {
            size: out.content_length().unwrap_or(0).max(0) as u64,
            modified: to_chrono(out.last_modified()),
            version: out.version_id().map(str::to_owned),
            metadata: to_metadata(out.metadata()),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: Option<&Metadata>,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_metadata(to_header_map(metadata))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e, key))
    }

    async fn copy_object(&self, bucket: &str, from: &str, to: &str) -> StorageResult<()> {
        self.client
            .copy_object()
            .bucket(bucket)
            .copy_source(format!("{bucket}/{from}"))
            .key(to)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e, from))
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version.map(str::to_owned))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e, key))
    }

    async fn delete_objects(&self, bucket: &str, entries: &[DeleteEntry]) -> StorageResult<()> {
        let objects = entries
            .iter()
            .map(|entry| {
                ObjectIdentifier::builder()
                    .key(&entry.key)
                    .set_version_id(entry.version.clone())
                    .build()
                    .map_err(build_error)
            })
            .collect::<StorageResult<Vec<_>>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(build_error)?;

        self.client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e, bucket))
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: &str,
        key_marker: Option<&str>,
        version_marker: Option<&str>,
    ) -> StorageResult<VersionsPage> {
        let out = self
            .client
            .list_object_versions()
            .bucket(bucket)
            .prefix(prefix)
            .set_key_marker(key_marker.map(str::to_owned))
            .set_version_id_marker(version_marker.map(str::to_owned))
            .send()
            .await
            .map_err(|e| classify(e, prefix))?;

        let versions = out
            .versions()
            .iter()
            .filter_map(|v| {
                Some(ObjectVersion {
                    key: v.key()?.to_string(),
                    version: v.version_id().unwrap_or("null").to_string(),
                    latest: v.is_latest().unwrap_or(false),
                    modified: to_chrono(v.last_modified()),
                })
            })
            .collect();

        Ok(VersionsPage {
            versions,
            next_key_marker: out.next_key_marker().map(str::to_owned),
            next_version_marker: out.next_version_id_marker().map(str::to_owned),
            is_truncated: out.is_truncated().unwrap_or(false),
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: Option<&Metadata>,
    ) -> StorageResult<String> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_metadata(to_header_map(metadata))
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        out.upload_id()
            .map(str::to_owned)
            .ok_or_else(|| StorageError::Transport(format!("no upload id returned for `{key}`")))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String> {
        let out = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        out.e_tag().map(str::to_owned).ok_or_else(|| {
            StorageError::Transport(format!("no etag returned for part {part_number} of `{key}`"))
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let completed = parts
            .iter()
            .map(|p| {
                AwsCompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e, key))
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e, key))
    }
}
