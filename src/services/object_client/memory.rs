//! In-process object store.
//!
//! Behaves like a versioned bucket service: marker pagination with a
//! configurable page size, byte ranges, metadata headers, and the multipart
//! protocol. Failures can be injected for a given part number or for bucket
//! provisioning.

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
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredVersion {
    version: String,
    body: Bytes,
    metadata: Metadata,
    modified: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    metadata: Metadata,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// bucket → key → versions, oldest first.
    buckets: BTreeMap<String, BTreeMap<String, Vec<StoredVersion>>>,
    uploads: HashMap<String, PendingUpload>,
    aborted_uploads: usize,
    list_requests: usize,
}

#[derive(Debug)]
pub struct MemoryObjectClient {
    state: Mutex<MemoryState>,
    page_size: usize,
    failing_part: Option<i32>,
    provisioning_error: Option<StorageError>,
}

impl Default for MemoryObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            page_size: DEFAULT_PAGE_SIZE,
            failing_part: None,
            provisioning_error: None,
        }
    }

    /// Cap every listing page at `page_size` entries.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Reject uploads of the given one-based part number.
    pub fn with_failing_part(mut self, part_number: i32) -> Self {
        self.failing_part = Some(part_number);
        self
    }

    /// Answer bucket creation with `err`.
    pub fn with_provisioning_error(mut self, err: StorageError) -> Self {
        self.provisioning_error = Some(err);
        self
    }

    /// Multipart sessions neither committed nor aborted.
    pub async fn open_uploads(&self) -> usize {
        self.state.lock().await.uploads.len()
    }

    pub async fn aborted_uploads(&self) -> usize {
        self.state.lock().await.aborted_uploads
    }

    /// Listing pages served so far.
    pub async fn list_requests(&self) -> usize {
        self.state.lock().await.list_requests
    }
}

fn etag_of(body: &[u8]) -> String {
    format!("{:x}", md5::compute(body))
}

fn no_such_bucket(bucket: &str) -> StorageError {
    StorageError::NotFound(format!("bucket {bucket}"))
}

fn select_version<'a>(
    versions: &'a [StoredVersion],
    key: &str,
    version: Option<&str>,
) -> StorageResult<&'a StoredVersion> {
    let found = match version {
        Some(id) => versions.iter().find(|v| v.version == id),
        None => versions.last(),
    };
    found.ok_or_else(|| StorageError::NotFound(key.to_string()))
}

/// Parse `bytes=a-b` / `bytes=a-` into an exclusive range over `len` bytes.
fn parse_range(range: &str, len: u64) -> StorageResult<(usize, usize)> {
    let invalid = || StorageError::InvalidRange(range.to_string());
    let spec = range.strip_prefix("bytes=").ok_or_else(invalid)?;
    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.parse().map_err(|_| invalid())?;
    let end: u64 = if end.is_empty() {
        len.saturating_sub(1)
    } else {
        end.parse::<u64>().map_err(|_| invalid())?.min(len.saturating_sub(1))
    };
    if start >= len || end < start {
        return Err(invalid());
    }
    Ok((start as usize, end as usize + 1))
}

fn head_of(stored: &StoredVersion) -> ObjectHead {
    ObjectHead {
        size: stored.body.len() as u64,
        modified: stored.modified,
        version: Some(stored.version.clone()),
        metadata: stored.metadata.clone(),
    }
}

impl MemoryState {
    fn bucket(&self, bucket: &str) -> StorageResult<&BTreeMap<String, Vec<StoredVersion>>> {
        self.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))
    }

    fn bucket_mut(
        &mut self,
        bucket: &str,
    ) -> StorageResult<&mut BTreeMap<String, Vec<StoredVersion>>> {
        self.buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))
    }

    fn store(&mut self, bucket: &str, key: &str, body: Bytes, metadata: Metadata) -> StorageResult<()> {
        let objects = self.bucket_mut(bucket)?;
        objects.entry(key.to_string()).or_default().push(StoredVersion {
            version: Uuid::new_v4().to_string(),
            body,
            metadata,
            modified: Utc::now(),
        });
        Ok(())
    }

    fn remove(&mut self, bucket: &str, key: &str, version: Option<&str>) -> StorageResult<()> {
        let objects = self.bucket_mut(bucket)?;
        match version {
            None => {
                objects.remove(key);
            }
            Some(id) => {
                if let Some(versions) = objects.get_mut(key) {
                    versions.retain(|v| v.version != id);
                    if versions.is_empty() {
                        objects.remove(key);
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn create_bucket(&self, bucket: &str, _region: &str) -> StorageResult<()> {
        if let Some(err) = &self.provisioning_error {
            return Err(err.clone());
        }
        let mut state = self.state.lock().await;
        if state.buckets.contains_key(bucket) {
            return Err(StorageError::AlreadyExists(bucket.to_string()));
        }
        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        request: ListObjectsRequest,
    ) -> StorageResult<ListObjectsPage> {
        let mut state = self.state.lock().await;
        state.list_requests += 1;
        let objects = state.bucket(bucket)?;
        let prefix = request.prefix.unwrap_or_default();
        let marker = request.marker.unwrap_or_default();
        let max_keys = request
            .max_keys
            .map_or(self.page_size, |m| (m.max(0) as usize).min(self.page_size));

        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix) && key.as_str() > marker.as_str())
            .filter_map(|(key, versions)| versions.last().map(|latest| (key, latest)));

        let contents: Vec<ObjectSummary> = matching
            .by_ref()
            .take(max_keys)
            .map(|(key, latest)| ObjectSummary {
                key: key.clone(),
                size: latest.body.len() as u64,
                modified: latest.modified,
            })
            .collect();
        let is_truncated = matching.next().is_some();

        Ok(ListObjectsPage {
            contents,
            is_truncated,
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        request: GetObjectRequest,
    ) -> StorageResult<ObjectBody> {
        let state = self.state.lock().await;
        let versions = state
            .bucket(bucket)?
            .get(&request.key)
            .ok_or_else(|| StorageError::NotFound(request.key.clone()))?;
        let stored = select_version(versions, &request.key, request.version.as_deref())?;

        let body = match &request.range {
            Some(range) => {
                let (start, end) = parse_range(range, stored.body.len() as u64)?;
                stored.body.slice(start..end)
            }
            None => stored.body.clone(),
        };

        Ok(ObjectBody {
            head: head_of(stored),
            body: stream::once(async move { Ok(body) }).boxed(),
        })
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> StorageResult<ObjectHead> {
        let state = self.state.lock().await;
        let versions = state
            .bucket(bucket)?
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        select_version(versions, key, version).map(head_of)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: Option<&Metadata>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.store(bucket, key, body, metadata.cloned().unwrap_or_default())
    }

    async fn copy_object(&self, bucket: &str, from: &str, to: &str) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let latest = state
            .bucket(bucket)?
            .get(from)
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        state.store(bucket, to, latest.body, latest.metadata)
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> StorageResult<()> {
        self.state.lock().await.remove(bucket, key, version)
    }

    async fn delete_objects(&self, bucket: &str, entries: &[DeleteEntry]) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        for entry in entries {
            state.remove(bucket, &entry.key, entry.version.as_deref())?;
        }
        Ok(())
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: &str,
        _key_marker: Option<&str>,
        _version_marker: Option<&str>,
    ) -> StorageResult<VersionsPage> {
        let state = self.state.lock().await;
        let versions = state
            .bucket(bucket)?
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .flat_map(|(key, versions)| {
                let newest = versions.len().saturating_sub(1);
                versions
                    .iter()
                    .enumerate()
                    .rev()
                    .map(move |(i, v)| ObjectVersion {
                        key: key.clone(),
                        version: v.version.clone(),
                        latest: i == newest,
                        modified: v.modified,
                    })
            })
            .collect();

        Ok(VersionsPage {
            versions,
            ..VersionsPage::default()
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: Option<&Metadata>,
    ) -> StorageResult<String> {
        let mut state = self.state.lock().await;
        state.bucket(bucket)?;
        let upload_id = Uuid::new_v4().to_string();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                metadata: metadata.cloned().unwrap_or_default(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String> {
        if self.failing_part == Some(part_number) {
            return Err(StorageError::Transport(format!(
                "part {part_number} rejected"
            )));
        }
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::NotFound(format!("upload {upload_id}")))?;
        let etag = etag_of(&body);
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::NotFound(format!("upload {upload_id}")))?;

        let mut body = BytesMut::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((etag, bytes)) if *etag == part.etag => body.extend_from_slice(bytes),
                _ => {
                    return Err(StorageError::Transport(format!(
                        "invalid part {} for upload {upload_id}",
                        part.part_number
                    )));
                }
            }
        }
        state.store(&upload.bucket, &upload.key, body.freeze(), upload.metadata)
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::NotFound(format!("upload {upload_id}")))?;
        state.aborted_uploads += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn client_with(keys: &[&str]) -> MemoryObjectClient {
        let client = MemoryObjectClient::new().with_page_size(2);
        client.create_bucket("b", "local").await.unwrap();
        for key in keys {
            client
                .put_object("b", key, Bytes::from(key.to_string()), None)
                .await
                .unwrap();
        }
        client
    }

    #[tokio::test]
    async fn pages_respect_marker_and_size() {
        let client = client_with(&["a", "b", "c"]).await;
        let first = client
            .list_objects("b", ListObjectsRequest::default())
            .await
            .unwrap();
        assert_eq!(first.contents.len(), 2);
        assert!(first.is_truncated);

        let second = client
            .list_objects(
                "b",
                ListObjectsRequest {
                    marker: Some("b".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let keys: Vec<_> = second.contents.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["c"]);
        assert!(!second.is_truncated);
    }

    #[tokio::test]
    async fn ranged_get_is_inclusive() {
        let client = MemoryObjectClient::new();
        client.create_bucket("b", "local").await.unwrap();
        client
            .put_object("b", "k", Bytes::from_static(b"0123456789"), None)
            .await
            .unwrap();
        let out = client
            .get_object(
                "b",
                GetObjectRequest {
                    key: "k".into(),
                    range: Some("bytes=2-4".into()),
                    version: None,
                },
            )
            .await
            .unwrap();
        let chunks: Vec<Bytes> = out.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"234");
    }

    #[tokio::test]
    async fn second_bucket_creation_reports_conflict() {
        let client = client_with(&[]).await;
        let err = client.create_bucket("b", "local").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }
}
