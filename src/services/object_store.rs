//! Object-store backend.
//!
//! Every operation goes through a [`BucketHandle`], which provisions the
//! bucket lazily on first use and prepends the configured key namespace.
//! Writes whose declared length exceeds the multipart threshold are handed
//! to the multipart coordinator; everything else is buffered into a single
//! put once the stream finishes.

use crate::models::{
    bucket::BucketLocation,
    entry::ListOptions,
    metadata::{self, Metadata},
    multipart::CompletedPart,
    object::{DeleteEntry, ObjectData, ObjectStat, ReadOptions, WriteOptions},
};
use crate::services::{
    keys,
    list::{EntryStream, PageWalker, VersionStream, VersionWalker},
    multipart::{MultipartConfig, MultipartUpload, PartUploader},
    object_client::{BucketHandle, GetObjectRequest, ObjectClient},
    rename::{self, EntryMover},
    storage_service::{BlobStore, StorageError, StorageResult},
    transfer::{self, ByteStream, ChunkSource, WriteStream},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use tracing::{debug, info};

const BACKEND: &str = "object-store";

#[derive(Clone)]
pub struct ObjectStore {
    bucket: BucketHandle,
    multipart: MultipartConfig,
}

impl ObjectStore {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        location: BucketLocation,
        multipart: MultipartConfig,
    ) -> Self {
        Self {
            bucket: BucketHandle::new(client, location),
            multipart,
        }
    }

    pub fn location(&self) -> &BucketLocation {
        &self.bucket.location
    }

    /// Namespaced backend key for a caller key.
    fn full_key(&self, key: &str) -> StorageResult<String> {
        let normalized = keys::object_key(key)?;
        Ok(self.bucket.location.full_key(&normalized))
    }

    fn client(&self) -> &dyn ObjectClient {
        self.bucket.client.as_ref()
    }
}

#[async_trait]
impl BlobStore for ObjectStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn list(&self, options: ListOptions) -> EntryStream {
        PageWalker::new(self.bucket.clone(), &options).into_stream()
    }

    async fn get(&self, key: &str, version: Option<&str>) -> StorageResult<ObjectData> {
        let full = self.full_key(key)?;
        self.bucket.ensure_ready().await?;
        let object = self
            .client()
            .get_object(
                self.bucket.name(),
                GetObjectRequest {
                    key: full,
                    range: None,
                    version: version.map(str::to_string),
                },
            )
            .await?;
        let body = object
            .body
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(ObjectData {
            body: body.freeze(),
            metadata: metadata::non_empty(Some(object.head.metadata)),
        })
    }

    async fn put(&self, key: &str, body: Bytes, metadata: Option<Metadata>) -> StorageResult<()> {
        let full = self.full_key(key)?;
        self.bucket.ensure_ready().await?;
        let metadata = metadata::non_empty(metadata);
        debug!("putting `{}` ({} bytes)", full, body.len());
        self.client()
            .put_object(self.bucket.name(), &full, body, metadata.as_ref())
            .await
    }

    async fn del(&self, key: &str, version: Option<&str>) -> StorageResult<()> {
        let full = self.full_key(key)?;
        self.bucket.ensure_ready().await?;
        self.client()
            .delete_object(self.bucket.name(), &full, version)
            .await
    }

    async fn del_batch(&self, entries: &[DeleteEntry]) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let entries = entries
            .iter()
            .map(|entry| {
                Ok(DeleteEntry {
                    key: self.full_key(&entry.key)?,
                    version: entry.version.clone(),
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        self.bucket.ensure_ready().await?;
        self.client()
            .delete_objects(self.bucket.name(), &entries)
            .await
    }

    async fn stat(&self, key: &str, version: Option<&str>) -> StorageResult<ObjectStat> {
        let full = self.full_key(key)?;
        self.bucket.ensure_ready().await?;
        let head = self
            .client()
            .head_object(self.bucket.name(), &full, version)
            .await?;
        Ok(ObjectStat {
            size: head.size,
            modified: head.modified,
            version: head.version,
            metadata: metadata::non_empty(Some(head.metadata)),
        })
    }

    fn versions(&self, key: &str) -> VersionStream {
        match self.full_key(key) {
            Ok(full) => VersionWalker::new(self.bucket.clone(), full).into_stream(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }

    /// An exact key is copied then deleted, and every key beneath `from/` is
    /// moved under `to/`. Either part may be empty, but not both.
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let source = self.full_key(from)?;
        let dest = self.full_key(to)?;
        self.bucket.ensure_ready().await?;

        let exact = match self.client().head_object(self.bucket.name(), &source, None).await {
            Ok(_) => {
                self.client()
                    .copy_object(self.bucket.name(), &source, &dest)
                    .await?;
                self.client()
                    .delete_object(self.bucket.name(), &source, None)
                    .await?;
                info!("renamed `{}` to `{}`", source, dest);
                true
            }
            Err(StorageError::NotFound(_)) => false,
            Err(err) => return Err(err),
        };

        let from_prefix = format!("{}/", keys::normalize_key(from));
        let to_prefix = format!("{}/", keys::normalize_key(to));
        let moved = rename::rename_prefix(self, &from_prefix, &to_prefix).await?;
        if moved == 0 && !exact {
            return Err(StorageError::NotFound(keys::normalize_key(from)));
        }
        Ok(())
    }

    async fn create_read_stream(
        &self,
        key: &str,
        options: ReadOptions,
    ) -> StorageResult<ByteStream> {
        if let (Some(start), Some(end)) = (options.start, options.end) {
            if end < start {
                return Err(StorageError::InvalidRange(format!(
                    "end {end} precedes start {start}"
                )));
            }
        }
        let full = self.full_key(key)?;
        self.bucket.ensure_ready().await?;
        let object = self
            .client()
            .get_object(
                self.bucket.name(),
                GetObjectRequest {
                    key: full,
                    range: transfer::range_header(options.start, options.end),
                    version: options.version,
                },
            )
            .await?;
        Ok(object.body)
    }

    fn create_write_stream(&self, key: &str, options: WriteOptions) -> StorageResult<WriteStream> {
        let full = self.full_key(key)?;
        let bucket = self.bucket.clone();
        let config = self.multipart;
        let metadata = metadata::non_empty(options.metadata);
        let length = options.length;
        if let Some(total) = length.filter(|_| config.applies_to(length)) {
            config.check_length(total)?;
        }
        Ok(WriteStream::spawn(key, length, move |source| {
            upload(bucket, full, metadata, length, config, source)
        }))
    }
}

#[async_trait]
impl EntryMover for ObjectStore {
    fn entries(&self, options: ListOptions) -> EntryStream {
        self.list(options)
    }

    async fn copy_entry(&self, from: &str, to: &str) -> StorageResult<()> {
        let from = self.full_key(from)?;
        let to = self.full_key(to)?;
        self.client()
            .copy_object(self.bucket.name(), &from, &to)
            .await
    }

    async fn remove_entry(&self, key: &str) -> StorageResult<()> {
        let full = self.full_key(key)?;
        self.client()
            .delete_object(self.bucket.name(), &full, None)
            .await
    }
}

/// Drive one streaming write. The open step is bucket provisioning; a
/// failure there surfaces before any byte is sent.
async fn upload(
    bucket: BucketHandle,
    key: String,
    metadata: Option<Metadata>,
    length: Option<u64>,
    config: MultipartConfig,
    mut source: ChunkSource,
) -> StorageResult<()> {
    bucket.ensure_ready().await?;

    if let Some(total) = length.filter(|_| config.applies_to(length)) {
        let uploader = Arc::new(ObjectPartUploader {
            bucket,
            key,
            metadata,
        });
        let mut upload = MultipartUpload::new(uploader, total, &config)?;
        loop {
            match source.next_chunk().await {
                Ok(Some(chunk)) => upload.write(chunk).await?,
                Ok(None) => break,
                Err(err) => {
                    upload.abort().await;
                    return Err(err);
                }
            }
        }
        return upload.finish().await;
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = source.next_chunk().await? {
        body.extend_from_slice(&chunk);
    }
    debug!("uploading `{}` in one request ({} bytes)", key, body.len());
    bucket
        .client
        .put_object(bucket.name(), &key, body.freeze(), metadata.as_ref())
        .await
}

/// Multipart calls bound to one object.
struct ObjectPartUploader {
    bucket: BucketHandle,
    key: String,
    metadata: Option<Metadata>,
}

#[async_trait]
impl PartUploader for ObjectPartUploader {
    async fn open_session(&self) -> StorageResult<String> {
        self.bucket
            .client
            .create_multipart_upload(self.bucket.name(), &self.key, self.metadata.as_ref())
            .await
    }

    async fn upload_part(
        &self,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String> {
        self.bucket
            .client
            .upload_part(self.bucket.name(), &self.key, upload_id, part_number, body)
            .await
    }

    async fn commit(&self, upload_id: &str, parts: &[CompletedPart]) -> StorageResult<()> {
        self.bucket
            .client
            .complete_multipart_upload(self.bucket.name(), &self.key, upload_id, parts)
            .await
    }

    async fn abort(&self, upload_id: &str) -> StorageResult<()> {
        self.bucket
            .client
            .abort_multipart_upload(self.bucket.name(), &self.key, upload_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bucket::DEFAULT_REGION;
    use crate::services::object_client::memory::MemoryObjectClient;

    fn store_over(client: &Arc<MemoryObjectClient>, config: MultipartConfig) -> ObjectStore {
        let location = BucketLocation::new("media", DEFAULT_REGION);
        ObjectStore::new(client.clone(), location, config)
    }

    fn small_parts() -> MultipartConfig {
        MultipartConfig {
            threshold: 8,
            part_size: 4,
            max_in_flight: 2,
        }
    }

    #[tokio::test]
    async fn bucket_is_provisioned_on_first_use() {
        let client = Arc::new(MemoryObjectClient::new());
        let store = store_over(&client, MultipartConfig::default());
        store.put("k", Bytes::from_static(b"v"), None).await.unwrap();
        assert_eq!(store.get("k", None).await.unwrap().body.as_ref(), b"v");
    }

    #[tokio::test]
    async fn denied_provisioning_is_tolerated() {
        let client = Arc::new(
            MemoryObjectClient::new()
                .with_provisioning_error(StorageError::AccessDenied("no rights".into())),
        );
        let store = store_over(&client, MultipartConfig::default());
        // The bucket was never created, so the object call itself fails.
        let err = store.get("k", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn namespace_is_invisible_to_callers() {
        let client = Arc::new(MemoryObjectClient::new().with_page_size(1));
        let location = BucketLocation::new("media", DEFAULT_REGION).with_prefix("tenant/");
        let store = ObjectStore::new(client.clone(), location, MultipartConfig::default());
        store.put("a", Bytes::from_static(b"1"), None).await.unwrap();
        store.put("b/c", Bytes::from_static(b"2"), None).await.unwrap();

        let keys: Vec<String> = store
            .list(ListOptions::default())
            .map_ok(|e| e.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["a", "b/c"]);
        assert!(client.head_object("media", "tenant/b/c", None).await.is_ok());
    }

    #[tokio::test]
    async fn large_write_goes_multipart() {
        let client = Arc::new(MemoryObjectClient::new());
        let store = store_over(&client, small_parts());
        let options = WriteOptions {
            length: Some(10),
            metadata: None,
        };
        let mut sink = store.create_write_stream("big", options).unwrap();
        sink.write(Bytes::from_static(b"abc")).await.unwrap();
        sink.write(Bytes::from_static(b"defghij")).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(store.get("big", None).await.unwrap().body.as_ref(), b"abcdefghij");
        assert_eq!(client.open_uploads().await, 0);
    }

    #[tokio::test]
    async fn failed_part_leaves_no_object() {
        let client = Arc::new(MemoryObjectClient::new().with_failing_part(2));
        let store = store_over(&client, small_parts());
        let options = WriteOptions {
            length: Some(12),
            metadata: None,
        };
        let mut sink = store.create_write_stream("big", options).unwrap();
        let mut failed = false;
        for chunk in [&b"abcd"[..], b"efgh", b"ijkl"] {
            if sink.write(Bytes::copy_from_slice(chunk)).await.is_err() {
                failed = true;
                break;
            }
        }
        if !failed {
            assert!(sink.finish().await.is_err());
        }

        assert!(store.stat("big", None).await.unwrap_err().is_not_found());
        assert_eq!(client.open_uploads().await, 0);
        assert_eq!(client.aborted_uploads().await, 1);
    }

    #[tokio::test]
    async fn small_write_is_a_single_put() {
        let client = Arc::new(MemoryObjectClient::new());
        let store = store_over(&client, small_parts());
        let mut sink = store
            .create_write_stream("small", WriteOptions::default())
            .unwrap();
        sink.write(Bytes::from_static(b"tiny")).await.unwrap();
        sink.finish().await.unwrap();
        assert_eq!(store.get("small", None).await.unwrap().body.as_ref(), b"tiny");
        assert_eq!(client.aborted_uploads().await, 0);
    }

    #[tokio::test]
    async fn rename_prefix_moves_children_only() {
        let client = Arc::new(MemoryObjectClient::new());
        let store = store_over(&client, MultipartConfig::default());
        for key in ["dir/1", "dir/2", "directory"] {
            store.put(key, Bytes::from_static(b"x"), None).await.unwrap();
        }
        store.rename("dir", "moved").await.unwrap();

        let keys: Vec<String> = store
            .list(ListOptions::default())
            .map_ok(|e| e.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["directory", "moved/1", "moved/2"]);
    }

    #[tokio::test]
    async fn rename_moves_exact_key_with_its_children() {
        let client = Arc::new(MemoryObjectClient::new());
        let store = store_over(&client, MultipartConfig::default());
        for key in ["dir", "dir/1", "dir/2", "dirt"] {
            store.put(key, Bytes::from_static(b"x"), None).await.unwrap();
        }
        store.rename("dir", "moved").await.unwrap();

        let keys: Vec<String> = store
            .list(ListOptions::default())
            .map_ok(|e| e.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["dirt", "moved", "moved/1", "moved/2"]);

        let leftovers: Vec<String> = store
            .list(ListOptions::default().with_prefix("dir/"))
            .map_ok(|e| e.key)
            .try_collect()
            .await
            .unwrap();
        assert!(leftovers.is_empty());
        assert!(store.rename("dir", "again").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn limited_listing_stops_requesting_pages() {
        let client = Arc::new(MemoryObjectClient::new().with_page_size(2));
        let store = store_over(&client, MultipartConfig::default());
        for key in ["a", "b", "c", "d", "e"] {
            store.put(key, Bytes::from_static(b"x"), None).await.unwrap();
        }

        let mut requests = client.list_requests().await;
        for (limit, pages) in [(Some(2), 1), (Some(3), 2), (None, 3)] {
            let options = ListOptions {
                limit,
                ..ListOptions::default()
            };
            let listed: Vec<_> = store.list(options).try_collect().await.unwrap();
            assert_eq!(listed.len(), limit.unwrap_or(5));

            let now = client.list_requests().await;
            assert_eq!(now - requests, pages, "limit {limit:?}");
            requests = now;
        }
    }

    #[tokio::test]
    async fn versions_list_newest_first() {
        let client = Arc::new(MemoryObjectClient::new());
        let store = store_over(&client, MultipartConfig::default());
        store.put("v", Bytes::from_static(b"1"), None).await.unwrap();
        store.put("v", Bytes::from_static(b"2"), None).await.unwrap();
        store.put("v2", Bytes::from_static(b"other"), None).await.unwrap();

        let versions: Vec<_> = store.versions("v").try_collect().await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].latest);
        assert!(versions.iter().all(|v| v.key == "v"));

        let old = store.get("v", Some(versions[1].version.as_str())).await.unwrap();
        assert_eq!(old.body.as_ref(), b"1");
    }
}
