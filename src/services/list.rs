//! Listing engine.
//!
//! Both variants produce a lazy stream of entries in ascending key order,
//! honoring `prefix`, strict resume-after `marker`, and a total `limit`.
//!
//! - [`DirWalker`] walks a directory tree depth-first with an explicit stack.
//! - [`PageWalker`] pages through an object store with marker pagination.

use crate::models::{
    entry::{Entry, ListOptions},
    object::ObjectVersion,
};
use crate::services::{
    keys,
    object_client::{BucketHandle, ListObjectsRequest},
    storage_service::{StorageError, StorageResult},
};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use std::{
    collections::VecDeque,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;

pub type EntryStream = BoxStream<'static, StorageResult<Entry>>;

pub type VersionStream = BoxStream<'static, StorageResult<ObjectVersion>>;

/// Depth-first traversal of a directory tree.
///
/// Directory children are pushed in reverse sorted order, comparing
/// directories as `name/`, which makes the emitted keys come out in
/// lexicographic byte order. Sidecars are never pushed. Paths that vanish
/// mid-walk are skipped.
pub struct DirWalker {
    root: PathBuf,
    stack: Vec<PathBuf>,
    marker: String,
    remaining: Option<usize>,
}

impl DirWalker {
    pub fn new(root: PathBuf, options: &ListOptions) -> Self {
        let seed = match options.prefix.as_deref() {
            Some(prefix) => keys::resolve_prefix(&root, prefix),
            None => root.clone(),
        };
        let marker = options
            .marker
            .as_deref()
            .map(keys::normalize_key)
            .unwrap_or_default();

        Self {
            root,
            stack: vec![seed],
            marker,
            remaining: options.limit,
        }
    }

    pub fn into_stream(self) -> EntryStream {
        futures::stream::try_unfold(self, |mut walker| async move {
            Ok(walker.next_entry().await?.map(|entry| (entry, walker)))
        })
        .boxed()
    }

    pub async fn next_entry(&mut self) -> StorageResult<Option<Entry>> {
        while self.remaining != Some(0) {
            let Some(path) = self.stack.pop() else {
                return Ok(None);
            };
            let meta = match fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if meta.is_dir() {
                self.push_children(&path).await?;
                continue;
            }

            let Some(key) = keys::key_for_path(&self.root, &path) else {
                continue;
            };
            if key.is_empty() || key <= self.marker {
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();
            return Ok(Some(Entry {
                key,
                size: meta.len(),
                modified,
            }));
        }
        Ok(None)
    }

    async fn push_children(&mut self, dir: &Path) -> StorageResult<()> {
        let mut reader = match fs::read_dir(dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mut children = Vec::new();
        while let Some(child) = reader.next_entry().await? {
            let name = child.file_name().to_string_lossy().into_owned();
            if keys::is_sidecar_name(&name) {
                continue;
            }
            let is_dir = child.file_type().await.is_ok_and(|t| t.is_dir());
            let order = if is_dir { format!("{name}/") } else { name };
            children.push((order, child.path()));
        }
        children.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        self.stack
            .extend(children.into_iter().rev().map(|(_, path)| path));
        Ok(())
    }
}

/// Marker-paginated listing over an object store.
///
/// The bucket is provisioned lazily on the first pull. Each page is queued
/// and the marker advances to the last key of the page; an empty page (or a
/// non-truncated one, once drained) ends the sequence.
pub struct PageWalker {
    bucket: BucketHandle,
    prefix: Option<String>,
    marker: Option<String>,
    remaining: Option<usize>,
    queue: VecDeque<Entry>,
    exhausted: bool,
}

impl PageWalker {
    pub fn new(bucket: BucketHandle, options: &ListOptions) -> Self {
        let prefix = options
            .prefix
            .as_deref()
            .map(keys::object_prefix)
            .map(|p| bucket.location.full_key(&p))
            .or_else(|| bucket.location.prefix.clone());
        let marker = options
            .marker
            .as_deref()
            .map(keys::object_prefix)
            .filter(|m| !m.is_empty())
            .map(|m| bucket.location.full_key(&m));

        Self {
            bucket,
            prefix,
            marker,
            remaining: options.limit,
            queue: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn into_stream(self) -> EntryStream {
        futures::stream::try_unfold(self, |mut walker| async move {
            Ok(walker.next_entry().await?.map(|entry| (entry, walker)))
        })
        .boxed()
    }

    pub async fn next_entry(&mut self) -> StorageResult<Option<Entry>> {
        loop {
            if self.remaining == Some(0) {
                return Ok(None);
            }
            if let Some(entry) = self.queue.pop_front() {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> StorageResult<()> {
        self.bucket.ensure_ready().await?;
        let page = self
            .bucket
            .client
            .list_objects(
                self.bucket.name(),
                ListObjectsRequest {
                    prefix: self.prefix.clone(),
                    marker: self.marker.clone(),
                    max_keys: None,
                },
            )
            .await?;
        debug!(
            "listed {} keys after {:?} in `{}`",
            page.contents.len(),
            self.marker,
            self.bucket.name()
        );

        let Some(last) = page.contents.last() else {
            self.exhausted = true;
            return Ok(());
        };
        if self.marker.as_deref().is_some_and(|m| last.key.as_str() <= m) {
            return Err(StorageError::Transport(format!(
                "listing of `{}` did not advance past {:?}",
                self.bucket.name(),
                self.marker
            )));
        }
        self.marker = Some(last.key.clone());
        self.exhausted = !page.is_truncated;

        let wanted = self.remaining.unwrap_or(usize::MAX);
        let location = &self.bucket.location;
        self.queue.extend(
            page.contents
                .into_iter()
                .filter_map(|summary| {
                    location.caller_key(&summary.key).map(|key| Entry {
                        key: key.to_string(),
                        size: summary.size,
                        modified: summary.modified,
                    })
                })
                .take(wanted),
        );
        Ok(())
    }
}

/// Version listing for a single key, paging with key/version markers.
pub struct VersionWalker {
    bucket: BucketHandle,
    key: String,
    key_marker: Option<String>,
    version_marker: Option<String>,
    queue: VecDeque<ObjectVersion>,
    exhausted: bool,
}

impl VersionWalker {
    pub fn new(bucket: BucketHandle, full_key: String) -> Self {
        Self {
            bucket,
            key: full_key,
            key_marker: None,
            version_marker: None,
            queue: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn into_stream(self) -> VersionStream {
        futures::stream::try_unfold(self, |mut walker| async move {
            Ok(walker.next_version().await?.map(|v| (v, walker)))
        })
        .boxed()
    }

    async fn next_version(&mut self) -> StorageResult<Option<ObjectVersion>> {
        loop {
            if let Some(version) = self.queue.pop_front() {
                return Ok(Some(version));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.bucket.ensure_ready().await?;
            let page = self
                .bucket
                .client
                .list_object_versions(
                    self.bucket.name(),
                    &self.key,
                    self.key_marker.as_deref(),
                    self.version_marker.as_deref(),
                )
                .await?;

            self.exhausted = !page.is_truncated || page.next_key_marker.is_none();
            self.key_marker = page.next_key_marker;
            self.version_marker = page.next_version_marker;

            let location = &self.bucket.location;
            let key = &self.key;
            self.queue.extend(
                page.versions
                    .into_iter()
                    .filter(|v| &v.key == key)
                    .filter_map(|mut v| {
                        v.key = location.caller_key(&v.key)?.to_string();
                        Some(v)
                    }),
            );
        }
    }
}
