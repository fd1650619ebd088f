//! Filesystem backend.
//!
//! Objects are plain files beneath `root`, addressed by their normalized key.
//! Metadata lives in a sidecar next to each object. Deleting or moving an
//! object prunes the directories it leaves empty, up to (never including)
//! the root.

use crate::models::{
    entry::ListOptions,
    metadata::{self, Metadata},
    object::{ObjectData, ObjectStat, ReadOptions, WriteOptions},
};
use crate::services::{
    keys,
    list::{DirWalker, EntryStream},
    rename::{self, EntryMover},
    sidecar,
    storage_service::{BlobStore, StorageError, StorageResult},
    transfer::{self, ByteStream, ChunkSource, WriteStream},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};

const BACKEND: &str = "fs";

#[derive(Debug, Clone)]
pub struct FsStore {
    /// Directory every key is resolved beneath.
    pub root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, key: &str) -> StorageResult<PathBuf> {
        keys::resolve(&self.root, key)
    }

    fn no_versions(&self, version: Option<&str>, operation: &'static str) -> StorageResult<()> {
        match version {
            Some(_) => Err(StorageError::Unsupported {
                backend: BACKEND,
                operation,
            }),
            None => Ok(()),
        }
    }

    async fn file_metadata(&self, key: &str, path: &Path) -> StorageResult<std::fs::Metadata> {
        let meta = fs::metadata(path).await.map_err(|e| missing(key, e))?;
        if meta.is_dir() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(meta)
    }

    async fn unlink(&self, key: &str) -> StorageResult<()> {
        let path = self.path_of(key)?;
        fs::remove_file(&path).await.map_err(|e| missing(key, e))?;
        sidecar::remove(&path).await?;
        if let Some(parent) = path.parent() {
            prune_empty_dirs(parent, &self.root).await;
        }
        debug!("deleted `{}`", key);
        Ok(())
    }

    /// Native move of one object and its sidecar.
    async fn move_file(&self, from: &Path, to: &Path) -> StorageResult<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(from, to).await?;
        sidecar::rename(from, to).await?;
        if let Some(parent) = from.parent() {
            prune_empty_dirs(parent, &self.root).await;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn list(&self, options: ListOptions) -> EntryStream {
        DirWalker::new(self.root.clone(), &options).into_stream()
    }

    async fn get(&self, key: &str, version: Option<&str>) -> StorageResult<ObjectData> {
        self.no_versions(version, "versioned get")?;
        let path = self.path_of(key)?;
        let body = fs::read(&path).await.map_err(|e| missing(key, e))?;
        let metadata = sidecar::read(&path).await?;
        Ok(ObjectData {
            body: Bytes::from(body),
            metadata,
        })
    }

    async fn put(&self, key: &str, body: Bytes, metadata: Option<Metadata>) -> StorageResult<()> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &body).await?;
        match metadata::non_empty(metadata) {
            Some(metadata) => sidecar::write(&path, &metadata).await?,
            None => sidecar::remove(&path).await?,
        }
        debug!("stored `{}` ({} bytes)", key, body.len());
        Ok(())
    }

    async fn del(&self, key: &str, version: Option<&str>) -> StorageResult<()> {
        self.no_versions(version, "versioned delete")?;
        self.unlink(key).await
    }

    async fn stat(&self, key: &str, version: Option<&str>) -> StorageResult<ObjectStat> {
        self.no_versions(version, "versioned stat")?;
        let path = self.path_of(key)?;
        let meta = self.file_metadata(key, &path).await?;
        Ok(ObjectStat {
            size: meta.len(),
            modified: meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default(),
            version: None,
            metadata: sidecar::read(&path).await?,
        })
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let source = keys::normalize_key(from);
        let dest = keys::normalize_key(to);
        if source.is_empty() {
            return Err(StorageError::InvalidKey(from.to_string()));
        }
        if dest.is_empty() {
            return Err(StorageError::InvalidKey(to.to_string()));
        }

        let source_path = self.path_of(&source)?;
        let is_file = match fs::metadata(&source_path).await {
            Ok(meta) => meta.is_file(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(source));
            }
            Err(err) => return Err(err.into()),
        };

        if is_file {
            let dest_path = self.path_of(&dest)?;
            self.move_file(&source_path, &dest_path).await?;
            info!("renamed `{}` to `{}`", source, dest);
            return Ok(());
        }

        let moved = rename::rename_prefix(self, &format!("{source}/"), &format!("{dest}/")).await?;
        if moved == 0 {
            return Err(StorageError::NotFound(source));
        }
        Ok(())
    }

    async fn create_read_stream(
        &self,
        key: &str,
        options: ReadOptions,
    ) -> StorageResult<ByteStream> {
        self.no_versions(options.version.as_deref(), "versioned read")?;
        let path = self.path_of(key)?;
        let meta = self.file_metadata(key, &path).await?;
        let (offset, len) = transfer::byte_window(meta.len(), options.start, options.end)?;
        let file = File::open(&path).await.map_err(|e| missing(key, e))?;
        transfer::file_window(file, offset, len).await
    }

    fn create_write_stream(&self, key: &str, options: WriteOptions) -> StorageResult<WriteStream> {
        let path = self.path_of(key)?;
        let root = self.root.clone();
        let metadata = metadata::non_empty(options.metadata);
        Ok(WriteStream::spawn(key, options.length, move |source| {
            write_file(root, path, metadata, source)
        }))
    }
}

#[async_trait]
impl EntryMover for FsStore {
    fn entries(&self, options: ListOptions) -> EntryStream {
        self.list(options)
    }

    async fn copy_entry(&self, from: &str, to: &str) -> StorageResult<()> {
        let source = self.path_of(from)?;
        let dest = self.path_of(to)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&source, &dest).await.map_err(|e| missing(from, e))?;
        sidecar::copy(&source, &dest).await
    }

    async fn remove_entry(&self, key: &str) -> StorageResult<()> {
        self.unlink(key).await
    }
}

/// Drive one streaming write into `path`.
///
/// The open step is directory creation. If the stream is destroyed before
/// or during the transfer, the partial file is removed and any directories
/// left empty are pruned.
async fn write_file(
    root: PathBuf,
    path: PathBuf,
    metadata: Option<Metadata>,
    mut source: ChunkSource,
) -> StorageResult<()> {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
    fs::create_dir_all(&parent).await?;
    if source.is_cancelled() {
        prune_empty_dirs(&parent, &root).await;
        return Err(StorageError::Aborted);
    }

    let mut file = File::create(&path).await?;
    let mut written = 0u64;
    let outcome = async {
        while let Some(chunk) = source.next_chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok::<(), StorageError>(())
    }
    .await;

    if let Err(err) = outcome {
        drop(file);
        let _ = fs::remove_file(&path).await;
        prune_empty_dirs(&parent, &root).await;
        debug!("discarded partial write of {} ({} bytes): {}", path.display(), written, err);
        return Err(err);
    }

    match metadata {
        Some(metadata) => sidecar::write(&path, &metadata).await?,
        None => sidecar::remove(&path).await?,
    }
    debug!("wrote {} ({} bytes)", path.display(), written);
    Ok(())
}

/// Remove empty directories from `start` upward, stopping below `stop`.
/// Any failure ends the walk.
async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(()) => match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            },
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

/// Missing paths (or directories where an object was expected) become
/// `NotFound` for `key`.
fn missing(key: &str, err: io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::IsADirectory | ErrorKind::NotADirectory => StorageError::NotFound(key.to_string()),
        _ => StorageError::from_io(key, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        (dir, store)
    }

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn put_get_with_metadata() {
        let (_dir, store) = store();
        store
            .put("a/b.txt", Bytes::from_static(b"hi"), Some(meta(&[("owner", "ops")])))
            .await
            .unwrap();
        let data = store.get("a/b.txt", None).await.unwrap();
        assert_eq!(data.body.as_ref(), b"hi");
        assert_eq!(data.metadata, Some(meta(&[("owner", "ops")])));
    }

    #[tokio::test]
    async fn overwrite_without_metadata_drops_sidecar() {
        let (_dir, store) = store();
        store
            .put("k", Bytes::from_static(b"1"), Some(meta(&[("a", "b")])))
            .await
            .unwrap();
        store.put("k", Bytes::from_static(b"2"), None).await.unwrap();
        assert_eq!(store.get("k", None).await.unwrap().metadata, None);
    }

    #[tokio::test]
    async fn del_prunes_empty_parents_but_not_root() {
        let (dir, store) = store();
        store.put("x/y/z", Bytes::from_static(b"1"), None).await.unwrap();
        store.put("x/keep", Bytes::from_static(b"2"), None).await.unwrap();
        store.del("x/y/z", None).await.unwrap();
        assert!(!dir.path().join("x/y").exists());
        assert!(dir.path().join("x").exists());

        store.del("x/keep", None).await.unwrap();
        assert!(!dir.path().join("x").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn missing_keys_and_directories_are_not_found() {
        let (_dir, store) = store();
        store.put("d/f", Bytes::from_static(b"1"), None).await.unwrap();
        assert!(store.get("nope", None).await.unwrap_err().is_not_found());
        assert!(store.stat("d", None).await.unwrap_err().is_not_found());
        assert!(!store.exists("d", None).await.unwrap());
        assert!(store.del("nope", None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn sidecar_keys_are_rejected() {
        let (_dir, store) = store();
        let err = store
            .put("obj.__meta.json", Bytes::from_static(b"{}"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn versions_are_unsupported() {
        let (_dir, store) = store();
        let err = store.get("k", Some("v1")).await.unwrap_err();
        assert!(matches!(err, StorageError::Unsupported { .. }));
        let err = store.versions("k").try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(err, StorageError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn rename_single_file_moves_sidecar() {
        let (dir, store) = store();
        store
            .put("in/a", Bytes::from_static(b"1"), Some(meta(&[("k", "v")])))
            .await
            .unwrap();
        store.rename("in/a", "out/b").await.unwrap();

        let data = store.get("out/b", None).await.unwrap();
        assert_eq!(data.body.as_ref(), b"1");
        assert_eq!(data.metadata, Some(meta(&[("k", "v")])));
        assert!(!dir.path().join("in").exists());
    }

    #[tokio::test]
    async fn rename_directory_moves_every_entry() {
        let (dir, store) = store();
        store.put("src/1", Bytes::from_static(b"1"), None).await.unwrap();
        store
            .put("src/deep/2", Bytes::from_static(b"2"), Some(meta(&[("n", "2")])))
            .await
            .unwrap();
        store.rename("src", "dst").await.unwrap();

        let keys: Vec<String> = store
            .list(ListOptions::default())
            .map_ok(|e| e.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["dst/1", "dst/deep/2"]);
        assert_eq!(
            store.get("dst/deep/2", None).await.unwrap().metadata,
            Some(meta(&[("n", "2")]))
        );
        assert!(!dir.path().join("src").exists());
    }

    #[tokio::test]
    async fn rename_of_missing_source_is_not_found() {
        let (_dir, store) = store();
        assert!(store.rename("ghost", "x").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn ranged_read_is_inclusive() {
        let (_dir, store) = store();
        store.put("r", Bytes::from_static(b"0123456789"), None).await.unwrap();
        let options = ReadOptions {
            start: Some(2),
            end: Some(5),
            version: None,
        };
        let chunks: Vec<Bytes> = store
            .create_read_stream("r", options)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"2345");
    }

    #[tokio::test]
    async fn write_stream_reports_completion_after_sync() {
        let (_dir, store) = store();
        let options = WriteOptions {
            length: Some(11),
            metadata: Some(meta(&[("via", "stream")])),
        };
        let mut sink = store.create_write_stream("s/t", options).unwrap();
        sink.write(Bytes::from_static(b"hello ")).await.unwrap();
        sink.write(Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(sink.finish().await.unwrap(), 11);

        let data = store.get("s/t", None).await.unwrap();
        assert_eq!(data.body.as_ref(), b"hello world");
        assert_eq!(data.metadata, Some(meta(&[("via", "stream")])));
    }

    #[tokio::test]
    async fn aborted_write_leaves_nothing_behind() {
        let (dir, store) = store();
        let mut sink = store
            .create_write_stream("deep/dir/file", WriteOptions::default())
            .unwrap();
        sink.write(Bytes::from_static(b"partial")).await.unwrap();
        sink.abort().await;

        assert!(!dir.path().join("deep").exists());
        assert!(!store.exists("deep/dir/file", None).await.unwrap());
    }

    #[tokio::test]
    async fn short_write_is_discarded() {
        let (dir, store) = store();
        let options = WriteOptions {
            length: Some(10),
            metadata: None,
        };
        let mut sink = store.create_write_stream("short/obj", options).unwrap();
        sink.write(Bytes::from_static(b"abc")).await.unwrap();
        let err = sink.finish().await.unwrap_err();
        assert!(matches!(err, StorageError::ShortWrite { declared: 10, written: 3 }));
        assert!(!dir.path().join("short").exists());
    }
}
