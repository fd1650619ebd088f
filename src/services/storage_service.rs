//! src/services/storage_service.rs
//!
//! StorageService: the uniform blob operations (list, get, put, del, stat,
//! rename, streaming reads and writes) and the dispatcher that picks a
//! backend for a location: a directory tree on local disk (`fs://`) or a
//! remote object store (`s3://bucket`, or `memory://bucket` for an
//! in-process store).

use crate::models::{
    bucket::{BucketLocation, DEFAULT_REGION},
    entry::ListOptions,
    metadata::Metadata,
    object::{DeleteEntry, ObjectData, ObjectStat, ReadOptions, WriteOptions},
};
use crate::services::{
    fs_store::FsStore,
    list::{EntryStream, VersionStream},
    multipart::MultipartConfig,
    object_client::{ObjectClient, memory::MemoryObjectClient, s3::S3ObjectClient},
    object_store::ObjectStore,
    transfer::{ByteStream, WriteStream},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::Deserialize;
use std::{
    fmt, io,
    ops::Deref,
    path::{self, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("key `{0}` not found")]
    NotFound(String),
    #[error("`{0}` already exists")]
    AlreadyExists(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("write of {attempted} bytes exceeds declared length of {declared} bytes")]
    WriteTooLarge { declared: u64, attempted: u64 },
    #[error("stream closed after {written} of {declared} declared bytes")]
    ShortWrite { declared: u64, written: u64 },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("invalid metadata: {0}")]
    Metadata(String),
    #[error("write stream aborted")]
    Aborted,
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Io(Arc<io::Error>),
}

impl StorageError {
    /// Map an I/O error for `key`, keeping "not found" distinguishable.
    pub fn from_io(key: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(Arc::new(err))
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Metadata(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// The operations every backend offers.
///
/// Listing sequences are lazy: nothing touches the backend until the
/// returned stream is polled. Object-store-only operations default to
/// `Unsupported`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn backend(&self) -> &'static str;

    /// Lazily list entries in ascending key order.
    fn list(&self, options: ListOptions) -> EntryStream;

    async fn get(&self, key: &str, version: Option<&str>) -> StorageResult<ObjectData>;

    async fn put(&self, key: &str, body: Bytes, metadata: Option<Metadata>) -> StorageResult<()>;

    async fn del(&self, key: &str, version: Option<&str>) -> StorageResult<()>;

    async fn del_batch(&self, _entries: &[DeleteEntry]) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            backend: self.backend(),
            operation: "batch delete",
        })
    }

    async fn stat(&self, key: &str, version: Option<&str>) -> StorageResult<ObjectStat>;

    async fn exists(&self, key: &str, version: Option<&str>) -> StorageResult<bool> {
        match self.stat(key, version).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Every stored version of `key`, newest first.
    fn versions(&self, _key: &str) -> VersionStream {
        let err = StorageError::Unsupported {
            backend: self.backend(),
            operation: "versions",
        };
        stream::once(async move { Err(err) }).boxed()
    }

    /// Move a single key or a whole key prefix.
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    async fn create_read_stream(&self, key: &str, options: ReadOptions)
    -> StorageResult<ByteStream>;

    /// Open a sink for `key`. Completion is only reported by
    /// [`WriteStream::finish`] once the backend holds every byte.
    fn create_write_stream(&self, key: &str, options: WriteOptions) -> StorageResult<WriteStream>;
}

/// Which backend a location addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Fs,
    S3,
    Memory,
}

impl StoreType {
    /// An explicit type wins; otherwise the location scheme decides.
    pub fn detect(location: &str, explicit: Option<StoreType>) -> Self {
        if let Some(kind) = explicit {
            return kind;
        }
        if location.starts_with("fs:") {
            StoreType::Fs
        } else if location.starts_with("memory://") {
            StoreType::Memory
        } else {
            StoreType::S3
        }
    }
}

/// Backend options that do not fit in the location string.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub store_type: Option<StoreType>,
    pub region: String,
    pub prefix: Option<String>,
    /// Custom object-store endpoint (MinIO, R2, ...).
    pub endpoint: Option<String>,
    pub multipart: MultipartConfig,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            store_type: None,
            region: DEFAULT_REGION.to_string(),
            prefix: None,
            endpoint: None,
            multipart: MultipartConfig::default(),
        }
    }
}

/// Shared handle on the selected backend.
///
/// Cheap to clone; dereferences to [`BlobStore`].
#[derive(Clone)]
pub struct StorageService {
    store: Arc<dyn BlobStore>,
}

impl StorageService {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Open the backend addressed by `location`.
    pub async fn open(location: &str, options: &StoreOptions) -> StorageResult<Self> {
        match StoreType::detect(location, options.store_type) {
            StoreType::Fs => {
                let dir = location
                    .strip_prefix("fs://")
                    .or_else(|| location.strip_prefix("fs:"))
                    .unwrap_or(location);
                let root: PathBuf = path::absolute(dir)?;
                info!("using filesystem store rooted at {}", root.display());
                Ok(Self::new(Arc::new(FsStore::new(root))))
            }
            StoreType::S3 => {
                let client = S3ObjectClient::connect(&options.region, options.endpoint.clone()).await;
                let bucket = bucket_name(location, "s3://");
                info!("using object store bucket `{}` in {}", bucket, options.region);
                Ok(Self::object_store(Arc::new(client), bucket, options))
            }
            StoreType::Memory => {
                let bucket = bucket_name(location, "memory://");
                info!("using in-memory object store bucket `{}`", bucket);
                Ok(Self::object_store(
                    Arc::new(MemoryObjectClient::new()),
                    bucket,
                    options,
                ))
            }
        }
    }

    /// Build an object-store backed service over an existing client.
    pub fn object_store(
        client: Arc<dyn ObjectClient>,
        bucket: &str,
        options: &StoreOptions,
    ) -> Self {
        let mut location = BucketLocation::new(bucket, options.region.clone());
        if let Some(prefix) = &options.prefix {
            location = location.with_prefix(prefix.clone());
        }
        Self::new(Arc::new(ObjectStore::new(client, location, options.multipart)))
    }
}

impl Deref for StorageService {
    type Target = dyn BlobStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

impl fmt::Debug for StorageService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageService")
            .field("backend", &self.store.backend())
            .finish()
    }
}

fn bucket_name<'a>(location: &'a str, scheme: &str) -> &'a str {
    location
        .strip_prefix(scheme)
        .unwrap_or(location)
        .trim_end_matches('/')
}
