//! Object descriptors returned by and passed to the uniform operations.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metadata::Metadata;

/// Primary content and optional metadata returned by `get`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectData {
    pub body: Bytes,
    pub metadata: Option<Metadata>,
}

/// Result of `stat`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectStat {
    /// Size in bytes.
    pub size: u64,

    /// Last modification time.
    pub modified: DateTime<Utc>,

    /// Version identifier, when the backend versions objects.
    pub version: Option<String>,

    /// User metadata stored alongside the object, if any.
    pub metadata: Option<Metadata>,
}

/// One historical version of an object (object store only).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub version: String,
    pub latest: bool,
    pub modified: DateTime<Utc>,
}

/// A key (and optional version) to remove in a batch delete.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeleteEntry {
    pub key: String,
    pub version: Option<String>,
}

impl DeleteEntry {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: None,
        }
    }
}

/// Options for `create_read_stream`.
///
/// `start` and `end` are inclusive byte offsets.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ReadOptions {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub version: Option<String>,
}

/// Options for `create_write_stream`.
///
/// `length` is the declared total length. Writing past it fails the write;
/// closing short of it fails the stream.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    pub length: Option<u64>,
    pub metadata: Option<Metadata>,
}
