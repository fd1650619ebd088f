//! Metadata sidecars for the filesystem backend.
//!
//! Metadata for an object at `path` lives in `path` + [`SIDECAR_SUFFIX`] as
//! a flat JSON object of strings. A missing sidecar means "no metadata".
//!
//! [`SIDECAR_SUFFIX`]: super::keys::SIDECAR_SUFFIX

use crate::models::metadata::Metadata;
use crate::services::{keys::sidecar_path, storage_service::StorageResult};
use std::{io::ErrorKind, path::Path};
use tokio::fs;

pub async fn write(object: &Path, metadata: &Metadata) -> StorageResult<()> {
    let encoded = serde_json::to_vec(metadata)?;
    fs::write(sidecar_path(object), encoded).await?;
    Ok(())
}

pub async fn read(object: &Path) -> StorageResult<Option<Metadata>> {
    match fs::read(sidecar_path(object)).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub async fn remove(object: &Path) -> StorageResult<()> {
    match fs::remove_file(sidecar_path(object)).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Copy the sidecar of `from` next to `to`, if there is one.
pub async fn copy(from: &Path, to: &Path) -> StorageResult<()> {
    match fs::copy(sidecar_path(from), sidecar_path(to)).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => remove(to).await,
        Err(err) => Err(err.into()),
    }
}

/// Move the sidecar of `from` next to `to`, if there is one.
pub async fn rename(from: &Path, to: &Path) -> StorageResult<()> {
    match fs::rename(sidecar_path(from), sidecar_path(to)).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => remove(to).await,
        Err(err) => Err(err.into()),
    }
}
