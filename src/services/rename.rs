//! Prefix rename as copy-then-delete.
//!
//! Every entry under `from` is copied to the same relative position under
//! `to`, then the source is removed. The entry set is captured before the
//! first move so destinations nested inside the source are never revisited.
//! Not atomic: a failure part way leaves earlier entries moved.

use crate::models::entry::ListOptions;
use crate::services::{list::EntryStream, storage_service::StorageResult};
use async_trait::async_trait;
use futures::TryStreamExt;
use tracing::{debug, info};

/// Per-entry primitives a backend exposes to the rename engine.
#[async_trait]
pub(crate) trait EntryMover: Send + Sync {
    fn entries(&self, options: ListOptions) -> EntryStream;

    async fn copy_entry(&self, from: &str, to: &str) -> StorageResult<()>;

    async fn remove_entry(&self, key: &str) -> StorageResult<()>;
}

/// Destination key for `key` when moving `from` onto `to`.
pub(crate) fn destination(key: &str, from: &str, to: &str) -> String {
    let tail = key.strip_prefix(from).unwrap_or(key);
    format!("{to}{tail}")
}

/// Move everything listed under `from` to `to`. Returns the number of
/// entries moved.
pub(crate) async fn rename_prefix<M>(mover: &M, from: &str, to: &str) -> StorageResult<usize>
where
    M: EntryMover + ?Sized,
{
    let keys: Vec<String> = mover
        .entries(ListOptions::default().with_prefix(from))
        .map_ok(|entry| entry.key)
        .try_collect()
        .await?;

    for key in &keys {
        let dest = destination(key, from, to);
        debug!("moving `{}` to `{}`", key, dest);
        mover.copy_entry(key, &dest).await?;
        mover.remove_entry(key).await?;
    }

    info!("renamed {} entries from `{}` to `{}`", keys.len(), from, to);
    Ok(keys.len())
}
