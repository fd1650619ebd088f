//! Multipart upload coordinator.
//!
//! Splits one logical write stream into fixed-size parts, uploads each part
//! as an independent call, and commits once every part is acknowledged. Any
//! part failure aborts the session. The coordinator is an explicit state
//! machine over [`UploadSession`]; the backend is reached only through
//! [`PartUploader`], so tests can drive it without a network.

use crate::models::multipart::{CompletedPart, PartState, UploadSession, UploadState};
use crate::services::storage_service::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{
    StreamExt,
    future::BoxFuture,
    stream::FuturesUnordered,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Declared lengths above this go through multipart upload (4 GiB).
pub const MULTIPART_THRESHOLD: u64 = 4 * 1024 * 1024 * 1024;

pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;

pub const DEFAULT_MAX_PARTS_IN_FLIGHT: usize = 4;

/// Most parts one session may hold (the object-store service limit).
pub const MAX_PARTS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartConfig {
    pub threshold: u64,
    pub part_size: u64,
    /// Parts uploading at once before writes wait for a completion.
    pub max_in_flight: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            threshold: MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            max_in_flight: DEFAULT_MAX_PARTS_IN_FLIGHT,
        }
    }
}

impl MultipartConfig {
    pub fn applies_to(&self, length: Option<u64>) -> bool {
        matches!(length, Some(length) if length > self.threshold)
    }

    /// Largest declared length that fits in [`MAX_PARTS`] parts.
    pub fn max_length(&self) -> u64 {
        self.part_size.max(1).saturating_mul(MAX_PARTS)
    }

    /// Reject a declared length that would need more than [`MAX_PARTS`] parts.
    pub fn check_length(&self, total_length: u64) -> StorageResult<()> {
        let limit = self.max_length();
        if total_length > limit {
            return Err(StorageError::WriteTooLarge {
                declared: limit,
                attempted: total_length,
            });
        }
        Ok(())
    }
}

/// Backend calls the coordinator needs.
#[async_trait]
pub trait PartUploader: Send + Sync + 'static {
    /// Open a backend session and return its upload id.
    async fn open_session(&self) -> StorageResult<String>;

    /// Upload one part and return its integrity token.
    async fn upload_part(&self, upload_id: &str, part_number: i32, body: Bytes)
    -> StorageResult<String>;

    /// Assemble the object from `parts`, given in part-number order.
    async fn commit(&self, upload_id: &str, parts: &[CompletedPart]) -> StorageResult<()>;

    async fn abort(&self, upload_id: &str) -> StorageResult<()>;
}

type PartFuture = BoxFuture<'static, (usize, StorageResult<String>)>;

pub struct MultipartUpload<U: PartUploader> {
    uploader: Arc<U>,
    session: UploadSession,
    /// A write that arrived before the session was open.
    pending: Option<Bytes>,
    /// Bytes of the part currently being filled.
    current: BytesMut,
    next_index: usize,
    written: u64,
    in_flight: FuturesUnordered<PartFuture>,
    max_in_flight: usize,
}

impl<U: PartUploader> MultipartUpload<U> {
    pub fn new(uploader: Arc<U>, total_length: u64, config: &MultipartConfig) -> StorageResult<Self> {
        config.check_length(total_length)?;
        Ok(Self {
            uploader,
            session: UploadSession::plan(total_length, config.part_size),
            pending: None,
            current: BytesMut::new(),
            next_index: 0,
            written: 0,
            in_flight: FuturesUnordered::new(),
            max_in_flight: config.max_in_flight.max(1),
        })
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn state(&self) -> UploadState {
        self.session.state
    }

    /// Accept one chunk, slicing it at part boundaries.
    pub async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        if self.session.state == UploadState::Aborted {
            return Err(StorageError::Aborted);
        }
        let attempted = self.written + chunk.len() as u64;
        if attempted > self.session.total_length {
            return Err(StorageError::WriteTooLarge {
                declared: self.session.total_length,
                attempted,
            });
        }
        if chunk.is_empty() {
            return Ok(());
        }
        self.written = attempted;

        if self.session.state == UploadState::Uninitialized {
            self.pending = Some(chunk);
            return self.open().await;
        }
        self.feed(chunk).await
    }

    /// Wait for every part, then report the committed outcome.
    pub async fn finish(&mut self) -> StorageResult<()> {
        match self.session.state {
            UploadState::Aborted => return Err(StorageError::Aborted),
            UploadState::Complete => return Ok(()),
            _ => {}
        }
        if self.written < self.session.total_length {
            let err = StorageError::ShortWrite {
                declared: self.session.total_length,
                written: self.written,
            };
            return Err(self.fail(err).await);
        }
        while !self.in_flight.is_empty() {
            self.settle_one().await?;
        }
        if self.session.state == UploadState::Complete {
            Ok(())
        } else {
            let err = StorageError::Transport("multipart upload ended without a commit".into());
            Err(self.fail(err).await)
        }
    }

    /// Destroy the session, releasing backend resources if it was opened.
    pub async fn abort(&mut self) {
        self.release().await;
    }

    async fn open(&mut self) -> StorageResult<()> {
        match self.uploader.open_session().await {
            Ok(upload_id) => {
                info!(
                    "multipart session {} open: {} bytes in {} parts",
                    upload_id, self.session.total_length, self.session.part_count
                );
                self.session.upload_id = Some(upload_id);
                self.session.state = UploadState::SessionOpen;
            }
            Err(err) => {
                self.pending = None;
                self.session.state = UploadState::Aborted;
                return Err(err);
            }
        }
        match self.pending.take() {
            Some(chunk) => self.feed(chunk).await,
            None => Ok(()),
        }
    }

    async fn feed(&mut self, mut chunk: Bytes) -> StorageResult<()> {
        while !chunk.is_empty() {
            let part_len = self.session.parts[self.next_index].length as usize;
            let needed = part_len - self.current.len();
            if chunk.len() < needed {
                self.current.extend_from_slice(&chunk);
                break;
            }
            let body = if self.current.is_empty() {
                chunk.split_to(needed)
            } else {
                self.current.extend_from_slice(&chunk.split_to(needed));
                self.current.split().freeze()
            };
            self.submit(body).await?;
        }
        Ok(())
    }

    async fn submit(&mut self, body: Bytes) -> StorageResult<()> {
        let Some(upload_id) = self.session.upload_id.clone() else {
            return Err(StorageError::Aborted);
        };
        let index = self.next_index;
        self.next_index += 1;

        let part = &mut self.session.parts[index];
        part.state = PartState::InFlight;
        let part_number = part.part_number;
        debug!("submitting part {} ({} bytes)", part_number, body.len());

        let uploader = Arc::clone(&self.uploader);
        self.in_flight.push(Box::pin(async move {
            let result = uploader.upload_part(&upload_id, part_number, body).await;
            (index, result)
        }));
        self.session.state = UploadState::Uploading;

        while self.in_flight.len() >= self.max_in_flight {
            self.settle_one().await?;
        }
        Ok(())
    }

    /// Record the next part completion, in whatever order parts finish.
    async fn settle_one(&mut self) -> StorageResult<()> {
        let Some((index, result)) = self.in_flight.next().await else {
            return Ok(());
        };
        let part = &mut self.session.parts[index];
        match result {
            Ok(etag) => {
                debug!("part {} acknowledged", part.part_number);
                part.etag = Some(etag);
                part.state = PartState::Acked;
                if self.session.is_fully_acked() {
                    self.commit().await?;
                }
                Ok(())
            }
            Err(err) => {
                part.state = PartState::Failed;
                Err(self.fail(err).await)
            }
        }
    }

    async fn commit(&mut self) -> StorageResult<()> {
        if self.session.state != UploadState::Uploading {
            return Ok(());
        }
        let Some(upload_id) = self.session.upload_id.clone() else {
            return Err(StorageError::Aborted);
        };
        self.session.state = UploadState::Committing;
        let parts = self.session.completed_parts();
        match self.uploader.commit(&upload_id, &parts).await {
            Ok(()) => {
                self.session.state = UploadState::Complete;
                info!("multipart session {} committed", upload_id);
                Ok(())
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn fail(&mut self, err: StorageError) -> StorageError {
        warn!("multipart upload failed: {}", err);
        self.release().await;
        err
    }

    async fn release(&mut self) {
        if self.session.state.is_terminal() {
            return;
        }
        self.session.state = UploadState::Aborted;
        self.in_flight = FuturesUnordered::new();
        self.pending = None;
        self.current.clear();
        if let Some(upload_id) = &self.session.upload_id {
            match self.uploader.abort(upload_id).await {
                Ok(()) => debug!("multipart session {} aborted", upload_id),
                Err(err) => warn!("failed to abort multipart session {}: {}", upload_id, err),
            }
        }
    }
}
