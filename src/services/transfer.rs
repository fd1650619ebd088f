//! Streaming transfer: byte sinks and sources shared by both backends.
//!
//! A [`WriteStream`] adapts push-style `write` calls to a pull-style
//! backend driver. The two sides are joined by a single-slot channel, so a
//! write suspends until the driver has pulled the previous chunk. Bytes
//! arrive in order and exactly once. Completion is reported only when the
//! driver returns, i.e. once the backend holds every byte.

use crate::services::storage_service::{StorageError, StorageResult};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use std::{future::Future, io::SeekFrom};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::debug;

/// Byte source returned by `create_read_stream`.
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

/// Pull side of a write stream, handed to the backend driver.
pub struct ChunkSource {
    rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
}

impl ChunkSource {
    /// Next chunk, `Ok(None)` once the writer finished, or `Aborted` if the
    /// writer was destroyed.
    pub async fn next_chunk(&mut self) -> StorageResult<Option<Bytes>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StorageError::Aborted),
            chunk = self.rx.recv() => Ok(chunk),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Push side of a streaming write.
///
/// Dropping an unfinished stream destroys it: the driver observes the
/// cancellation and runs its cleanup (directory pruning, multipart abort).
pub struct WriteStream {
    key: String,
    tx: Option<mpsc::Sender<Bytes>>,
    driver: Option<JoinHandle<StorageResult<()>>>,
    cancel: CancellationToken,
    declared: Option<u64>,
    written: u64,
    failure: Option<StorageError>,
}

impl WriteStream {
    /// Start `drive` on the runtime and return the sink feeding it.
    pub fn spawn<F, Fut>(key: impl Into<String>, declared: Option<u64>, drive: F) -> Self
    where
        F: FnOnce(ChunkSource) -> Fut,
        Fut: Future<Output = StorageResult<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let source = ChunkSource {
            rx,
            cancel: cancel.clone(),
        };
        let driver = tokio::spawn(drive(source));

        Self {
            key: key.into(),
            tx: Some(tx),
            driver: Some(driver),
            cancel,
            declared,
            written: 0,
            failure: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Hand one chunk to the backend, waiting while it is busy.
    ///
    /// Once the backend has failed, this and every later write return that
    /// failure.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> StorageResult<()> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }

        let attempted = self.written + chunk.len() as u64;
        if let Some(declared) = self.declared {
            if attempted > declared {
                return Err(StorageError::WriteTooLarge {
                    declared,
                    attempted,
                });
            }
        }

        let Some(tx) = self.tx.as_ref() else {
            return Err(StorageError::Aborted);
        };
        match tx.send(chunk).await {
            Ok(()) => {
                self.written = attempted;
                Ok(())
            }
            Err(_) => {
                let err = self.driver_failure().await;
                self.failure = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Close the sink and wait for the backend to confirm every byte.
    pub async fn finish(mut self) -> StorageResult<u64> {
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        if let Some(declared) = self.declared {
            if self.written < declared {
                let written = self.written;
                self.destroy().await;
                return Err(StorageError::ShortWrite { declared, written });
            }
        }

        drop(self.tx.take());
        let Some(driver) = self.driver.take() else {
            return Err(StorageError::Aborted);
        };
        match driver.await {
            Ok(result) => {
                result?;
                debug!("write stream for `{}` completed ({} bytes)", self.key, self.written);
                Ok(self.written)
            }
            Err(join) => Err(StorageError::Transport(join.to_string())),
        }
    }

    /// Destroy the sink and wait for the backend cleanup to run.
    pub async fn abort(mut self) {
        self.destroy().await;
    }

    async fn destroy(&mut self) {
        self.cancel.cancel();
        drop(self.tx.take());
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
        debug!("write stream for `{}` destroyed", self.key);
    }

    async fn driver_failure(&mut self) -> StorageError {
        match self.driver.take() {
            Some(driver) => match driver.await {
                Ok(Err(err)) => err,
                Ok(Ok(())) => StorageError::Transport(format!(
                    "backend closed the stream for `{}` early",
                    self.key
                )),
                Err(join) => StorageError::Transport(join.to_string()),
            },
            None => StorageError::Aborted,
        }
    }
}

impl Drop for WriteStream {
    fn drop(&mut self) {
        if self.driver.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Resolve inclusive `start`/`end` offsets against an object of `size`
/// bytes into a half-open `(offset, len)` window.
pub fn byte_window(size: u64, start: Option<u64>, end: Option<u64>) -> StorageResult<(u64, u64)> {
    let first = start.unwrap_or(0);
    if start.is_some() && first >= size {
        return Err(StorageError::InvalidRange(format!(
            "start {first} is beyond object size {size}"
        )));
    }
    let last_exclusive = match end {
        Some(end) if end < first => {
            return Err(StorageError::InvalidRange(format!(
                "end {end} precedes start {first}"
            )));
        }
        Some(end) => end.saturating_add(1).min(size),
        None => size,
    };
    Ok((first, last_exclusive.saturating_sub(first)))
}

/// HTTP byte-range value for inclusive offsets, if any were given.
pub fn range_header(start: Option<u64>, end: Option<u64>) -> Option<String> {
    match (start, end) {
        (None, None) => None,
        (start, Some(end)) => Some(format!("bytes={}-{}", start.unwrap_or(0), end)),
        (Some(start), None) => Some(format!("bytes={start}-")),
    }
}

/// Stream `len` bytes of `file` beginning at `offset`.
pub async fn file_window(mut file: File, offset: u64, len: u64) -> StorageResult<ByteStream> {
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }
    Ok(ReaderStream::new(file.take(len))
        .map_err(StorageError::from)
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    fn collecting_stream(
        declared: Option<u64>,
    ) -> (WriteStream, Arc<Mutex<Vec<Bytes>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let stream = WriteStream::spawn("k", declared, move |mut source| async move {
            while let Some(chunk) = source.next_chunk().await? {
                sink.lock().unwrap().push(chunk);
            }
            Ok(())
        });
        (stream, seen)
    }

    #[tokio::test]
    async fn chunks_arrive_in_order() {
        let (mut stream, seen) = collecting_stream(None);
        for part in ["ab", "c", "defg"] {
            stream.write(part.as_bytes().to_vec()).await.unwrap();
        }
        assert_eq!(stream.finish().await.unwrap(), 7);
        let joined: Vec<u8> = seen.lock().unwrap().iter().flatten().copied().collect();
        assert_eq!(joined, b"abcdefg");
    }

    #[tokio::test]
    async fn writer_waits_for_slow_backend() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let mut stream = WriteStream::spawn("k", None, move |mut source| async move {
            let _ = release_rx.await;
            while source.next_chunk().await?.is_some() {}
            Ok(())
        });

        // One chunk fits in the slot; the second must wait for the backend.
        stream.write(Bytes::from_static(b"1")).await.unwrap();
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            stream.write(Bytes::from_static(b"2")),
        )
        .await;
        assert!(blocked.is_err());

        release_tx.send(()).unwrap();
        stream.write(Bytes::from_static(b"3")).await.unwrap();
        stream.finish().await.unwrap();
    }

    #[tokio::test]
    async fn open_failure_fails_every_write() {
        let mut stream = WriteStream::spawn("k", None, |_source| async {
            Err(StorageError::AccessDenied("bucket".into()))
        });
        let first = stream.write(Bytes::from_static(b"x")).await;
        let first = match first {
            // The slot may accept one chunk before the driver has exited.
            Ok(()) => stream.write(Bytes::from_static(b"y")).await.unwrap_err(),
            Err(err) => err,
        };
        assert!(matches!(first, StorageError::AccessDenied(_)));
        let again = stream.write(Bytes::from_static(b"z")).await.unwrap_err();
        assert!(matches!(again, StorageError::AccessDenied(_)));
        assert!(matches!(
            stream.finish().await,
            Err(StorageError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn overflowing_declared_length_is_rejected() {
        let (mut stream, seen) = collecting_stream(Some(4));
        stream.write(Bytes::from_static(b"abc")).await.unwrap();
        let err = stream.write(Bytes::from_static(b"de")).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::WriteTooLarge {
                declared: 4,
                attempted: 5
            }
        ));
        stream.write(Bytes::from_static(b"d")).await.unwrap();
        stream.finish().await.unwrap();
        assert_eq!(seen.lock().unwrap().concat(), b"abcd");
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_driver() {
        let (done_tx, done_rx) = oneshot::channel();
        let mut stream = WriteStream::spawn("k", None, move |mut source| async move {
            let outcome = loop {
                match source.next_chunk().await {
                    Ok(Some(_)) => continue,
                    other => break other.map(|_| ()),
                }
            };
            let _ = done_tx.send(outcome.clone());
            outcome
        });
        stream.write(Bytes::from_static(b"x")).await.unwrap();
        drop(stream);
        assert!(matches!(done_rx.await.unwrap(), Err(StorageError::Aborted)));
    }

    #[test]
    fn windows_are_inclusive_and_clamped() {
        assert_eq!(byte_window(10, None, None).unwrap(), (0, 10));
        assert_eq!(byte_window(10, Some(2), Some(4)).unwrap(), (2, 3));
        assert_eq!(byte_window(10, Some(7), Some(100)).unwrap(), (7, 3));
        assert_eq!(byte_window(0, None, None).unwrap(), (0, 0));
        assert!(byte_window(10, Some(10), None).is_err());
        assert!(byte_window(10, Some(5), Some(4)).is_err());
    }

    #[test]
    fn range_header_formats() {
        assert_eq!(range_header(None, None), None);
        assert_eq!(range_header(Some(3), None).as_deref(), Some("bytes=3-"));
        assert_eq!(range_header(None, Some(9)).as_deref(), Some("bytes=0-9"));
    }
}
