use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::{Buf, Bytes};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::StoreError;
use crate::context::CancelHandle;
use crate::publication::SignedRecord;

/// Readable plaintext of one published blob
///
/// Chunks are fetched ahead of the read position and yielded strictly in
/// manifest order, each already checked against its id. A failed chunk
/// surfaces as an error from the read that reaches it; nothing past it is
/// returned. Dropping the reader cancels outstanding fetches.
pub struct BlobReader {
    record: SignedRecord,
    chunks: Option<BoxStream<'static, Result<Bytes, StoreError>>>,
    current: Bytes,
    cancel: CancelHandle,
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("key", &self.record.key())
            .field("buffered", &self.current.len())
            .field("done", &self.chunks.is_none())
            .finish()
    }
}

impl BlobReader {
    pub(super) fn new(
        record: SignedRecord,
        chunks: BoxStream<'static, Result<Bytes, StoreError>>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            record,
            chunks: Some(chunks),
            current: Bytes::new(),
            cancel,
        }
    }

    /// The record this blob was resolved from
    pub fn record(&self) -> &SignedRecord {
        &self.record
    }

    /// Total plaintext size
    pub fn size(&self) -> u64 {
        self.record.record().manifest.size()
    }

    /// Next run of plaintext, or `None` once the blob is exhausted
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, StoreError> {
        if !self.current.is_empty() {
            return Ok(Some(std::mem::take(&mut self.current)));
        }
        let Some(chunks) = self.chunks.as_mut() else {
            return Ok(None);
        };
        match chunks.next().await {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => {
                self.chunks = None;
                Err(e)
            }
            None => {
                self.chunks = None;
                Ok(None)
            }
        }
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::with_capacity(self.size().min(64 * 1024 * 1024) as usize);
        while let Some(bytes) = self.next_chunk().await? {
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    /// Stream the rest of the blob into `writer`; returns bytes written
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64, StoreError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        while let Some(bytes) = self.next_chunk().await? {
            writer.write_all(&bytes).await?;
            written += bytes.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Cancel outstanding fetches and release the reader
    pub fn close(mut self) {
        self.chunks = None;
        self.cancel.cancel();
    }
}

impl Drop for BlobReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl AsyncRead for BlobReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.current.is_empty() {
                let n = self.current.len().min(buf.remaining());
                buf.put_slice(&self.current[..n]);
                self.current.advance(n);
                return Poll::Ready(Ok(()));
            }

            let Some(chunks) = self.chunks.as_mut() else {
                return Poll::Ready(Ok(()));
            };
            match chunks.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.current = bytes,
                Poll::Ready(Some(Err(e))) => {
                    self.chunks = None;
                    return Poll::Ready(Err(io::Error::other(e)));
                }
                Poll::Ready(None) => {
                    self.chunks = None;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
