// In-memory, seekable byte buffer. The concrete stream type every Memory
// tree node and every ObjectStore write-buffer ultimately wraps.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};

use super::Stream;

/// An owned or mirrored view over a shared in-memory buffer.
///
/// A node in the Memory tree holds an *owning* `MemoryStream`; opening that
/// file for reading or writing hands out a [`MemoryStream::mirror`] — a
/// second handle over the same `Arc<Mutex<Vec<u8>>>` with its own cursor,
/// so concurrent readers never interfere with each other's position.
pub struct MemoryStream {
    buf: Arc<Mutex<Vec<u8>>>,
    pos: u64,
    readable: bool,
    writable: bool,
    owned: bool,
}

impl MemoryStream {
    /// A new, empty, owning buffer open for both reading and writing.
    pub fn new_owned() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::new())),
            pos: 0,
            readable: true,
            writable: true,
            owned: true,
        }
    }

    /// An owning buffer pre-populated with `bytes`, cursor at zero.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buf: Arc::new(Mutex::new(bytes)),
            pos: 0,
            readable: true,
            writable: true,
            owned: true,
        }
    }

    /// A non-owning view over the same backing buffer, cursor reset to
    /// zero, with the given capability flags.
    pub fn mirror_with(&self, readable: bool, writable: bool) -> Self {
        Self {
            buf: Arc::clone(&self.buf),
            pos: 0,
            readable,
            writable,
            owned: false,
        }
    }

    /// A full-capability, non-owning mirror of this buffer.
    pub fn mirror(&self) -> Self {
        self.mirror_with(true, true)
    }

    /// Synchronously snapshots the buffer's current contents. Used by
    /// backends that need to hand bytes to a non-`Stream`-shaped API (e.g.
    /// an object-store `put_object` call).
    pub async fn snapshot(&self) -> Vec<u8> {
        self.buf.lock().await.clone()
    }

    /// Resets this handle's own cursor to zero without touching the shared
    /// buffer.
    pub fn seek_to_start(&mut self) {
        self.pos = 0;
    }

    /// Current buffer length, without requiring an `&mut self` borrow.
    pub async fn len_async(&self) -> u64 {
        self.buf.lock().await.len() as u64
    }
}

#[async_trait]
impl Stream for MemoryStream {
    fn readable(&self) -> bool {
        self.readable
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn owned(&self) -> bool {
        self.owned
    }

    fn length(&self) -> u64 {
        // Best-effort synchronous view; callers that need an up-to-date
        // value under concurrent writers should use `len_async`.
        self.buf
            .try_lock()
            .map(|g| g.len() as u64)
            .unwrap_or(self.pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> FsResult<usize> {
        if !self.readable {
            return Err(FsError::NotSupported("stream is not readable".into()));
        }
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let content = self.buf.lock().await;
        let start = self.pos as usize;
        if start >= content.len() {
            return Ok(0);
        }
        let n = std::cmp::min(buf.len(), content.len() - start);
        buf[..n].copy_from_slice(&content[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> FsResult<usize> {
        if !self.writable {
            return Err(FsError::NotSupported("stream is not writable".into()));
        }
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let mut content = self.buf.lock().await;
        let start = self.pos as usize;
        if start > content.len() {
            content.resize(start, 0);
        }
        let end = start + buf.len();
        if end > content.len() {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    async fn set_length(&mut self, len: u64, cancel: &CancellationToken) -> FsResult<()> {
        if !self.writable {
            return Err(FsError::NotSupported("stream is not writable".into()));
        }
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let mut content = self.buf.lock().await;
        content.resize(len as usize, 0);
        if self.pos > len {
            self.pos = len;
        }
        Ok(())
    }

    async fn seek(&mut self, pos: u64, _cancel: &CancellationToken) -> FsResult<()> {
        self.pos = pos;
        Ok(())
    }

    async fn flush(&mut self, _cancel: &CancellationToken) -> FsResult<()> {
        Ok(())
    }

    async fn dispose(&mut self, _cancel: &CancellationToken) -> FsResult<()> {
        if self.owned {
            let mut content = self.buf.lock().await;
            content.clear();
            content.shrink_to_fit();
        }
        self.pos = 0;
        Ok(())
    }
}
