// Concrete stream over a host file, used by RealBackend.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};

use super::Stream;

/// Wraps a `tokio::fs::File` with the capability flags the caller opened it
/// with.
pub struct RealFileStream {
    file: tokio::fs::File,
    pos: u64,
    len: u64,
    readable: bool,
    writable: bool,
}

impl RealFileStream {
    pub fn new(file: tokio::fs::File, len: u64, readable: bool, writable: bool) -> Self {
        Self {
            file,
            pos: 0,
            len,
            readable,
            writable,
        }
    }
}

#[async_trait]
impl Stream for RealFileStream {
    fn readable(&self) -> bool {
        self.readable
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn owned(&self) -> bool {
        true
    }

    fn length(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.pos
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> FsResult<usize> {
        if !self.readable {
            return Err(FsError::NotSupported("stream is not readable".into()));
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(FsError::Cancelled),
            result = self.file.read(buf) => {
                let n = result.map_err(FsError::from)?;
                self.pos += n as u64;
                Ok(n)
            }
        }
    }

    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> FsResult<usize> {
        if !self.writable {
            return Err(FsError::NotSupported("stream is not writable".into()));
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(FsError::Cancelled),
            result = self.file.write(buf) => {
                let n = result.map_err(FsError::from)?;
                self.pos += n as u64;
                if self.pos > self.len {
                    self.len = self.pos;
                }
                Ok(n)
            }
        }
    }

    async fn set_length(&mut self, len: u64, cancel: &CancellationToken) -> FsResult<()> {
        if !self.writable {
            return Err(FsError::NotSupported("stream is not writable".into()));
        }
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        self.file.set_len(len).await.map_err(FsError::from)?;
        self.len = len;
        if self.pos > len {
            self.pos = len;
        }
        Ok(())
    }

    async fn seek(&mut self, pos: u64, cancel: &CancellationToken) -> FsResult<()> {
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        self.file
            .seek(std::io::SeekFrom::Start(pos))
            .await
            .map_err(FsError::from)?;
        self.pos = pos;
        Ok(())
    }

    async fn flush(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        self.file.flush().await.map_err(FsError::from)?;
        self.file.sync_all().await.map_err(FsError::from)?;
        Ok(())
    }

    async fn dispose(&mut self, _cancel: &CancellationToken) -> FsResult<()> {
        // Dropping `self.file` closes the descriptor; nothing else owns it.
        Ok(())
    }
}
