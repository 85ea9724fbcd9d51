// Closure-driven stream, used by ObjectStoreBackend to wrap a presigned-GET
// body or a write-through upload buffer without a concrete buffer type of
// its own.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};

use super::Stream;

type ReadFn = Box<
    dyn FnMut(&mut [u8]) -> std::pin::Pin<Box<dyn std::future::Future<Output = FsResult<usize>> + Send>>
        + Send,
>;
type WriteFn = Box<
    dyn FnMut(&[u8]) -> std::pin::Pin<Box<dyn std::future::Future<Output = FsResult<usize>> + Send>>
        + Send,
>;
type DisposeFn = Box<
    dyn FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = FsResult<()>> + Send>> + Send,
>;

/// A stream whose `read`/`write`/`dispose` are driven by user-supplied
/// closures rather than a concrete backing buffer.
///
/// `length` is fixed at construction; backends that don't know the final
/// size up front (a streamed upload) should report `0` and rely on the
/// caller tracking size separately.
pub struct FunctionalStream {
    read_fn: Option<ReadFn>,
    write_fn: Option<WriteFn>,
    dispose_fn: Option<DisposeFn>,
    readable: bool,
    writable: bool,
    length: u64,
    pos: u64,
}

impl FunctionalStream {
    /// Builds a read-only functional stream over `read_fn`, reporting
    /// `length` bytes total.
    pub fn reader(length: u64, read_fn: ReadFn) -> Self {
        Self {
            read_fn: Some(read_fn),
            write_fn: None,
            dispose_fn: None,
            readable: true,
            writable: false,
            length,
            pos: 0,
        }
    }

    /// Builds a write-only functional stream over `write_fn`, invoking
    /// `dispose_fn` (if given) when the upload is disposed — typically where
    /// a buffered upload commits to the backing store.
    pub fn writer(write_fn: WriteFn, dispose_fn: Option<DisposeFn>) -> Self {
        Self {
            read_fn: None,
            write_fn: Some(write_fn),
            dispose_fn,
            readable: false,
            writable: true,
            length: 0,
            pos: 0,
        }
    }
}

#[async_trait]
impl Stream for FunctionalStream {
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
        self.length
    }

    fn position(&self) -> u64 {
        self.pos
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> FsResult<usize> {
        let read_fn = self
            .read_fn
            .as_mut()
            .ok_or_else(|| FsError::NotSupported("stream is not readable".into()))?;
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let n = read_fn(buf).await?;
        self.pos += n as u64;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> FsResult<usize> {
        let write_fn = self
            .write_fn
            .as_mut()
            .ok_or_else(|| FsError::NotSupported("stream is not writable".into()))?;
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let n = write_fn(buf).await?;
        self.pos += n as u64;
        if self.pos > self.length {
            self.length = self.pos;
        }
        Ok(n)
    }

    async fn set_length(&mut self, _len: u64, _cancel: &CancellationToken) -> FsResult<()> {
        Err(FsError::NotSupported(
            "functional streams do not support truncation".into(),
        ))
    }

    async fn seek(&mut self, pos: u64, _cancel: &CancellationToken) -> FsResult<()> {
        if pos == self.pos {
            return Ok(());
        }
        Err(FsError::NotSupported(
            "functional streams do not support seeking".into(),
        ))
    }

    async fn flush(&mut self, _cancel: &CancellationToken) -> FsResult<()> {
        Ok(())
    }

    async fn dispose(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        if let Some(dispose_fn) = self.dispose_fn.as_mut() {
            dispose_fn().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn reader_yields_then_eof() {
        let source = Arc::new(b"payload".to_vec());
        let offset = Arc::new(Mutex::new(0usize));
        let read_fn: ReadFn = Box::new(move |buf: &mut [u8]| {
            let source = Arc::clone(&source);
            let offset = Arc::clone(&offset);
            Box::pin(async move {
                let mut off = offset.lock().await;
                let remaining = &source[*off..];
                let n = std::cmp::min(buf.len(), remaining.len());
                buf[..n].copy_from_slice(&remaining[..n]);
                *off += n;
                Ok(n)
            })
        });
        let mut stream = FunctionalStream::reader(7, read_fn);
        let t = token();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf, &t).await.unwrap();
        assert_eq!(n, 7);
        assert_eq!(&buf[..7], b"payload");
        let n2 = stream.read(&mut buf, &t).await.unwrap();
        assert_eq!(n2, 0);
    }

    #[tokio::test]
    async fn writer_invokes_dispose_on_commit() {
        let committed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&committed);
        let write_fn: WriteFn = Box::new(move |buf: &[u8]| {
            let sink = Arc::clone(&sink);
            let chunk = buf.to_vec();
            Box::pin(async move {
                sink.lock().await.extend_from_slice(&chunk);
                Ok(chunk.len())
            })
        });
        let flag = Arc::new(Mutex::new(false));
        let flag_clone = Arc::clone(&flag);
        let dispose_fn: DisposeFn = Box::new(move || {
            let flag_clone = Arc::clone(&flag_clone);
            Box::pin(async move {
                *flag_clone.lock().await = true;
                Ok(())
            })
        });

        let mut stream = FunctionalStream::writer(write_fn, Some(dispose_fn));
        let t = token();
        stream.write(b"up", &t).await.unwrap();
        stream.dispose(&t).await.unwrap();

        assert_eq!(*committed.lock().await, b"up");
        assert!(*flag.lock().await);
    }
}
