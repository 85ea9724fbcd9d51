// Capability-typed byte streams.
//
// Every backend hands out `Box<dyn Stream>` handles. Capability is carried
// by the concrete adapter a caller holds, not by a runtime check on every
// call: `ReadOnlyStream` simply has no usable `write`, rather than a flag
// the caller has to remember to test.

mod adapters;
mod functional;
mod memory;
mod real_file;

pub use adapters::{CopyOnWriteStream, CowFactory, ReadOnlyStream, WriteLimitedStream, WriteOnlyStream};
pub use functional::FunctionalStream;
pub use memory::MemoryStream;
pub use real_file::RealFileStream;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};

const COPY_CHUNK: usize = 64 * 1024;

/// A capability-typed byte sequence.
///
/// `readable`/`writable` describe which directions are permitted; `owned`
/// tells whether [`Stream::dispose`] releases an underlying resource
/// (closes a file descriptor, frees a buffer) or merely resets view state
/// (a [`Mirror`](memory::MemoryStream::mirror) view).
#[async_trait]
pub trait Stream: Send + Sync {
    /// Whether `read` is a supported operation on this stream.
    fn readable(&self) -> bool;
    /// Whether `write`/`set_length` are supported operations on this stream.
    fn writable(&self) -> bool;
    /// Whether disposing this stream releases an underlying resource.
    fn owned(&self) -> bool;
    /// Total length of the stream's content, in bytes.
    fn length(&self) -> u64;
    /// Current read/write cursor.
    fn position(&self) -> u64;

    /// Reads up to `buf.len()` bytes, returning the number of bytes read
    /// (`0` at EOF). Fails with [`FsError::NotSupported`] if `!readable()`.
    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> FsResult<usize>;

    /// Writes `buf`, returning the number of bytes written. Fails with
    /// [`FsError::NotSupported`] if `!writable()`.
    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> FsResult<usize>;

    /// Truncates or extends the stream to exactly `len` bytes.
    async fn set_length(&mut self, len: u64, cancel: &CancellationToken) -> FsResult<()>;

    /// Repositions the read/write cursor to `pos`, independent of
    /// `length()`. Streams with no underlying random-access resource (e.g.
    /// [`FunctionalStream`] wrapping a forward-only body) fail with
    /// [`FsError::NotSupported`] for any `pos` other than the current one.
    async fn seek(&mut self, pos: u64, cancel: &CancellationToken) -> FsResult<()>;

    /// Flushes any buffered writes to the backing store.
    async fn flush(&mut self, cancel: &CancellationToken) -> FsResult<()>;

    /// Releases resources held by this handle. Non-owning views only reset
    /// their own position; owning streams release the underlying resource.
    async fn dispose(&mut self, cancel: &CancellationToken) -> FsResult<()>;

    /// Drains `self` into `dest` in fixed-size chunks, yielding to
    /// cancellation between chunks. Returns the total bytes copied.
    async fn copy_to(&mut self, dest: &mut dyn Stream, cancel: &CancellationToken) -> FsResult<u64> {
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(FsError::Cancelled);
            }
            let n = self.read(&mut buf, cancel).await?;
            if n == 0 {
                break;
            }
            let mut written = 0;
            while written < n {
                let w = dest.write(&buf[written..n], cancel).await?;
                if w == 0 {
                    break;
                }
                written += w;
            }
            total += written as u64;
        }
        Ok(total)
    }
}

/// Drains `stream` into a fresh, seekable [`MemoryStream`] positioned at
/// zero. This is how callers obtain a random-access view of an otherwise
/// forward-only backend stream (e.g. an object-store presigned GET body).
pub async fn into_memory(
    stream: &mut dyn Stream,
    cancel: &CancellationToken,
) -> FsResult<MemoryStream> {
    let mut mem = MemoryStream::new_owned();
    stream.copy_to(&mut mem, cancel).await?;
    mem.seek_to_start();
    Ok(mem)
}

/// Adapter methods available on any boxed stream.
///
/// Implemented as an extension trait (rather than inherent methods on
/// `Box<dyn Stream>`) so adapters compose uniformly across every backend's
/// concrete stream type.
pub trait StreamExt {
    /// Wraps this stream so writes are rejected with [`FsError::NotSupported`].
    fn read_only(self) -> Box<dyn Stream>;
    /// Wraps this stream so reads are rejected with [`FsError::NotSupported`].
    fn write_only(self) -> Box<dyn Stream>;
    /// Wraps this stream with a cumulative write cap of `limit` bytes.
    fn write_limited(self, limit: u64) -> Box<dyn Stream>;
    /// Wraps this stream (as `origin`) so the first write or `set_length`
    /// materializes a private copy via `factory`, leaving `origin` untouched.
    fn copy_on_write(self, factory: CowFactory) -> Box<dyn Stream>;
}

impl StreamExt for Box<dyn Stream> {
    fn read_only(self) -> Box<dyn Stream> {
        Box::new(ReadOnlyStream::new(self))
    }

    fn write_only(self) -> Box<dyn Stream> {
        Box::new(WriteOnlyStream::new(self))
    }

    fn write_limited(self, limit: u64) -> Box<dyn Stream> {
        Box::new(WriteLimitedStream::new(self, limit))
    }

    fn copy_on_write(self, factory: CowFactory) -> Box<dyn Stream> {
        Box::new(CopyOnWriteStream::new(self, factory))
    }
}
