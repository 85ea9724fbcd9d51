// Capability-restricting and behavior-modifying adapters that compose over
// any boxed stream.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};

use super::Stream;

/// Rejects writes with [`FsError::NotSupported`]; reads pass through.
pub struct ReadOnlyStream {
    inner: Box<dyn Stream>,
}

impl ReadOnlyStream {
    pub fn new(inner: Box<dyn Stream>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Stream for ReadOnlyStream {
    fn readable(&self) -> bool {
        self.inner.readable()
    }

    fn writable(&self) -> bool {
        false
    }

    fn owned(&self) -> bool {
        self.inner.owned()
    }

    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> FsResult<usize> {
        self.inner.read(buf, cancel).await
    }

    async fn write(&mut self, _buf: &[u8], _cancel: &CancellationToken) -> FsResult<usize> {
        Err(FsError::NotSupported("stream is read-only".into()))
    }

    async fn set_length(&mut self, _len: u64, _cancel: &CancellationToken) -> FsResult<()> {
        Err(FsError::NotSupported("stream is read-only".into()))
    }

    async fn seek(&mut self, pos: u64, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.seek(pos, cancel).await
    }

    async fn flush(&mut self, _cancel: &CancellationToken) -> FsResult<()> {
        Ok(())
    }

    async fn dispose(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.dispose(cancel).await
    }
}

/// Rejects reads with [`FsError::NotSupported`]; writes pass through.
pub struct WriteOnlyStream {
    inner: Box<dyn Stream>,
}

impl WriteOnlyStream {
    pub fn new(inner: Box<dyn Stream>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Stream for WriteOnlyStream {
    fn readable(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        self.inner.writable()
    }

    fn owned(&self) -> bool {
        self.inner.owned()
    }

    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    async fn read(&mut self, _buf: &mut [u8], _cancel: &CancellationToken) -> FsResult<usize> {
        Err(FsError::NotSupported("stream is write-only".into()))
    }

    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> FsResult<usize> {
        self.inner.write(buf, cancel).await
    }

    async fn set_length(&mut self, len: u64, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.set_length(len, cancel).await
    }

    async fn seek(&mut self, pos: u64, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.seek(pos, cancel).await
    }

    async fn flush(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.flush(cancel).await
    }

    async fn dispose(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.dispose(cancel).await
    }
}

/// Enforces a cumulative write cap. `set_length(0)` resets the counter,
/// supporting a truncate-and-rewrite cycle on the same handle.
pub struct WriteLimitedStream {
    inner: Box<dyn Stream>,
    limit: u64,
    written: u64,
}

impl WriteLimitedStream {
    pub fn new(inner: Box<dyn Stream>, limit: u64) -> Self {
        Self {
            inner,
            limit,
            written: 0,
        }
    }
}

#[async_trait]
impl Stream for WriteLimitedStream {
    fn readable(&self) -> bool {
        self.inner.readable()
    }

    fn writable(&self) -> bool {
        self.inner.writable()
    }

    fn owned(&self) -> bool {
        self.inner.owned()
    }

    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> FsResult<usize> {
        self.inner.read(buf, cancel).await
    }

    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> FsResult<usize> {
        if self.written + buf.len() as u64 > self.limit {
            return Err(FsError::NotSupported(format!(
                "write would exceed limit of {} bytes",
                self.limit
            )));
        }
        let n = self.inner.write(buf, cancel).await?;
        self.written += n as u64;
        Ok(n)
    }

    async fn set_length(&mut self, len: u64, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.set_length(len, cancel).await?;
        if len == 0 {
            self.written = 0;
        }
        Ok(())
    }

    async fn seek(&mut self, pos: u64, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.seek(pos, cancel).await
    }

    async fn flush(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.flush(cancel).await
    }

    async fn dispose(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        self.inner.dispose(cancel).await
    }
}

/// A factory for the private stream a [`CopyOnWriteStream`] materializes
/// into on first mutation.
pub type CowFactory = Box<dyn Fn() -> Box<dyn Stream> + Send + Sync>;

enum CowState {
    Reading,
    Writing(Box<dyn Stream>),
}

/// Reads pass through to `origin` until the first write or `set_length`, at
/// which point `factory()` materializes a private writable stream, `origin`'s
/// full contents (not just the unread tail) are copied into it, and the
/// private copy's cursor is placed back at the position the caller had
/// reached — so a write after a full read overwrites from there rather than
/// appending to an empty buffer. `origin` is never mutated.
pub struct CopyOnWriteStream {
    origin: Box<dyn Stream>,
    factory: CowFactory,
    state: CowState,
}

impl CopyOnWriteStream {
    pub fn new(origin: Box<dyn Stream>, factory: CowFactory) -> Self {
        Self {
            origin,
            factory,
            state: CowState::Reading,
        }
    }

    async fn materialize(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        if matches!(self.state, CowState::Writing(_)) {
            return Ok(());
        }
        let at = self.origin.position();
        // copy_to only drains from the current position forward, so rewind
        // to the start first and snapshot the whole thing into the private
        // copy, then put both cursors back where the caller left them.
        self.origin.seek(0, cancel).await?;
        let mut target = (self.factory)();
        self.origin.copy_to(target.as_mut(), cancel).await?;
        target.seek(at, cancel).await?;
        self.origin.seek(at, cancel).await?;
        self.state = CowState::Writing(target);
        Ok(())
    }
}

#[async_trait]
impl Stream for CopyOnWriteStream {
    fn readable(&self) -> bool {
        true
    }

    fn writable(&self) -> bool {
        true
    }

    fn owned(&self) -> bool {
        true
    }

    fn length(&self) -> u64 {
        match &self.state {
            CowState::Reading => self.origin.length(),
            CowState::Writing(s) => s.length(),
        }
    }

    fn position(&self) -> u64 {
        match &self.state {
            CowState::Reading => self.origin.position(),
            CowState::Writing(s) => s.position(),
        }
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> FsResult<usize> {
        match &mut self.state {
            CowState::Reading => self.origin.read(buf, cancel).await,
            CowState::Writing(s) => s.read(buf, cancel).await,
        }
    }

    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> FsResult<usize> {
        self.materialize(cancel).await?;
        match &mut self.state {
            CowState::Writing(s) => s.write(buf, cancel).await,
            CowState::Reading => unreachable!("materialize always transitions to Writing"),
        }
    }

    async fn set_length(&mut self, len: u64, cancel: &CancellationToken) -> FsResult<()> {
        self.materialize(cancel).await?;
        match &mut self.state {
            CowState::Writing(s) => s.set_length(len, cancel).await,
            CowState::Reading => unreachable!("materialize always transitions to Writing"),
        }
    }

    async fn seek(&mut self, pos: u64, cancel: &CancellationToken) -> FsResult<()> {
        match &mut self.state {
            CowState::Reading => self.origin.seek(pos, cancel).await,
            CowState::Writing(s) => s.seek(pos, cancel).await,
        }
    }

    async fn flush(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        match &mut self.state {
            CowState::Reading => Ok(()),
            CowState::Writing(s) => s.flush(cancel).await,
        }
    }

    async fn dispose(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        match &mut self.state {
            CowState::Reading => self.origin.dispose(cancel).await,
            CowState::Writing(s) => s.dispose(cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn read_only_rejects_writes() {
        let mem = MemoryStream::from_bytes(b"hi".to_vec());
        let mut ro = ReadOnlyStream::new(Box::new(mem));
        let t = token();
        assert!(ro.write(b"x", &t).await.is_err());
        let mut buf = [0u8; 2];
        assert_eq!(ro.read(&mut buf, &t).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn write_only_rejects_reads() {
        let mem = MemoryStream::new_owned();
        let mut wo = WriteOnlyStream::new(Box::new(mem));
        let t = token();
        assert!(wo.read(&mut [0u8; 2], &t).await.is_err());
        assert_eq!(wo.write(b"hi", &t).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn write_limited_enforces_cap() {
        let mem = MemoryStream::new_owned();
        let mut wl = WriteLimitedStream::new(Box::new(mem), 3);
        let t = token();
        assert_eq!(wl.write(&[0x41, 0x42], &t).await.unwrap(), 2);
        assert!(wl.write(&[0x43, 0x44], &t).await.is_err());
    }

    #[tokio::test]
    async fn write_limited_reset_via_set_length_zero() {
        let mem = MemoryStream::new_owned();
        let mut wl = WriteLimitedStream::new(Box::new(mem), 2);
        let t = token();
        wl.write(&[1, 2], &t).await.unwrap();
        assert!(wl.write(&[3], &t).await.is_err());
        wl.set_length(0, &t).await.unwrap();
        assert!(wl.write(&[3], &t).await.is_ok());
    }

    #[tokio::test]
    async fn copy_on_write_does_not_mutate_origin() {
        let origin = MemoryStream::from_bytes(b"lower".to_vec());
        let origin_handle = origin.mirror();
        let t = token();

        let factory: CowFactory = Box::new(|| Box::new(MemoryStream::new_owned()));
        let mut cow = CopyOnWriteStream::new(Box::new(origin), factory);

        let mut buf = [0u8; 5];
        assert_eq!(cow.read(&mut buf, &t).await.unwrap(), 5);
        assert_eq!(&buf, b"lower");

        cow.write(b"!", &t).await.unwrap();

        let mut origin_check = origin_handle;
        let mut check_buf = [0u8; 5];
        origin_check.read(&mut check_buf, &t).await.unwrap();
        assert_eq!(&check_buf, b"lower");
    }

    #[tokio::test]
    async fn copy_on_write_preserves_prior_content_after_full_read() {
        let origin = MemoryStream::from_bytes(b"lower".to_vec());
        let t = token();

        let factory: CowFactory = Box::new(|| Box::new(MemoryStream::new_owned()));
        let mut cow = CopyOnWriteStream::new(Box::new(origin), factory);

        // Drain the stream fully before writing, so materialize() has to
        // reconstruct the prefix from scratch rather than it still being
        // sitting unread ahead of the cursor.
        let mut buf = [0u8; 5];
        cow.read(&mut buf, &t).await.unwrap();
        assert_eq!(cow.read(&mut buf, &t).await.unwrap(), 0);

        cow.write(b"!", &t).await.unwrap();

        cow.seek(0, &t).await.unwrap();
        let mut full = [0u8; 6];
        let n = cow.read(&mut full, &t).await.unwrap();
        assert_eq!(&full[..n], b"lower!");
    }

    #[tokio::test]
    async fn copy_on_write_overwrites_at_position_after_partial_read() {
        let origin = MemoryStream::from_bytes(b"lower".to_vec());
        let t = token();

        let factory: CowFactory = Box::new(|| Box::new(MemoryStream::new_owned()));
        let mut cow = CopyOnWriteStream::new(Box::new(origin), factory);

        let mut buf = [0u8; 2];
        cow.read(&mut buf, &t).await.unwrap();
        assert_eq!(&buf, b"lo");

        cow.write(b"XY", &t).await.unwrap();

        cow.seek(0, &t).await.unwrap();
        let mut full = [0u8; 5];
        cow.read(&mut full, &t).await.unwrap();
        assert_eq!(&full, b"loXYr");
    }
}
