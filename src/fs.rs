// The common contract every backend implements.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::entry::{AtMode, FileEntry, FileStatus, ListMode};
use crate::error::FsResult;
use crate::path::Path;
use crate::stream::Stream;

/// A virtual file system: existence queries, create/delete, opening a file
/// in each capability mode, cross-backend import, listing, and sub-mounting.
///
/// Every operation is async and accepts a `&CancellationToken`. Implementors
/// must be `Send + Sync`: a single instance may be shared and operated on
/// concurrently for distinct paths, though a single opened [`Stream`] is not
/// required to tolerate concurrent callers.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Whether mutating operations on this FS are rejected with
    /// `FsError::ReadOnly`.
    fn read_only(&self) -> bool;

    /// True iff a file exists at `p`.
    async fn file_exists(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool>;

    /// True iff a directory exists at `p`.
    async fn dir_exists(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool>;

    /// The existence state of `p`, distinguishing never-existed from
    /// deleted where the backend can tell the difference.
    async fn file_stat(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileStatus>;

    /// Creates (or replaces) the file at `p`, returning it opened
    /// read-write. Fails with `ReadOnly` on a read-only FS, or if `p`'s
    /// parent does not exist and cannot be created.
    async fn create_file(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry>;

    /// Creates the directory at `p`, including any missing intermediates.
    /// Idempotent: creating an existing directory succeeds.
    async fn create_directory(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry>;

    /// Opens `p` for reading. Returns `None` if `p` does not exist.
    async fn open_file_read(
        &self,
        p: &Path,
        cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>>;

    /// Opens `p` for writing. Backend policy on a missing path diverges:
    /// see each backend's implementation doc.
    async fn open_file_write(
        &self,
        p: &Path,
        cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>>;

    /// Opens `p` for reading and writing, creating it if absent.
    async fn open_file_read_write(
        &self,
        p: &Path,
        cancel: &CancellationToken,
    ) -> FsResult<FileEntry>;

    /// Removes the file at `p`. Returns `true` iff a file was actually
    /// removed.
    async fn delete_file(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool>;

    /// Removes the directory at `p`. `recursive` governs behavior when the
    /// directory is non-empty; non-recursive on a non-empty directory is
    /// backend-defined. Returns `true` iff a directory was actually removed.
    async fn delete_directory(
        &self,
        p: &Path,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> FsResult<bool>;

    /// Creates (or replaces) the file at `p` in this FS, bulk-copying bytes
    /// from `readable`. The cross-backend import primitive: overlay copy-up
    /// and manual migration both go through this.
    async fn integrate(
        &self,
        p: &Path,
        readable: Box<dyn Stream>,
        cancel: &CancellationToken,
    ) -> FsResult<FileEntry>;

    /// Lists the contents of directory `p` per `mode`. Fails with
    /// `NotFound` if `p` does not exist.
    async fn entries(
        &self,
        p: &Path,
        mode: &ListMode,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<FileEntry>>;

    /// Returns a `FileSystem` rooted at `p`, governed by `mode`. Requesting
    /// `AtMode::ReadWrite` against a read-only source fails with
    /// `FsError::ReadOnly`.
    async fn at(
        &self,
        p: &Path,
        mode: AtMode,
        cancel: &CancellationToken,
    ) -> FsResult<Arc<dyn FileSystem>>;
}
