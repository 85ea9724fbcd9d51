// Longest-prefix path router to child FS instances.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::entry::{AtMode, FileEntry, FileStatus, ListMode};
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::path::Path;
use crate::stream::Stream;

/// Routes every operation to the child FS whose mount path is the longest
/// prefix of the requested path. `read_only()` always reports `true` — it
/// describes the router itself, not the backends it dispatches to.
pub struct MountFileSystem {
    mounts: Arc<RwLock<HashMap<Path, Arc<dyn FileSystem>>>>,
}

impl MountFileSystem {
    pub fn new() -> Arc<MountFileSystem> {
        Arc::new(MountFileSystem {
            mounts: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Mounts `fs` at `p`, replacing whatever was previously mounted there.
    pub async fn mount(&self, p: Path, fs: Arc<dyn FileSystem>) {
        debug!(path = %p, "mount: attached backend");
        self.mounts.write().await.insert(p, fs);
    }

    /// Removes the mount at `p`, if any.
    pub async fn unmount(&self, p: &Path) -> Option<Arc<dyn FileSystem>> {
        self.mounts.write().await.remove(p)
    }

    async fn resolve(&self, p: &Path) -> FsResult<(Path, Arc<dyn FileSystem>)> {
        let mounts = self.mounts.read().await;
        let mut best: Option<(&Path, &Arc<dyn FileSystem>)> = None;
        for (mount_point, fs) in mounts.iter() {
            if p == mount_point || p.in_directory(mount_point) {
                let is_longer = match best {
                    None => true,
                    Some((current, _)) => mount_point.as_str().len() > current.as_str().len(),
                };
                if is_longer {
                    best = Some((mount_point, fs));
                }
            }
        }
        let (mount_point, fs) = best.ok_or_else(|| FsError::NotFound(p.to_string()))?;
        let rebased = p.rebase(mount_point, &Path::root())?;
        Ok((rebased, Arc::clone(fs)))
    }
}

#[async_trait]
impl FileSystem for MountFileSystem {
    fn read_only(&self) -> bool {
        true
    }

    async fn file_exists(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.file_exists(&rebased, cancel).await
    }

    async fn dir_exists(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.dir_exists(&rebased, cancel).await
    }

    async fn file_stat(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileStatus> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.file_stat(&rebased, cancel).await
    }

    async fn create_file(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.create_file(&rebased, cancel).await
    }

    async fn create_directory(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.create_directory(&rebased, cancel).await
    }

    async fn open_file_read(
        &self,
        p: &Path,
        cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.open_file_read(&rebased, cancel).await
    }

    async fn open_file_write(
        &self,
        p: &Path,
        cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.open_file_write(&rebased, cancel).await
    }

    async fn open_file_read_write(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.open_file_read_write(&rebased, cancel).await
    }

    async fn delete_file(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.delete_file(&rebased, cancel).await
    }

    async fn delete_directory(
        &self,
        p: &Path,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> FsResult<bool> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.delete_directory(&rebased, recursive, cancel).await
    }

    async fn integrate(
        &self,
        p: &Path,
        readable: Box<dyn Stream>,
        cancel: &CancellationToken,
    ) -> FsResult<FileEntry> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.integrate(&rebased, readable, cancel).await
    }

    async fn entries(
        &self,
        p: &Path,
        mode: &ListMode,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<FileEntry>> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.entries(&rebased, mode, cancel).await
    }

    /// Rebasing a mount point itself yields the root path, so `at()` for an
    /// exact mount point and for a path below it share the same dispatch:
    /// both delegate into the chosen child at the rebased path.
    async fn at(&self, p: &Path, mode: AtMode, cancel: &CancellationToken) -> FsResult<Arc<dyn FileSystem>> {
        let (rebased, fs) = self.resolve(p).await?;
        fs.at(&rebased, mode, cancel).await
    }
}
