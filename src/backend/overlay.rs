// Lower/upper composition with tombstone-aware merge and copy-up.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::entry::{AtMode, FileEntry, FileStatus, ListMode};
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::path::Path;
use crate::stream::{Stream, StreamExt};

/// Merges a read-mostly `lower` source with a mutable `upper` target.
/// `upper` shadows `lower`: a tombstoned path in `upper` hides the same
/// path in `lower` even though `lower` itself is untouched.
pub struct OverlayFileSystem {
    lower: Arc<dyn FileSystem>,
    upper: Arc<dyn FileSystem>,
}

impl OverlayFileSystem {
    pub fn new(lower: Arc<dyn FileSystem>, upper: Arc<dyn FileSystem>) -> Arc<dyn FileSystem> {
        Arc::new(OverlayFileSystem { lower, upper })
    }
}

#[async_trait]
impl FileSystem for OverlayFileSystem {
    fn read_only(&self) -> bool {
        self.upper.read_only()
    }

    async fn file_exists(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool> {
        Ok(matches!(self.file_stat(p, cancel).await?, FileStatus::Exists))
    }

    async fn dir_exists(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool> {
        Ok(self.upper.dir_exists(p, cancel).await? || self.lower.dir_exists(p, cancel).await?)
    }

    async fn file_stat(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileStatus> {
        match self.upper.file_stat(p, cancel).await? {
            FileStatus::Exists => Ok(FileStatus::Exists),
            FileStatus::Deleted => Ok(FileStatus::Deleted),
            FileStatus::NotFound => self.lower.file_stat(p, cancel).await,
        }
    }

    async fn create_file(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry> {
        self.upper.create_file(p, cancel).await
    }

    async fn create_directory(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry> {
        self.upper.create_directory(p, cancel).await
    }

    async fn open_file_read(
        &self,
        p: &Path,
        cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>> {
        if let Some(entry) = self.upper.open_file_read(p, cancel).await? {
            return Ok(Some(entry));
        }
        if matches!(self.upper.file_stat(p, cancel).await?, FileStatus::Deleted) {
            return Ok(None);
        }
        self.lower.open_file_read(p, cancel).await
    }

    async fn open_file_write(
        &self,
        p: &Path,
        cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>> {
        if self.read_only() {
            return Err(FsError::ReadOnly);
        }
        let rw = self.open_file_read_write(p, cancel).await?;
        let FileEntry::FileRW(path, fs, stream) = rw else {
            unreachable!("open_file_read_write always returns FileRW")
        };
        Ok(Some(FileEntry::FileWO(path, fs, stream.write_only())))
    }

    async fn open_file_read_write(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry> {
        if self.upper.file_exists(p, cancel).await? {
            return self.upper.open_file_read_write(p, cancel).await;
        }
        if matches!(self.upper.file_stat(p, cancel).await?, FileStatus::Deleted) {
            return self.upper.create_file(p, cancel).await;
        }
        if let Some(lower_ro) = self.lower.open_file_read(p, cancel).await? {
            let FileEntry::FileRO(_, _, stream) = lower_ro else {
                unreachable!("open_file_read always returns FileRO")
            };
            return self.upper.integrate(p, stream, cancel).await;
        }
        self.upper.create_file(p, cancel).await
    }

    async fn delete_file(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool> {
        self.upper.delete_file(p, cancel).await
    }

    async fn delete_directory(
        &self,
        p: &Path,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> FsResult<bool> {
        self.upper.delete_directory(p, recursive, cancel).await
    }

    async fn integrate(
        &self,
        p: &Path,
        readable: Box<dyn Stream>,
        cancel: &CancellationToken,
    ) -> FsResult<FileEntry> {
        self.upper.integrate(p, readable, cancel).await
    }

    async fn entries(
        &self,
        p: &Path,
        mode: &ListMode,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<FileEntry>> {
        let mut seen: HashSet<Path> = HashSet::new();
        let mut out = Vec::new();

        let upper_entries = match self.upper.entries(p, mode, cancel).await {
            Ok(v) => v,
            Err(FsError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        for entry in upper_entries {
            seen.insert(entry.path().clone());
            out.push(entry);
        }

        let lower_entries = match self.lower.entries(p, mode, cancel).await {
            Ok(v) => v,
            Err(FsError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        for entry in lower_entries {
            if seen.contains(entry.path()) {
                continue;
            }
            if matches!(self.upper.file_stat(entry.path(), cancel).await?, FileStatus::Deleted) {
                continue;
            }
            out.push(entry);
        }

        if out.is_empty()
            && !self.upper.dir_exists(p, cancel).await?
            && !self.lower.dir_exists(p, cancel).await?
        {
            return Err(FsError::NotFound(p.to_string()));
        }
        Ok(out)
    }

    /// Composes recursively: the lower side keeps its own read-only policy
    /// (it is never written to directly through an overlay), while the
    /// upper side honors the caller's requested `mode`.
    async fn at(&self, p: &Path, mode: AtMode, cancel: &CancellationToken) -> FsResult<Arc<dyn FileSystem>> {
        let upper_sub = self.upper.at(p, mode, cancel).await?;
        let lower_sub = self.lower.at(p, AtMode::Inherit, cancel).await?;
        Ok(OverlayFileSystem::new(lower_sub, upper_sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryFileSystem;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn reads_fall_through_to_lower() {
        let lower = MemoryFileSystem::new();
        let upper = MemoryFileSystem::new();
        let t = token();
        let p = Path::new("/f.txt").unwrap();
        let mut created = lower.create_file(&p, &t).await.unwrap();
        created.stream().unwrap().write(b"base", &t).await.unwrap();

        let overlay = OverlayFileSystem::new(lower, upper);
        let mut opened = overlay.open_file_read(&p, &t).await.unwrap().unwrap();
        let mut buf = [0u8; 4];
        opened.stream().unwrap().read(&mut buf, &t).await.unwrap();
        assert_eq!(&buf, b"base");
    }

    #[tokio::test]
    async fn upper_tombstone_shadows_lower() {
        let lower = MemoryFileSystem::new();
        let upper = MemoryFileSystem::new();
        let t = token();
        let p = Path::new("/f.txt").unwrap();
        lower.create_file(&p, &t).await.unwrap();

        let overlay = OverlayFileSystem::new(lower, upper.clone());
        // Tombstone the path on upper directly (deleting a file that only
        // exists on lower still records a tombstone on upper).
        upper.delete_file(&p, &t).await.unwrap();

        assert_eq!(overlay.file_stat(&p, &t).await.unwrap(), FileStatus::Deleted);
        assert!(overlay.open_file_read(&p, &t).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn copy_up_does_not_mutate_lower() {
        let lower = MemoryFileSystem::new();
        let upper = MemoryFileSystem::new();
        let t = token();
        let p = Path::new("/f.txt").unwrap();
        let mut created = lower.create_file(&p, &t).await.unwrap();
        created.stream().unwrap().write(b"base", &t).await.unwrap();

        let overlay = OverlayFileSystem::new(lower.clone(), upper.clone());
        let mut rw = overlay.open_file_read_write(&p, &t).await.unwrap();
        let mut buf = [0u8; 4];
        rw.stream().unwrap().read(&mut buf, &t).await.unwrap();
        assert_eq!(&buf, b"base");
        rw.stream().unwrap().write(b"!!!!", &t).await.unwrap();

        assert!(upper.file_exists(&p, &t).await.unwrap());
        let mut lower_read = lower.open_file_read(&p, &t).await.unwrap().unwrap();
        let mut lower_buf = [0u8; 4];
        lower_read.stream().unwrap().read(&mut lower_buf, &t).await.unwrap();
        assert_eq!(&lower_buf, b"base");
    }

    #[tokio::test]
    async fn listing_merges_both_layers() {
        let lower = MemoryFileSystem::new();
        let upper = MemoryFileSystem::new();
        let t = token();
        lower.create_file(&Path::new("/a.txt").unwrap(), &t).await.unwrap();
        upper.create_file(&Path::new("/b.txt").unwrap(), &t).await.unwrap();

        let overlay = OverlayFileSystem::new(lower, upper);
        let entries = overlay
            .entries(&Path::root(), &ListMode::Shallow("*".into()), &t)
            .await
            .unwrap();
        let paths: Vec<String> = entries.iter().map(|e| e.path().to_string()).collect();
        assert!(paths.contains(&"/a.txt".to_string()));
        assert!(paths.contains(&"/b.txt".to_string()));
    }
}
