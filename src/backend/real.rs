// Thin async mapping to the host file system, confined to a configured
// root. Every resolved path is checked against that root before being
// trusted, following the canonicalize-then-prefix-check pattern used
// throughout this crate's disk-facing code.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entry::{AtMode, FileEntry, FileStatus, ListMode};
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::glob::Glob;
use crate::path::Path;
use crate::stream::{RealFileStream, Stream};

/// A virtual file system backed by a directory on the host disk.
pub struct RealFileSystem {
    root: PathBuf,
    read_only: bool,
    self_ref: Weak<RealFileSystem>,
}

impl RealFileSystem {
    /// Opens `root` as a backend root. Canonicalizes the path and verifies
    /// it exists and is a directory.
    pub async fn new(root: impl AsRef<std::path::Path>, read_only: bool) -> FsResult<Arc<RealFileSystem>> {
        let root = tokio::fs::canonicalize(root.as_ref())
            .await
            .map_err(FsError::from)?;
        let metadata = tokio::fs::metadata(&root).await.map_err(FsError::from)?;
        if !metadata.is_dir() {
            return Err(FsError::PathInvalid(format!("{root:?} is not a directory")));
        }
        debug!(root = ?root, "real: backend opened");
        Ok(Arc::new_cyclic(|weak| RealFileSystem {
            root,
            read_only,
            self_ref: weak.clone(),
        }))
    }

    fn handle(&self) -> Arc<dyn FileSystem> {
        self.self_ref
            .upgrade()
            .expect("RealFileSystem outlives its own handle")
    }

    /// Validates that `full` resolves within `self.root`, called before any
    /// disk mutation or open so a confinement failure prevents the call
    /// rather than merely reporting it afterward. `full` need not exist:
    /// this walks up to the deepest existing ancestor and canonicalizes
    /// that, the same way the teacher's `validate_path` handles a
    /// not-yet-created target by validating its parent.
    async fn check_confined(&self, full: &PathBuf) -> FsResult<()> {
        let mut probe = full.clone();
        loop {
            match tokio::fs::canonicalize(&probe).await {
                Ok(canonical) => {
                    if !canonical.starts_with(&self.root) {
                        warn!(path = ?full, root = ?self.root, "real: path escapes backend root");
                        return Err(FsError::Forbidden(full.display().to_string()));
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if !probe.pop() {
                        return Err(FsError::PathInvalid(full.display().to_string()));
                    }
                }
                Err(e) => return Err(FsError::from(e)),
            }
        }
    }

    async fn collect_entries(
        &self,
        base: &Path,
        glob: &Glob,
        recursive: bool,
        out: &mut Vec<FileEntry>,
    ) -> FsResult<()> {
        let full = base.full_path(&self.root);
        let mut read_dir = tokio::fs::read_dir(&full).await.map_err(FsError::from)?;
        while let Some(entry) = read_dir.next_entry().await.map_err(FsError::from)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await.map_err(FsError::from)?;
            let child_path = base.append(&name)?;
            let matched = glob.is_match(&name);
            if file_type.is_dir() {
                if matched {
                    out.push(FileEntry::Directory(child_path.clone(), self.handle()));
                }
                if recursive {
                    Box::pin(self.collect_entries(&child_path, glob, recursive, out)).await?;
                }
            } else if matched {
                out.push(FileEntry::FileRef(child_path, self.handle()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for RealFileSystem {
    fn read_only(&self) -> bool {
        self.read_only
    }

    async fn file_exists(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<bool> {
        let full = p.full_path(&self.root);
        match tokio::fs::metadata(&full).await {
            Ok(m) => Ok(m.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FsError::from(e)),
        }
    }

    async fn dir_exists(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<bool> {
        let full = p.full_path(&self.root);
        match tokio::fs::metadata(&full).await {
            Ok(m) => Ok(m.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FsError::from(e)),
        }
    }

    /// The real backend has no tombstone bookkeeping, so a missing path is
    /// always `NotFound`, never `Deleted`.
    async fn file_stat(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileStatus> {
        Ok(if self.file_exists(p, cancel).await? {
            FileStatus::Exists
        } else {
            FileStatus::NotFound
        })
    }

    async fn create_file(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<FileEntry> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if p.is_root() {
            return Err(FsError::PathInvalid("cannot create a file at the root".into()));
        }
        let full = p.full_path(&self.root);
        self.check_confined(&full).await?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(FsError::from)?;
        }
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)
            .await
            .map_err(FsError::from)?;
        debug!(path = %p, "real: created file");
        let stream = RealFileStream::new(file, 0, true, true);
        Ok(FileEntry::FileRW(p.clone(), self.handle(), Box::new(stream)))
    }

    async fn create_directory(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<FileEntry> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let full = p.full_path(&self.root);
        self.check_confined(&full).await?;
        tokio::fs::create_dir_all(&full).await.map_err(FsError::from)?;
        Ok(FileEntry::Directory(p.clone(), self.handle()))
    }

    async fn open_file_read(
        &self,
        p: &Path,
        _cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>> {
        let full = p.full_path(&self.root);
        if !full.exists() {
            return Ok(None);
        }
        self.check_confined(&full).await?;
        let file = match tokio::fs::File::open(&full).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FsError::from(e)),
        };
        let meta = file.metadata().await.map_err(FsError::from)?;
        let stream = RealFileStream::new(file, meta.len(), true, false);
        Ok(Some(FileEntry::FileRO(p.clone(), self.handle(), Box::new(stream))))
    }

    /// Missing-file policy: returns `None` rather than creating (see the
    /// Open Question decision: diverges from Memory, which auto-creates).
    async fn open_file_write(
        &self,
        p: &Path,
        _cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let full = p.full_path(&self.root);
        if !full.exists() {
            return Ok(None);
        }
        self.check_confined(&full).await?;
        let file = match tokio::fs::OpenOptions::new().write(true).open(&full).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FsError::from(e)),
        };
        let meta = file.metadata().await.map_err(FsError::from)?;
        let stream = RealFileStream::new(file, meta.len(), false, true);
        Ok(Some(FileEntry::FileWO(p.clone(), self.handle(), Box::new(stream))))
    }

    async fn open_file_read_write(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<FileEntry> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let full = p.full_path(&self.root);
        self.check_confined(&full).await?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(FsError::from)?;
        }
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&full)
            .await
            .map_err(FsError::from)?;
        let meta = file.metadata().await.map_err(FsError::from)?;
        let stream = RealFileStream::new(file, meta.len(), true, true);
        Ok(FileEntry::FileRW(p.clone(), self.handle(), Box::new(stream)))
    }

    async fn delete_file(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<bool> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let full = p.full_path(&self.root);
        if !full.exists() {
            return Ok(false);
        }
        self.check_confined(&full).await?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FsError::from(e)),
        }
    }

    async fn delete_directory(
        &self,
        p: &Path,
        recursive: bool,
        _cancel: &CancellationToken,
    ) -> FsResult<bool> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let full = p.full_path(&self.root);
        if !full.exists() {
            return Ok(false);
        }
        self.check_confined(&full).await?;
        let result = if recursive {
            tokio::fs::remove_dir_all(&full).await
        } else {
            tokio::fs::remove_dir(&full).await
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FsError::from(e)),
        }
    }

    async fn integrate(
        &self,
        p: &Path,
        mut readable: Box<dyn Stream>,
        cancel: &CancellationToken,
    ) -> FsResult<FileEntry> {
        let entry = self.create_file(p, cancel).await?;
        let FileEntry::FileRW(path, fs, mut stream) = entry else {
            unreachable!("create_file always returns FileRW")
        };
        readable.copy_to(stream.as_mut(), cancel).await?;
        stream.flush(cancel).await?;
        Ok(FileEntry::FileRW(path, fs, stream))
    }

    async fn entries(
        &self,
        p: &Path,
        mode: &ListMode,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<FileEntry>> {
        if !self.dir_exists(p, cancel).await? {
            return Err(FsError::NotFound(p.to_string()));
        }
        let glob = Glob::compile(mode.filter());
        let mut out = Vec::new();
        self.collect_entries(p, &glob, mode.is_recursive(), &mut out).await?;
        Ok(out)
    }

    async fn at(&self, p: &Path, mode: AtMode, _cancel: &CancellationToken) -> FsResult<Arc<dyn FileSystem>> {
        let new_read_only = match mode {
            AtMode::Inherit => self.read_only,
            AtMode::ReadOnly => true,
            AtMode::ReadWrite => {
                if self.read_only {
                    return Err(FsError::ReadOnly);
                }
                false
            }
        };
        let full = p.full_path(&self.root);
        let canonical = tokio::fs::canonicalize(&full).await.map_err(FsError::from)?;
        if !canonical.starts_with(&self.root) {
            return Err(FsError::Forbidden(p.to_string()));
        }
        let arc: Arc<RealFileSystem> = Arc::new_cyclic(|weak| RealFileSystem {
            root: canonical,
            read_only: new_read_only,
            self_ref: weak.clone(),
        });
        Ok(arc)
    }
}
