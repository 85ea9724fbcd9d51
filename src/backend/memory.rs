// In-memory directory tree with tombstone bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::entry::{AtMode, FileEntry, FileStatus, ListMode};
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::glob::Glob;
use crate::path::Path;
use crate::stream::{MemoryStream, Stream, StreamExt};

struct FileNode {
    stream: MemoryStream,
}

enum Node {
    Directory(Arc<Mutex<DirectoryNode>>),
    File(Arc<Mutex<FileNode>>),
}

struct DirectoryNode {
    read_only: bool,
    children: HashMap<String, Node>,
}

/// An in-memory virtual file system.
///
/// `at()` produces a new handle sharing the same underlying tree and
/// tombstone set, rooted at a different directory node — mutations made
/// through one handle are visible through any other handle over the same
/// subtree.
pub struct MemoryFileSystem {
    root: Arc<Mutex<DirectoryNode>>,
    base_path: Path,
    tombstones: Arc<Mutex<HashSet<Path>>>,
    read_only: bool,
    self_ref: Weak<MemoryFileSystem>,
}

impl MemoryFileSystem {
    /// A new, empty, writable tree.
    pub fn new() -> Arc<MemoryFileSystem> {
        Self::new_with(false)
    }

    /// A new, empty, read-only tree.
    pub fn new_read_only() -> Arc<MemoryFileSystem> {
        Self::new_with(true)
    }

    fn new_with(read_only: bool) -> Arc<MemoryFileSystem> {
        Arc::new_cyclic(|weak| MemoryFileSystem {
            root: Arc::new(Mutex::new(DirectoryNode {
                read_only,
                children: HashMap::new(),
            })),
            base_path: Path::root(),
            tombstones: Arc::new(Mutex::new(HashSet::new())),
            read_only,
            self_ref: weak.clone(),
        })
    }

    fn handle(&self) -> Arc<dyn FileSystem> {
        self.self_ref
            .upgrade()
            .expect("MemoryFileSystem outlives its own handle")
    }

    /// Translates a path in this FS's own namespace to its absolute path in
    /// the underlying tree, so tombstones recorded by different `at()`
    /// handles refer to the same location.
    fn absolute(&self, p: &Path) -> FsResult<Path> {
        p.rebase(&Path::root(), &self.base_path)
    }

    async fn walk_dir(&self, p: &Path, create_missing: bool) -> FsResult<Arc<Mutex<DirectoryNode>>> {
        let mut current = Arc::clone(&self.root);
        for seg in p.segments() {
            let next = {
                let mut guard = current.lock().await;
                match guard.children.get(seg) {
                    Some(Node::Directory(d)) => Arc::clone(d),
                    Some(Node::File(_)) => {
                        return Err(FsError::PathInvalid(format!(
                            "{seg} is a file, not a directory"
                        )));
                    }
                    None => {
                        if !create_missing {
                            return Err(FsError::NotFound(p.to_string()));
                        }
                        if guard.read_only {
                            return Err(FsError::ReadOnly);
                        }
                        let child = Arc::new(Mutex::new(DirectoryNode {
                            read_only: guard.read_only,
                            children: HashMap::new(),
                        }));
                        guard.children.insert(seg.to_string(), Node::Directory(Arc::clone(&child)));
                        child
                    }
                }
            };
            current = next;
        }
        Ok(current)
    }

    async fn find_file_node(&self, p: &Path) -> FsResult<Option<Arc<Mutex<FileNode>>>> {
        if p.is_root() {
            return Ok(None);
        }
        let parent = match self.walk_dir(&p.parent(), false).await {
            Ok(d) => d,
            Err(FsError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let name = p.filename().expect("non-root path has a filename");
        let guard = parent.lock().await;
        match guard.children.get(name) {
            Some(Node::File(f)) => Ok(Some(Arc::clone(f))),
            _ => Ok(None),
        }
    }

    async fn dispose_subtree(
        &self,
        base: &Path,
        dir: Arc<Mutex<DirectoryNode>>,
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        let children: Vec<(String, Node)> = {
            let mut guard = dir.lock().await;
            guard.children.drain().collect()
        };
        for (name, node) in children {
            let child_path = base.append(&name)?;
            match node {
                Node::File(f) => {
                    let mut fguard = f.lock().await;
                    fguard.stream.dispose(cancel).await?;
                    let abs = self.absolute(&child_path)?;
                    self.tombstones.lock().await.insert(abs);
                }
                Node::Directory(d) => {
                    Box::pin(self.dispose_subtree(&child_path, d, cancel)).await?;
                }
            }
        }
        Ok(())
    }

    async fn collect_entries(
        &self,
        base: &Path,
        dir: &Arc<Mutex<DirectoryNode>>,
        glob: &Glob,
        recursive: bool,
        out: &mut Vec<FileEntry>,
    ) -> FsResult<()> {
        enum Kind {
            Directory(Arc<Mutex<DirectoryNode>>),
            File,
        }
        let snapshot: Vec<(String, Kind)> = {
            let guard = dir.lock().await;
            guard
                .children
                .iter()
                .map(|(name, node)| {
                    let kind = match node {
                        Node::Directory(d) => Kind::Directory(Arc::clone(d)),
                        Node::File(_) => Kind::File,
                    };
                    (name.clone(), kind)
                })
                .collect()
        };
        for (name, kind) in snapshot {
            let child_path = base.append(&name)?;
            let matched = glob.is_match(&name);
            match kind {
                Kind::Directory(d) => {
                    if matched {
                        out.push(FileEntry::Directory(child_path.clone(), self.handle()));
                    }
                    if recursive {
                        Box::pin(self.collect_entries(&child_path, &d, glob, recursive, out)).await?;
                    }
                }
                Kind::File => {
                    if matched {
                        out.push(FileEntry::FileRef(child_path, self.handle()));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    fn read_only(&self) -> bool {
        self.read_only
    }

    async fn file_exists(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<bool> {
        Ok(self.find_file_node(p).await?.is_some())
    }

    async fn dir_exists(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<bool> {
        match self.walk_dir(p, false).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) | Err(FsError::PathInvalid(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn file_stat(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileStatus> {
        if self.file_exists(p, cancel).await? {
            return Ok(FileStatus::Exists);
        }
        let abs = self.absolute(p)?;
        let tombstoned = self.tombstones.lock().await.contains(&abs);
        Ok(if tombstoned {
            FileStatus::Deleted
        } else {
            FileStatus::NotFound
        })
    }

    async fn create_file(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if p.is_root() {
            return Err(FsError::PathInvalid("cannot create a file at the root".into()));
        }
        let parent = self.walk_dir(&p.parent(), true).await?;
        let name = p.filename().expect("non-root path has a filename");
        let new_stream = MemoryStream::new_owned();
        let mirror = new_stream.mirror();
        {
            let mut guard = parent.lock().await;
            if let Some(Node::File(old)) = guard.children.get(name) {
                old.lock().await.stream.dispose(cancel).await?;
            }
            guard
                .children
                .insert(name.to_string(), Node::File(Arc::new(Mutex::new(FileNode { stream: new_stream }))));
        }
        let abs = self.absolute(p)?;
        self.tombstones.lock().await.remove(&abs);
        debug!(path = %p, "memory: created file");
        Ok(FileEntry::FileRW(p.clone(), self.handle(), Box::new(mirror)))
    }

    async fn create_directory(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<FileEntry> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if p.is_root() {
            return Ok(FileEntry::Directory(p.clone(), self.handle()));
        }
        self.walk_dir(p, true).await?;
        Ok(FileEntry::Directory(p.clone(), self.handle()))
    }

    async fn open_file_read(
        &self,
        p: &Path,
        _cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>> {
        let Some(node) = self.find_file_node(p).await? else {
            return Ok(None);
        };
        let guard = node.lock().await;
        let mirror = guard.stream.mirror_with(true, false);
        Ok(Some(FileEntry::FileRO(p.clone(), self.handle(), Box::new(mirror))))
    }

    /// Missing-file policy: creates an empty file and returns it write-only
    /// (see the Open Question decision: Memory diverges from ObjectStore and
    /// Real, which return `None` instead).
    async fn open_file_write(
        &self,
        p: &Path,
        cancel: &CancellationToken,
    ) -> FsResult<Option<FileEntry>> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if let Some(node) = self.find_file_node(p).await? {
            let guard = node.lock().await;
            let mirror = guard.stream.mirror_with(false, true);
            return Ok(Some(FileEntry::FileWO(p.clone(), self.handle(), Box::new(mirror))));
        }
        let created = self.create_file(p, cancel).await?;
        let FileEntry::FileRW(path, fs, stream) = created else {
            unreachable!("create_file always returns FileRW")
        };
        Ok(Some(FileEntry::FileWO(path, fs, stream.write_only())))
    }

    async fn open_file_read_write(&self, p: &Path, cancel: &CancellationToken) -> FsResult<FileEntry> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if let Some(node) = self.find_file_node(p).await? {
            let guard = node.lock().await;
            let mirror = guard.stream.mirror();
            return Ok(FileEntry::FileRW(p.clone(), self.handle(), Box::new(mirror)));
        }
        self.create_file(p, cancel).await
    }

    async fn delete_file(&self, p: &Path, cancel: &CancellationToken) -> FsResult<bool> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if p.is_root() {
            return Ok(false);
        }
        let abs = self.absolute(p)?;
        self.tombstones.lock().await.insert(abs);

        let parent = match self.walk_dir(&p.parent(), false).await {
            Ok(d) => d,
            Err(_) => return Ok(false),
        };
        let name = p.filename().expect("non-root path has a filename");
        let removed = {
            let mut guard = parent.lock().await;
            guard.children.remove(name)
        };
        match removed {
            Some(Node::File(node)) => {
                node.lock().await.stream.dispose(cancel).await?;
                debug!(path = %p, "memory: deleted file");
                Ok(true)
            }
            Some(other) => {
                // Not a file; put it back untouched.
                parent.lock().await.children.insert(name.to_string(), other);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete_directory(
        &self,
        p: &Path,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> FsResult<bool> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if p.is_root() {
            return Err(FsError::PathInvalid("cannot delete the root directory".into()));
        }
        let parent = match self.walk_dir(&p.parent(), false).await {
            Ok(d) => d,
            Err(_) => return Ok(false),
        };
        let name = p.filename().expect("non-root path has a filename");

        if !recursive {
            let guard = parent.lock().await;
            if let Some(Node::Directory(d)) = guard.children.get(name) {
                if !d.lock().await.children.is_empty() {
                    return Err(FsError::NotSupported("directory is not empty".into()));
                }
            }
        }

        let detached = {
            let mut guard = parent.lock().await;
            match guard.children.get(name) {
                Some(Node::Directory(_)) => guard.children.remove(name),
                _ => return Ok(false),
            }
        };
        match detached {
            Some(Node::Directory(dir)) => {
                self.dispose_subtree(p, dir, cancel).await?;
                debug!(path = %p, "memory: deleted directory");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn integrate(
        &self,
        p: &Path,
        mut readable: Box<dyn Stream>,
        cancel: &CancellationToken,
    ) -> FsResult<FileEntry> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if p.is_root() {
            return Err(FsError::PathInvalid("cannot integrate at the root".into()));
        }
        let parent = self.walk_dir(&p.parent(), true).await?;
        let name = p.filename().expect("non-root path has a filename");

        let mut target = MemoryStream::new_owned();
        readable.copy_to(&mut target, cancel).await?;
        target.seek_to_start();
        let mirror = target.mirror();

        {
            let mut guard = parent.lock().await;
            if let Some(Node::File(old)) = guard.children.get(name) {
                old.lock().await.stream.dispose(cancel).await?;
            }
            guard
                .children
                .insert(name.to_string(), Node::File(Arc::new(Mutex::new(FileNode { stream: target }))));
        }
        let abs = self.absolute(p)?;
        self.tombstones.lock().await.remove(&abs);
        Ok(FileEntry::FileRW(p.clone(), self.handle(), Box::new(mirror)))
    }

    async fn entries(
        &self,
        p: &Path,
        mode: &ListMode,
        _cancel: &CancellationToken,
    ) -> FsResult<Vec<FileEntry>> {
        let dir = self.walk_dir(p, false).await?;
        let glob = Glob::compile(mode.filter());
        let mut out = Vec::new();
        self.collect_entries(p, &dir, &glob, mode.is_recursive(), &mut out).await?;
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
        let dir = self.walk_dir(p, false).await?;
        let base_path = self.absolute(p)?;
        let arc: Arc<MemoryFileSystem> = Arc::new_cyclic(|weak| MemoryFileSystem {
            root: dir,
            base_path,
            tombstones: Arc::clone(&self.tombstones),
            read_only: new_read_only,
            self_ref: weak.clone(),
        });
        Ok(arc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn create_write_read_round_trip() {
        let fs = MemoryFileSystem::new();
        let t = token();
        let p = Path::new("/a/b.txt").unwrap();

        let mut created = fs.create_file(&p, &t).await.unwrap();
        created.stream().unwrap().write(b"hello", &t).await.unwrap();

        let mut opened = fs.open_file_read(&p, &t).await.unwrap().unwrap();
        let mut buf = [0u8; 5];
        opened.stream().unwrap().read(&mut buf, &t).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn delete_then_stat_is_deleted() {
        let fs = MemoryFileSystem::new();
        let t = token();
        let p = Path::new("/f.txt").unwrap();
        fs.create_file(&p, &t).await.unwrap();

        assert!(fs.delete_file(&p, &t).await.unwrap());
        assert!(!fs.file_exists(&p, &t).await.unwrap());
        assert_eq!(fs.file_stat(&p, &t).await.unwrap(), FileStatus::Deleted);

        assert!(!fs.delete_file(&p, &t).await.unwrap());
    }

    #[tokio::test]
    async fn create_directory_rejects_under_read_only() {
        let fs = MemoryFileSystem::new_read_only();
        let t = token();
        let p = Path::new("/a").unwrap();
        assert!(matches!(fs.create_directory(&p, &t).await, Err(FsError::ReadOnly)));
    }

    #[tokio::test]
    async fn shallow_listing_applies_glob_filter() {
        let fs = MemoryFileSystem::new();
        let t = token();
        fs.create_file(&Path::new("/a.txt").unwrap(), &t).await.unwrap();
        fs.create_file(&Path::new("/b.md").unwrap(), &t).await.unwrap();
        fs.create_directory(&Path::new("/sub").unwrap(), &t).await.unwrap();

        let entries = fs
            .entries(&Path::root(), &ListMode::Shallow("*.txt".into()), &t)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path().to_string(), "/a.txt");
    }

    #[tokio::test]
    async fn recursive_listing_descends() {
        let fs = MemoryFileSystem::new();
        let t = token();
        fs.create_file(&Path::new("/sub/deep.txt").unwrap(), &t).await.unwrap();

        let entries = fs
            .entries(&Path::root(), &ListMode::Recursive("*".into()), &t)
            .await
            .unwrap();
        let paths: Vec<String> = entries.iter().map(|e| e.path().to_string()).collect();
        assert!(paths.contains(&"/sub".to_string()));
        assert!(paths.contains(&"/sub/deep.txt".to_string()));
    }

    #[tokio::test]
    async fn at_shares_tree_and_tombstones() {
        let fs = MemoryFileSystem::new();
        let t = token();
        fs.create_directory(&Path::new("/sub").unwrap(), &t).await.unwrap();
        let sub = fs.at(&Path::new("/sub").unwrap(), AtMode::Inherit, &t).await.unwrap();

        sub.create_file(&Path::new("/x.txt").unwrap(), &t).await.unwrap();
        assert!(fs.file_exists(&Path::new("/sub/x.txt").unwrap(), &t).await.unwrap());

        sub.delete_file(&Path::new("/x.txt").unwrap(), &t).await.unwrap();
        assert_eq!(
            fs.file_stat(&Path::new("/sub/x.txt").unwrap(), &t).await.unwrap(),
            FileStatus::Deleted
        );
    }

    #[tokio::test]
    async fn at_read_write_on_read_only_source_fails() {
        let fs = MemoryFileSystem::new_read_only();
        let t = token();
        let err = fs.at(&Path::root(), AtMode::ReadWrite, &t).await.unwrap_err();
        assert!(matches!(err, FsError::ReadOnly));
    }
}
