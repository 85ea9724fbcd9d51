// Tagged handles and auxiliary enums shared by every `FileSystem` impl.

use std::sync::Arc;

use crate::path::Path;
use crate::stream::Stream;
use crate::FileSystem;

/// A handle returned by a `FileSystem` operation.
///
/// Directory and plain-reference variants carry no open stream; the three
/// opened variants own a stream for the lifetime of the handle, and the
/// stream's capability flags match the variant name.
pub enum FileEntry {
    /// A directory, addressable for further operations against the same FS.
    Directory(Path, Arc<dyn FileSystem>),
    /// A file reference with no open stream (as returned by `entries`).
    FileRef(Path, Arc<dyn FileSystem>),
    /// An opened file with a read-only stream.
    FileRO(Path, Arc<dyn FileSystem>, Box<dyn Stream>),
    /// An opened file with a write-only stream.
    FileWO(Path, Arc<dyn FileSystem>, Box<dyn Stream>),
    /// An opened file with a read-write stream.
    FileRW(Path, Arc<dyn FileSystem>, Box<dyn Stream>),
}

impl FileEntry {
    /// The path this entry addresses, regardless of variant.
    pub fn path(&self) -> &Path {
        match self {
            FileEntry::Directory(p, _)
            | FileEntry::FileRef(p, _)
            | FileEntry::FileRO(p, _, _)
            | FileEntry::FileWO(p, _, _)
            | FileEntry::FileRW(p, _, _) => p,
        }
    }

    /// True for the `Directory` variant.
    pub fn is_directory(&self) -> bool {
        matches!(self, FileEntry::Directory(_, _))
    }

    /// Borrows the open stream, if this entry owns one.
    pub fn stream(&mut self) -> Option<&mut Box<dyn Stream>> {
        match self {
            FileEntry::FileRO(_, _, s) | FileEntry::FileWO(_, _, s) | FileEntry::FileRW(_, _, s) => {
                Some(s)
            }
            FileEntry::Directory(_, _) | FileEntry::FileRef(_, _) => None,
        }
    }
}

/// Filter mode for `FileSystem::entries`.
#[derive(Debug, Clone)]
pub enum ListMode {
    /// Direct children of the queried directory only.
    Shallow(String),
    /// Full depth-first traversal below the queried directory.
    Recursive(String),
}

impl ListMode {
    /// The glob filter pattern carried by either variant.
    pub fn filter(&self) -> &str {
        match self {
            ListMode::Shallow(f) | ListMode::Recursive(f) => f,
        }
    }

    /// True for `Recursive`.
    pub fn is_recursive(&self) -> bool {
        matches!(self, ListMode::Recursive(_))
    }
}

/// Existence state of a path, distinguishing "never existed" from
/// "existed and was removed" where a backend can tell the difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Exists,
    NotFound,
    Deleted,
}

/// Governs the read-only policy of the `FileSystem` returned by `at()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AtMode {
    /// Keep the parent's current read-only flag.
    #[default]
    Inherit,
    /// Force the sub-FS read-only regardless of the parent.
    ReadOnly,
    /// Request a writable sub-FS; fails with `FsError::ReadOnly` if the
    /// parent is itself read-only.
    ReadWrite,
}
