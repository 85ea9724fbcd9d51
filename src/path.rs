// Validated absolute path values.
//
// A `Path` is always absolute, always uses `/` separators, and never
// contains `.` or `..` segments. Construction is the only place validation
// happens; every other operation works on the already-normalized string.

use std::fmt;
use std::path::{Path as StdPath, PathBuf};

use crate::error::{FsError, FsResult};

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\0'];

/// A validated, absolute, `/`-separated path.
///
/// Two `Path`s are equal iff their normalized string forms are equal, and
/// `Hash` agrees with that definition.
#[derive(Clone, Eq)]
pub struct Path {
    normalized: String,
}

impl Path {
    /// Validates and normalizes `s` into an absolute path.
    ///
    /// Backslashes are normalized to forward slashes before validation.
    /// Fails with [`FsError::PathEmpty`], [`FsError::PathInvalid`],
    /// [`FsError::PathDottedSegments`], or [`FsError::PathInvalidChars`].
    pub fn new(s: impl AsRef<str>) -> FsResult<Self> {
        let raw = s.as_ref();
        if raw.is_empty() {
            return Err(FsError::PathEmpty);
        }

        let slashed = raw.replace('\\', "/");

        if let Some(bad) = slashed.chars().find(|c| INVALID_CHARS.contains(c)) {
            return Err(FsError::PathInvalidChars(format!(
                "{slashed:?} contains {bad:?}"
            )));
        }

        if !slashed.starts_with('/') {
            return Err(FsError::PathInvalid(format!("{raw:?} is not absolute")));
        }

        let mut segments = Vec::new();
        for segment in slashed.split('/') {
            if segment.is_empty() {
                continue;
            }
            if segment == "." || segment == ".." {
                return Err(FsError::PathDottedSegments(raw.to_string()));
            }
            segments.push(segment);
        }

        let normalized = if segments.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", segments.join("/"))
        };

        Ok(Self { normalized })
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Self {
            normalized: "/".to_string(),
        }
    }

    /// The normalized absolute path string.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// True iff this path is the root.
    pub fn is_root(&self) -> bool {
        self.normalized == "/"
    }

    /// The path segments, excluding the leading empty component.
    pub fn segments(&self) -> Vec<&str> {
        self.normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// The final segment's extension (without the leading dot), if any.
    pub fn extension(&self) -> Option<&str> {
        self.filename().and_then(|name| {
            let dot = name.rfind('.')?;
            if dot == 0 {
                None
            } else {
                Some(&name[dot + 1..])
            }
        })
    }

    /// The final path segment, or `None` for the root.
    pub fn filename(&self) -> Option<&str> {
        self.segments().last().copied()
    }

    /// The final path segment with its extension stripped, or `None` for the
    /// root.
    pub fn filename_stem(&self) -> Option<&str> {
        let name = self.filename()?;
        match name.rfind('.') {
            Some(0) | None => Some(name),
            Some(dot) => Some(&name[..dot]),
        }
    }

    /// The parent directory, or the root if this path is already the root.
    pub fn parent(&self) -> Path {
        let mut segments = self.segments();
        segments.pop();
        if segments.is_empty() {
            Path::root()
        } else {
            Path {
                normalized: format!("/{}", segments.join("/")),
            }
        }
    }

    /// Appends a single segment to this path.
    ///
    /// Fails if `segment` contains a `/` or any disallowed character.
    pub fn append(&self, segment: impl AsRef<str>) -> FsResult<Path> {
        let segment = segment.as_ref();
        if segment.is_empty() {
            return Err(FsError::PathInvalid("empty path segment".to_string()));
        }
        if segment.contains('/') || segment.contains('\\') {
            return Err(FsError::PathInvalidChars(format!(
                "segment {segment:?} contains a separator"
            )));
        }
        if segment == "." || segment == ".." {
            return Err(FsError::PathDottedSegments(segment.to_string()));
        }
        if let Some(bad) = segment.chars().find(|c| INVALID_CHARS.contains(c)) {
            return Err(FsError::PathInvalidChars(format!(
                "segment {segment:?} contains {bad:?}"
            )));
        }

        let normalized = if self.is_root() {
            format!("/{segment}")
        } else {
            format!("{}/{segment}", self.normalized)
        };

        Ok(Path { normalized })
    }

    /// Strict ancestor test: true iff `d` is a proper ancestor directory of
    /// `self` (walking up to the root). The root is an ancestor of every
    /// non-root path; a path is never its own ancestor.
    pub fn in_directory(&self, d: &Path) -> bool {
        if self == d {
            return false;
        }
        if d.is_root() {
            return !self.is_root();
        }
        let prefix = &d.normalized;
        self.normalized.starts_with(prefix.as_str())
            && self.normalized[prefix.len()..].starts_with('/')
    }

    /// Replaces the `old` prefix of this path with `new`.
    ///
    /// Fails with [`FsError::PathInvalid`] if this path is not `old` itself
    /// and is not strictly under it.
    pub fn rebase(&self, old: &Path, new: &Path) -> FsResult<Path> {
        if self == old {
            return Ok(new.clone());
        }
        if !self.in_directory(old) {
            return Err(FsError::PathInvalid(format!(
                "{self} is not under {old}"
            )));
        }
        let suffix = &self.normalized[old.normalized.len()..];
        let suffix = suffix.strip_prefix('/').unwrap_or(suffix);
        new.append_path(suffix)
    }

    /// Appends a `/`-joined relative path (possibly multiple segments) to
    /// this path. Each segment is validated the same way [`Path::append`]
    /// validates a single one.
    pub fn append_path(&self, rel: &str) -> FsResult<Path> {
        let mut current = self.clone();
        for segment in rel.split('/').filter(|s| !s.is_empty()) {
            current = current.append(segment)?;
        }
        Ok(current)
    }

    /// Joins this path under a host filesystem root, yielding a native
    /// `PathBuf`.
    pub fn full_path(&self, root: &StdPath) -> PathBuf {
        let mut buf = root.to_path_buf();
        for segment in self.segments() {
            buf.push(segment);
        }
        buf
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl std::hash::Hash for Path {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({:?})", self.normalized)
    }
}

impl std::str::FromStr for Path {
    type Err = FsError;

    fn from_str(s: &str) -> FsResult<Self> {
        Path::new(s)
    }
}
