// Error taxonomy for the virtual file system.
//
// All fallible operations in this crate return `FsResult<T>`. Backend-native
// errors (std::io, object-store client errors) are wrapped into `Backend` at
// the point they cross into this crate's contract; existence-shaped queries
// swallow them into `false`/`None` instead (see each backend's docs).

use std::fmt;

/// Result alias used throughout the crate.
pub type FsResult<T> = Result<T, FsError>;

/// The error taxonomy for path validation, access control, and backend I/O.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    /// The path string passed to [`crate::path::Path::new`] was empty.
    #[error("path is empty")]
    PathEmpty,

    /// The path contains a character outside the allowed set.
    #[error("path contains invalid characters: {0:?}")]
    PathInvalidChars(String),

    /// The path contains a `.` or `..` segment.
    #[error("path contains dotted segments: {0:?}")]
    PathDottedSegments(String),

    /// The path is otherwise malformed (not absolute, failed rebase, etc).
    #[error("path is invalid: {0}")]
    PathInvalid(String),

    /// A required directory or file is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A mutating operation was attempted against a read-only filesystem.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// A resolved real-disk path escaped the backend's configured root.
    #[error("path escapes backend root: {0}")]
    Forbidden(String),

    /// An operation is incompatible with the stream adapter it was invoked on.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// The operation's cancellation token fired before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// A wrapped error from the underlying storage medium (disk I/O, object
    /// store client).
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FsError {
    /// Wraps an arbitrary backend-native error as [`FsError::Backend`].
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FsError::Backend(Box::new(err))
    }

    /// True if this error is [`FsError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FsError::Cancelled)
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(err.to_string()),
            _ => FsError::backend(err),
        }
    }
}

/// Marker type distinguishing a caller-initiated cancellation from other
/// control flow. Kept separate from [`FsError`] so call sites that care can
/// match on it explicitly before falling back to generic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

impl From<Cancelled> for FsError {
    fn from(_: Cancelled) -> Self {
        FsError::Cancelled
    }
}
