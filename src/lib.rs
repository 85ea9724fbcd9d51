// driftfs - Virtual File System
//
// An async, capability-typed file system abstraction over memory, disk,
// S3-compatible object storage, overlay composition, and path-prefix
// mounting. Every backend implements the same `FileSystem` trait, so
// callers can mix and layer storage mediums without caring which one
// they're actually talking to.

pub mod backend;
pub mod entry;
pub mod error;
pub mod fs;
pub mod glob;
pub mod http_types;
pub mod mime;
pub mod path;
pub mod stream;

pub use backend::{
    MemoryFileSystem, MountFileSystem, ObjectListing, ObjectStoreClient, ObjectStoreFileSystem,
    OverlayFileSystem, RealFileSystem, S3Client,
};
pub use entry::{AtMode, FileEntry, FileStatus, ListMode};
pub use error::{Cancelled, FsError, FsResult};
pub use fs::FileSystem;
pub use glob::Glob;
pub use http_types::Permission;
pub use path::Path;
pub use stream::{
    CopyOnWriteStream, CowFactory, FunctionalStream, MemoryStream, ReadOnlyStream, RealFileStream,
    Stream, StreamExt, WriteLimitedStream, WriteOnlyStream,
};
