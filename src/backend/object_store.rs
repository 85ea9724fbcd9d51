// S3-compatible object storage backend, with directories and in-flight
// writes simulated in memory over a key-value object store.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::entry::{AtMode, FileEntry, FileStatus, ListMode};
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::glob::Glob;
use crate::mime::content_type_for_extension;
use crate::path::Path;
use crate::stream::{FunctionalStream, MemoryStream, Stream, StreamExt};

/// A single object returned by [`ObjectStoreClient::list_objects`].
#[derive(Debug, Clone)]
pub struct ObjectListing {
    pub key: String,
    pub size: u64,
}

/// The object-store operations [`ObjectStoreFileSystem`] needs. Implemented
/// by [`S3Client`] against a real bucket, and by a mock in tests.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> FsResult<bool>;
    async fn make_bucket(&self, bucket: &str) -> FsResult<()>;
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> FsResult<()>;
    async fn get_object(&self, bucket: &str, key: &str) -> FsResult<Option<Vec<u8>>>;
    async fn stat_object(&self, bucket: &str, key: &str) -> FsResult<Option<u64>>;
    async fn remove_object(&self, bucket: &str, key: &str) -> FsResult<()>;
    async fn list_objects(&self, bucket: &str, prefix: &str, recursive: bool) -> FsResult<Vec<ObjectListing>>;
}

/// [`ObjectStoreClient`] backed by a real bucket via `aws-sdk-s3`.
pub struct S3Client {
    client: aws_sdk_s3::Client,
}

impl S3Client {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStoreClient for S3Client {
    async fn bucket_exists(&self, bucket: &str) -> FsResult<bool> {
        // head_bucket's error variants don't cleanly distinguish "missing"
        // from "forbidden" without matching on the service error body, so
        // any failure here is treated as "does not exist" — make_bucket is
        // then attempted, and a genuine permissions problem surfaces there.
        Ok(self.client.head_bucket().bucket(bucket).send().await.is_ok())
    }

    async fn make_bucket(&self, bucket: &str) -> FsResult<()> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(FsError::backend)?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> FsResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(FsError::backend)?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> FsResult<Option<Vec<u8>>> {
        match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => {
                let bytes = output.body.collect().await.map_err(FsError::backend)?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(_) => Ok(None),
        }
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> FsResult<Option<u64>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(Some(output.content_length().unwrap_or(0) as u64)),
            Err(_) => Ok(None),
        }
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> FsResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(FsError::backend)?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str, recursive: bool) -> FsResult<Vec<ObjectListing>> {
        let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
        if !recursive {
            req = req.delimiter("/");
        }
        let output = req.send().await.map_err(FsError::backend)?;
        Ok(output
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key()
                    .map(|key| ObjectListing { key: key.to_string(), size: obj.size().unwrap_or(0) as u64 })
            })
            .collect())
    }
}

/// A write-through stream over a [`MemoryStream`] buffer: reads and writes
/// hit the buffer directly, and `flush` uploads the buffer's current
/// contents as a single object.
struct ObjectStoreStream {
    buffer: MemoryStream,
    client: Arc<dyn ObjectStoreClient>,
    bucket: String,
    key: String,
    content_type: String,
    files: Arc<Mutex<HashSet<Path>>>,
    tracked_path: Path,
}

#[async_trait]
impl Stream for ObjectStoreStream {
    fn readable(&self) -> bool {
        self.buffer.readable()
    }

    fn writable(&self) -> bool {
        self.buffer.writable()
    }

    fn owned(&self) -> bool {
        true
    }

    fn length(&self) -> u64 {
        self.buffer.length()
    }

    fn position(&self) -> u64 {
        self.buffer.position()
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> FsResult<usize> {
        self.buffer.read(buf, cancel).await
    }

    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> FsResult<usize> {
        self.buffer.write(buf, cancel).await
    }

    async fn set_length(&mut self, len: u64, cancel: &CancellationToken) -> FsResult<()> {
        self.buffer.set_length(len, cancel).await
    }

    async fn seek(&mut self, pos: u64, cancel: &CancellationToken) -> FsResult<()> {
        self.buffer.seek(pos, cancel).await
    }

    async fn flush(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let bytes = self.buffer.snapshot().await;
        self.client
            .put_object(&self.bucket, &self.key, bytes, &self.content_type)
            .await?;
        self.files.lock().await.remove(&self.tracked_path);
        Ok(())
    }

    async fn dispose(&mut self, cancel: &CancellationToken) -> FsResult<()> {
        self.buffer.dispose(cancel).await
    }
}

/// Wraps `bytes` in a read-only [`FunctionalStream`] that hands them out in
/// whatever chunk size the caller's buffer allows.
fn bytes_reader(bytes: Vec<u8>) -> Box<dyn Stream> {
    let len = bytes.len() as u64;
    let source = Arc::new(bytes);
    let offset = Arc::new(Mutex::new(0usize));
    let read_fn = Box::new(move |buf: &mut [u8]| {
        let source = Arc::clone(&source);
        let offset = Arc::clone(&offset);
        Box::pin(async move {
            let mut off = offset.lock().await;
            let remaining = &source[*off..];
            let n = std::cmp::min(buf.len(), remaining.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            *off += n;
            Ok(n)
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = FsResult<usize>> + Send>>
    });
    Box::new(FunctionalStream::reader(len, read_fn))
}

/// A virtual tree over an S3-compatible bucket under a key prefix.
///
/// Directories and in-progress writes have no object of their own, so two
/// sets — `directories` and `files` — track paths that exist only in
/// memory until an object backs them (a created-but-unflushed file) or
/// forever (an empty directory). These sets are shared by `Arc` across
/// every `at()`-derived sub-FS so a directory created through one handle
/// is visible through another.
pub struct ObjectStoreFileSystem {
    client: Arc<dyn ObjectStoreClient>,
    bucket: String,
    key_prefix: String,
    base_path: Path,
    directories: Arc<Mutex<HashSet<Path>>>,
    files: Arc<Mutex<HashSet<Path>>>,
    read_only: bool,
    bucket_ensured: Arc<Mutex<bool>>,
    self_ref: Weak<ObjectStoreFileSystem>,
}

impl ObjectStoreFileSystem {
    pub fn new(
        bucket: impl Into<String>,
        key_prefix: impl Into<String>,
        client: Arc<dyn ObjectStoreClient>,
        read_only: bool,
    ) -> Arc<ObjectStoreFileSystem> {
        Arc::new_cyclic(|weak| ObjectStoreFileSystem {
            client,
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
            base_path: Path::root(),
            directories: Arc::new(Mutex::new(HashSet::new())),
            files: Arc::new(Mutex::new(HashSet::new())),
            read_only,
            bucket_ensured: Arc::new(Mutex::new(false)),
            self_ref: weak.clone(),
        })
    }

    fn handle(&self) -> Arc<dyn FileSystem> {
        self.self_ref.upgrade().expect("ObjectStoreFileSystem outlives its own handle") as Arc<dyn FileSystem>
    }

    fn object_key(&self, p: &Path) -> String {
        let rel = p.segments().join("/");
        let prefix = self.key_prefix.trim_end_matches('/');
        match (prefix.is_empty(), rel.is_empty()) {
            (true, true) => String::new(),
            (true, false) => rel,
            (false, true) => prefix.to_string(),
            (false, false) => format!("{prefix}/{rel}"),
        }
    }

    fn absolute(&self, p: &Path) -> FsResult<Path> {
        p.rebase(&Path::root(), &self.base_path)
    }

    async fn ensure_bucket(&self) -> FsResult<()> {
        let mut ensured = self.bucket_ensured.lock().await;
        if *ensured {
            return Ok(());
        }
        if !self.client.bucket_exists(&self.bucket).await? {
            self.client.make_bucket(&self.bucket).await?;
        }
        *ensured = true;
        Ok(())
    }

    async fn write_through_entry(&self, p: &Path, buffer: MemoryStream) -> FsResult<FileEntry> {
        let abs = self.absolute(p)?;
        self.files.lock().await.insert(abs.clone());
        let content_type = content_type_for_extension(p.extension().unwrap_or("")).to_string();
        let stream = ObjectStoreStream {
            buffer,
            client: Arc::clone(&self.client),
            bucket: self.bucket.clone(),
            key: self.object_key(p),
            content_type,
            files: Arc::clone(&self.files),
            tracked_path: abs,
        };
        Ok(FileEntry::FileRW(p.clone(), self.handle(), Box::new(stream)))
    }
}

#[async_trait]
impl FileSystem for ObjectStoreFileSystem {
    fn read_only(&self) -> bool {
        self.read_only
    }

    async fn file_exists(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<bool> {
        let abs = self.absolute(p)?;
        if self.files.lock().await.contains(&abs) {
            return Ok(true);
        }
        let key = self.object_key(p);
        Ok(self.client.stat_object(&self.bucket, &key).await?.is_some())
    }

    async fn dir_exists(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<bool> {
        if p.is_root() {
            return Ok(true);
        }
        let abs = self.absolute(p)?;
        if self.directories.lock().await.contains(&abs) {
            return Ok(true);
        }
        let key = self.object_key(p);
        let listing = self.client.list_objects(&self.bucket, &format!("{key}/"), false).await?;
        Ok(!listing.is_empty())
    }

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
        self.ensure_bucket().await?;
        self.write_through_entry(p, MemoryStream::new_owned()).await
    }

    async fn create_directory(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<FileEntry> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.ensure_bucket().await?;
        let abs = self.absolute(p)?;
        debug!(path = %p, "object store: recorded simulated directory");
        self.directories.lock().await.insert(abs);
        Ok(FileEntry::Directory(p.clone(), self.handle()))
    }

    async fn open_file_read(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<Option<FileEntry>> {
        let key = self.object_key(p);
        match self.client.get_object(&self.bucket, &key).await? {
            Some(bytes) => Ok(Some(FileEntry::FileRO(p.clone(), self.handle(), bytes_reader(bytes)))),
            None => {
                let abs = self.absolute(p)?;
                if self.files.lock().await.contains(&abs) {
                    Ok(Some(FileEntry::FileRO(p.clone(), self.handle(), bytes_reader(Vec::new()))))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn open_file_write(&self, p: &Path, cancel: &CancellationToken) -> FsResult<Option<FileEntry>> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if !self.file_exists(p, cancel).await? {
            return Ok(None);
        }
        let rw = self.open_file_read_write(p, cancel).await?;
        let FileEntry::FileRW(path, fs, stream) = rw else {
            unreachable!("open_file_read_write always returns FileRW")
        };
        Ok(Some(FileEntry::FileWO(path, fs, stream.write_only())))
    }

    async fn open_file_read_write(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<FileEntry> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.ensure_bucket().await?;
        let key = self.object_key(p);
        let buffer = match self.client.get_object(&self.bucket, &key).await? {
            Some(bytes) => MemoryStream::from_bytes(bytes),
            None => MemoryStream::new_owned(),
        };
        self.write_through_entry(p, buffer).await
    }

    async fn delete_file(&self, p: &Path, _cancel: &CancellationToken) -> FsResult<bool> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let key = self.object_key(p);
        let existed = self.client.stat_object(&self.bucket, &key).await?.is_some();
        let abs = self.absolute(p)?;
        let was_building = self.files.lock().await.remove(&abs);
        if existed {
            self.client.remove_object(&self.bucket, &key).await?;
        }
        Ok(existed || was_building)
    }

    async fn delete_directory(&self, p: &Path, recursive: bool, cancel: &CancellationToken) -> FsResult<bool> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if !self.dir_exists(p, cancel).await? {
            return Ok(false);
        }
        let abs = self.absolute(p)?;
        let key_prefix = self.object_key(p);
        let listing = self.client.list_objects(&self.bucket, &format!("{key_prefix}/"), true).await?;
        if !recursive && !listing.is_empty() {
            return Err(FsError::NotSupported("directory is not empty".into()));
        }
        for obj in &listing {
            self.client.remove_object(&self.bucket, &obj.key).await?;
        }
        self.directories.lock().await.retain(|d| *d != abs && !d.in_directory(&abs));
        self.files.lock().await.retain(|f| *f != abs && !f.in_directory(&abs));
        Ok(true)
    }

    async fn integrate(&self, p: &Path, mut readable: Box<dyn Stream>, cancel: &CancellationToken) -> FsResult<FileEntry> {
        let entry = self.create_file(p, cancel).await?;
        let FileEntry::FileRW(path, fs, mut stream) = entry else {
            unreachable!("create_file always returns FileRW")
        };
        readable.copy_to(stream.as_mut(), cancel).await?;
        stream.flush(cancel).await?;
        Ok(FileEntry::FileRW(path, fs, stream))
    }

    async fn entries(&self, p: &Path, mode: &ListMode, cancel: &CancellationToken) -> FsResult<Vec<FileEntry>> {
        if !self.dir_exists(p, cancel).await? {
            return Err(FsError::NotFound(p.to_string()));
        }
        let glob = Glob::compile(mode.filter());
        let key_prefix = self.object_key(p);
        let search_prefix = if key_prefix.is_empty() { String::new() } else { format!("{key_prefix}/") };
        let listing = self.client.list_objects(&self.bucket, &search_prefix, true).await?;

        let mut seen_names: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        for obj in &listing {
            let rel = obj.key.strip_prefix(&search_prefix).unwrap_or(&obj.key);
            let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
            if segments.is_empty() {
                continue;
            }
            if !mode.is_recursive() {
                let name = segments[0];
                if !seen_names.insert(name.to_string()) {
                    continue;
                }
                if !glob.is_match(name) {
                    continue;
                }
                let child = p.append(name)?;
                if segments.len() == 1 {
                    out.push(FileEntry::FileRef(child, self.handle()));
                } else {
                    out.push(FileEntry::Directory(child, self.handle()));
                }
                continue;
            }
            let mut current = p.clone();
            for (i, seg) in segments.iter().enumerate() {
                current = current.append(*seg)?;
                let key = current.to_string();
                if !seen_names.insert(key) {
                    continue;
                }
                if !glob.is_match(seg) {
                    continue;
                }
                if i + 1 == segments.len() {
                    out.push(FileEntry::FileRef(current.clone(), self.handle()));
                } else {
                    out.push(FileEntry::Directory(current.clone(), self.handle()));
                }
            }
        }

        let abs_p = self.absolute(p)?;
        for d in self.directories.lock().await.iter() {
            if !d.in_directory(&abs_p) {
                continue;
            }
            if !mode.is_recursive() && d.parent() != abs_p {
                continue;
            }
            if let Some(name) = d.filename() {
                if glob.is_match(name) {
                    let local = d.rebase(&abs_p, p)?;
                    if seen_names.insert(local.to_string()) {
                        out.push(FileEntry::Directory(local, self.handle()));
                    }
                }
            }
        }
        for f in self.files.lock().await.iter() {
            if !f.in_directory(&abs_p) {
                continue;
            }
            if !mode.is_recursive() && f.parent() != abs_p {
                continue;
            }
            if let Some(name) = f.filename() {
                if glob.is_match(name) {
                    let local = f.rebase(&abs_p, p)?;
                    if seen_names.insert(local.to_string()) {
                        out.push(FileEntry::FileRef(local, self.handle()));
                    }
                }
            }
        }

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
        let new_prefix = self.object_key(p);
        let base_path = self.absolute(p)?;
        let arc: Arc<ObjectStoreFileSystem> = Arc::new_cyclic(|weak| ObjectStoreFileSystem {
            client: Arc::clone(&self.client),
            bucket: self.bucket.clone(),
            key_prefix: new_prefix,
            base_path,
            directories: Arc::clone(&self.directories),
            files: Arc::clone(&self.files),
            read_only: new_read_only,
            bucket_ensured: Arc::clone(&self.bucket_ensured),
            self_ref: weak.clone(),
        });
        Ok(arc)
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockObjectStoreClient;
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    fn fs() -> Arc<ObjectStoreFileSystem> {
        ObjectStoreFileSystem::new("bucket", "", Arc::new(MockObjectStoreClient::new()), false)
    }

    #[tokio::test]
    async fn write_flush_and_read_round_trips() {
        let fs = fs();
        let t = token();
        let p = Path::new("/a.txt").unwrap();

        let mut entry = fs.create_file(&p, &t).await.unwrap();
        assert!(fs.file_exists(&p, &t).await.unwrap());
        entry.stream().unwrap().write(b"payload", &t).await.unwrap();
        entry.stream().unwrap().flush(&t).await.unwrap();

        let mut opened = fs.open_file_read(&p, &t).await.unwrap().unwrap();
        let mut buf = [0u8; 7];
        opened.stream().unwrap().read(&mut buf, &t).await.unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[tokio::test]
    async fn unflushed_file_is_visible_but_empty_to_readers() {
        let fs = fs();
        let t = token();
        let p = Path::new("/building.txt").unwrap();
        let mut entry = fs.create_file(&p, &t).await.unwrap();
        entry.stream().unwrap().write(b"not flushed yet", &t).await.unwrap();

        assert!(fs.file_exists(&p, &t).await.unwrap());
        let mut opened = fs.open_file_read(&p, &t).await.unwrap().unwrap();
        assert_eq!(opened.stream().unwrap().length(), 0);
    }

    #[tokio::test]
    async fn delete_file_removes_object_and_building_entry() {
        let fs = fs();
        let t = token();
        let p = Path::new("/a.txt").unwrap();
        let mut entry = fs.create_file(&p, &t).await.unwrap();
        entry.stream().unwrap().write(b"x", &t).await.unwrap();
        entry.stream().unwrap().flush(&t).await.unwrap();

        assert!(fs.delete_file(&p, &t).await.unwrap());
        assert!(!fs.file_exists(&p, &t).await.unwrap());
        assert!(!fs.delete_file(&p, &t).await.unwrap());
    }

    #[tokio::test]
    async fn create_directory_is_simulated_until_listed() {
        let fs = fs();
        let t = token();
        let dir = Path::new("/empty").unwrap();
        fs.create_directory(&dir, &t).await.unwrap();
        assert!(fs.dir_exists(&dir, &t).await.unwrap());

        let entries = fs.entries(&Path::root(), &ListMode::Shallow("*".into()), &t).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_directory());
        assert_eq!(entries[0].path().to_string(), "/empty");
    }

    #[tokio::test]
    async fn listing_merges_flushed_objects_and_simulated_entries() {
        let fs = fs();
        let t = token();
        let mut a = fs.create_file(&Path::new("/a.txt").unwrap(), &t).await.unwrap();
        a.stream().unwrap().write(b"x", &t).await.unwrap();
        a.stream().unwrap().flush(&t).await.unwrap();
        fs.create_directory(&Path::new("/sub").unwrap(), &t).await.unwrap();

        let entries = fs.entries(&Path::root(), &ListMode::Shallow("*".into()), &t).await.unwrap();
        let paths: Vec<String> = entries.iter().map(|e| e.path().to_string()).collect();
        assert!(paths.contains(&"/a.txt".to_string()));
        assert!(paths.contains(&"/sub".to_string()));
    }

    #[tokio::test]
    async fn at_sub_path_shares_directory_state() {
        let fs = fs();
        let t = token();
        fs.create_directory(&Path::new("/sub").unwrap(), &t).await.unwrap();
        let sub = fs.at(&Path::new("/sub").unwrap(), AtMode::Inherit, &t).await.unwrap();

        let mut entry = sub.create_file(&Path::new("/nested.txt").unwrap(), &t).await.unwrap();
        entry.stream().unwrap().write(b"y", &t).await.unwrap();
        entry.stream().unwrap().flush(&t).await.unwrap();

        assert!(fs.file_exists(&Path::new("/sub/nested.txt").unwrap(), &t).await.unwrap());
    }

    #[tokio::test]
    async fn read_only_rejects_mutation() {
        let fs = ObjectStoreFileSystem::new("bucket", "", Arc::new(MockObjectStoreClient::new()), true);
        let t = token();
        let err = fs.create_file(&Path::new("/a.txt").unwrap(), &t).await.unwrap_err();
        assert!(matches!(err, FsError::ReadOnly));
    }
}
