// End-to-end scenarios (S1-S6) exercising backends through the public
// `FileSystem` trait rather than their internal test modules.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use driftfs::{
    AtMode, FileStatus, FileSystem, FsError, FsResult, ListMode, MemoryFileSystem, MountFileSystem,
    ObjectListing, ObjectStoreClient, ObjectStoreFileSystem, OverlayFileSystem, Path, Stream,
    StreamExt,
};

fn token() -> CancellationToken {
    CancellationToken::new()
}

/// S1: Memory write/read.
#[tokio::test]
async fn s1_memory_write_read() {
    let fs = MemoryFileSystem::new();
    let t = token();
    let p = Path::new("/docs/report.txt").unwrap();

    let mut created = fs.create_file(&p, &t).await.unwrap();
    created.stream().unwrap().write(b"quarterly numbers", &t).await.unwrap();

    let mut opened = fs.open_file_read(&p, &t).await.unwrap().unwrap();
    let mut buf = [0u8; 18];
    opened.stream().unwrap().read(&mut buf, &t).await.unwrap();
    assert_eq!(&buf, b"quarterly numbers");
}

/// S2: Memory delete then stat.
#[tokio::test]
async fn s2_memory_delete_then_stat() {
    let fs = MemoryFileSystem::new();
    let t = token();
    let p = Path::new("/tmp.txt").unwrap();
    fs.create_file(&p, &t).await.unwrap();

    assert!(fs.delete_file(&p, &t).await.unwrap());
    assert!(!fs.file_exists(&p, &t).await.unwrap());
    assert_eq!(fs.file_stat(&p, &t).await.unwrap(), FileStatus::Deleted);
}

/// S3: Overlay copy-up — opening RW against a lower-only file copies it
/// into upper without mutating lower, and a second open sees the first's
/// write.
#[tokio::test]
async fn s3_overlay_copy_up() {
    let lower = MemoryFileSystem::new();
    let upper = MemoryFileSystem::new();
    let t = token();
    let p = Path::new("/base.txt").unwrap();
    let mut seed = lower.create_file(&p, &t).await.unwrap();
    seed.stream().unwrap().write(b"from lower", &t).await.unwrap();

    let overlay = OverlayFileSystem::new(lower.clone(), upper.clone());

    let mut first = overlay.open_file_read_write(&p, &t).await.unwrap();
    let mut buf = [0u8; 10];
    first.stream().unwrap().read(&mut buf, &t).await.unwrap();
    assert_eq!(&buf, b"from lower");
    first.stream().unwrap().write(b"!!", &t).await.unwrap();

    assert!(upper.file_exists(&p, &t).await.unwrap());
    let mut lower_check = lower.open_file_read(&p, &t).await.unwrap().unwrap();
    let mut lower_buf = [0u8; 10];
    lower_check.stream().unwrap().read(&mut lower_buf, &t).await.unwrap();
    assert_eq!(&lower_buf, b"from lower");

    let mut second = overlay.open_file_read_write(&p, &t).await.unwrap();
    let mut total = Vec::new();
    let mut chunk = [0u8; 32];
    loop {
        let n = second.stream().unwrap().read(&mut chunk, &t).await.unwrap();
        if n == 0 {
            break;
        }
        total.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(total, b"from lower!!");
}

/// S4: Mount routing dispatches to the longest-prefix backend.
#[tokio::test]
async fn s4_mount_routing() {
    let docs = MemoryFileSystem::new();
    let scratch = MemoryFileSystem::new();
    let t = token();

    let mount = MountFileSystem::new();
    mount.mount(Path::new("/docs").unwrap(), docs.clone()).await;
    mount.mount(Path::new("/scratch").unwrap(), scratch.clone()).await;

    mount.create_file(&Path::new("/docs/a.txt").unwrap(), &t).await.unwrap();
    mount.create_file(&Path::new("/scratch/b.txt").unwrap(), &t).await.unwrap();

    assert!(docs.file_exists(&Path::new("/a.txt").unwrap(), &t).await.unwrap());
    assert!(scratch.file_exists(&Path::new("/b.txt").unwrap(), &t).await.unwrap());
    assert!(!docs.file_exists(&Path::new("/b.txt").unwrap(), &t).await.unwrap());
}

/// A minimal in-process `ObjectStoreClient` for integration-level tests,
/// independent of the crate's own unit-test mock.
#[derive(Default)]
struct InMemoryClient {
    buckets: Mutex<HashSet<String>>,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

#[async_trait]
impl ObjectStoreClient for InMemoryClient {
    async fn bucket_exists(&self, bucket: &str) -> FsResult<bool> {
        Ok(self.buckets.lock().await.contains(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> FsResult<()> {
        self.buckets.lock().await.insert(bucket.to_string());
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, _content_type: &str) -> FsResult<()> {
        self.objects.lock().await.insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> FsResult<Option<Vec<u8>>> {
        Ok(self.objects.lock().await.get(&(bucket.to_string(), key.to_string())).cloned())
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> FsResult<Option<u64>> {
        Ok(self
            .objects
            .lock()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|b| b.len() as u64))
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> FsResult<()> {
        self.objects.lock().await.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str, _recursive: bool) -> FsResult<Vec<ObjectListing>> {
        let objects = self.objects.lock().await;
        Ok(objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), v)| ObjectListing { key: k.clone(), size: v.len() as u64 })
            .collect())
    }
}

/// S5: ObjectStore flush visibility — the uploaded object is not visible
/// to a fresh reader until the write-through stream is flushed.
#[tokio::test]
async fn s5_object_store_flush_visibility() {
    let client = Arc::new(InMemoryClient::default());
    let fs = ObjectStoreFileSystem::new("bucket", "app", client, false);
    let t = token();
    let p = Path::new("/notes.txt").unwrap();

    let mut created = fs.create_file(&p, &t).await.unwrap();
    created.stream().unwrap().write(b"draft", &t).await.unwrap();

    // Visible as "exists" (it's tracked in the files set) but empty to a
    // reader, since nothing has been flushed to the store yet.
    assert!(fs.file_exists(&p, &t).await.unwrap());
    let mut pre_flush = fs.open_file_read(&p, &t).await.unwrap().unwrap();
    assert_eq!(pre_flush.stream().unwrap().length(), 0);

    created.stream().unwrap().flush(&t).await.unwrap();

    let mut post_flush = fs.open_file_read(&p, &t).await.unwrap().unwrap();
    let mut buf = [0u8; 5];
    post_flush.stream().unwrap().read(&mut buf, &t).await.unwrap();
    assert_eq!(&buf, b"draft");
}

/// S6: Write-limited upload rejects writes past the cap and allows a
/// truncate-and-rewrite via `set_length(0)`.
#[tokio::test]
async fn s6_write_limited_upload() {
    let fs = MemoryFileSystem::new();
    let t = token();
    let p = Path::new("/upload.bin").unwrap();

    let created = fs.create_file(&p, &t).await.unwrap();
    let driftfs::FileEntry::FileRW(_, _, stream) = created else {
        unreachable!("create_file always returns FileRW")
    };
    let mut limited = stream.write_limited(4);

    assert_eq!(limited.write(b"abcd", &t).await.unwrap(), 4);
    assert!(matches!(limited.write(b"e", &t).await, Err(FsError::NotSupported(_))));

    limited.set_length(0, &t).await.unwrap();
    assert_eq!(limited.write(b"ab", &t).await.unwrap(), 2);
}

/// Property 9: shallow listing applies the glob filter and returns every
/// direct child exactly once.
#[tokio::test]
async fn property_shallow_listing_filter() {
    let fs = MemoryFileSystem::new();
    let t = token();
    fs.create_file(&Path::new("/a.log").unwrap(), &t).await.unwrap();
    fs.create_file(&Path::new("/b.log").unwrap(), &t).await.unwrap();
    fs.create_file(&Path::new("/c.txt").unwrap(), &t).await.unwrap();

    let entries = fs
        .entries(&Path::root(), &ListMode::Shallow("*.log".into()), &t)
        .await
        .unwrap();
    let mut names: Vec<String> = entries.iter().map(|e| e.path().to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["/a.log".to_string(), "/b.log".to_string()]);
}

/// Property 6: mount routing always picks the longest matching prefix,
/// even when a shorter prefix is registered first.
#[tokio::test]
async fn property_mount_prefers_longest_prefix() {
    let shallow = MemoryFileSystem::new();
    let deep = MemoryFileSystem::new();
    let t = token();

    let mount = MountFileSystem::new();
    mount.mount(Path::new("/a").unwrap(), shallow.clone()).await;
    mount.mount(Path::new("/a/b").unwrap(), deep.clone()).await;

    mount.create_file(&Path::new("/a/b/c.txt").unwrap(), &t).await.unwrap();
    assert!(deep.file_exists(&Path::new("/c.txt").unwrap(), &t).await.unwrap());
    assert!(!shallow.file_exists(&Path::new("/b/c.txt").unwrap(), &t).await.unwrap());
}

/// Requesting a writable `at()` sub-FS over a read-only source fails.
#[tokio::test]
async fn at_read_write_escalation_rejected() {
    let fs = MemoryFileSystem::new_read_only();
    let t = token();
    let err = fs.at(&Path::root(), AtMode::ReadWrite, &t).await.unwrap_err();
    assert!(matches!(err, FsError::ReadOnly));
}
