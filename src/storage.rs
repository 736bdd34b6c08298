//! Object store boundary, prefix cleanup, and two in-process backends.

use crate::error::EtlError;
use crate::util::{copy_with_backoff, remove_with_backoff};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Upper bound on keys per listing page, matching the managed store's own limit.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One page of a prefix listing, keys in ascending order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Pass back to continue after the last key of this page. `None` on the final page.
    pub next_token: Option<String>,
}

/// Per-key outcome of a batch delete.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: usize,
    pub failed: Vec<(String, String)>,
}

pub trait ObjectStore: Send + Sync {
    fn list_objects(&self, bucket: &str, prefix: &str, token: Option<&str>, max_keys: usize) -> Result<ObjectPage>;
    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteReport>;
    fn copy_object(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()>;
    fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Deletes everything under a prefix, one listing page at a time.
#[derive(Clone)]
pub struct StorageCleaner {
    store: Arc<dyn ObjectStore>,
    page_size: usize,
}

impl StorageCleaner {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store, page_size: DEFAULT_PAGE_SIZE }
    }

    pub fn page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    /// Delete every object under `bucket/prefix`. An empty or missing prefix is a no-op.
    ///
    /// Each page is deleted before the next listing, so the listing always restarts from
    /// the top; a short page means the prefix is exhausted. Returns the number deleted.
    pub fn delete_all(&self, bucket: &str, prefix: &str) -> Result<usize> {
        let mut total = 0usize;
        loop {
            let page = self
                .store
                .list_objects(bucket, prefix, None, self.page_size)
                .with_context(|| format!("list s3://{bucket}/{prefix}"))?;
            if page.keys.is_empty() {
                break;
            }
            let listed = page.keys.len();
            tracing::info!(bucket, prefix, count = listed, "Deleting objects");

            let report = self
                .store
                .delete_objects(bucket, &page.keys)
                .with_context(|| format!("delete {listed} objects under s3://{bucket}/{prefix}"))?;
            if let Some((key, message)) = report.failed.first() {
                let message = format!("{} of {} deletes failed, first: {}", report.failed.len(), listed, message);
                return Err(EtlError::storage(bucket, key.clone(), message).into());
            }
            total += report.deleted;
            if listed < self.page_size {
                break;
            }
        }
        tracing::debug!(bucket, prefix, deleted = total, "prefix cleared");
        Ok(total)
    }
}

fn page_from_sorted<'a>(keys: impl Iterator<Item = &'a String>, token: Option<&str>, max_keys: usize) -> ObjectPage {
    let max_keys = max_keys.max(1);
    let mut out: Vec<String> = keys
        .filter(|k| token.map_or(true, |t| k.as_str() > t))
        .take(max_keys + 1)
        .cloned()
        .collect();
    let next_token = if out.len() > max_keys {
        out.truncate(max_keys);
        out.last().cloned()
    } else {
        None
    };
    ObjectPage { keys: out, next_token }
}

/// Process-local store: buckets of key → bytes.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.buckets.lock().entry(bucket.to_string()).or_default().insert(key.to_string(), body.into());
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets.lock().get(bucket).and_then(|b| b.get(key).cloned())
    }

    /// All keys of `bucket`, ascending.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets.lock().get(bucket).map(|b| b.keys().cloned().collect()).unwrap_or_default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn list_objects(&self, bucket: &str, prefix: &str, token: Option<&str>, max_keys: usize) -> Result<ObjectPage> {
        let guard = self.buckets.lock();
        let Some(b) = guard.get(bucket) else {
            return Ok(ObjectPage::default());
        };
        let keys = b.range(prefix.to_string()..).map(|(k, _)| k).take_while(|k| k.starts_with(prefix));
        Ok(page_from_sorted(keys, token, max_keys))
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteReport> {
        let mut guard = self.buckets.lock();
        let mut report = DeleteReport::default();
        if let Some(b) = guard.get_mut(bucket) {
            for k in keys {
                // deleting a missing key is an ack, as with the managed store
                b.remove(k);
                report.deleted += 1;
            }
        } else {
            report.deleted = keys.len();
        }
        Ok(report)
    }

    fn copy_object(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        let mut guard = self.buckets.lock();
        let body = guard
            .get(src_bucket)
            .and_then(|b| b.get(src_key))
            .cloned()
            .ok_or_else(|| EtlError::storage(src_bucket, src_key, "no such key"))?;
        guard.entry(dst_bucket.to_string()).or_default().insert(dst_key.to_string(), body);
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        if let Some(b) = self.buckets.lock().get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }
}

/// Directory-backed store: `<root>/<bucket>/<key>`. Used for local runs and dry runs.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        checked_join(&self.root, bucket).ok_or_else(|| EtlError::storage(bucket, "", "invalid bucket name").into())
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        checked_join(&dir, key).ok_or_else(|| EtlError::storage(bucket, key, "invalid object key").into())
    }
}

/// Join a relative `/`-separated key below `base`, refusing anything that could escape it.
fn checked_join(base: &Path, key: &str) -> Option<PathBuf> {
    if key.is_empty() {
        return None;
    }
    let rel = Path::new(key);
    if rel.components().all(|c| matches!(c, Component::Normal(_))) {
        Some(base.join(rel))
    } else {
        None
    }
}

impl ObjectStore for LocalObjectStore {
    fn list_objects(&self, bucket: &str, prefix: &str, token: Option<&str>, max_keys: usize) -> Result<ObjectPage> {
        let bucket_dir = self.bucket_dir(bucket)?;
        // walk only below the directory part of the prefix
        let start = match prefix.rfind('/') {
            Some(i) => bucket_dir.join(&prefix[..i]),
            None => bucket_dir.clone(),
        };
        if !start.exists() {
            return Ok(ObjectPage::default());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&start).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&bucket_dir) else { continue };
            let key = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(page_from_sorted(keys.iter(), token, max_keys))
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteReport> {
        let mut report = DeleteReport::default();
        for key in keys {
            let outcome = self.object_path(bucket, key).and_then(|p| remove_with_backoff(&p, 8, 25));
            match outcome {
                Ok(()) => report.deleted += 1,
                Err(e) => report.failed.push((key.clone(), format!("{e:#}"))),
            }
        }
        Ok(report)
    }

    fn copy_object(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        let src = self.object_path(src_bucket, src_key)?;
        let dst = self.object_path(dst_bucket, dst_key)?;
        if !src.is_file() {
            return Err(EtlError::storage(src_bucket, src_key, "no such key").into());
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        copy_with_backoff(&src, &dst, 8, 25)
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        remove_with_backoff(&self.object_path(bucket, key)?, 8, 25)
    }
}
