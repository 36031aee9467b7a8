// BucketBackend - filesystem operations over an object-storage bucket
//
// Resolves each path to an object key and dispatches to the attribute
// resolver, directory lister, staging manager or blob sync. Every fault comes
// back as an `FsError`; the adapter turns it into an errno.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::interface::*;
use crate::config::StagingConfig;
use crate::fs::path::{child_prefix, is_file_key, to_key};
use crate::fs::{AttributeResolver, BlobSync, DirectoryLister};
use crate::staging::{OpenMode, StagingManager};
use crate::storage::{ObjectStore, Precondition};

/// GCS limits object names to 1024 bytes.
const MAX_NAME_LEN: u32 = 1024;

pub struct BucketBackend {
    store: Arc<dyn ObjectStore>,
    sync: BlobSync,
    attributes: AttributeResolver,
    lister: DirectoryLister,
    staging: StagingManager,
    owner: Owner,
}

impl BucketBackend {
    pub fn new(store: Arc<dyn ObjectStore>, staging: &StagingConfig) -> Self {
        Self::with_owner(store, staging, Owner::current())
    }

    pub fn with_owner(store: Arc<dyn ObjectStore>, staging: &StagingConfig, owner: Owner) -> Self {
        let sync = BlobSync::new(store.clone());
        Self {
            attributes: AttributeResolver::new(store.clone(), owner),
            lister: DirectoryLister::new(store.clone()),
            staging: StagingManager::new(
                sync.clone(),
                staging.scratch_root.clone(),
                staging.conflict_policy,
            ),
            sync,
            store,
            owner,
        }
    }

    pub fn staging(&self) -> &StagingManager {
        &self.staging
    }

    /// Keys that make up the entry at `key`: the object itself for a file;
    /// the marker (if any) and everything below the prefix for a directory.
    async fn entry_keys(&self, key: &str) -> FsResult<Vec<String>> {
        if is_file_key(key) {
            return Ok(vec![key.to_string()]);
        }

        let mut keys = Vec::new();
        if self.store.exists(key).await? {
            keys.push(key.to_string());
        }
        let listing = self.store.list_blobs(&child_prefix(key), None).await?;
        keys.extend(listing.items.into_iter().map(|meta| meta.key));
        Ok(keys)
    }
}

fn non_root(path: &str) -> FsResult<&str> {
    match to_key(path) {
        "" => Err(FsError::InvalidPath(path.to_string())),
        key => Ok(key),
    }
}

#[async_trait::async_trait]
impl FilesystemInterface for BucketBackend {
    async fn access(&self, path: &str, mask: i32) -> FsResult<()> {
        tracing::debug!(path, mask, "access");
        let key = to_key(path);
        if key.is_empty() || self.staging.is_staged(key).await {
            return Ok(());
        }

        match self.attributes.resolve(key, None).await {
            Ok(_) => Ok(()),
            Err(FsError::NotFound(_)) => Err(FsError::PermissionDenied(path.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn get_attr(&self, path: &str) -> FsResult<FileAttr> {
        let key = to_key(path);
        let staged = self.staging.staged_path(key).await;
        self.attributes.resolve(key, staged.as_deref()).await
    }

    async fn set_attr(&self, path: &str, fh: Option<u64>, attr: SetAttr) -> FsResult<FileAttr> {
        if let Some(size) = attr.size {
            self.truncate(path, fh, size).await?;
        }
        if let Some(mode) = attr.mode {
            self.chmod(path, mode).await?;
        }
        if attr.uid.is_some() || attr.gid.is_some() {
            self.chown(path, attr.uid, attr.gid).await?;
        }
        if attr.atime.is_some() || attr.mtime.is_some() {
            self.utimens(path, attr.atime, attr.mtime).await?;
        }
        self.get_attr(path).await
    }

    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        // Objects carry no permission bits; only existence is checked.
        self.get_attr(path).await?;
        tracing::debug!(path, mode = format!("{:o}", mode), "chmod ignored");
        Ok(())
    }

    async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.get_attr(path).await?;
        tracing::debug!(path, ?uid, ?gid, "chown ignored");
        Ok(())
    }

    async fn utimens(
        &self,
        path: &str,
        atime: Option<DateTime<Utc>>,
        mtime: Option<DateTime<Utc>>,
    ) -> FsResult<()> {
        // The store sets `updated` itself on every write.
        self.get_attr(path).await?;
        tracing::debug!(path, ?atime, ?mtime, "utimens ignored");
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        tracing::debug!(path, "readdir");
        let children = self.lister.list_children(to_key(path)).await?;
        Ok(children
            .map(|name| {
                let kind =
                    if is_file_key(&name) { FileType::RegularFile } else { FileType::Directory };
                DirEntry { name, kind }
            })
            .collect())
    }

    async fn create_dir(&self, path: &str, mode: u32) -> FsResult<FileAttr> {
        tracing::debug!(path, mode = format!("{:o}", mode), "mkdir");
        let key = non_root(path)?;
        if is_file_key(key) {
            // A dotted name would be read back as a file; nothing to create.
            tracing::debug!(path, "mkdir of dotted name is a no-op");
        } else {
            self.sync.upload_bytes(key, Vec::new(), Precondition::DoesNotExist).await?;
        }
        Ok(FileAttr::directory(self.owner))
    }

    async fn remove_dir(&self, path: &str) -> FsResult<()> {
        tracing::debug!(path, "rmdir");
        let key = non_root(path)?;

        let contents = self.store.list_blobs(&child_prefix(key), None).await?;
        let purged = contents.items.len();
        for meta in contents.items {
            self.sync.delete(&meta.key, Precondition::GenerationMatch(meta.generation)).await?;
        }

        match self.sync.delete_current(key).await {
            Err(FsError::NotFound(_)) if purged > 0 => Ok(()),
            other => other,
        }
    }

    async fn delete_file(&self, path: &str) -> FsResult<()> {
        tracing::debug!(path, "unlink");
        let key = non_root(path)?;
        match self.sync.delete_current(key).await {
            Ok(()) => {
                self.staging.detach_key(key).await;
                Ok(())
            }
            // Created but never released: nothing in the bucket yet.
            Err(FsError::NotFound(_)) if self.staging.detach_key(key).await > 0 => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        tracing::debug!(from, to, "rename");
        let src = non_root(from)?;
        let dst = non_root(to)?;

        let sources = self.entry_keys(src).await?;
        if sources.is_empty() {
            return Err(FsError::NotFound(from.to_string()));
        }

        // Copy everything first, then delete the sources. A failure in between
        // leaves both copies in the bucket.
        for source in &sources {
            let target = format!("{}{}", dst, &source[src.len()..]);
            self.sync.copy(source, &target).await?;
        }
        for source in &sources {
            self.sync.delete_current(source).await?;
        }
        Ok(())
    }

    async fn open(&self, path: &str, flags: i32) -> FsResult<u64> {
        let fh = self.staging.begin_read(non_root(path)?, OpenMode::from_flags(flags)).await?;
        tracing::debug!(path, flags, fh, "open");
        Ok(fh)
    }

    async fn create_file(&self, path: &str, mode: u32, owner: Owner) -> FsResult<(u64, FileAttr)> {
        let fh = self.staging.begin_create(non_root(path)?, mode, owner).await?;
        tracing::debug!(path, mode = format!("{:o}", mode), fh, "create");
        Ok((fh, self.get_attr(path).await?))
    }

    async fn read(&self, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        self.staging.read_at(fh, offset, size).await
    }

    async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<u32> {
        self.staging.write_at(fh, offset, data).await
    }

    async fn truncate(&self, path: &str, fh: Option<u64>, size: u64) -> FsResult<()> {
        tracing::debug!(path, ?fh, size, "truncate");
        if let Some(fh) = fh {
            return self.staging.truncate(fh, size).await;
        }

        let key = non_root(path)?;
        if self.staging.truncate_key(key, size).await? > 0 {
            return Ok(());
        }

        // Nothing open: stage, resize and write back in one go.
        let mode = OpenMode { read: false, write: true, truncate: size == 0 };
        let fh = self.staging.begin_read(key, mode).await?;
        if let Err(e) = self.staging.truncate(fh, size).await {
            self.staging.release(fh).await?;
            return Err(e);
        }
        self.staging.release(fh).await
    }

    async fn flush(&self, fh: u64) -> FsResult<()> {
        self.staging.flush(fh, false).await
    }

    async fn fsync(&self, fh: u64, datasync: bool) -> FsResult<()> {
        self.staging.flush(fh, datasync).await
    }

    async fn release(&self, fh: u64) -> FsResult<()> {
        tracing::debug!(fh, "release");
        self.staging.release(fh).await
    }

    async fn statfs(&self) -> FsResult<StatFs> {
        // Buckets have no fixed capacity; report a large constant.
        Ok(StatFs {
            blocks: 1 << 40,
            bfree: 1 << 40,
            bavail: 1 << 40,
            files: 1 << 32,
            ffree: 1 << 32,
            bsize: 4096,
            namelen: MAX_NAME_LEN,
            frsize: 4096,
        })
    }
}
