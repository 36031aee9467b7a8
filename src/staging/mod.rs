// Per-handle local staging of object content.
//
// The store only transfers whole objects, so every open/create gets its own
// scratch directory holding a local copy. Reads and writes go to that copy;
// `release` uploads it (when dirty) and removes the directory. Handles never
// share a staged file, even for the same key.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::config::ConflictPolicy;
use crate::fs::path::{is_file_key, local_name};
use crate::fs::{BlobSync, FsError, FsResult, Owner};
use crate::storage::Precondition;

/// A local scratch copy bound to one open handle.
pub struct StagedFile {
    key: String,
    dir: TempDir,
    local_path: PathBuf,
    file: Arc<File>,
    /// Precondition captured before the handle staged the object.
    expected: Precondition,
    dirty: bool,
    /// Set when the key was unlinked while this handle was open; the copy is
    /// never uploaded.
    unlinked: bool,
}

impl StagedFile {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Access mode requested by `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub truncate: bool,
}

impl OpenMode {
    pub fn from_flags(flags: i32) -> Self {
        let (read, write) = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => (false, true),
            libc::O_RDWR => (true, true),
            _ => (true, false),
        };
        Self { read, write, truncate: write && flags & libc::O_TRUNC != 0 }
    }
}

pub struct StagingManager {
    sync: BlobSync,
    scratch_root: PathBuf,
    policy: ConflictPolicy,
    handles: Mutex<HashMap<u64, StagedFile>>,
    next_fh: AtomicU64,
}

impl StagingManager {
    pub fn new(sync: BlobSync, scratch_root: Option<PathBuf>, policy: ConflictPolicy) -> Self {
        Self {
            sync,
            scratch_root: scratch_root.unwrap_or_else(std::env::temp_dir),
            policy,
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    fn scratch_dir(&self) -> FsResult<TempDir> {
        Ok(tempfile::Builder::new().prefix("bucketfs-").tempdir_in(&self.scratch_root)?)
    }

    async fn register(&self, staged: StagedFile) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(fh, key = %staged.key, dir = %staged.dir.path().display(), "staged");
        self.handles.lock().await.insert(fh, staged);
        fh
    }

    /// Stage an existing object: download it into a fresh scratch directory
    /// and open the copy. With `O_TRUNC` the download is skipped.
    pub async fn begin_read(&self, key: &str, mode: OpenMode) -> FsResult<u64> {
        let expected = self.sync.observe(key).await?;
        if expected == Precondition::DoesNotExist {
            return Err(FsError::NotFound(key.to_string()));
        }

        let dir = self.scratch_dir()?;
        let local_path = dir.path().join(local_name(key));
        if mode.truncate {
            File::create(&local_path)?;
        } else {
            self.sync.download(key, &local_path).await?;
        }

        let file = OpenOptions::new()
            .read(mode.read)
            .write(mode.write)
            .truncate(mode.truncate)
            .open(&local_path)?;

        let staged = StagedFile {
            key: key.to_string(),
            dir,
            local_path,
            file: Arc::new(file),
            expected,
            dirty: mode.truncate,
            unlinked: false,
        };
        Ok(self.register(staged).await)
    }

    /// Stage a new object. Nothing is downloaded; the object is expected not
    /// to exist when the handle is released.
    pub async fn begin_create(&self, key: &str, mode: u32, owner: Owner) -> FsResult<u64> {
        let dir = self.scratch_dir()?;
        let local_path = dir.path().join(local_name(key));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(mode & 0o7777)
            .open(&local_path)?;

        if let Err(e) = std::os::unix::fs::chown(&local_path, Some(owner.uid), Some(owner.gid)) {
            tracing::debug!(key, error = %e, "could not chown staged file to caller");
        }

        let staged = StagedFile {
            key: key.to_string(),
            dir,
            local_path,
            file: Arc::new(file),
            expected: Precondition::DoesNotExist,
            dirty: true,
            unlinked: false,
        };
        Ok(self.register(staged).await)
    }

    async fn file(&self, fh: u64) -> FsResult<Arc<File>> {
        let handles = self.handles.lock().await;
        handles.get(&fh).map(|s| s.file.clone()).ok_or(FsError::InvalidHandle(fh))
    }

    pub async fn read_at(&self, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let file = self.file(fh).await?;
        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    pub async fn write_at(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<u32> {
        let mut handles = self.handles.lock().await;
        let staged = handles.get_mut(&fh).ok_or(FsError::InvalidHandle(fh))?;
        staged.file.write_all_at(data, offset)?;
        staged.dirty = true;
        Ok(data.len() as u32)
    }

    /// Resize the staged file of one handle.
    pub async fn truncate(&self, fh: u64, size: u64) -> FsResult<()> {
        let mut handles = self.handles.lock().await;
        let staged = handles.get_mut(&fh).ok_or(FsError::InvalidHandle(fh))?;
        // The handle may be read-only; resize through the path.
        OpenOptions::new().write(true).open(&staged.local_path)?.set_len(size)?;
        staged.dirty = true;
        Ok(())
    }

    /// Resize every staged copy of `key`. Returns how many handles were touched.
    pub async fn truncate_key(&self, key: &str, size: u64) -> FsResult<usize> {
        let mut handles = self.handles.lock().await;
        let mut touched = 0;
        for staged in handles.values_mut().filter(|s| s.key == key && !s.unlinked) {
            OpenOptions::new().write(true).open(&staged.local_path)?.set_len(size)?;
            staged.dirty = true;
            touched += 1;
        }
        Ok(touched)
    }

    /// Force the staged copy to local stable storage. Does not contact the store.
    pub async fn flush(&self, fh: u64, data_only: bool) -> FsResult<()> {
        let file = self.file(fh).await?;
        if data_only { file.sync_data()? } else { file.sync_all()? }
        Ok(())
    }

    /// Local path of the most recently opened staged copy of `key`.
    pub async fn staged_path(&self, key: &str) -> Option<PathBuf> {
        let handles = self.handles.lock().await;
        handles
            .iter()
            .filter(|(_, s)| s.key == key && !s.unlinked)
            .max_by_key(|(fh, _)| **fh)
            .map(|(_, s)| s.local_path.clone())
    }

    pub async fn is_staged(&self, key: &str) -> bool {
        self.handles.lock().await.values().any(|s| s.key == key && !s.unlinked)
    }

    /// Detach every open handle of `key` after an unlink: the handles keep
    /// working on their local copies but release no longer uploads them.
    /// Returns how many handles were detached.
    pub async fn detach_key(&self, key: &str) -> usize {
        let mut handles = self.handles.lock().await;
        let mut detached = 0;
        for staged in handles.values_mut().filter(|s| s.key == key && !s.unlinked) {
            staged.unlinked = true;
            detached += 1;
        }
        detached
    }

    pub async fn open_handles(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Close a handle: upload its copy if it is a dirty regular file, then
    /// remove the scratch directory. The directory is removed even when the
    /// upload fails; the upload error is returned.
    pub async fn release(&self, fh: u64) -> FsResult<()> {
        let staged = self.handles.lock().await.remove(&fh).ok_or(FsError::InvalidHandle(fh))?;

        let result = if !staged.dirty {
            Ok(())
        } else if staged.unlinked {
            tracing::debug!(fh, key = %staged.key, "key was unlinked, dropping staged changes");
            Ok(())
        } else if is_file_key(&staged.key) {
            self.upload(&staged).await
        } else {
            tracing::warn!(fh, key = %staged.key, "name has no extension, changes not uploaded");
            Ok(())
        };

        let StagedFile { key, dir, file, .. } = staged;
        drop(file);
        if let Err(e) = dir.close() {
            tracing::warn!(fh, key = %key, error = %e, "failed to remove scratch directory");
        }

        result
    }

    async fn upload(&self, staged: &StagedFile) -> FsResult<()> {
        match self.sync.upload(&staged.key, &staged.local_path, staged.expected).await {
            Ok(meta) => {
                tracing::debug!(key = %staged.key, generation = %meta.generation, "uploaded");
                Ok(())
            }
            // A create that lost the race to another writer always fails.
            Err(FsError::Conflict { key, expected: expected @ Precondition::GenerationMatch(_) })
                if self.policy == ConflictPolicy::Refresh =>
            {
                let current = self.sync.observe(&key).await?;
                tracing::warn!(
                    key = %key,
                    ?expected,
                    ?current,
                    "object changed since it was staged, uploading over the current generation"
                );
                self.sync.upload(&key, &staged.local_path, current).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }
}
