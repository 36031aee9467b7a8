// Filesystem interface abstraction
//
// Path- and handle-based operations the FUSE adapter dispatches to. Paths are
// absolute (`/a/b.txt`); handles are the ids returned by `open`/`create`.

use chrono::{DateTime, Utc};

pub use crate::fs::{Attributes as FileAttr, FileType, FsError, FsResult, Owner};

/// Directory entry structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileType,
}

/// Set attributes parameters
#[derive(Debug, Default)]
pub struct SetAttr {
    pub size: Option<u64>,
    pub atime: Option<DateTime<Utc>>,
    pub mtime: Option<DateTime<Utc>>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Filesystem statistics
#[derive(Debug, Clone)]
pub struct StatFs {
    pub blocks: u64,  // Total blocks
    pub bfree: u64,   // Free blocks
    pub bavail: u64,  // Available blocks for unprivileged users
    pub files: u64,   // Total inodes
    pub ffree: u64,   // Free inodes
    pub bsize: u32,   // Block size
    pub namelen: u32, // Maximum filename length
    pub frsize: u32,  // Fragment size
}

#[async_trait::async_trait]
pub trait FilesystemInterface: Send + Sync {
    // Metadata operations
    async fn access(&self, path: &str, mask: i32) -> FsResult<()>;
    async fn get_attr(&self, path: &str) -> FsResult<FileAttr>;
    async fn set_attr(&self, path: &str, fh: Option<u64>, attr: SetAttr) -> FsResult<FileAttr>;
    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()>;
    async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;
    async fn utimens(
        &self,
        path: &str,
        atime: Option<DateTime<Utc>>,
        mtime: Option<DateTime<Utc>>,
    ) -> FsResult<()>;

    // Directory operations
    async fn read_dir(&self, path: &str) -> FsResult<Vec<DirEntry>>;
    async fn create_dir(&self, path: &str, mode: u32) -> FsResult<FileAttr>;
    async fn remove_dir(&self, path: &str) -> FsResult<()>;

    // Namespace operations
    async fn delete_file(&self, path: &str) -> FsResult<()>;
    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;

    // File handle operations
    async fn open(&self, path: &str, flags: i32) -> FsResult<u64>;
    async fn create_file(&self, path: &str, mode: u32, owner: Owner) -> FsResult<(u64, FileAttr)>;
    async fn read(&self, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>>;
    async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<u32>;
    async fn truncate(&self, path: &str, fh: Option<u64>, size: u64) -> FsResult<()>;
    async fn flush(&self, fh: u64) -> FsResult<()>;
    async fn fsync(&self, fh: u64, datasync: bool) -> FsResult<()>;
    async fn release(&self, fh: u64) -> FsResult<()>;

    // Link and device operations have no mapping onto a flat key space
    async fn mknod(&self, path: &str, _mode: u32, _rdev: u32) -> FsResult<FileAttr> {
        Err(FsError::NotSupported(format!("mknod: {}", path)))
    }

    async fn create_symlink(&self, target: &str, link: &str) -> FsResult<FileAttr> {
        Err(FsError::NotSupported(format!("symlink: {} -> {}", link, target)))
    }

    async fn read_symlink(&self, path: &str) -> FsResult<String> {
        Err(FsError::NotSupported(format!("readlink: {}", path)))
    }

    async fn link(&self, path: &str, new_path: &str) -> FsResult<FileAttr> {
        Err(FsError::NotSupported(format!("link: {} -> {}", new_path, path)))
    }

    // Filesystem information
    async fn statfs(&self) -> FsResult<StatFs>;
}
