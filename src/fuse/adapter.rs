// FUSE adapter - bridges sync FUSE callbacks to async FilesystemInterface
//
// This adapter implements the fuser::Filesystem trait and delegates all operations
// to the async FilesystemInterface implementation. It handles:
// - Async to sync conversion using a dedicated tokio runtime
// - Inode to path mapping
// - FUSE types to FilesystemInterface types conversion
// - Error code translation
//
// The adapter owns its runtime: FUSE callbacks are synchronous and calling
// block_on() on the caller's runtime from inside that runtime deadlocks.

use super::interface::{FileAttr, FileType, FilesystemInterface, FsError, Owner, SetAttr};
use crate::fs::path::{join, parent};
use fuser::{
    FileType as FuseFileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Runtime;

/// Inode of the mount root.
pub const ROOT_INODE: u64 = 1;

/// Default TTL for file attributes (1 second)
const ATTR_TTL: Duration = Duration::from_secs(1);

/// Default TTL for directory entries (1 second)
const ENTRY_TTL: Duration = Duration::from_secs(1);

/// FUSE adapter that bridges sync FUSE callbacks to async FilesystemInterface
pub struct FuseAdapter {
    /// The underlying filesystem implementation
    backend: Arc<dyn FilesystemInterface>,

    /// Dedicated tokio runtime for async operations
    runtime: Arc<Runtime>,

    /// FUSE speaks inodes, the backend speaks paths
    inode_map: RwLock<InodeMap>,
}

/// Manages inode <-> path bidirectional mapping
#[derive(Debug)]
struct InodeMap {
    inode_to_path: HashMap<u64, String>,
    path_to_inode: HashMap<String, u64>,
    next_inode: u64,
}

impl InodeMap {
    fn new() -> Self {
        let mut map = Self {
            inode_to_path: HashMap::new(),
            path_to_inode: HashMap::new(),
            next_inode: ROOT_INODE + 1,
        };
        map.insert(ROOT_INODE, "/".to_string());
        map
    }

    fn insert(&mut self, inode: u64, path: String) {
        self.inode_to_path.insert(inode, path.clone());
        self.path_to_inode.insert(path, inode);
    }

    /// Get or create inode for path
    fn get_or_create(&mut self, path: &str) -> u64 {
        if let Some(&inode) = self.path_to_inode.get(path) {
            return inode;
        }

        let inode = self.next_inode;
        self.next_inode += 1;
        self.insert(inode, path.to_string());
        inode
    }

    fn get_path(&self, inode: u64) -> Option<&str> {
        self.inode_to_path.get(&inode).map(|s| s.as_str())
    }

    fn get_inode(&self, path: &str) -> Option<u64> {
        self.path_to_inode.get(path).copied()
    }

    /// Drop the mapping for `path` and everything below it.
    fn remove_path(&mut self, path: &str) {
        let doomed: Vec<String> =
            self.path_to_inode.keys().filter(|p| is_within(p, path)).cloned().collect();
        for p in doomed {
            if let Some(inode) = self.path_to_inode.remove(&p) {
                self.inode_to_path.remove(&inode);
            }
        }
    }

    /// Re-key `from` and its descendants under `to`, keeping their inodes.
    /// Whatever was mapped at `to` is replaced.
    fn rename(&mut self, from: &str, to: &str) {
        self.remove_path(to);
        let moved: Vec<(String, u64)> = self
            .path_to_inode
            .iter()
            .filter(|(p, _)| is_within(p, from))
            .map(|(p, &inode)| (p.clone(), inode))
            .collect();
        for (old, inode) in moved {
            self.path_to_inode.remove(&old);
            self.insert(inode, format!("{}{}", to, &old[from.len()..]));
        }
    }
}

fn is_within(path: &str, dir: &str) -> bool {
    path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

impl FuseAdapter {
    /// Create a new FUSE adapter with a dedicated runtime
    pub fn new(backend: Arc<dyn FilesystemInterface>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .thread_name("bucketfs-fuse")
            .enable_all()
            .build()?;

        Ok(Self::with_runtime(backend, Arc::new(runtime)))
    }

    /// Create a new FUSE adapter with a provided runtime
    ///
    /// The runtime must not be the one the caller is running on.
    pub fn with_runtime(backend: Arc<dyn FilesystemInterface>, runtime: Arc<Runtime>) -> Self {
        Self { backend, runtime, inode_map: RwLock::new(InodeMap::new()) }
    }

    fn map(&self) -> RwLockReadGuard<'_, InodeMap> {
        self.inode_map.read().unwrap_or_else(|e| e.into_inner())
    }

    fn map_mut(&self) -> RwLockWriteGuard<'_, InodeMap> {
        self.inode_map.write().unwrap_or_else(|e| e.into_inner())
    }

    fn get_path(&self, inode: u64) -> Result<String, libc::c_int> {
        self.map().get_path(inode).map(|s| s.to_string()).ok_or(libc::ENOENT)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, libc::c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(join(&self.get_path(parent)?, name))
    }

    fn block_on<F, T>(&self, future: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        self.runtime.block_on(future)
    }

    /// Errno for a failed call. Store and local I/O faults are logged; the
    /// rest are ordinary answers (ENOENT on lookup and the like).
    fn errno(op: &str, target: &str, error: FsError) -> libc::c_int {
        let errno = error.to_errno();
        if errno == libc::EIO {
            tracing::error!(op, target, error = %error, "operation failed");
        } else {
            tracing::debug!(op, target, error = %error, errno, "operation rejected");
        }
        errno
    }

    fn reply_entry(&self, path: &str, attr: FileAttr, reply: ReplyEntry) {
        let ino = self.map_mut().get_or_create(path);
        reply.entry(&ENTRY_TTL, &to_fuse_attr(&attr, ino), 0);
    }
}

fn to_fuse_kind(kind: FileType) -> FuseFileType {
    match kind {
        FileType::RegularFile => FuseFileType::RegularFile,
        FileType::Directory => FuseFileType::Directory,
    }
}

/// Convert our FileAttr to fuser FileAttr
fn to_fuse_attr(attr: &FileAttr, ino: u64) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks(),
        atime: attr.atime.into(),
        mtime: attr.mtime.into(),
        ctime: attr.ctime.into(),
        crtime: UNIX_EPOCH,
        kind: to_fuse_kind(attr.kind),
        perm: attr.perm,
        nlink: attr.nlinks,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

fn to_datetime(time: TimeOrNow) -> chrono::DateTime<chrono::Utc> {
    match time {
        TimeOrNow::SpecificTime(st) => st.into(),
        TimeOrNow::Now => chrono::Utc::now(),
    }
}

impl Filesystem for FuseAdapter {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        tracing::info!("FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("FUSE filesystem destroyed");
    }

    /// Look up a directory entry by name
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.get_attr(&path)) {
            Ok(attr) => self.reply_entry(&path, attr, reply),
            Err(e) => reply.error(Self::errno("lookup", &path, e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = match self.get_path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.get_attr(&path)) {
            Ok(attr) => reply.attr(&ATTR_TTL, &to_fuse_attr(&attr, ino)),
            Err(e) => reply.error(Self::errno("getattr", &path, e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.get_path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        let set_attr = SetAttr {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(to_datetime),
            mtime: mtime.map(to_datetime),
        };

        match self.block_on(self.backend.set_attr(&path, fh, set_attr)) {
            Ok(attr) => reply.attr(&ATTR_TTL, &to_fuse_attr(&attr, ino)),
            Err(e) => reply.error(Self::errno("setattr", &path, e)),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let path = match self.get_path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.read_symlink(&path)) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(Self::errno("readlink", &path, e)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.mknod(&path, mode, rdev)) {
            Ok(attr) => self.reply_entry(&path, attr, reply),
            Err(e) => reply.error(Self::errno("mknod", &path, e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.create_dir(&path, mode)) {
            Ok(attr) => self.reply_entry(&path, attr, reply),
            Err(e) => reply.error(Self::errno("mkdir", &path, e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.delete_file(&path)) {
            Ok(()) => {
                self.map_mut().remove_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("unlink", &path, e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.remove_dir(&path)) {
            Ok(()) => {
                self.map_mut().remove_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rmdir", &path, e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, link_name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.create_symlink(&target.to_string_lossy(), &path)) {
            Ok(attr) => self.reply_entry(&path, attr, reply),
            Err(e) => reply.error(Self::errno("symlink", &path, e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (from, to) =
            match (self.child_path(parent, name), self.child_path(newparent, newname)) {
                (Ok(from), Ok(to)) => (from, to),
                (Err(e), _) | (_, Err(e)) => return reply.error(e),
            };

        match self.block_on(self.backend.rename(&from, &to)) {
            Ok(()) => {
                self.map_mut().rename(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rename", &from, e)),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let (path, new_path) = match (self.get_path(ino), self.child_path(newparent, newname)) {
            (Ok(path), Ok(new_path)) => (path, new_path),
            (Err(e), _) | (_, Err(e)) => return reply.error(e),
        };

        match self.block_on(self.backend.link(&path, &new_path)) {
            Ok(attr) => self.reply_entry(&new_path, attr, reply),
            Err(e) => reply.error(Self::errno("link", &path, e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.get_path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.open(&path, flags)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(Self::errno("open", &path, e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };

        match self.block_on(self.backend.read(fh, offset, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(Self::errno("read", &fh.to_string(), e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };

        match self.block_on(self.backend.write(fh, offset, data)) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(Self::errno("write", &fh.to_string(), e)),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.block_on(self.backend.flush(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("flush", &fh.to_string(), e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.block_on(self.backend.release(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("release", &fh.to_string(), e)),
        }
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.block_on(self.backend.fsync(fh, datasync)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("fsync", &fh.to_string(), e)),
        }
    }

    /// Read directory entries
    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.get_path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        let entries = match self.block_on(self.backend.read_dir(&path)) {
            Ok(entries) => entries,
            Err(e) => return reply.error(Self::errno("readdir", &path, e)),
        };

        let mut map = self.map_mut();
        let parent_ino = map.get_inode(parent(&path)).unwrap_or(ROOT_INODE);
        let mut all_entries = vec![
            (ino, FuseFileType::Directory, ".".to_string()),
            (parent_ino, FuseFileType::Directory, "..".to_string()),
        ];
        for entry in entries {
            let inode = map.get_or_create(&join(&path, &entry.name));
            all_entries.push((inode, to_fuse_kind(entry.kind), entry.name));
        }
        drop(map);

        // Reply with entries starting from offset
        for (i, (inode, kind, name)) in all_entries.iter().enumerate().skip(offset.max(0) as usize)
        {
            if reply.add(*inode, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        match self.block_on(self.backend.statfs()) {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.bfree,
                stats.bavail,
                stats.files,
                stats.ffree,
                stats.bsize,
                stats.namelen,
                stats.frsize,
            ),
            Err(e) => reply.error(Self::errno("statfs", "/", e)),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = match self.get_path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        match self.block_on(self.backend.access(&path, mask)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("access", &path, e)),
        }
    }

    /// Create and open a file
    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        let owner = Owner { uid: req.uid(), gid: req.gid() };
        match self.block_on(self.backend.create_file(&path, mode, owner)) {
            Ok((fh, attr)) => {
                let ino = self.map_mut().get_or_create(&path);
                reply.created(&ENTRY_TTL, &to_fuse_attr(&attr, ino), 0, fh, 0);
            }
            Err(e) => reply.error(Self::errno("create", &path, e)),
        }
    }
}
