// Stat-like attributes synthesized from blob metadata.
//
// Nothing here is persisted: every query recomputes attributes from the store
// (or from a staged local copy while a handle has the file open).

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::error::{FsError, FsResult};
use super::path::{child_prefix, is_file_key, SEPARATOR};
use crate::storage::{BlobMeta, ObjectStore};

const DIR_PERM: u16 = 0o755;
const FILE_PERM: u16 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    RegularFile,
    Directory,
}

/// Owner reported for store-backed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    /// The user running the mount.
    pub fn current() -> Self {
        Self { uid: nix::unistd::getuid().as_raw(), gid: nix::unistd::getgid().as_raw() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub kind: FileType,
    pub size: u64,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    pub nlinks: u32,
}

impl Attributes {
    /// The bucket root.
    pub fn root(owner: Owner) -> Self {
        Self::directory(owner)
    }

    /// A directory marker or implicit prefix directory: fixed sentinel values.
    pub fn directory(owner: Owner) -> Self {
        Self {
            kind: FileType::Directory,
            size: 0,
            atime: DateTime::<Utc>::UNIX_EPOCH,
            mtime: DateTime::<Utc>::UNIX_EPOCH,
            ctime: DateTime::<Utc>::UNIX_EPOCH,
            perm: DIR_PERM,
            uid: owner.uid,
            gid: owner.gid,
            nlinks: 2,
        }
    }

    /// A content object.
    pub fn file(meta: &BlobMeta, owner: Owner) -> Self {
        Self {
            kind: FileType::RegularFile,
            size: meta.size,
            atime: meta.updated,
            mtime: meta.updated,
            ctime: meta.updated,
            perm: FILE_PERM,
            uid: owner.uid,
            gid: owner.gid,
            nlinks: 1,
        }
    }

    /// A staged local copy, which may hold writes the store has not seen yet.
    pub fn staged(metadata: &Metadata) -> Self {
        Self {
            kind: FileType::RegularFile,
            size: metadata.len(),
            atime: timestamp(metadata.atime(), metadata.atime_nsec()),
            mtime: timestamp(metadata.mtime(), metadata.mtime_nsec()),
            ctime: timestamp(metadata.ctime(), metadata.ctime_nsec()),
            perm: (metadata.mode() & 0o7777) as u16,
            uid: metadata.uid(),
            gid: metadata.gid(),
            nlinks: 1,
        }
    }

    /// Number of 512-byte blocks.
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }
}

fn timestamp(secs: i64, nsecs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, nsecs as u32).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub struct AttributeResolver {
    store: Arc<dyn ObjectStore>,
    owner: Owner,
}

impl AttributeResolver {
    pub fn new(store: Arc<dyn ObjectStore>, owner: Owner) -> Self {
        Self { store, owner }
    }

    /// Attributes for `key`. A staged local copy, when given, wins over the
    /// store because it may carry unsynchronized writes.
    pub async fn resolve(&self, key: &str, staged: Option<&Path>) -> FsResult<Attributes> {
        if key.is_empty() {
            return Ok(Attributes::root(self.owner));
        }

        if let Some(local) = staged {
            let metadata = tokio::fs::metadata(local).await?;
            return Ok(Attributes::staged(&metadata));
        }

        if is_file_key(key) {
            return match self.store.get_blob(key).await? {
                Some(meta) => Ok(Attributes::file(&meta, self.owner)),
                None => Err(FsError::NotFound(key.to_string())),
            };
        }

        if self.store.exists(key).await? || self.has_children(key).await? {
            Ok(Attributes::directory(self.owner))
        } else {
            Err(FsError::NotFound(key.to_string()))
        }
    }

    /// Whether anything lives under `key/`, for directories that only exist as
    /// a common prefix without a marker object.
    async fn has_children(&self, key: &str) -> FsResult<bool> {
        let listing = self.store.list_blobs(&child_prefix(key), Some(SEPARATOR)).await?;
        Ok(!listing.items.is_empty() || !listing.prefixes.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Generation, Listing, MockObjectStore};
    use mockall::predicate::*;

    const OWNER: Owner = Owner { uid: 1000, gid: 1000 };

    fn meta(key: &str, size: u64) -> BlobMeta {
        BlobMeta {
            key: key.to_string(),
            size,
            updated: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            generation: Generation(1),
        }
    }

    #[tokio::test]
    async fn test_root_never_touches_store() {
        let mock = MockObjectStore::new();
        let resolver = AttributeResolver::new(Arc::new(mock), OWNER);

        let attr = resolver.resolve("", None).await.unwrap();
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);
    }

    #[tokio::test]
    async fn test_dotted_key_is_regular_file() {
        let mut mock = MockObjectStore::new();
        mock.expect_get_blob()
            .with(eq("notes.txt"))
            .times(1)
            .returning(|key| Ok(Some(meta(key, 42))));
        let resolver = AttributeResolver::new(Arc::new(mock), OWNER);

        let attr = resolver.resolve("notes.txt", None).await.unwrap();
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 42);
        assert_eq!(attr.mtime.timestamp(), 1_700_000_000);
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.blocks(), 1);
    }

    #[tokio::test]
    async fn test_plain_key_is_directory() {
        let mut mock = MockObjectStore::new();
        mock.expect_exists().with(eq("notes")).times(1).returning(|_| Ok(true));
        mock.expect_get_blob().never();
        let resolver = AttributeResolver::new(Arc::new(mock), OWNER);

        let attr = resolver.resolve("notes", None).await.unwrap();
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.nlinks, 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let mut mock = MockObjectStore::new();
        mock.expect_get_blob().returning(|_| Ok(None));
        let resolver = AttributeResolver::new(Arc::new(mock), OWNER);

        let err = resolver.resolve("gone.txt", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_implicit_directory_from_prefix() {
        let mut mock = MockObjectStore::new();
        mock.expect_exists().returning(|_| Ok(false));
        mock.expect_list_blobs()
            .with(eq("a/c/"), eq(Some('/')))
            .times(1)
            .returning(|_, _| Ok(Listing { items: vec![meta("a/c/d.txt", 1)], prefixes: vec![] }));
        let resolver = AttributeResolver::new(Arc::new(mock), OWNER);

        let attr = resolver.resolve("a/c", None).await.unwrap();
        assert_eq!(attr.kind, FileType::Directory);
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_found() {
        let mut mock = MockObjectStore::new();
        mock.expect_exists().returning(|_| Ok(false));
        mock.expect_list_blobs().returning(|_, _| Ok(Listing::default()));
        let resolver = AttributeResolver::new(Arc::new(mock), OWNER);

        assert!(resolver.resolve("nothing", None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_staged_copy_wins() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("draft.txt");
        std::fs::write(&local, b"unsynced bytes").unwrap();

        let mut mock = MockObjectStore::new();
        mock.expect_get_blob().never();
        let resolver = AttributeResolver::new(Arc::new(mock), OWNER);

        let attr = resolver.resolve("draft.txt", Some(&local)).await.unwrap();
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 14);
    }
}
