// One-level directory enumeration over a flat key space.
//
// A delimiter listing returns the objects directly under a prefix plus one
// "common prefix" per deeper level; both are flattened into child names.

use std::collections::HashSet;
use std::sync::Arc;

use super::error::FsResult;
use super::path::{child_prefix, SEPARATOR};
use crate::storage::{BlobMeta, Listing, ObjectStore};

pub struct DirectoryLister {
    store: Arc<dyn ObjectStore>,
}

impl DirectoryLister {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Names of the immediate children of `key`. Every call queries the store
    /// again; `.` and `..` are not included.
    pub async fn list_children(&self, key: &str) -> FsResult<Children> {
        let prefix = child_prefix(key);
        let listing = self.store.list_blobs(&prefix, Some(SEPARATOR)).await?;
        Ok(Children::new(prefix, listing))
    }
}

/// Iterator over child names of one listing.
///
/// A marker `a/c` and a common prefix `a/c/` name the same child and are
/// yielded once. Placeholder objects equal to the prefix itself are skipped.
pub struct Children {
    prefix: String,
    items: std::vec::IntoIter<BlobMeta>,
    prefixes: std::vec::IntoIter<String>,
    seen: HashSet<String>,
}

impl Children {
    fn new(prefix: String, listing: Listing) -> Self {
        Self {
            prefix,
            items: listing.items.into_iter(),
            prefixes: listing.prefixes.into_iter(),
            seen: HashSet::new(),
        }
    }

    fn child_name(&self, key: &str) -> Option<String> {
        let rest = key.strip_prefix(&self.prefix)?.trim_end_matches(SEPARATOR);
        let name = rest.rsplit(SEPARATOR).next().unwrap_or(rest);
        (!name.is_empty()).then(|| name.to_string())
    }
}

impl Iterator for Children {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let key = match self.items.next() {
                Some(meta) => meta.key,
                None => self.prefixes.next()?,
            };
            if let Some(name) = self.child_name(&key) {
                if self.seen.insert(name.clone()) {
                    return Some(name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Precondition};

    async fn store_with(keys: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for key in keys {
            store.upload_from_bytes(key, Vec::new(), Precondition::None).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_one_level_only() {
        let store = store_with(&["a/b.txt", "a/c/d.txt"]).await;
        let lister = DirectoryLister::new(store);

        let mut names: Vec<_> = lister.list_children("a").await.unwrap().collect();
        names.sort();
        assert_eq!(names, vec!["b.txt", "c"]);
    }

    #[tokio::test]
    async fn test_root_listing() {
        let store = store_with(&["top.txt", "docs", "docs/readme.md"]).await;
        let lister = DirectoryLister::new(store);

        let mut names: Vec<_> = lister.list_children("").await.unwrap().collect();
        names.sort();
        assert_eq!(names, vec!["docs", "top.txt"]);
    }

    #[tokio::test]
    async fn test_marker_and_prefix_deduplicated() {
        let store = store_with(&["a/c", "a/c/d.txt"]).await;
        let lister = DirectoryLister::new(store);

        let names: Vec<_> = lister.list_children("a").await.unwrap().collect();
        assert_eq!(names, vec!["c"]);
    }

    #[tokio::test]
    async fn test_placeholder_object_skipped() {
        let store = store_with(&["a/", "a/x.txt"]).await;
        let lister = DirectoryLister::new(store);

        let names: Vec<_> = lister.list_children("a").await.unwrap().collect();
        assert_eq!(names, vec!["x.txt"]);
    }

    #[tokio::test]
    async fn test_listing_is_restartable() {
        let store = store_with(&["a/b.txt"]).await;
        let lister = DirectoryLister::new(store.clone());

        assert_eq!(lister.list_children("a").await.unwrap().count(), 1);
        store.upload_from_bytes("a/new.txt", Vec::new(), Precondition::None).await.unwrap();
        assert_eq!(lister.list_children("a").await.unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let store = store_with(&["empty"]).await;
        let lister = DirectoryLister::new(store);
        assert_eq!(lister.list_children("empty").await.unwrap().next(), None);
    }
}
