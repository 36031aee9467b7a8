// In-process object store with generation semantics.
//
// Behaves like the remote bucket for everything the filesystem relies on:
// monotonically increasing generations, `ifGenerationMatch` checks, sorted
// delimiter listing. One-shot fault injection lets tests break a multi-step
// operation halfway through.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{StoreError, StoreResult};
use super::models::{BlobMeta, Generation, Listing, Precondition};
use super::traits::ObjectStore;

/// Store operation kinds, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    GetBlob,
    Upload,
    Download,
    Delete,
    Copy,
    List,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    generation: Generation,
    updated: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    next_generation: i64,
    faults: Vec<(StoreOp, String)>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner { next_generation: 1, ..Default::default() }) }
    }

    /// Make the next `op` against `key` fail with a transport error.
    pub fn fail_next(&self, op: StoreOp, key: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.faults.push((op, key.to_string()));
    }

    /// Current content of an object, for assertions.
    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.objects.get(key).map(|o| o.data.clone())
    }

    /// All keys in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.objects.keys().cloned().collect()
    }

    fn take_fault(inner: &mut Inner, op: StoreOp, key: &str) -> StoreResult<()> {
        if let Some(pos) = inner.faults.iter().position(|(o, k)| *o == op && k == key) {
            inner.faults.remove(pos);
            return Err(StoreError::Transport(format!("injected {:?} fault for {}", op, key)));
        }
        Ok(())
    }

    fn check(inner: &Inner, key: &str, precondition: Precondition) -> StoreResult<()> {
        let current = inner.objects.get(key).map(|o| o.generation);
        let holds = match precondition {
            Precondition::None => true,
            Precondition::DoesNotExist => current.is_none(),
            Precondition::GenerationMatch(expected) => current == Some(expected),
        };
        if holds { Ok(()) } else { Err(StoreError::PreconditionFailed(key.to_string())) }
    }

    fn meta(key: &str, object: &StoredObject) -> BlobMeta {
        BlobMeta {
            key: key.to_string(),
            size: object.data.len() as u64,
            updated: object.updated,
            generation: object.generation,
        }
    }

    fn put(inner: &mut Inner, key: &str, data: Vec<u8>) -> BlobMeta {
        let generation = Generation(inner.next_generation);
        inner.next_generation += 1;
        let object = StoredObject { data, generation, updated: Utc::now() };
        let meta = Self::meta(key, &object);
        inner.objects.insert(key.to_string(), object);
        meta
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get_blob(key).await?.is_some())
    }

    async fn get_blob(&self, key: &str) -> StoreResult<Option<BlobMeta>> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        Self::take_fault(&mut inner, StoreOp::GetBlob, key)?;
        Ok(inner.objects.get(key).map(|o| Self::meta(key, o)))
    }

    async fn upload_from_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        Self::take_fault(&mut inner, StoreOp::Upload, key)?;
        Self::check(&inner, key, precondition)?;
        Ok(Self::put(&mut inner, key, data))
    }

    async fn upload_from_file(
        &self,
        key: &str,
        local_path: &Path,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta> {
        let data = tokio::fs::read(local_path).await?;
        self.upload_from_bytes(key, data, precondition).await
    }

    async fn download_to_file(&self, key: &str, local_path: &Path) -> StoreResult<()> {
        let data = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            Self::take_fault(&mut inner, StoreOp::Download, key)?;
            inner
                .objects
                .get(key)
                .map(|o| o.data.clone())
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?
        };
        tokio::fs::write(local_path, data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str, precondition: Precondition) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        Self::take_fault(&mut inner, StoreOp::Delete, key)?;
        if !inner.objects.contains_key(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Self::check(&inner, key, precondition)?;
        inner.objects.remove(key);
        Ok(())
    }

    async fn copy_blob(
        &self,
        src_key: &str,
        dst_key: &str,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        Self::take_fault(&mut inner, StoreOp::Copy, src_key)?;
        let data = inner
            .objects
            .get(src_key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(src_key.to_string()))?;
        Self::check(&inner, dst_key, precondition)?;
        Ok(Self::put(&mut inner, dst_key, data))
    }

    async fn list_blobs(&self, prefix: &str, delimiter: Option<char>) -> StoreResult<Listing> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        Self::take_fault(&mut inner, StoreOp::List, prefix)?;

        let mut items = Vec::new();
        let mut prefixes = BTreeSet::new();
        for (key, object) in inner.objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len_utf8())) {
                Some(end) => {
                    prefixes.insert(format!("{}{}", prefix, &rest[..end]));
                }
                None => items.push(Self::meta(key, object)),
            }
        }

        Ok(Listing { items, prefixes: prefixes.into_iter().collect() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generations_increase() {
        let store = MemoryStore::new();
        let first =
            store.upload_from_bytes("a.txt", b"1".to_vec(), Precondition::None).await.unwrap();
        let second =
            store.upload_from_bytes("a.txt", b"2".to_vec(), Precondition::None).await.unwrap();
        assert!(second.generation > first.generation);
        assert_eq!(store.contents("a.txt").unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_does_not_exist_precondition() {
        let store = MemoryStore::new();
        store.upload_from_bytes("a.txt", b"orig".to_vec(), Precondition::None).await.unwrap();

        let err = store
            .upload_from_bytes("a.txt", b"new".to_vec(), Precondition::DoesNotExist)
            .await
            .unwrap_err();
        assert!(err.is_precondition_failed());
        assert_eq!(store.contents("a.txt").unwrap(), b"orig");
    }

    #[tokio::test]
    async fn test_generation_match_precondition() {
        let store = MemoryStore::new();
        let meta =
            store.upload_from_bytes("a.txt", b"v1".to_vec(), Precondition::None).await.unwrap();
        let pinned = Precondition::GenerationMatch(meta.generation);
        store.upload_from_bytes("a.txt", b"v2".to_vec(), pinned).await.unwrap();

        let stale = store.upload_from_bytes("a.txt", b"v3".to_vec(), pinned).await;
        assert!(stale.unwrap_err().is_precondition_failed());
        assert_eq!(store.contents("a.txt").unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_delimiter_listing() {
        let store = MemoryStore::new();
        for key in ["a/b.txt", "a/c/d.txt", "a/c/e.txt", "ab.txt", "a"] {
            store.upload_from_bytes(key, Vec::new(), Precondition::None).await.unwrap();
        }

        let listing = store.list_blobs("a/", Some('/')).await.unwrap();
        let items: Vec<_> = listing.items.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(items, vec!["a/b.txt"]);
        assert_eq!(listing.prefixes, vec!["a/c/".to_string()]);
    }

    #[tokio::test]
    async fn test_listing_without_delimiter_is_recursive() {
        let store = MemoryStore::new();
        for key in ["d/e.txt", "d/f/g.txt", "d"] {
            store.upload_from_bytes(key, Vec::new(), Precondition::None).await.unwrap();
        }

        let listing = store.list_blobs("d/", None).await.unwrap();
        let items: Vec<_> = listing.items.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(items, vec!["d/e.txt", "d/f/g.txt"]);
        assert!(listing.prefixes.is_empty());
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let store = MemoryStore::new();
        store.upload_from_bytes("x.txt", b"x".to_vec(), Precondition::None).await.unwrap();
        store.fail_next(StoreOp::Delete, "x.txt");

        assert!(matches!(
            store.delete("x.txt", Precondition::None).await,
            Err(StoreError::Transport(_))
        ));
        store.delete("x.txt", Precondition::None).await.unwrap();
        assert!(!store.exists("x.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_requires_source() {
        let store = MemoryStore::new();
        let err = store.copy_blob("missing.txt", "dst.txt", Precondition::DoesNotExist).await;
        assert!(err.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_download_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let err = store.download_to_file("nope.txt", &dir.path().join("nope.txt")).await;
        assert!(err.unwrap_err().is_not_found());
    }
}
