// Whole-object transfers between staged files and the store.
//
// Thin wrappers over `ObjectStore` that attach generation preconditions and
// report precondition failures as `FsError::Conflict`. Nothing is retried here.

use std::path::Path;
use std::sync::Arc;

use super::error::{FsError, FsResult};
use crate::storage::{BlobMeta, ObjectStore, Precondition};

#[derive(Clone)]
pub struct BlobSync {
    store: Arc<dyn ObjectStore>,
}

impl BlobSync {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Current generation of `key` as a precondition: pins an existing object,
    /// or requires that it still does not exist.
    pub async fn observe(&self, key: &str) -> FsResult<Precondition> {
        let meta = self.store.get_blob(key).await?;
        Ok(Precondition::observed(meta.as_ref()))
    }

    pub async fn download(&self, key: &str, local_path: &Path) -> FsResult<()> {
        self.store.download_to_file(key, local_path).await?;
        Ok(())
    }

    pub async fn upload(
        &self,
        key: &str,
        local_path: &Path,
        expected: Precondition,
    ) -> FsResult<BlobMeta> {
        self.store
            .upload_from_file(key, local_path, expected)
            .await
            .map_err(|e| FsError::from_store(e, expected))
    }

    pub async fn upload_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        expected: Precondition,
    ) -> FsResult<BlobMeta> {
        self.store
            .upload_from_bytes(key, data, expected)
            .await
            .map_err(|e| FsError::from_store(e, expected))
    }

    pub async fn delete(&self, key: &str, expected: Precondition) -> FsResult<()> {
        self.store.delete(key, expected).await.map_err(|e| FsError::from_store(e, expected))
    }

    /// Delete whatever generation is current right now. The precondition only
    /// guards the window between the metadata read and the delete.
    pub async fn delete_current(&self, key: &str) -> FsResult<()> {
        match self.store.get_blob(key).await? {
            Some(meta) => self.delete(key, Precondition::observed(Some(&meta))).await,
            None => Err(FsError::NotFound(key.to_string())),
        }
    }

    /// Server-side copy that refuses to overwrite an existing destination.
    pub async fn copy(&self, src_key: &str, dst_key: &str) -> FsResult<BlobMeta> {
        self.store
            .copy_blob(src_key, dst_key, Precondition::DoesNotExist)
            .await
            .map_err(|e| FsError::from_store(e, Precondition::DoesNotExist))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Generation, MemoryStore, MockObjectStore, StoreError};
    use mockall::predicate::*;

    #[tokio::test]
    async fn test_upload_conflict_on_existing_object() {
        let store = Arc::new(MemoryStore::new());
        store.upload_from_bytes("a.txt", b"original".to_vec(), Precondition::None).await.unwrap();
        let sync = BlobSync::new(store.clone());

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, b"replacement").unwrap();

        let err = sync.upload("a.txt", &local, Precondition::DoesNotExist).await.unwrap_err();
        assert!(matches!(err, FsError::Conflict { expected: Precondition::DoesNotExist, .. }));
        assert_eq!(store.contents("a.txt").unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_delete_with_stale_generation() {
        let store = Arc::new(MemoryStore::new());
        let first =
            store.upload_from_bytes("a.txt", b"1".to_vec(), Precondition::None).await.unwrap();
        store.upload_from_bytes("a.txt", b"2".to_vec(), Precondition::None).await.unwrap();
        let sync = BlobSync::new(store.clone());

        let err = sync
            .delete("a.txt", Precondition::GenerationMatch(first.generation))
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Conflict { .. }));
        assert!(store.contents("a.txt").is_some());
    }

    #[tokio::test]
    async fn test_delete_current() {
        let store = Arc::new(MemoryStore::new());
        store.upload_from_bytes("a.txt", b"1".to_vec(), Precondition::None).await.unwrap();
        let sync = BlobSync::new(store.clone());

        sync.delete_current("a.txt").await.unwrap();
        assert!(store.contents("a.txt").is_none());
        assert!(sync.delete_current("a.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_copy_refuses_existing_destination() {
        let mut mock = MockObjectStore::new();
        mock.expect_copy_blob()
            .with(eq("src.txt"), eq("dst.txt"), eq(Precondition::DoesNotExist))
            .times(1)
            .returning(|_, dst, _| Err(StoreError::PreconditionFailed(dst.to_string())));
        let sync = BlobSync::new(Arc::new(mock));

        let err = sync.copy("src.txt", "dst.txt").await.unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[tokio::test]
    async fn test_observe() {
        let mut mock = MockObjectStore::new();
        mock.expect_get_blob().with(eq("missing.txt")).returning(|_| Ok(None));
        mock.expect_get_blob().with(eq("present.txt")).returning(|key| {
            Ok(Some(BlobMeta {
                key: key.to_string(),
                size: 0,
                updated: chrono::Utc::now(),
                generation: Generation(9),
            }))
        });
        let sync = BlobSync::new(Arc::new(mock));

        assert_eq!(sync.observe("missing.txt").await.unwrap(), Precondition::DoesNotExist);
        assert_eq!(
            sync.observe("present.txt").await.unwrap(),
            Precondition::GenerationMatch(Generation(9))
        );
    }

    #[tokio::test]
    async fn test_transport_errors_pass_through() {
        let mut mock = MockObjectStore::new();
        mock.expect_delete()
            .returning(|_, _| Err(StoreError::Transport("connection reset".to_string())));
        let sync = BlobSync::new(Arc::new(mock));

        let err = sync.delete("a.txt", Precondition::None).await.unwrap_err();
        assert!(matches!(err, FsError::Store(StoreError::Transport(_))));
    }
}
