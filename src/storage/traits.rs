use async_trait::async_trait;
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use std::path::Path;

use super::error::StoreResult;
use super::models::{BlobMeta, Listing, Precondition};

/// Whole-object blob API the filesystem is built on.
///
/// Keys are flat strings; "directories" only exist as a naming convention
/// (`/`-separated segments) plus optional zero-byte marker objects.
#[cfg_attr(any(test, feature = "mockall"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Fetch metadata, `None` when the object does not exist.
    async fn get_blob(&self, key: &str) -> StoreResult<Option<BlobMeta>>;

    async fn upload_from_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta>;

    async fn upload_from_file(
        &self,
        key: &str,
        local_path: &Path,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta>;

    /// Write the object's full content into `local_path`, replacing it.
    async fn download_to_file(&self, key: &str, local_path: &Path) -> StoreResult<()>;

    async fn delete(&self, key: &str, precondition: Precondition) -> StoreResult<()>;

    /// Server-side copy; `precondition` applies to the destination.
    async fn copy_blob(
        &self,
        src_key: &str,
        dst_key: &str,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta>;

    async fn list_blobs(&self, prefix: &str, delimiter: Option<char>) -> StoreResult<Listing>;
}
