pub mod attributes;
pub mod blob_sync;
pub mod error;
pub mod listing;
pub mod path;

pub use attributes::{AttributeResolver, Attributes, FileType, Owner};
pub use blob_sync::BlobSync;
pub use error::{FsError, FsResult};
pub use listing::{Children, DirectoryLister};
