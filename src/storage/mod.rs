pub mod error;
pub mod gcs;
pub mod memory;
pub mod models;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use gcs::GcsStore;
pub use memory::{MemoryStore, StoreOp};
pub use models::*;
#[cfg(any(test, feature = "mockall"))]
pub use traits::MockObjectStore;
pub use traits::ObjectStore;
