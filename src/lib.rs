//! bucketfs - mount an object-storage bucket as a FUSE filesystem.
//!
//! The crate translates filesystem calls (paths, handles, attributes,
//! renames) onto a flat key/value blob store and stages object content in
//! per-handle scratch files so byte-range I/O works against whole-object
//! transfers.

pub mod config;
pub mod fs;
pub mod fuse;
pub mod staging;
pub mod storage;
