// FUSE interface implementation
//
// Exposes a bucket as a POSIX filesystem: the backend maps operations onto
// objects, the adapter maps FUSE callbacks onto the backend.

pub mod adapter;
pub mod backend;
pub mod interface;
pub mod mount;

pub use adapter::FuseAdapter;
pub use backend::BucketBackend;
pub use interface::{
    DirEntry, FileAttr, FileType, FilesystemInterface, FsError, FsResult, Owner, SetAttr, StatFs,
};
pub use mount::{MountOptions, mount, unmount};
