use thiserror::Error;

use crate::storage::{Precondition, StoreError};

pub type FsResult<T> = Result<T, FsError>;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A generation precondition did not hold: another writer got there first.
    #[error("Concurrent modification of {key} (expected {expected:?})")]
    Conflict { key: String, expected: Precondition },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unknown file handle: {0}")]
    InvalidHandle(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl FsError {
    /// Attach the precondition that was sent, so the errno can tell
    /// "already exists" apart from "changed underneath us".
    pub fn from_store(err: StoreError, expected: Precondition) -> Self {
        match err {
            StoreError::PreconditionFailed(key) => FsError::Conflict { key, expected },
            other => other.into(),
        }
    }

    /// Convert to POSIX errno
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::PermissionDenied(_) => libc::EACCES,
            FsError::Conflict { expected: Precondition::DoesNotExist, .. } => libc::EEXIST,
            FsError::Conflict { .. } => libc::EBUSY,
            FsError::NotSupported(_) => libc::ENOTSUP,
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::InvalidHandle(_) => libc::EBADF,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::Store(_) => libc::EIO,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => FsError::NotFound(key),
            StoreError::PermissionDenied(key) => FsError::PermissionDenied(key),
            StoreError::PreconditionFailed(key) => {
                FsError::Conflict { key, expected: Precondition::None }
            }
            StoreError::Io(e) => FsError::Io(e),
            other => FsError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Generation;

    #[test]
    fn test_not_found_error() {
        let err = FsError::NotFound("/test/path".to_string());
        assert_eq!(err.to_string(), "Path not found: /test/path");
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_conflict_on_create_is_eexist() {
        let err = FsError::from_store(
            StoreError::PreconditionFailed("a.txt".to_string()),
            Precondition::DoesNotExist,
        );
        assert!(matches!(err, FsError::Conflict { .. }));
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[test]
    fn test_conflict_on_generation_is_ebusy() {
        let err = FsError::from_store(
            StoreError::PreconditionFailed("a.txt".to_string()),
            Precondition::GenerationMatch(Generation(3)),
        );
        assert_eq!(err.to_errno(), libc::EBUSY);
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(FsError::from(StoreError::NotFound("k".into())).is_not_found());
        let denied = FsError::from(StoreError::PermissionDenied("k".into()));
        assert_eq!(denied.to_errno(), libc::EACCES);
        assert_eq!(
            FsError::from(StoreError::Http { status: 500, message: String::new() }).to_errno(),
            libc::EIO
        );
        assert_eq!(FsError::from(StoreError::Transport("reset".into())).to_errno(), libc::EIO);
    }

    #[test]
    fn test_unsupported_is_enotsup() {
        assert_eq!(FsError::NotSupported("symlink".into()).to_errno(), libc::ENOTSUP);
    }

    #[test]
    fn test_io_error_keeps_os_errno() {
        let err = FsError::from(std::io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(err.to_errno(), libc::ENOSPC);

        let err = FsError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_errno(), libc::EIO);
    }

    #[test]
    fn test_invalid_handle() {
        let err = FsError::InvalidHandle(7);
        assert_eq!(err.to_string(), "Unknown file handle: 7");
        assert_eq!(err.to_errno(), libc::EBADF);
    }
}
