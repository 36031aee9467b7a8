use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Faults reported by an object store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The `ifGenerationMatch` precondition did not hold (someone else wrote first).
    #[error("Precondition failed for object: {0}")]
    PreconditionFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Store returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response from store: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}
