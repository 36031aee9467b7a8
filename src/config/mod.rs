use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::gcs::DEFAULT_ENDPOINT;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub fuse: FuseConfig,
    pub staging: StagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub bucket: String,
    /// File holding an OAuth2 bearer token for the bucket's account.
    pub credentials: Option<PathBuf>,
    /// Inline bearer token; takes precedence over `credentials`.
    pub access_token: Option<String>,
    pub endpoint: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuseConfig {
    pub mount_point: String,
    pub allow_other: bool,
    pub auto_unmount: bool,
    pub read_only: bool,
    pub fsname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Parent of the per-handle scratch directories; system temp dir when unset.
    pub scratch_root: Option<PathBuf>,
    pub conflict_policy: ConflictPolicy,
}

/// What `release` does when the object changed since the handle staged it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Surface the conflict to the caller.
    Fail,
    /// Re-read the object's generation once and retry the preconditioned upload.
    #[default]
    Refresh,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            credentials: None,
            access_token: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            mount_point: "/mnt/bucketfs".to_string(),
            allow_other: false,
            auto_unmount: true,
            read_only: false,
            fsname: "bucketfs".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file and `BUCKETFS__*` environment
    /// variables (e.g. `BUCKETFS__STORE__BUCKET`).
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        builder = match file {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("bucketfs").required(false)),
        };
        let config = builder
            .add_source(
                config::Environment::with_prefix("BUCKETFS")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
