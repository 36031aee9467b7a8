// FUSE mount management
//
// Provides functions to mount and unmount a bucket via FUSE.

use super::{BucketBackend, FuseAdapter};
use crate::config::{Config, FuseConfig};
use crate::storage::ObjectStore;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Mount options for FUSE filesystem
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Allow other users to access the filesystem
    pub allow_other: bool,

    /// Mount as read-only
    pub read_only: bool,

    /// Filesystem name (for mtab)
    pub fsname: Option<String>,

    /// Auto-unmount on process exit
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self::from(&FuseConfig::default())
    }
}

impl From<&FuseConfig> for MountOptions {
    fn from(config: &FuseConfig) -> Self {
        Self {
            allow_other: config.allow_other,
            read_only: config.read_only,
            fsname: Some(config.fsname.clone()),
            auto_unmount: config.auto_unmount,
        }
    }
}

impl MountOptions {
    /// Convert to fuser mount options
    fn to_fuser_options(&self) -> Vec<fuser::MountOption> {
        let mut options = Vec::new();

        if self.allow_other {
            options.push(fuser::MountOption::AllowOther);
        }

        if self.read_only {
            options.push(fuser::MountOption::RO);
        }

        if let Some(ref fsname) = self.fsname {
            options.push(fuser::MountOption::FSName(fsname.clone()));
        }

        // fusermount refuses auto_unmount without allow_other
        if self.auto_unmount && self.allow_other {
            options.push(fuser::MountOption::AutoUnmount);
        }

        options
    }
}

/// Mount a bucket via FUSE at `config.fuse.mount_point`.
///
/// The returned session keeps the filesystem mounted until dropped.
pub fn mount(store: Arc<dyn ObjectStore>, config: &Config) -> Result<fuser::BackgroundSession> {
    let mountpoint = Path::new(&config.fuse.mount_point);

    if !mountpoint.exists() {
        anyhow::bail!("Mount point does not exist: {}", mountpoint.display());
    }

    if !mountpoint.is_dir() {
        anyhow::bail!("Mount point is not a directory: {}", mountpoint.display());
    }

    if let Some(scratch) = &config.staging.scratch_root {
        std::fs::create_dir_all(scratch)
            .with_context(|| format!("Failed to create scratch root {}", scratch.display()))?;
    }

    let backend = Arc::new(BucketBackend::new(store, &config.staging));
    let adapter = FuseAdapter::new(backend).context("Failed to create FUSE runtime")?;
    let fuser_options = MountOptions::from(&config.fuse).to_fuser_options();

    tracing::info!(
        bucket = %config.store.bucket,
        mountpoint = %mountpoint.display(),
        "Mounting bucket"
    );

    let session = fuser::spawn_mount2(adapter, mountpoint, &fuser_options)
        .context("Failed to mount filesystem")?;

    tracing::info!("Filesystem mounted successfully");

    Ok(session)
}

/// Unmount a FUSE filesystem
///
/// Dropping the BackgroundSession unmounts too; this is for a mount left
/// behind by another process.
pub fn unmount(mountpoint: impl AsRef<Path>) -> Result<()> {
    let mountpoint = mountpoint.as_ref();

    tracing::info!("Unmounting filesystem at {}", mountpoint.display());

    #[cfg(target_os = "linux")]
    let mut command = std::process::Command::new("fusermount");
    #[cfg(target_os = "linux")]
    command.arg("-u");

    #[cfg(not(target_os = "linux"))]
    let mut command = std::process::Command::new("umount");

    let output = command.arg(mountpoint).output().context("Failed to execute unmount")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Failed to unmount: {}", stderr);
    }

    tracing::info!("Filesystem unmounted successfully");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_options_default() {
        let options = MountOptions::default();
        assert!(!options.allow_other);
        assert!(!options.read_only);
        assert_eq!(options.fsname, Some("bucketfs".to_string()));
        assert!(options.auto_unmount);
    }

    #[test]
    fn test_mount_options_to_fuser() {
        let options = MountOptions {
            allow_other: true,
            read_only: true,
            fsname: Some("test".to_string()),
            auto_unmount: true,
        };

        let fuser_options = options.to_fuser_options();

        assert!(fuser_options.contains(&fuser::MountOption::AllowOther));
        assert!(fuser_options.contains(&fuser::MountOption::RO));
        assert!(fuser_options.contains(&fuser::MountOption::FSName("test".to_string())));
        assert!(fuser_options.contains(&fuser::MountOption::AutoUnmount));
    }

    #[test]
    fn test_auto_unmount_needs_allow_other() {
        let options = MountOptions::default();
        assert!(!options.to_fuser_options().contains(&fuser::MountOption::AutoUnmount));
    }

    #[test]
    fn test_mount_rejects_missing_mountpoint() {
        let mut config = Config::default();
        config.fuse.mount_point = "/definitely/not/here".into();
        let store = Arc::new(crate::storage::MemoryStore::new());
        let Err(err) = mount(store, &config) else {
            panic!("mounted at a missing mount point");
        };
        assert!(err.to_string().contains("does not exist"));
    }
}
