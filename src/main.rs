use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bucketfs::config::Config;
use bucketfs::fuse;
use bucketfs::storage::GcsStore;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mount a Google Cloud Storage bucket as a local filesystem.
#[derive(Debug, Parser)]
#[command(name = "bucketfs", version, about)]
struct Cli {
    /// Bucket to mount
    bucket: String,

    /// Directory to mount the bucket at
    mountpoint: PathBuf,

    /// File holding a bearer token for the bucket's account
    #[arg(long, env = "BUCKETFS_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Configuration file (defaults to ./bucketfs.{toml,yaml,json} when present)
    #[arg(long, env = "BUCKETFS_CONFIG")]
    config: Option<PathBuf>,

    /// Let other users access the mount
    #[arg(long)]
    allow_other: bool,

    /// Parent directory for per-handle scratch copies
    #[arg(long, env = "BUCKETFS_SCRATCH_ROOT")]
    scratch_root: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        config.store.bucket = self.bucket;
        config.fuse.mount_point = self.mountpoint.to_string_lossy().into_owned();
        if let Some(credentials) = self.credentials {
            config.store.credentials = Some(credentials);
        }
        if self.allow_other {
            config.fuse.allow_other = true;
        }
        if let Some(scratch_root) = self.scratch_root {
            config.staging.scratch_root = Some(scratch_root);
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bucketfs=info,warn".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);

    tracing::info!(bucket = %config.store.bucket, "Starting bucketfs");

    let store = GcsStore::new(&config.store).context("Failed to create storage client")?;
    let session = fuse::mount(Arc::new(store), &config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create signal runtime")?;
    runtime.block_on(tokio::signal::ctrl_c()).context("Failed to wait for Ctrl-C")?;

    tracing::info!("Interrupted, unmounting");
    drop(session);
    Ok(())
}
