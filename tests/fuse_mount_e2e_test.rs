// FUSE mount E2E tests - requires /dev/fuse and fusermount
// Run with: cargo test --test fuse_mount_e2e_test -- --ignored

use anyhow::Result;
use bucketfs::config::Config;
use bucketfs::fuse::mount;
use bucketfs::storage::{MemoryStore, ObjectStore, Precondition};
use std::fs;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Mounted {
    store: Arc<MemoryStore>,
    mountpoint: TempDir,
    _scratch: TempDir,
    _session: fuser::BackgroundSession,
}

fn mount_memory_bucket() -> Result<Mounted> {
    let store = Arc::new(MemoryStore::new());
    let mountpoint = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;

    let mut config = Config::default();
    config.store.bucket = "e2e".to_string();
    config.fuse.mount_point = mountpoint.path().to_string_lossy().into_owned();
    config.staging.scratch_root = Some(scratch.path().to_path_buf());

    let session = mount(store.clone(), &config)?;
    // Give the kernel a moment to finish the mount handshake.
    std::thread::sleep(Duration::from_millis(200));

    Ok(Mounted { store, mountpoint, _scratch: scratch, _session: session })
}

#[test]
#[ignore] // Requires FUSE permissions
fn test_write_and_read_back_through_mount() -> Result<()> {
    let m = mount_memory_bucket()?;
    let path = m.mountpoint.path().join("hello.txt");

    fs::File::create(&path)?.write_all(b"hello from fuse")?;
    assert_eq!(m.store.contents("hello.txt").as_deref(), Some(&b"hello from fuse"[..]));

    let mut content = String::new();
    fs::File::open(&path)?.read_to_string(&mut content)?;
    assert_eq!(content, "hello from fuse");
    assert_eq!(fs::metadata(&path)?.len(), 15);
    Ok(())
}

#[test]
#[ignore] // Requires FUSE permissions
fn test_directories_through_mount() -> Result<()> {
    let m = mount_memory_bucket()?;
    let root = m.mountpoint.path();

    fs::create_dir(root.join("docs"))?;
    fs::write(root.join("docs/a.txt"), b"a")?;
    assert!(fs::metadata(root.join("docs"))?.is_dir());

    let mut names: Vec<String> = fs::read_dir(root.join("docs"))?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    names.sort();
    assert_eq!(names, vec!["a.txt"]);

    fs::rename(root.join("docs/a.txt"), root.join("docs/b.txt"))?;
    assert!(m.store.contents("docs/b.txt").is_some());
    assert!(m.store.contents("docs/a.txt").is_none());

    fs::remove_file(root.join("docs/b.txt"))?;
    fs::remove_dir(root.join("docs"))?;
    assert!(m.store.keys().is_empty());
    Ok(())
}

#[test]
#[ignore] // Requires FUSE permissions
fn test_existing_objects_are_visible() -> Result<()> {
    let m = mount_memory_bucket()?;
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    runtime.block_on(m.store.upload_from_bytes(
        "reports/q1.csv",
        b"a,b\n1,2\n".to_vec(),
        Precondition::None,
    ))?;

    let root = m.mountpoint.path();
    assert!(fs::metadata(root.join("reports"))?.is_dir());
    assert_eq!(fs::read(root.join("reports/q1.csv"))?, b"a,b\n1,2\n");
    assert_eq!(
        std::os::unix::fs::symlink("reports/q1.csv", root.join("link")).unwrap_err().raw_os_error(),
        Some(libc::ENOTSUP)
    );
    Ok(())
}
