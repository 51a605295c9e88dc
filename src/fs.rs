//! Filesystem seam used by the operation executor
//!
//! Every mutation the executor performs goes through `FileSystem`, so tests can inject
//! faults (a rename that reports a cross-device error, a compensation that fails)
//! without touching the saga logic.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::Path;

pub trait FileSystem: Send + Sync {
    /// Metadata without following a final symlink. Never creates anything.
    fn metadata(&self, path: &Path) -> io::Result<Metadata>;

    fn exists(&self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy a regular file, failing with `AlreadyExists` if `to` exists
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64>;

    fn create_dir(&self, path: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    fn is_dir_empty(&self, path: &Path) -> io::Result<bool>;
}

/// The real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        fs::symlink_metadata(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let mut reader = File::open(from)?;
        let permissions = reader.metadata()?.permissions();
        let mut writer = OpenOptions::new().write(true).create_new(true).open(to)?;

        let copied = io::copy(&mut reader, &mut writer)
            .and_then(|n| {
                writer.sync_all()?;
                Ok(n)
            })
            .and_then(|n| fs::set_permissions(to, permissions).map(|()| n));

        if copied.is_err() {
            drop(writer);
            discard_partial_copy(to);
        }
        copied
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn is_dir_empty(&self, path: &Path) -> io::Result<bool> {
        Ok(fs::read_dir(path)?.next().is_none())
    }
}

/// Remove a copy that did not complete. A copy that cannot be removed is logged; the
/// caller still reports the original failure.
fn discard_partial_copy(path: &Path) {
    if let Err(cleanup) = fs::remove_file(path) {
        log::error!(
            "Could not remove partial copy '{}': {}",
            path.display(),
            cleanup
        );
    }
}
