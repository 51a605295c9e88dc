#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use filesaga::journal::{JournalRecord, JournalStore, MemoryStore};
use filesaga::{FileSystem, SagaError, StdFileSystem};
use walkdir::WalkDir;

/// Real filesystem with switchable faults
#[derive(Default)]
pub struct FaultyFs {
    inner: StdFileSystem,
    /// Every rename reports EXDEV, as if crossing a mount point
    pub cross_device: Mutex<bool>,
    /// Renames onto these paths fail with PermissionDenied
    pub deny_rename_to: Mutex<Vec<PathBuf>>,
}

impl FaultyFs {
    pub fn cross_device() -> Self {
        let fs = Self::default();
        *fs.cross_device.lock().unwrap() = true;
        fs
    }

    pub fn deny_rename_to(&self, path: impl Into<PathBuf>) {
        self.deny_rename_to.lock().unwrap().push(path.into());
    }
}

impl FileSystem for FaultyFs {
    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        self.inner.metadata(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.deny_rename_to.lock().unwrap().iter().any(|p| p == to) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected fault"));
        }
        if *self.cross_device.lock().unwrap() {
            #[cfg(unix)]
            return Err(io::Error::from_raw_os_error(18));
            #[cfg(windows)]
            return Err(io::Error::from_raw_os_error(17));
        }
        self.inner.rename(from, to)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        self.inner.copy_file(from, to)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_dir(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_dir_all(path)
    }

    fn is_dir_empty(&self, path: &Path) -> io::Result<bool> {
        self.inner.is_dir_empty(path)
    }
}

/// Switches for a `FlakyStore`, kept by the test after the store moves into a journal
#[derive(Default)]
pub struct StoreFaults {
    appends: AtomicUsize,
    /// 1-based number of the single append that fails
    fail_append: Mutex<Option<usize>>,
    fail_loads: AtomicBool,
}

impl StoreFaults {
    pub fn fail_append_number(&self, n: usize) {
        *self.fail_append.lock().unwrap() = Some(n);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }
}

/// In-memory journal store with injectable write and read failures
pub struct FlakyStore {
    inner: MemoryStore,
    faults: Arc<StoreFaults>,
}

impl FlakyStore {
    pub fn new() -> (Self, Arc<StoreFaults>) {
        let faults = Arc::new(StoreFaults::default());
        let store = Self {
            inner: MemoryStore::new(),
            faults: faults.clone(),
        };
        (store, faults)
    }
}

impl JournalStore for FlakyStore {
    fn append(&self, record: &JournalRecord) -> filesaga::Result<()> {
        let n = self.faults.appends.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.faults.fail_append.lock().unwrap() == Some(n) {
            return Err(SagaError::Journal(format!("injected failure on append {}", n)));
        }
        self.inner.append(record)
    }

    fn load(&self) -> filesaga::Result<Vec<JournalRecord>> {
        if self.faults.fail_loads.load(Ordering::SeqCst) {
            return Err(SagaError::Journal("injected read failure".to_string()));
        }
        self.inner.load()
    }

    fn describe(&self) -> String {
        "flaky in-memory journal".to_string()
    }
}

/// Relative path -> file contents (None for directories)
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let contents = if entry.file_type().is_dir() {
                None
            } else {
                Some(std::fs::read(entry.path()).unwrap())
            };
            (relative, contents)
        })
        .collect()
}
