//! Operation Executor
//!
//! Performs one physical filesystem action and, given what was recorded, its
//! compensating action:
//!
//! | type     | forward                                   | inverse                                  |
//! |----------|-------------------------------------------|------------------------------------------|
//! | `move`   | rename, or copy + delete across devices   | rename back, or copy back + delete       |
//! | `copy`   | exclusive copy                            | delete the copy (absent is fine)         |
//! | `delete` | rename to a same-directory backup         | rename the backup back                   |
//! | `mkdir`  | create missing directories                | remove the ones created, while empty     |
//!
//! Destinations of `move` and `copy` go through the collision resolver first, and the
//! resolved path is what the caller must journal. Inverses are idempotent: a step whose
//! compensation already happened (destination gone, original present) succeeds again,
//! which lets recovery re-run a rollback that was interrupted. An inverse never
//! overwrites an occupied original location.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::collision::{resolve_collision, DEFAULT_MAX_ATTEMPTS};
use crate::error::{is_cross_device, OperationError};
use crate::fs::{FileSystem, StdFileSystem};
use crate::types::{ExecutedOperation, OperationRequest, OperationType, TxnId};

type OpResult<T> = std::result::Result<T, OperationError>;

/// Default tag placed in delete-backup names
pub const DEFAULT_BACKUP_TAG: &str = "saga-backup";

pub struct OperationExecutor {
    fs: Arc<dyn FileSystem>,
    max_collision_attempts: usize,
    backup_tag: String,
}

impl Default for OperationExecutor {
    fn default() -> Self {
        Self::new(Arc::new(StdFileSystem), DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKUP_TAG)
    }
}

impl OperationExecutor {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        max_collision_attempts: usize,
        backup_tag: impl Into<String>,
    ) -> Self {
        Self {
            fs,
            max_collision_attempts,
            backup_tag: backup_tag.into(),
        }
    }

    pub fn filesystem(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Run the forward action of `request` on behalf of `txn_id`
    pub fn execute(&self, txn_id: TxnId, request: &OperationRequest) -> OpResult<ExecutedOperation> {
        match request.op_type {
            OperationType::Move => {
                let dest = self.required_destination(request)?;
                self.move_forward(&request.source, dest)
            }
            OperationType::Copy => {
                let dest = self.required_destination(request)?;
                self.copy_forward(&request.source, dest)
            }
            OperationType::Delete => self.delete_forward(txn_id, &request.source),
            OperationType::Mkdir => self.mkdir_forward(request.primary_path()),
        }
    }

    /// Undo a previously executed action
    pub fn compensate(&self, op: &ExecutedOperation) -> OpResult<()> {
        match op.op_type {
            OperationType::Move | OperationType::Delete => {
                let current = op.destination.as_deref().ok_or_else(|| {
                    OperationError::other(
                        op.op_type,
                        &op.source,
                        io::ErrorKind::InvalidInput,
                        "no recorded destination to restore from",
                    )
                })?;
                self.restore(op.op_type, current, &op.source)
            }
            OperationType::Copy => match op.destination.as_deref() {
                Some(dest) if self.fs.exists(dest) => self
                    .remove_entry(dest)
                    .map_err(|e| OperationError::new(OperationType::Copy, dest, e)),
                _ => Ok(()),
            },
            OperationType::Mkdir => self.mkdir_inverse(&op.source, op.destination.as_deref()),
        }
    }

    /// Remove the backup left by a committed `delete`. Returns the path removed, if any.
    pub fn purge_backup(&self, op: &ExecutedOperation) -> OpResult<Option<PathBuf>> {
        if op.op_type != OperationType::Delete {
            return Ok(None);
        }
        match op.destination.as_deref() {
            Some(backup) if self.fs.exists(backup) => {
                self.remove_entry(backup)
                    .map_err(|e| OperationError::new(OperationType::Delete, backup, e))?;
                Ok(Some(backup.to_path_buf()))
            }
            _ => Ok(None),
        }
    }

    /// Same-directory backup name for a deleted entry
    pub fn backup_path_for(&self, target: &Path, txn_id: TxnId) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}-{}", self.backup_tag, txn_id));
        target.with_file_name(name)
    }

    fn required_destination<'a>(&self, request: &'a OperationRequest) -> OpResult<&'a Path> {
        request.destination.as_deref().ok_or_else(|| {
            OperationError::other(
                request.op_type,
                &request.source,
                io::ErrorKind::InvalidInput,
                "destination is required",
            )
        })
    }

    fn require_exists(&self, op_type: OperationType, path: &Path) -> OpResult<()> {
        self.fs
            .metadata(path)
            .map(|_| ())
            .map_err(|e| OperationError::new(op_type, path, e))
    }

    fn move_forward(&self, source: &Path, desired: &Path) -> OpResult<ExecutedOperation> {
        self.require_exists(OperationType::Move, source)?;

        let mut retries = 0;
        loop {
            let dest = resolve_collision(self.filesystem(), desired, self.max_collision_attempts);
            let outcome = match self.fs.rename(source, &dest) {
                Err(e) if is_cross_device(&e) => {
                    log::debug!(
                        "Cross-device move '{}' -> '{}', falling back to copy",
                        source.display(),
                        dest.display()
                    );
                    self.relocate(source, &dest)
                }
                other => other,
            };

            match outcome {
                Ok(()) => {
                    return Ok(ExecutedOperation {
                        op_type: OperationType::Move,
                        source: source.to_path_buf(),
                        destination: Some(dest),
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists
                    && retries < self.max_collision_attempts =>
                {
                    retries += 1;
                }
                Err(e) => return Err(OperationError::new(OperationType::Move, &dest, e)),
            }
        }
    }

    fn copy_forward(&self, source: &Path, desired: &Path) -> OpResult<ExecutedOperation> {
        self.require_exists(OperationType::Copy, source)?;

        let mut retries = 0;
        loop {
            let dest = resolve_collision(self.filesystem(), desired, self.max_collision_attempts);
            match self.copy_entry(source, &dest) {
                Ok(()) => {
                    return Ok(ExecutedOperation {
                        op_type: OperationType::Copy,
                        source: source.to_path_buf(),
                        destination: Some(dest),
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists
                    && retries < self.max_collision_attempts =>
                {
                    retries += 1;
                }
                Err(e) => return Err(OperationError::new(OperationType::Copy, &dest, e)),
            }
        }
    }

    fn delete_forward(&self, txn_id: TxnId, target: &Path) -> OpResult<ExecutedOperation> {
        self.require_exists(OperationType::Delete, target)?;

        let backup = resolve_collision(
            self.filesystem(),
            &self.backup_path_for(target, txn_id),
            self.max_collision_attempts,
        );
        self.fs
            .rename(target, &backup)
            .map_err(|e| OperationError::new(OperationType::Delete, target, e))?;

        Ok(ExecutedOperation {
            op_type: OperationType::Delete,
            source: target.to_path_buf(),
            destination: Some(backup),
        })
    }

    fn mkdir_forward(&self, path: &Path) -> OpResult<ExecutedOperation> {
        match self.fs.metadata(path) {
            Ok(meta) if meta.is_dir() => {
                return Ok(ExecutedOperation {
                    op_type: OperationType::Mkdir,
                    source: path.to_path_buf(),
                    destination: None,
                })
            }
            Ok(_) => {
                return Err(OperationError::other(
                    OperationType::Mkdir,
                    path,
                    io::ErrorKind::AlreadyExists,
                    "a non-directory occupies the path",
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(OperationError::new(OperationType::Mkdir, path, e)),
        }

        // Missing components, leaf first
        let mut missing = Vec::new();
        let mut cursor = Some(path);
        while let Some(dir) = cursor {
            if dir.as_os_str().is_empty() || self.fs.exists(dir) {
                break;
            }
            missing.push(dir.to_path_buf());
            cursor = dir.parent();
        }

        let mut created: Vec<PathBuf> = Vec::new();
        for dir in missing.iter().rev() {
            match self.fs.create_dir(dir) {
                Ok(()) => created.push(dir.clone()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && self.fs.is_dir(dir) => {}
                Err(e) => {
                    for done in created.iter().rev() {
                        if let Err(undo) = self.fs.remove_dir(done) {
                            log::warn!("Could not remove '{}' after failed mkdir: {}", done.display(), undo);
                        }
                    }
                    return Err(OperationError::new(OperationType::Mkdir, dir, e));
                }
            }
        }

        Ok(ExecutedOperation {
            op_type: OperationType::Mkdir,
            source: path.to_path_buf(),
            destination: created.into_iter().next(),
        })
    }

    /// Move `current` back to `original` without ever overwriting `original`
    fn restore(&self, op_type: OperationType, current: &Path, original: &Path) -> OpResult<()> {
        let current_exists = self.fs.exists(current);
        let original_exists = self.fs.exists(original);

        if !current_exists && original_exists {
            log::debug!("'{}' already restored", original.display());
            return Ok(());
        }
        if !current_exists {
            return Err(OperationError::other(
                op_type,
                current,
                io::ErrorKind::NotFound,
                "nothing left to restore",
            ));
        }
        if original_exists {
            return Err(OperationError::other(
                op_type,
                original,
                io::ErrorKind::AlreadyExists,
                "original location is occupied",
            ));
        }

        match self.fs.rename(current, original) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => self
                .relocate(current, original)
                .map_err(|e| OperationError::new(op_type, current, e)),
            Err(e) => Err(OperationError::new(op_type, current, e)),
        }
    }

    fn mkdir_inverse(&self, leaf: &Path, topmost: Option<&Path>) -> OpResult<()> {
        let top = match topmost {
            Some(top) if leaf.starts_with(top) => top,
            Some(_) => leaf,
            None => return Ok(()),
        };

        let mut cursor = Some(leaf);
        while let Some(dir) = cursor {
            match self.fs.metadata(dir) {
                Ok(meta) if meta.is_dir() => {
                    let empty = self
                        .fs
                        .is_dir_empty(dir)
                        .map_err(|e| OperationError::new(OperationType::Mkdir, dir, e))?;
                    if !empty {
                        log::debug!("Leaving non-empty directory '{}' in place", dir.display());
                        return Ok(());
                    }
                    self.fs
                        .remove_dir(dir)
                        .map_err(|e| OperationError::new(OperationType::Mkdir, dir, e))?;
                }
                Ok(_) => return Ok(()),
                Err(_) => {}
            }
            if dir == top {
                break;
            }
            cursor = dir.parent();
        }
        Ok(())
    }

    /// Copy then delete, for renames that cannot cross a filesystem boundary.
    /// If the source cannot be removed the copy is dropped again.
    fn relocate(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.copy_entry(from, to)?;
        if let Err(e) = self.remove_entry(from) {
            if let Err(cleanup) = self.remove_entry(to) {
                log::error!(
                    "Could not remove partial copy '{}' after failed move: {}",
                    to.display(),
                    cleanup
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn copy_entry(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.fs.metadata(from)?.is_dir() {
            self.copy_tree(from, to)
        } else {
            self.fs.copy_file(from, to).map(|_| ())
        }
    }

    fn copy_tree(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.fs.create_dir(to)?;

        let copied = (|| -> io::Result<()> {
            for entry in WalkDir::new(from).min_depth(1) {
                let entry = entry?;
                let relative = entry
                    .path()
                    .strip_prefix(from)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                let target = to.join(relative);
                if entry.file_type().is_dir() {
                    self.fs.create_dir(&target)?;
                } else {
                    self.fs.copy_file(entry.path(), &target)?;
                }
            }
            Ok(())
        })();

        if copied.is_err() {
            if let Err(cleanup) = self.fs.remove_dir_all(to) {
                log::error!("Could not remove partial tree '{}': {}", to.display(), cleanup);
            }
        }
        copied
    }

    fn remove_entry(&self, path: &Path) -> io::Result<()> {
        if self.fs.metadata(path)?.is_dir() {
            self.fs.remove_dir_all(path)
        } else {
            self.fs.remove_file(path)
        }
    }
}
