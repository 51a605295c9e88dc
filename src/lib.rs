//! filesaga - journaled saga engine for atomic filesystem reorganization
//!
//! A batch of moves, copies, deletes and directory creations either happens completely
//! or is rolled back, even across a crash:
//!
//! ```text
//! planner ──► SagaCoordinator ──► CollisionResolver ──► OperationExecutor ──► filesystem
//!                   │                                         ▲
//!                   ▼                                         │ compensations
//!               Journal  ◄──────────── RecoveryManager ───────┘  (at startup)
//! ```
//!
//! Open a `SagaEngine`, run `recover_incomplete_transactions` once, then `execute`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub mod collision;
pub mod error;
pub mod executor;
pub mod fs;
pub mod journal;
pub mod recovery;
pub mod saga;
pub mod types;

pub use error::{FailureKind, OperationError, Result, SagaError};
pub use executor::OperationExecutor;
pub use fs::{FileSystem, StdFileSystem};
pub use journal::{Journal, JournalStatistics};
pub use recovery::{RecoveryManager, RecoveryResult};
pub use saga::{
    CommitResult, CompensationOutcome, ExecutionSummary, FailureReason, RollbackReport,
    SagaCoordinator, SagaOutcome, SagaTransaction, StepResult,
};
pub use types::{
    OperationRecord, OperationRequest, OperationStatus, OperationType, TransactionRecord,
    TransactionStatus, TxnId,
};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Journal file; survives restarts and must never be treated as a cache
    pub journal_path: PathBuf,
    /// Numbered names probed before falling back to a unique token
    pub max_collision_attempts: usize,
    /// Tag placed in delete-backup names (`name.<tag>-<txn>`)
    pub backup_tag: String,
    /// Remove delete-backups once their transaction commits
    pub purge_backups_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journal_path: PathBuf::from("./data/filesaga.journal"),
            max_collision_attempts: collision::DEFAULT_MAX_ATTEMPTS,
            backup_tag: executor::DEFAULT_BACKUP_TAG.to_string(),
            purge_backups_on_commit: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_collision_attempts == 0 {
            return Err(SagaError::Config(
                "max_collision_attempts must be at least 1".to_string(),
            ));
        }
        if self.backup_tag.is_empty() || self.backup_tag.contains(['/', '\\']) {
            return Err(SagaError::Config(format!(
                "backup_tag '{}' must be non-empty and contain no path separators",
                self.backup_tag
            )));
        }
        if self.journal_path.as_os_str().is_empty() {
            return Err(SagaError::Config("journal_path is empty".to_string()));
        }
        Ok(())
    }
}

/// Entry point for the application shell.
///
/// New transactions are refused with `SagaError::RecoveryPending` until
/// `recover_incomplete_transactions` has run to completion.
pub struct SagaEngine {
    coordinator: SagaCoordinator,
    recovery: RecoveryManager,
    recovery_lock: Mutex<()>,
    recovered: AtomicBool,
}

impl SagaEngine {
    /// Open the file journal named by `config` on the real filesystem
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let journal = Arc::new(Journal::open(&config.journal_path)?);
        log::info!("Journal: {}", journal.describe());
        Self::with_parts(config, journal, Arc::new(StdFileSystem))
    }

    /// Assemble an engine from an explicit journal handle and filesystem
    pub fn with_parts(config: Config, journal: Arc<Journal>, fs: Arc<dyn FileSystem>) -> Result<Self> {
        config.validate()?;
        let executor = Arc::new(OperationExecutor::new(
            fs,
            config.max_collision_attempts,
            config.backup_tag.clone(),
        ));
        let coordinator = SagaCoordinator::new(journal.clone(), executor.clone())
            .with_backup_purge(config.purge_backups_on_commit);
        let recovery = RecoveryManager::new(journal, executor);

        Ok(Self {
            coordinator,
            recovery,
            recovery_lock: Mutex::new(()),
            recovered: AtomicBool::new(false),
        })
    }

    /// Roll back whatever a previous session left unfinished.
    ///
    /// Only the first successful call does any work: after that every `active`
    /// transaction belongs to this process, and later calls return an empty list. If the
    /// journal cannot be read the engine stays gated and the call may be retried.
    pub fn recover_incomplete_transactions(&self) -> Result<Vec<RecoveryResult>> {
        let _guard = match self.recovery_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.is_ready() {
            log::debug!("Startup recovery already ran");
            return Ok(Vec::new());
        }
        let results = self.recovery.recover_incomplete_transactions()?;
        self.recovered.store(true, Ordering::Release);
        Ok(results)
    }

    pub fn is_ready(&self) -> bool {
        self.recovered.load(Ordering::Acquire)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(SagaError::RecoveryPending)
        }
    }

    pub fn begin(&self) -> Result<SagaTransaction<'_>> {
        self.ensure_ready()?;
        self.coordinator.begin()
    }

    pub fn execute(&self, operations: &[OperationRequest]) -> Result<SagaOutcome> {
        self.ensure_ready()?;
        self.coordinator.execute(operations)
    }

    /// `execute` on the blocking pool. Dropping the returned future (for example on a
    /// caller-side timeout) does not stop the saga; it still commits or fully rolls back.
    pub async fn execute_async(
        self: Arc<Self>,
        operations: Vec<OperationRequest>,
    ) -> Result<SagaOutcome> {
        tokio::task::spawn_blocking(move || self.execute(&operations))
            .await
            .map_err(|e| SagaError::Internal(format!("saga task failed: {}", e)))?
    }

    pub fn statistics(&self) -> Result<JournalStatistics> {
        self.coordinator.journal().get_statistics()
    }

    pub fn journal(&self) -> &Arc<Journal> {
        self.coordinator.journal()
    }
}
