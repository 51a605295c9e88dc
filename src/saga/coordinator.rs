//! Saga Coordinator
//!
//! Drives an ordered list of operations through the executor, journaling each step
//! after it succeeds. The first failure stops the run; every journaled step is then
//! compensated in reverse order and the transaction is marked rolled back.
//!
//! The coordinator does not impose a timeout and has no cancellation hook: once
//! `execute` starts it ends in either a commit or a full rollback. Operations within one
//! transaction run strictly in order; separate transactions may run concurrently on
//! other threads and share the journal.

use std::sync::Arc;

use crate::error::Result;
use crate::executor::OperationExecutor;
use crate::journal::Journal;
use crate::types::OperationRequest;
use super::outcome::SagaOutcome;
use super::transaction::SagaTransaction;

pub struct SagaCoordinator {
    journal: Arc<Journal>,
    executor: Arc<OperationExecutor>,
    purge_backups_on_commit: bool,
}

impl SagaCoordinator {
    pub fn new(journal: Arc<Journal>, executor: Arc<OperationExecutor>) -> Self {
        Self {
            journal,
            executor,
            purge_backups_on_commit: true,
        }
    }

    /// Keep delete-backups after commit instead of purging them
    pub fn with_backup_purge(mut self, purge: bool) -> Self {
        self.purge_backups_on_commit = purge;
        self
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Start an imperative transaction
    pub fn begin(&self) -> Result<SagaTransaction<'_>> {
        SagaTransaction::begin(&self.journal, &self.executor, self.purge_backups_on_commit)
    }

    /// Run `operations` as one atomic unit.
    ///
    /// Returns `Err` only when the transaction could not be started. Every other failure,
    /// including journal write failures mid-run, comes back as `SagaOutcome::RolledBack`.
    pub fn execute(&self, operations: &[OperationRequest]) -> Result<SagaOutcome> {
        let mut txn = self.begin()?;
        for request in operations {
            if txn.apply(request).is_err() {
                break;
            }
        }
        // Rolls back instead when a step failed
        Ok(txn.commit())
    }
}
