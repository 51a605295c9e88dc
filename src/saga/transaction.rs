//! Imperative saga transaction: `begin` → steps → `commit` / `rollback`
//!
//! This is the one state machine behind both usage patterns. The batch form
//! (`SagaCoordinator::execute`) drives a `SagaTransaction` over a list of requests.
//!
//! ```text
//! Executing(step N) → Committed
//!          └────────→ RollingBack → RolledBack
//! ```

use std::path::PathBuf;

use crate::error::{FailureKind, Result, SagaError};
use crate::executor::OperationExecutor;
use crate::journal::Journal;
use crate::types::{OperationRequest, OperationType, TxnId};
use super::outcome::{
    CommitResult, CompensationOutcome, FailureReason, RollbackReport, SagaOutcome, StepResult,
};
use super::rollback::{self, JournaledStep};

/// Where a transaction is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SagaState {
    /// Last step attempted (0 before the first)
    Executing { step: u32 },
    RollingBack,
    Committed,
    RolledBack,
}

impl SagaState {
    fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Committed | SagaState::RolledBack)
    }
}

pub struct SagaTransaction<'a> {
    journal: &'a Journal,
    executor: &'a OperationExecutor,
    purge_backups_on_commit: bool,
    id: TxnId,
    next_step: u32,
    state: SagaState,
    steps: Vec<StepResult>,
    journaled: Vec<JournaledStep>,
    failure: Option<FailureReason>,
    /// Undo of a step whose journal record could not be written
    unjournaled: Option<CompensationOutcome>,
}

impl<'a> SagaTransaction<'a> {
    pub(crate) fn begin(
        journal: &'a Journal,
        executor: &'a OperationExecutor,
        purge_backups_on_commit: bool,
    ) -> Result<Self> {
        let id = journal.begin_transaction()?;
        log::info!("Transaction {} started", id);
        Ok(Self {
            journal,
            executor,
            purge_backups_on_commit,
            id,
            next_step: 1,
            state: SagaState::Executing { step: 0 },
            steps: Vec::new(),
            journaled: Vec::new(),
            failure: None,
            unjournaled: None,
        })
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Run one step and journal it.
    ///
    /// After a failed step the transaction accepts no further steps; `commit` and
    /// `rollback` both roll it back.
    pub fn apply(&mut self, request: &OperationRequest) -> Result<StepResult> {
        if !matches!(self.state, SagaState::Executing { .. }) {
            return Err(SagaError::Transaction(format!(
                "Transaction {} no longer accepts steps ({:?})",
                self.id, self.state
            )));
        }
        if let Some(failure) = &self.failure {
            return Err(SagaError::Transaction(format!(
                "Transaction {} already failed at step {:?}: {}",
                self.id, failure.failed_step, failure.message
            )));
        }

        let step = self.next_step;
        self.state = SagaState::Executing { step };

        let executed = match self.executor.execute(self.id, request) {
            Ok(executed) => executed,
            Err(e) => {
                let err = SagaError::from(e);
                self.fail(step, request, &err);
                return Err(err);
            }
        };

        let operation_id = match self.journal.record_operation(self.id, step, &executed) {
            Ok(id) => id,
            Err(journal_err) => {
                // Nothing may stay on disk that the journal does not know about
                let undo = self.executor.compensate(&executed).err().map(|undo| {
                    log::error!(
                        "Transaction {}: step {} could not be journaled or undone: {}",
                        self.id,
                        step,
                        undo
                    );
                    undo.to_string()
                });
                self.unjournaled = Some(CompensationOutcome {
                    step_number: step,
                    operation_id: 0,
                    operation_type: executed.op_type,
                    source: executed.source,
                    destination: executed.destination,
                    error: undo,
                });
                self.fail(step, request, &journal_err);
                return Err(journal_err);
            }
        };

        let result = StepResult {
            step_number: step,
            operation_id,
            operation_type: executed.op_type,
            source: executed.source.clone(),
            requested_destination: request.destination.clone(),
            destination: executed.destination.clone(),
        };
        self.journaled.push(JournaledStep {
            operation_id,
            step_number: step,
            operation: executed,
        });
        self.steps.push(result.clone());
        self.next_step += 1;
        Ok(result)
    }

    pub fn move_file(&mut self, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Result<StepResult> {
        self.apply(&OperationRequest::move_file(source, destination))
    }

    pub fn copy_file(&mut self, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Result<StepResult> {
        self.apply(&OperationRequest::copy_file(source, destination))
    }

    pub fn delete(&mut self, target: impl Into<PathBuf>) -> Result<StepResult> {
        self.apply(&OperationRequest::delete(target))
    }

    pub fn mkdir(&mut self, path: impl Into<PathBuf>) -> Result<StepResult> {
        self.apply(&OperationRequest::mkdir(path))
    }

    /// Commit, then purge delete-backups. Rolls back instead if a step failed or the
    /// commit record cannot be written.
    pub fn commit(mut self) -> SagaOutcome {
        if let Some(failure) = self.failure.take() {
            return SagaOutcome::RolledBack(self.roll_back_with(failure));
        }

        if let Err(e) = self.journal.commit_transaction(self.id) {
            log::error!("Transaction {}: commit could not be journaled: {}", self.id, e);
            let failure = FailureReason {
                message: e.to_string(),
                kind: FailureKind::Journal,
                failed_step: None,
                operation: None,
            };
            return SagaOutcome::RolledBack(self.roll_back_with(failure));
        }
        self.state = SagaState::Committed;

        let mut purged_backups = Vec::new();
        let mut retained_backups = Vec::new();
        if self.purge_backups_on_commit {
            for step in self
                .journaled
                .iter()
                .filter(|s| s.operation.op_type == OperationType::Delete)
            {
                match self.executor.purge_backup(&step.operation) {
                    Ok(Some(path)) => purged_backups.push(path),
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!(
                            "Transaction {}: backup of step {} left in place: {}",
                            self.id,
                            step.step_number,
                            e
                        );
                        retained_backups.push((e.path.clone(), e.to_string()));
                    }
                }
            }
        }

        log::info!(
            "Transaction {} committed ({} steps)",
            self.id,
            self.steps.len()
        );
        SagaOutcome::Committed(CommitResult {
            transaction_id: self.id,
            steps: std::mem::take(&mut self.steps),
            purged_backups,
            retained_backups,
        })
    }

    /// Undo every journaled step on the caller's request
    pub fn rollback(mut self, reason: impl Into<String>) -> RollbackReport {
        let failure = self
            .failure
            .take()
            .unwrap_or_else(|| FailureReason::requested(reason));
        self.roll_back_with(failure)
    }

    fn fail(&mut self, step: u32, request: &OperationRequest, err: &SagaError) {
        log::warn!("Transaction {}: step {} failed: {}", self.id, step, err);
        self.failure = Some(FailureReason {
            message: err.to_string(),
            kind: err.failure_kind(),
            failed_step: Some(step),
            operation: Some(request.clone()),
        });
    }

    fn roll_back_with(&mut self, failure: FailureReason) -> RollbackReport {
        self.state = SagaState::RollingBack;
        log::info!(
            "Transaction {} rolling back {} steps: {}",
            self.id,
            self.journaled.len(),
            failure.message
        );

        let run = rollback::roll_back(
            self.journal,
            self.executor,
            self.id,
            &failure.message,
            &self.journaled,
        );
        self.state = SagaState::RolledBack;

        // The unjournaled step is the last one attempted, so it leads
        let mut compensations = run.compensations;
        if let Some(undo) = self.unjournaled.take() {
            compensations.insert(0, undo);
        }

        let report = RollbackReport {
            transaction_id: self.id,
            failure,
            completed_steps: std::mem::take(&mut self.steps),
            compensations,
            journal_errors: run.journal_errors,
        };
        if report.requires_manual_cleanup() {
            log::warn!(
                "Transaction {} rolled back with {} unrecoverable steps",
                self.id,
                report.unrecoverable().len()
            );
        } else {
            log::info!("Transaction {} rolled back", self.id);
        }
        report
    }
}

impl Drop for SagaTransaction<'_> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            log::warn!("Transaction {} dropped before commit; rolling back", self.id);
            let failure = self
                .failure
                .take()
                .unwrap_or_else(|| FailureReason::requested("transaction dropped before commit"));
            self.roll_back_with(failure);
        }
    }
}
