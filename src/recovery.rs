//! Startup recovery
//!
//! Any transaction still `active` in the journal was interrupted by a crash or a
//! forced quit. Recovery never resumes such a transaction forward: it rolls it back with
//! the same compensating procedure the coordinator uses, because nothing beyond what the
//! journal recorded can be assumed to have happened.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::executor::OperationExecutor;
use crate::journal::Journal;
use crate::saga::rollback;
use crate::saga::CompensationOutcome;
use crate::types::TxnId;

/// Reason recorded on transactions rolled back during recovery
pub const RECOVERY_REASON: &str = "interrupted before completion; rolled back during startup recovery";

/// Outcome for one incomplete transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub transaction_id: TxnId,
    pub success: bool,
    pub compensations: Vec<CompensationOutcome>,
    pub errors: Vec<String>,
}

pub struct RecoveryManager {
    journal: Arc<Journal>,
    executor: Arc<OperationExecutor>,
}

impl RecoveryManager {
    pub fn new(journal: Arc<Journal>, executor: Arc<OperationExecutor>) -> Self {
        Self { journal, executor }
    }

    /// Roll back every incomplete transaction.
    ///
    /// Failures while compensating are reported per transaction. An error is returned
    /// only when the journal cannot be read, since then nothing is known about what
    /// needs recovering.
    pub fn recover_incomplete_transactions(&self) -> Result<Vec<RecoveryResult>> {
        let incomplete = self.journal.find_incomplete_transactions().map_err(|e| {
            log::error!("Recovery could not read the journal: {}", e);
            e
        })?;

        if incomplete.is_empty() {
            log::debug!("No incomplete transactions in {}", self.journal.describe());
            return Ok(Vec::new());
        }
        log::info!("Recovering {} incomplete transactions", incomplete.len());

        let mut results = Vec::with_capacity(incomplete.len());
        for txn in incomplete {
            let run = rollback::roll_back(
                &self.journal,
                &self.executor,
                txn.id,
                RECOVERY_REASON,
                &[],
            );

            let mut errors = run.journal_errors;
            errors.extend(
                run.compensations
                    .iter()
                    .filter_map(|c| c.error.as_ref().map(|e| format!("step {}: {}", c.step_number, e))),
            );
            let success = errors.is_empty();

            if success {
                log::info!(
                    "Recovered transaction {} ({} steps compensated)",
                    txn.id,
                    run.compensations.len()
                );
            } else {
                log::error!(
                    "Recovery of transaction {} incomplete, manual cleanup required: {}",
                    txn.id,
                    errors.join("; ")
                );
            }

            results.push(RecoveryResult {
                transaction_id: txn.id,
                success,
                compensations: run.compensations,
                errors,
            });
        }
        Ok(results)
    }
}
