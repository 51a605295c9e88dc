//! The rollback procedure shared by the coordinator and the recovery manager

use crate::executor::OperationExecutor;
use crate::journal::Journal;
use crate::types::{ExecutedOperation, OperationId, OperationRecord, TxnId};
use super::outcome::CompensationOutcome;

/// A step this process executed and journaled, kept so compensation can still run if
/// the journal cannot be read back
#[derive(Debug, Clone)]
pub(crate) struct JournaledStep {
    pub operation_id: OperationId,
    pub step_number: u32,
    pub operation: ExecutedOperation,
}

#[derive(Debug, Default)]
pub(crate) struct RollbackRun {
    pub compensations: Vec<CompensationOutcome>,
    pub journal_errors: Vec<String>,
}

/// Compensate every executed step of `txn_id`, highest step first, then mark the
/// transaction rolled back.
///
/// Each operation is marked rolled back whether or not its compensation worked; a
/// failed compensation is reported, never retried, and never stops the others.
pub(crate) fn roll_back(
    journal: &Journal,
    executor: &OperationExecutor,
    txn_id: TxnId,
    reason: &str,
    fallback: &[JournaledStep],
) -> RollbackRun {
    let mut run = RollbackRun::default();

    let steps: Vec<JournaledStep> = match journal.get_operations_for_rollback(txn_id) {
        Ok(records) => records.iter().map(JournaledStep::from).collect(),
        Err(e) => {
            log::error!(
                "Transaction {}: cannot read executed steps from journal ({}); using in-process record",
                txn_id,
                e
            );
            run.journal_errors.push(format!("read executed steps: {}", e));
            let mut steps = fallback.to_vec();
            steps.sort_by(|a, b| b.step_number.cmp(&a.step_number));
            steps
        }
    };

    for step in &steps {
        let error = match executor.compensate(&step.operation) {
            Ok(()) => {
                log::debug!(
                    "Transaction {}: compensated step {} ({})",
                    txn_id,
                    step.step_number,
                    step.operation.op_type
                );
                None
            }
            Err(e) => {
                log::warn!(
                    "Transaction {}: compensation of step {} failed, manual cleanup required: {}",
                    txn_id,
                    step.step_number,
                    e
                );
                Some(e.to_string())
            }
        };

        if let Err(e) = journal.mark_operation_rolled_back(step.operation_id) {
            log::error!(
                "Transaction {}: could not mark operation {} rolled back: {}",
                txn_id,
                step.operation_id,
                e
            );
            run.journal_errors
                .push(format!("mark operation {} rolled back: {}", step.operation_id, e));
        }

        run.compensations.push(CompensationOutcome {
            step_number: step.step_number,
            operation_id: step.operation_id,
            operation_type: step.operation.op_type,
            source: step.operation.source.clone(),
            destination: step.operation.destination.clone(),
            error,
        });
    }

    if let Err(e) = journal.mark_transaction_rolled_back(txn_id, reason) {
        log::error!("Transaction {}: could not mark rolled back: {}", txn_id, e);
        run.journal_errors
            .push(format!("mark transaction rolled back: {}", e));
    }

    run
}

impl From<&OperationRecord> for JournaledStep {
    fn from(record: &OperationRecord) -> Self {
        Self {
            operation_id: record.id,
            step_number: record.step_number,
            operation: ExecutedOperation::from(record),
        }
    }
}
