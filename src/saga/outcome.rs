//! Typed results of a saga run

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::types::{OperationId, OperationRequest, OperationType, TxnId};

/// One journaled forward step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_number: u32,
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub source: PathBuf,
    /// Destination the planner asked for
    pub requested_destination: Option<PathBuf>,
    /// Destination actually used after collision resolution
    pub destination: Option<PathBuf>,
}

/// Outcome of one compensating action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationOutcome {
    pub step_number: u32,
    /// 0 when the step never reached the journal
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    /// None when the step was compensated
    pub error: Option<String>,
}

impl CompensationOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Why a transaction was rolled back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    pub message: String,
    pub kind: FailureKind,
    /// Step being attempted when the failure happened; None for caller-requested rollbacks
    pub failed_step: Option<u32>,
    pub operation: Option<OperationRequest>,
}

impl FailureReason {
    pub fn requested(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Other,
            failed_step: None,
            operation: None,
        }
    }
}

/// A committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub transaction_id: TxnId,
    pub steps: Vec<StepResult>,
    /// Delete-backups removed after the commit
    pub purged_backups: Vec<PathBuf>,
    /// Delete-backups that could not be removed, with the error
    pub retained_backups: Vec<(PathBuf, String)>,
}

/// A rolled-back transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub transaction_id: TxnId,
    pub failure: FailureReason,
    /// Steps that had succeeded before the failure
    pub completed_steps: Vec<StepResult>,
    /// Compensations in the order they were attempted (highest step first)
    pub compensations: Vec<CompensationOutcome>,
    /// Journal bookkeeping that could not be written during rollback
    pub journal_errors: Vec<String>,
}

impl RollbackReport {
    /// Steps whose compensation failed and need manual cleanup
    pub fn unrecoverable(&self) -> Vec<&CompensationOutcome> {
        self.compensations.iter().filter(|c| !c.is_success()).collect()
    }

    pub fn requires_manual_cleanup(&self) -> bool {
        self.compensations.iter().any(|c| !c.is_success())
    }

    /// True when every compensation succeeded and the journal recorded the rollback
    pub fn is_clean(&self) -> bool {
        !self.requires_manual_cleanup() && self.journal_errors.is_empty()
    }
}

/// Result of running a saga to its end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    Committed(CommitResult),
    RolledBack(RollbackReport),
}

impl SagaOutcome {
    pub fn transaction_id(&self) -> TxnId {
        match self {
            SagaOutcome::Committed(c) => c.transaction_id,
            SagaOutcome::RolledBack(r) => r.transaction_id,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, SagaOutcome::Committed(_))
    }
}

/// Flat shape handed to the application shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub success: bool,
    pub transaction_id: TxnId,
    pub results: Vec<StepResult>,
    pub success_count: usize,
    pub fail_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_results: Option<Vec<CompensationOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<bool>,
    /// Compensations that failed; surface as "requires manual cleanup"
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub manual_cleanup: Vec<CompensationOutcome>,
}

impl From<&SagaOutcome> for ExecutionSummary {
    fn from(outcome: &SagaOutcome) -> Self {
        match outcome {
            SagaOutcome::Committed(commit) => Self {
                success: true,
                transaction_id: commit.transaction_id,
                results: commit.steps.clone(),
                success_count: commit.steps.len(),
                fail_count: 0,
                error: None,
                rollback_results: None,
                rolled_back: None,
                manual_cleanup: Vec::new(),
            },
            SagaOutcome::RolledBack(report) => Self {
                success: false,
                transaction_id: report.transaction_id,
                results: report.completed_steps.clone(),
                success_count: report.completed_steps.len(),
                fail_count: usize::from(report.failure.failed_step.is_some()),
                error: Some(report.failure.clone()),
                rollback_results: Some(report.compensations.clone()),
                rolled_back: Some(true),
                manual_cleanup: report.unrecoverable().into_iter().cloned().collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(step: u32, error: Option<&str>) -> CompensationOutcome {
        CompensationOutcome {
            step_number: step,
            operation_id: step as u64,
            operation_type: OperationType::Move,
            source: PathBuf::from("/a"),
            destination: Some(PathBuf::from("/b")),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_summary_of_rollback_lists_manual_cleanup() {
        let report = RollbackReport {
            transaction_id: 5,
            failure: FailureReason {
                message: "boom".to_string(),
                kind: FailureKind::PermissionDenied,
                failed_step: Some(3),
                operation: None,
            },
            completed_steps: Vec::new(),
            compensations: vec![outcome(2, Some("occupied")), outcome(1, None)],
            journal_errors: Vec::new(),
        };
        assert!(report.requires_manual_cleanup());
        assert!(!report.is_clean());

        let summary = ExecutionSummary::from(&SagaOutcome::RolledBack(report));
        assert!(!summary.success);
        assert_eq!(summary.fail_count, 1);
        assert_eq!(summary.rolled_back, Some(true));
        assert_eq!(summary.manual_cleanup.len(), 1);
        assert_eq!(summary.manual_cleanup[0].step_number, 2);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["transactionId"], 5);
        assert_eq!(json["rollbackResults"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_summary_of_commit_omits_rollback_fields() {
        let commit = CommitResult {
            transaction_id: 1,
            steps: Vec::new(),
            purged_backups: Vec::new(),
            retained_backups: Vec::new(),
        };
        let summary = ExecutionSummary::from(&SagaOutcome::Committed(commit));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("rollbackResults").is_none());
        assert!(json.get("rolledBack").is_none());
    }
}
