//! Core data model: transactions, operations and planner requests

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Transaction ID, allocated by the journal
pub type TxnId = u64;

/// Operation row ID, allocated by the journal
pub type OperationId = u64;

/// Log Sequence Number of a journal record
pub type Lsn = u64;

/// Kind of filesystem mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Move,
    Copy,
    Delete,
    Mkdir,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Move => "move",
            OperationType::Copy => "copy",
            OperationType::Delete => "delete",
            OperationType::Mkdir => "mkdir",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction status. `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "active"),
            TransactionStatus::Committed => write!(f, "committed"),
            TransactionStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Operation row status.
///
/// Rows are only ever written once their physical action succeeded, so the journal
/// never stores `Pending`; the variant exists for callers tracking a step in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Executed,
    RolledBack,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "pending"),
            OperationStatus::Executed => write!(f, "executed"),
            OperationStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// A row of the `transactions` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: TxnId,
    pub status: TransactionStatus,
    /// Unix epoch millis
    pub created_at: u64,
    /// Unix epoch millis of the terminal transition
    pub completed_at: Option<u64>,
    /// Reason recorded with `rolled_back`
    pub reason: Option<String>,
}

/// A row of the `operations` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: OperationId,
    pub transaction_id: TxnId,
    pub step_number: u32,
    pub operation_type: OperationType,
    pub source_path: PathBuf,
    /// Actual path after collision resolution; the backup path for `delete`; the topmost
    /// created directory for `mkdir` (None when the directory already existed)
    pub destination_path: Option<PathBuf>,
    pub status: OperationStatus,
    pub executed_at: Option<u64>,
}

/// Operation descriptor handed over by the batch planner.
///
/// `destination` is the *desired* path; collisions are resolved by the engine.
/// `move`/`copy` require a destination, `delete` acts on `source`, and `mkdir`
/// creates `destination` when given, otherwise `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub source: PathBuf,
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

impl OperationRequest {
    pub fn move_file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            op_type: OperationType::Move,
            source: source.into(),
            destination: Some(destination.into()),
        }
    }

    pub fn copy_file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            op_type: OperationType::Copy,
            source: source.into(),
            destination: Some(destination.into()),
        }
    }

    pub fn delete(target: impl Into<PathBuf>) -> Self {
        Self {
            op_type: OperationType::Delete,
            source: target.into(),
            destination: None,
        }
    }

    pub fn mkdir(path: impl Into<PathBuf>) -> Self {
        Self {
            op_type: OperationType::Mkdir,
            source: path.into(),
            destination: None,
        }
    }

    /// Path an error about this request should point at
    pub fn primary_path(&self) -> &Path {
        match self.op_type {
            OperationType::Mkdir => self.destination.as_deref().unwrap_or(&self.source),
            _ => &self.source,
        }
    }
}

/// A physical action that has been carried out, ready to be journaled or compensated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedOperation {
    pub op_type: OperationType,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
}

impl From<&OperationRecord> for ExecutedOperation {
    fn from(record: &OperationRecord) -> Self {
        Self {
            op_type: record.operation_type,
            source: record.source_path.clone(),
            destination: record.destination_path.clone(),
        }
    }
}
