//! Journal record structures

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Lsn, OperationId, OperationType, TxnId};

/// A journal record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Log sequence number
    pub lsn: Lsn,
    /// Timestamp (Unix epoch millis)
    pub timestamp: u64,
    /// The state change
    pub entry: JournalEntry,
}

/// State changes that can be journaled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Transaction started (inserts an `active` transaction row)
    Begin { txn_id: TxnId },
    /// A physical action succeeded (inserts an `executed` operation row)
    Operation {
        operation_id: OperationId,
        txn_id: TxnId,
        step_number: u32,
        operation_type: OperationType,
        source_path: PathBuf,
        destination_path: Option<PathBuf>,
    },
    /// Compensation attempted for an operation row
    OperationRolledBack { operation_id: OperationId },
    /// Transaction committed
    Commit { txn_id: TxnId },
    /// Transaction rolled back
    Rollback { txn_id: TxnId, reason: String },
}
