//! Transaction Journal
//!
//! The journal is the single source of truth for recovery. It is an append-only
//! sequence of `JournalRecord`s kept by a `JournalStore`; the `transactions` and
//! `operations` tables are rebuilt from that sequence on every query, so a reader always
//! sees what is actually durable rather than a stale in-process view.
//!
//! ### Write path
//! Every mutating call takes the journal's writer lock, re-reads the store, validates
//! the request against the current tables (transaction exists, is `active`, step numbers
//! increase), allocates ids and appends one durable record. Concurrent transactions
//! therefore never interleave inside a write.
//!
//! ### Tables
//! - `transactions`: one row per `Begin`, status flipped by `Commit` / `Rollback`
//! - `operations`: one row per `Operation`, status flipped by `OperationRolledBack`

pub mod log;
pub mod store;
pub mod wal;

pub use self::log::{JournalEntry, JournalRecord};
pub use store::{JournalStore, MemoryStore};
pub use wal::FileStore;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::types::{
    ExecutedOperation, Lsn, OperationId, OperationRecord, OperationStatus, TransactionRecord,
    TransactionStatus, TxnId,
};

/// Counts by status, for diagnostics panels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalStatistics {
    pub total: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub active: usize,
    pub total_operations: usize,
    pub executed_operations: usize,
    pub rolled_back_operations: usize,
}

/// Tables folded from the record sequence
#[derive(Debug, Default)]
struct JournalState {
    transactions: BTreeMap<TxnId, TransactionRecord>,
    operations: BTreeMap<OperationId, OperationRecord>,
    max_lsn: Lsn,
}

impl JournalState {
    fn replay(records: &[JournalRecord]) -> Self {
        let mut state = JournalState::default();
        for record in records {
            state.apply(record);
        }
        state
    }

    fn apply(&mut self, record: &JournalRecord) {
        self.max_lsn = self.max_lsn.max(record.lsn);
        match &record.entry {
            JournalEntry::Begin { txn_id } => {
                self.transactions.insert(
                    *txn_id,
                    TransactionRecord {
                        id: *txn_id,
                        status: TransactionStatus::Active,
                        created_at: record.timestamp,
                        completed_at: None,
                        reason: None,
                    },
                );
            }
            JournalEntry::Operation {
                operation_id,
                txn_id,
                step_number,
                operation_type,
                source_path,
                destination_path,
            } => {
                self.operations.insert(
                    *operation_id,
                    OperationRecord {
                        id: *operation_id,
                        transaction_id: *txn_id,
                        step_number: *step_number,
                        operation_type: *operation_type,
                        source_path: source_path.clone(),
                        destination_path: destination_path.clone(),
                        status: OperationStatus::Executed,
                        executed_at: Some(record.timestamp),
                    },
                );
            }
            JournalEntry::OperationRolledBack { operation_id } => {
                if let Some(op) = self.operations.get_mut(operation_id) {
                    op.status = OperationStatus::RolledBack;
                }
            }
            JournalEntry::Commit { txn_id } => {
                if let Some(txn) = self.transactions.get_mut(txn_id) {
                    if txn.status == TransactionStatus::Active {
                        txn.status = TransactionStatus::Committed;
                        txn.completed_at = Some(record.timestamp);
                    }
                }
            }
            JournalEntry::Rollback { txn_id, reason } => {
                if let Some(txn) = self.transactions.get_mut(txn_id) {
                    if txn.status == TransactionStatus::Active {
                        txn.status = TransactionStatus::RolledBack;
                        txn.completed_at = Some(record.timestamp);
                        txn.reason = Some(reason.clone());
                    }
                }
            }
        }
    }

    fn next_txn_id(&self) -> TxnId {
        self.transactions.keys().next_back().map_or(1, |id| id + 1)
    }

    fn next_operation_id(&self) -> OperationId {
        self.operations.keys().next_back().map_or(1, |id| id + 1)
    }

    fn transaction(&self, txn_id: TxnId) -> Result<&TransactionRecord> {
        self.transactions
            .get(&txn_id)
            .ok_or_else(|| SagaError::transaction_not_found(txn_id))
    }

    fn operations_of(&self, txn_id: TxnId) -> impl Iterator<Item = &OperationRecord> {
        self.operations
            .values()
            .filter(move |op| op.transaction_id == txn_id)
    }
}

/// Handle to the transaction journal. Share it behind an `Arc`.
pub struct Journal {
    store: Box<dyn JournalStore>,
    writer: Mutex<()>,
}

impl Journal {
    pub fn new(store: Box<dyn JournalStore>) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    /// Open the file-backed journal at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Box::new(FileStore::open(path)?)))
    }

    /// Journal backed by memory only; loses everything on drop
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    pub fn describe(&self) -> String {
        self.store.describe()
    }

    /// Get current timestamp in milliseconds
    fn timestamp() -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(dur) => dur.as_millis() as u64,
            Err(_) => 0,
        }
    }

    fn load_state(&self) -> Result<JournalState> {
        let records = self.store.load()?;
        Ok(JournalState::replay(&records))
    }

    /// Run `build` against fresh state under the writer lock and append the entry it
    /// returns, if any.
    fn write_with<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(&JournalState) -> Result<(Option<JournalEntry>, T)>,
    {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| SagaError::Internal("journal writer lock poisoned".to_string()))?;

        let state = self.load_state()?;
        let (entry, value) = build(&state)?;
        if let Some(entry) = entry {
            let record = JournalRecord {
                lsn: state.max_lsn + 1,
                timestamp: Self::timestamp(),
                entry,
            };
            self.store.append(&record)?;
        }
        Ok(value)
    }

    /// Create a new `active` transaction; durable before returning
    pub fn begin_transaction(&self) -> Result<TxnId> {
        self.write_with(|state| {
            let txn_id = state.next_txn_id();
            Ok((Some(JournalEntry::Begin { txn_id }), txn_id))
        })
    }

    /// Append one `executed` operation row for an active transaction
    pub fn record_operation(
        &self,
        txn_id: TxnId,
        step_number: u32,
        operation: &ExecutedOperation,
    ) -> Result<OperationId> {
        self.write_with(|state| {
            let txn = state.transaction(txn_id)?;
            if txn.status != TransactionStatus::Active {
                return Err(SagaError::transaction_not_active(txn_id, txn.status));
            }
            if step_number == 0 {
                return Err(SagaError::Transaction(format!(
                    "Transaction {}: step numbers start at 1",
                    txn_id
                )));
            }
            if let Some(last) = state.operations_of(txn_id).map(|op| op.step_number).max() {
                if step_number <= last {
                    return Err(SagaError::Transaction(format!(
                        "Transaction {}: step {} does not follow step {}",
                        txn_id, step_number, last
                    )));
                }
            }

            let operation_id = state.next_operation_id();
            let entry = JournalEntry::Operation {
                operation_id,
                txn_id,
                step_number,
                operation_type: operation.op_type,
                source_path: operation.source.clone(),
                destination_path: operation.destination.clone(),
            };
            Ok((Some(entry), operation_id))
        })
    }

    /// Mark a transaction committed. Committing twice is a no-op.
    pub fn commit_transaction(&self, txn_id: TxnId) -> Result<()> {
        self.write_with(|state| match state.transaction(txn_id)?.status {
            TransactionStatus::Active => Ok((Some(JournalEntry::Commit { txn_id }), ())),
            TransactionStatus::Committed => Ok((None, ())),
            TransactionStatus::RolledBack => Err(SagaError::transaction_not_active(
                txn_id,
                TransactionStatus::RolledBack,
            )),
        })
    }

    /// Flip an operation row to `rolled_back`. Repeating it is a no-op.
    pub fn mark_operation_rolled_back(&self, operation_id: OperationId) -> Result<()> {
        self.write_with(|state| {
            let op = state.operations.get(&operation_id).ok_or_else(|| {
                SagaError::Transaction(format!("Operation {} not found", operation_id))
            })?;
            match op.status {
                OperationStatus::RolledBack => Ok((None, ())),
                _ => Ok((Some(JournalEntry::OperationRolledBack { operation_id }), ())),
            }
        })
    }

    /// Mark a transaction `rolled_back` with the reason that triggered it.
    /// Repeating it is a no-op; a committed transaction cannot be rolled back.
    pub fn mark_transaction_rolled_back(&self, txn_id: TxnId, reason: &str) -> Result<()> {
        self.write_with(|state| match state.transaction(txn_id)?.status {
            TransactionStatus::Active => Ok((
                Some(JournalEntry::Rollback {
                    txn_id,
                    reason: reason.to_string(),
                }),
                (),
            )),
            TransactionStatus::RolledBack => Ok((None, ())),
            TransactionStatus::Committed => Err(SagaError::transaction_not_active(
                txn_id,
                TransactionStatus::Committed,
            )),
        })
    }

    /// All `executed` operations of a transaction, highest step first
    pub fn get_operations_for_rollback(&self, txn_id: TxnId) -> Result<Vec<OperationRecord>> {
        let state = self.load_state()?;
        state.transaction(txn_id)?;
        let mut ops: Vec<OperationRecord> = state
            .operations_of(txn_id)
            .filter(|op| op.status == OperationStatus::Executed)
            .cloned()
            .collect();
        ops.sort_by(|a, b| b.step_number.cmp(&a.step_number));
        Ok(ops)
    }

    /// Every transaction still `active`, oldest first
    pub fn find_incomplete_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let state = self.load_state()?;
        Ok(state
            .transactions
            .into_values()
            .filter(|txn| txn.status == TransactionStatus::Active)
            .collect())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Result<Option<TransactionRecord>> {
        Ok(self.load_state()?.transactions.remove(&txn_id))
    }

    /// All operations of a transaction in step order, whatever their status
    pub fn get_operations(&self, txn_id: TxnId) -> Result<Vec<OperationRecord>> {
        let state = self.load_state()?;
        let mut ops: Vec<OperationRecord> = state.operations_of(txn_id).cloned().collect();
        ops.sort_by_key(|op| op.step_number);
        Ok(ops)
    }

    pub fn get_statistics(&self) -> Result<JournalStatistics> {
        let state = self.load_state()?;
        let mut stats = JournalStatistics {
            total: state.transactions.len(),
            total_operations: state.operations.len(),
            ..Default::default()
        };
        for txn in state.transactions.values() {
            match txn.status {
                TransactionStatus::Active => stats.active += 1,
                TransactionStatus::Committed => stats.committed += 1,
                TransactionStatus::RolledBack => stats.rolled_back += 1,
            }
        }
        for op in state.operations.values() {
            match op.status {
                OperationStatus::Executed => stats.executed_operations += 1,
                OperationStatus::RolledBack => stats.rolled_back_operations += 1,
                OperationStatus::Pending => {}
            }
        }
        Ok(stats)
    }
}
