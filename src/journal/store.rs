use std::sync::Mutex;

use crate::error::{Result, SagaError};
use super::log::JournalRecord;

/// Backing storage for the journal.
///
/// Implementations must make `append` durable before returning and must hand back
/// every durable record from `load`, in append order. The `Journal` serializes all
/// calls to `append`; stores only need to be safe to read concurrently with a write.
pub trait JournalStore: Send + Sync {
    /// Durably append one record
    fn append(&self, record: &JournalRecord) -> Result<()>;

    /// Read back every record, oldest first
    fn load(&self) -> Result<Vec<JournalRecord>>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// In-memory store for tests and dry runs. Not crash-safe.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<JournalRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JournalStore for MemoryStore {
    fn append(&self, record: &JournalRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| SagaError::Internal("memory journal lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<JournalRecord>> {
        Ok(self
            .records
            .lock()
            .map_err(|_| SagaError::Internal("memory journal lock poisoned".to_string()))?
            .clone())
    }

    fn describe(&self) -> String {
        "in-memory journal".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::log::JournalEntry;

    #[test]
    fn test_memory_store_append_and_load() {
        let store = MemoryStore::new();
        for lsn in 1..=3 {
            store
                .append(&JournalRecord {
                    lsn,
                    timestamp: 0,
                    entry: JournalEntry::Begin { txn_id: lsn },
                })
                .unwrap();
        }
        let records = store.load().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].lsn, 3);
    }
}
