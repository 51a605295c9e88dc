mod common;

use std::fs;
use std::sync::Arc;

use common::snapshot;
use filesaga::recovery::RECOVERY_REASON;
use filesaga::{
    Config, Journal, OperationExecutor, OperationStatus, SagaCoordinator, SagaEngine,
    TransactionStatus,
};
use tempfile::tempdir;

fn config_at(journal: std::path::PathBuf) -> Config {
    Config {
        journal_path: journal,
        ..Default::default()
    }
}

#[test]
fn test_crash_mid_transaction_is_rolled_back_on_restart() {
    let dir = tempdir().unwrap();
    let work = dir.path().join("work");
    fs::create_dir(&work).unwrap();
    fs::write(work.join("a.txt"), b"a").unwrap();
    fs::write(work.join("b.txt"), b"b").unwrap();
    fs::write(work.join("c.txt"), b"c").unwrap();
    let before = snapshot(&work);
    let journal_path = dir.path().join("journal/filesaga.journal");

    let txn_id = {
        let coordinator = SagaCoordinator::new(
            Arc::new(Journal::open(&journal_path).unwrap()),
            Arc::new(OperationExecutor::default()),
        );
        let mut txn = coordinator.begin().unwrap();
        txn.mkdir(work.join("archive")).unwrap();
        txn.move_file(work.join("a.txt"), work.join("archive/a.txt")).unwrap();
        txn.delete(work.join("b.txt")).unwrap();
        let id = txn.id();
        // The process dies here: no commit, no rollback
        std::mem::forget(txn);
        id
    };
    assert!(work.join("archive/a.txt").exists());

    let engine = SagaEngine::open(config_at(journal_path.clone())).unwrap();
    let incomplete = engine.journal().find_incomplete_transactions().unwrap();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].id, txn_id);

    let results = engine.recover_incomplete_transactions().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success, "{:?}", results[0].errors);
    assert_eq!(results[0].compensations.len(), 3);

    assert_eq!(snapshot(&work), before);

    let txn = engine.journal().get_transaction(txn_id).unwrap().unwrap();
    assert_eq!(txn.status, TransactionStatus::RolledBack);
    assert_eq!(txn.reason.as_deref(), Some(RECOVERY_REASON));
    let ops = engine.journal().get_operations(txn_id).unwrap();
    assert!(ops.iter().all(|op| op.status == OperationStatus::RolledBack));

    // The record outlives this handle too
    drop(engine);
    let reopened = Journal::open(&journal_path).unwrap();
    assert!(reopened.find_incomplete_transactions().unwrap().is_empty());
}

#[test]
fn test_recovery_resumes_an_interrupted_rollback() {
    let dir = tempdir().unwrap();
    let work = dir.path().join("work");
    fs::create_dir(&work).unwrap();
    fs::write(work.join("x.txt"), b"x").unwrap();
    fs::write(work.join("y.txt"), b"y").unwrap();
    let before = snapshot(&work);
    let journal_path = dir.path().join("filesaga.journal");

    let executor = Arc::new(OperationExecutor::default());
    {
        let journal = Journal::open(&journal_path).unwrap();
        let txn = journal.begin_transaction().unwrap();

        let first = executor
            .execute(txn, &filesaga::OperationRequest::move_file(work.join("x.txt"), work.join("x2.txt")))
            .unwrap();
        journal.record_operation(txn, 1, &first).unwrap();
        let second = executor
            .execute(txn, &filesaga::OperationRequest::move_file(work.join("y.txt"), work.join("y2.txt")))
            .unwrap();
        let second_id = journal.record_operation(txn, 2, &second).unwrap();

        // Rollback got as far as undoing step 2 before the crash
        executor.compensate(&second).unwrap();
        journal.mark_operation_rolled_back(second_id).unwrap();
    }

    let engine = SagaEngine::open(config_at(journal_path)).unwrap();
    let results = engine.recover_incomplete_transactions().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].compensations.len(), 1);
    assert_eq!(results[0].compensations[0].step_number, 1);
    assert_eq!(snapshot(&work), before);
}

#[test]
fn test_recovery_with_missing_files_still_terminates() {
    let dir = tempdir().unwrap();
    let work = dir.path().join("work");
    fs::create_dir(&work).unwrap();
    fs::write(work.join("keep.txt"), b"k").unwrap();
    let journal_path = dir.path().join("filesaga.journal");

    let txn_id = {
        let coordinator = SagaCoordinator::new(
            Arc::new(Journal::open(&journal_path).unwrap()),
            Arc::new(OperationExecutor::default()),
        );
        let mut txn = coordinator.begin().unwrap();
        txn.move_file(work.join("keep.txt"), work.join("moved.txt")).unwrap();
        let id = txn.id();
        std::mem::forget(txn);
        id
    };
    // Someone removed the moved file while the engine was down
    fs::remove_file(work.join("moved.txt")).unwrap();

    let engine = SagaEngine::open(config_at(journal_path)).unwrap();
    let results = engine.recover_incomplete_transactions().unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].errors.len(), 1);

    // Reported, not retried forever: the transaction is closed
    let txn = engine.journal().get_transaction(txn_id).unwrap().unwrap();
    assert_eq!(txn.status, TransactionStatus::RolledBack);
    assert!(engine.recover_incomplete_transactions().unwrap().is_empty());
    assert!(engine.is_ready());
}

#[test]
fn test_committed_and_rolled_back_transactions_are_left_alone() {
    let dir = tempdir().unwrap();
    let work = dir.path().join("work");
    fs::create_dir(&work).unwrap();
    fs::write(work.join("a.txt"), b"a").unwrap();
    let journal_path = dir.path().join("filesaga.journal");

    {
        let engine = SagaEngine::open(config_at(journal_path.clone())).unwrap();
        engine.recover_incomplete_transactions().unwrap();
        let outcome = engine
            .execute(&[filesaga::OperationRequest::move_file(work.join("a.txt"), work.join("b.txt"))])
            .unwrap();
        assert!(outcome.is_committed());
        let mut txn = engine.begin().unwrap();
        txn.mkdir(work.join("tmp")).unwrap();
        txn.rollback("not needed");
    }

    let engine = SagaEngine::open(config_at(journal_path)).unwrap();
    assert!(engine.recover_incomplete_transactions().unwrap().is_empty());
    assert!(work.join("b.txt").exists());

    let stats = engine.statistics().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.committed, 1);
    assert_eq!(stats.rolled_back, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.rolled_back_operations, 1);
}
