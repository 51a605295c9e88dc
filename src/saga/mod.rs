//! Saga Coordinator and the imperative transaction API

pub mod coordinator;
pub mod outcome;
pub(crate) mod rollback;
pub mod transaction;

pub use coordinator::SagaCoordinator;
pub use outcome::{
    CommitResult, CompensationOutcome, ExecutionSummary, FailureReason, RollbackReport,
    SagaOutcome, StepResult,
};
pub use transaction::SagaTransaction;
