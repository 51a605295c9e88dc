//! Error types for filesaga
//!
//! `SagaError` is the unified error returned by the journal, the coordinator and the
//! engine facade. Physical filesystem failures are carried by `OperationError`, which
//! keeps the operation type and the offending path so callers can classify them.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::OperationType;

/// Broad classification of a filesystem failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Destination already occupied
    Collision,
    /// Rename crossed a filesystem boundary
    CrossDevice,
    /// Source or parent directory missing
    NotFound,
    /// EACCES / EPERM
    PermissionDenied,
    /// Journal could not be written or read
    Journal,
    /// Anything else
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Collision => "collision",
            FailureKind::CrossDevice => "cross-device",
            FailureKind::NotFound => "not found",
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::Journal => "journal",
            FailureKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// A failed physical action: `{operation type, path, underlying error}`
#[derive(Debug)]
pub struct OperationError {
    pub operation_type: OperationType,
    pub path: PathBuf,
    pub source: io::Error,
}

impl OperationError {
    pub fn new(operation_type: OperationType, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self {
            operation_type,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Build an error that has no OS error behind it
    pub fn other(
        operation_type: OperationType,
        path: impl AsRef<Path>,
        kind: io::ErrorKind,
        msg: impl Into<String>,
    ) -> Self {
        Self::new(operation_type, path, io::Error::new(kind, msg.into()))
    }

    pub fn kind(&self) -> FailureKind {
        classify_io_error(&self.source)
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed on '{}': {}",
            self.operation_type,
            self.path.display(),
            self.source
        )
    }
}

impl std::error::Error for OperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Map an io::Error onto the failure taxonomy
pub fn classify_io_error(err: &io::Error) -> FailureKind {
    if is_cross_device(err) {
        return FailureKind::CrossDevice;
    }
    match err.kind() {
        io::ErrorKind::AlreadyExists => FailureKind::Collision,
        io::ErrorKind::NotFound => FailureKind::NotFound,
        io::ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
        _ => FailureKind::Other,
    }
}

/// EXDEV on unix, ERROR_NOT_SAME_DEVICE on windows
pub fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    const CROSS_DEVICE: i32 = 18;
    #[cfg(windows)]
    const CROSS_DEVICE: i32 = 17;
    #[cfg(not(any(unix, windows)))]
    const CROSS_DEVICE: i32 = -1;

    err.raw_os_error() == Some(CROSS_DEVICE)
}

/// Unified error type for filesaga
#[derive(Debug)]
pub enum SagaError {
    /// I/O error outside of a journaled operation
    Io(io::Error),
    /// A physical filesystem action failed
    Operation(OperationError),
    /// The journal could not be read, written or decoded
    Journal(String),
    /// A transaction-level rule was violated (unknown id, terminal status, step order)
    Transaction(String),
    /// `begin`/`execute` called before startup recovery finished
    RecoveryPending,
    /// Invalid configuration
    Config(String),
    /// Serialization of planner input or diagnostics output
    Json(String),
    /// Lock poisoning, task join failures
    Internal(String),
}

impl SagaError {
    pub fn transaction_not_found(txn_id: u64) -> Self {
        SagaError::Transaction(format!("Transaction {} not found", txn_id))
    }

    pub fn transaction_not_active(txn_id: u64, status: impl fmt::Display) -> Self {
        SagaError::Transaction(format!(
            "Transaction {} is not active (status: {})",
            txn_id, status
        ))
    }

    /// Classification used in failure reports
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SagaError::Operation(e) => e.kind(),
            SagaError::Io(e) => classify_io_error(e),
            SagaError::Journal(_) | SagaError::Transaction(_) => FailureKind::Journal,
            _ => FailureKind::Other,
        }
    }
}

impl fmt::Display for SagaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaError::Io(e) => write!(f, "IO error: {}", e),
            SagaError::Operation(e) => write!(f, "{}", e),
            SagaError::Journal(msg) => write!(f, "Journal error: {}", msg),
            SagaError::Transaction(msg) => write!(f, "{}", msg),
            SagaError::RecoveryPending => {
                write!(f, "Startup recovery has not completed; new transactions are refused")
            }
            SagaError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            SagaError::Json(msg) => write!(f, "JSON error: {}", msg),
            SagaError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for SagaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SagaError::Io(e) => Some(e),
            SagaError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SagaError {
    fn from(e: io::Error) -> Self {
        SagaError::Io(e)
    }
}

impl From<OperationError> for SagaError {
    fn from(e: OperationError) -> Self {
        SagaError::Operation(e)
    }
}

impl From<bincode::Error> for SagaError {
    fn from(e: bincode::Error) -> Self {
        SagaError::Journal(format!("record codec: {}", e))
    }
}

impl From<serde_json::Error> for SagaError {
    fn from(e: serde_json::Error) -> Self {
        SagaError::Json(e.to_string())
    }
}

/// Result type alias for filesaga operations
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_errors() {
        let err = io::Error::new(io::ErrorKind::AlreadyExists, "taken");
        assert_eq!(classify_io_error(&err), FailureKind::Collision);

        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(classify_io_error(&err), FailureKind::NotFound);

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(classify_io_error(&err), FailureKind::PermissionDenied);
    }

    #[cfg(unix)]
    #[test]
    fn test_cross_device_detection() {
        let err = io::Error::from_raw_os_error(18);
        assert!(is_cross_device(&err));
        assert_eq!(classify_io_error(&err), FailureKind::CrossDevice);

        let err = io::Error::from_raw_os_error(2);
        assert!(!is_cross_device(&err));
    }

    #[test]
    fn test_operation_error_display() {
        let err = OperationError::new(
            OperationType::Move,
            "/a/1.txt",
            io::Error::new(io::ErrorKind::NotFound, "No such file"),
        );
        let msg = err.to_string();
        assert!(msg.contains("move"));
        assert!(msg.contains("/a/1.txt"));
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[test]
    fn test_saga_error_failure_kind() {
        let err = SagaError::Journal("disk full".to_string());
        assert_eq!(err.failure_kind(), FailureKind::Journal);
        assert!(err.to_string().contains("disk full"));
    }
}
