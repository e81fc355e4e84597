//! Error types for the coordinator.

use thiserror::Error;

use crate::cloud::CloudError;
use crate::store::StoreError;

/// Result type alias for coordinator operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors that can surface from coordinator operations.
///
/// The reconciliation loop itself never propagates these per tick —
/// transient failures are logged and retried — but setup paths and the
/// external handle do.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("worker pool rejected the job: {0}")]
    Pool(String),

    #[error("event log failure: {0}")]
    EventLog(String),

    #[error("invalid endpoint configuration: {0}")]
    Config(String),
}
