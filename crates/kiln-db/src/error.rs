use thiserror::Error;

/// Error kinds surfaced by the queue store.
///
/// Mirrors the error taxonomy in the design: single-field task updates that
/// require prior existence (`updateTaskStatus`, `updateTaskBranch`, ...)
/// surface [`StoreError::TaskNotFound`] when the row does not exist.
/// `requeueDeadLetter` and `logRunFinish` are exempt by design -- their
/// unknown-id case is a silent no-op, not an error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    TaskNotFound(i64),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
