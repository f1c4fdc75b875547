use chatdump_core::CoreError;

/// Errors surfaced by the dispatcher to the embedding application.
///
/// Action failures never show up here: they are handled by the retry
/// policy and reported through [`JobOutcome`](crate::JobOutcome).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A capacity or worker count failed validation.
    #[error("Invalid dispatcher configuration: {0}")]
    InvalidConfig(#[from] CoreError),

    /// The dispatcher has been destroyed; no further jobs are accepted.
    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    /// `destroy` was called more than once.
    #[error("Dispatcher has already been destroyed")]
    AlreadyDestroyed,

    /// A worker task panicked or was aborted.
    #[error("Worker task failed: {0}")]
    WorkerFailed(String),

    /// The handoff task panicked or was aborted.
    #[error("Handoff task failed: {0}")]
    HandoffFailed(String),
}
