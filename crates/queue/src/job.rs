//! Job model: payload, action discriminator, status state machine and the
//! failure report a worker hands back to the dispatcher.
//!
//! ```text
//! Created ──▶ Pending ──▶ Done
//!                │
//!                ▼
//!             Failed ──(requeue)──▶ Pending
//!                │
//!                └──(budget exhausted)──▶ dropped
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Opaque data consumed by a job's action.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A single value.
    One(Value),
    /// An ordered sequence of values.
    Many(Vec<Value>),
}

impl Payload {
    /// An empty sequence.
    pub fn empty() -> Self {
        Self::Many(Vec::new())
    }

    /// View the payload as a slice, whichever shape it has.
    pub fn values(&self) -> &[Value] {
        match self {
            Payload::One(value) => std::slice::from_ref(value),
            Payload::Many(values) => values,
        }
    }

    /// The single value, if this payload holds exactly one.
    pub fn single(&self) -> Option<&Value> {
        match self {
            Payload::One(value) => Some(value),
            Payload::Many(values) if values.len() == 1 => values.first(),
            Payload::Many(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::One(value)
    }
}

impl From<Vec<Value>> for Payload {
    fn from(values: Vec<Value>) -> Self {
        Self::Many(values)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Async function attached to a custom-function job.
///
/// Receives a copy of the job payload on every attempt.
pub type JobFn = Arc<dyn Fn(Payload) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// What a worker does with a job.
#[derive(Clone)]
pub enum JobAction {
    /// Turn a fetched page of chat history into stored messages.
    ParseChatMessages,
    /// Persist a single chat message.
    SaveChatMessage,
    /// Invoke the attached function. A job without a function is ignored.
    CustomFunction(Option<JobFn>),
}

impl JobAction {
    /// Stable name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            JobAction::ParseChatMessages => "parse_chat_messages",
            JobAction::SaveChatMessage => "save_chat_message",
            JobAction::CustomFunction(_) => "custom_function",
        }
    }
}

impl fmt::Debug for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::CustomFunction(func) => f
                .debug_tuple("CustomFunction")
                .field(&func.as_ref().map(|_| "<fn>"))
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Status and outcome
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Constructed, possibly queued, not yet picked up by a worker.
    Created,
    /// Accepted by a worker and executing.
    Pending,
    /// Reserved for backpressure signalling. No transition produces it yet.
    Blocked,
    /// The last attempt failed.
    Failed,
    /// Executed successfully.
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Pending => "pending",
            JobStatus::Blocked => "blocked",
            JobStatus::Failed => "failed",
            JobStatus::Done => "done",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final disposition of a job, delivered to the producer when it asked for
/// one via [`Job::with_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The action succeeded after `failure_count` failed attempts.
    Done { failure_count: u32 },
    /// The retry budget ran out (or the dispatcher stopped) and the job was
    /// discarded.
    Dropped { failure_count: u32, cause: String },
    /// Custom-function job without a function: neither success nor failure.
    Ignored,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A unit of work.
///
/// Not `Clone`: whichever stage holds a job owns it exclusively, and
/// ownership moves with every channel send.
pub struct Job {
    id: Uuid,
    payload: Payload,
    action: JobAction,
    status: JobStatus,
    failure_count: u32,
    completion: Option<oneshot::Sender<JobOutcome>>,
}

impl Job {
    /// Create a job in the [`JobStatus::Created`] state.
    pub fn new(action: JobAction, payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload: payload.into(),
            action,
            status: JobStatus::Created,
            failure_count: 0,
            completion: None,
        }
    }

    pub fn parse_chat_messages(payload: impl Into<Payload>) -> Self {
        Self::new(JobAction::ParseChatMessages, payload)
    }

    pub fn save_chat_message(payload: impl Into<Payload>) -> Self {
        Self::new(JobAction::SaveChatMessage, payload)
    }

    /// Create a custom-function job from an async closure.
    pub fn custom<F, Fut>(payload: impl Into<Payload>, func: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let func: JobFn = Arc::new(move |payload| func(payload).boxed());
        Self::new(JobAction::CustomFunction(Some(func)), payload)
    }

    /// Ask to be told how this job ends.
    ///
    /// The receiver resolves with a [`JobOutcome`]; it errors instead if the
    /// job is discarded by shutdown before reaching an outcome.
    pub fn with_completion(mut self) -> (Self, oneshot::Receiver<JobOutcome>) {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        (self, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn action(&self) -> &JobAction {
        &self.action
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Move the job to `status`. Entering [`JobStatus::Failed`] bumps the
    /// failure count; nothing else touches it.
    pub(crate) fn set_status(&mut self, status: JobStatus) {
        if status == JobStatus::Failed {
            self.failure_count += 1;
        }
        self.status = status;
    }

    /// Record a failed attempt and wrap the job into the report sent back to
    /// the dispatcher.
    pub(crate) fn fail(mut self, cause: anyhow::Error) -> JobError {
        self.set_status(JobStatus::Failed);
        JobError { cause, job: self }
    }

    /// Deliver the final outcome to the producer, if it asked for one.
    pub(crate) fn complete(&mut self, outcome: JobOutcome) {
        if let Some(tx) = self.completion.take() {
            // The producer may have stopped listening.
            let _ = tx.send(outcome);
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("status", &self.status)
            .field("failure_count", &self.failure_count)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// JobError
// ---------------------------------------------------------------------------

/// A failed execution attempt: the cause plus the job that produced it.
///
/// Created once per failed attempt by the worker, consumed once by the
/// dispatcher's retry handler.
#[derive(Debug)]
pub struct JobError {
    cause: anyhow::Error,
    job: Job,
}

impl JobError {
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_parts(self) -> (anyhow::Error, Job) {
        (self.cause, self.job)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {} failed (attempt {}): {:#}",
            self.job.id, self.job.failure_count, self.cause
        )
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn new_job_starts_created_with_no_failures() {
        let job = Job::save_chat_message(json!({"msgId": 1}));
        assert_eq!(job.status(), JobStatus::Created);
        assert_eq!(job.failure_count(), 0);
        assert_matches!(job.action(), JobAction::SaveChatMessage);
    }

    #[test]
    fn only_failed_transition_counts() {
        let mut job = Job::parse_chat_messages(Payload::empty());

        job.set_status(JobStatus::Pending);
        job.set_status(JobStatus::Done);
        assert_eq!(job.failure_count(), 0);

        job.set_status(JobStatus::Failed);
        job.set_status(JobStatus::Pending);
        job.set_status(JobStatus::Failed);
        assert_eq!(job.failure_count(), 2);
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn fail_wraps_job_and_increments() {
        let job = Job::parse_chat_messages(Payload::empty());
        let id = job.id();

        let report = job.fail(anyhow::anyhow!("boom"));
        assert_eq!(report.job().id(), id);
        assert_eq!(report.job().failure_count(), 1);
        assert_eq!(report.job().status(), JobStatus::Failed);
        assert_eq!(report.cause().to_string(), "boom");
        assert!(report.to_string().contains("attempt 1"));
    }

    #[tokio::test]
    async fn completion_is_delivered_once() {
        let (mut job, rx) = Job::custom(Payload::empty(), |_| async { Ok(()) }).with_completion();

        job.complete(JobOutcome::Done { failure_count: 0 });
        // A second completion is a no-op: the sender is gone.
        job.complete(JobOutcome::Ignored);

        assert_eq!(rx.await.unwrap(), JobOutcome::Done { failure_count: 0 });
    }

    #[tokio::test]
    async fn dropping_job_closes_completion() {
        let (job, rx) = Job::save_chat_message(Payload::empty()).with_completion();
        drop(job);
        assert!(rx.await.is_err());
    }

    #[test]
    fn payload_views() {
        let one = Payload::from(json!("a"));
        assert_eq!(one.values().len(), 1);
        assert_eq!(one.single(), Some(&json!("a")));

        let many = Payload::from(vec![json!(1), json!(2)]);
        assert_eq!(many.len(), 2);
        assert!(many.single().is_none());

        assert!(Payload::empty().is_empty());
    }

    #[test]
    fn custom_without_function_debug_prints() {
        let job = Job::new(JobAction::CustomFunction(None), Payload::empty());
        let debug = format!("{job:?}");
        assert!(debug.contains("CustomFunction(None)"));
    }
}
