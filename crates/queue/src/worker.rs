//! Worker: a long-lived task that executes one job at a time.
//!
//! Each iteration the worker advertises its private inbox in the pool,
//! then waits for either a job or the shutdown signal. Failures are wrapped
//! into a [`JobError`] and sent back to the dispatcher; a worker never
//! retries on its own.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::hooks::ActionHooks;
use crate::job::{Job, JobAction, JobError, JobOutcome, JobStatus};
use crate::pool::PoolHandle;

pub(crate) struct Worker {
    id: usize,
    pool: PoolHandle,
    inbox_tx: mpsc::Sender<Job>,
    inbox_rx: mpsc::Receiver<Job>,
    shutdown: CancellationToken,
    errors: mpsc::Sender<JobError>,
    hooks: Arc<dyn ActionHooks>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        pool: PoolHandle,
        inbox_capacity: usize,
        shutdown: CancellationToken,
        errors: mpsc::Sender<JobError>,
        hooks: Arc<dyn ActionHooks>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(inbox_capacity);
        Self {
            id,
            pool,
            inbox_tx,
            inbox_rx,
            shutdown,
            errors,
            hooks,
        }
    }

    /// Run until the shutdown signal fires, then finish whatever was
    /// already delivered to the inbox.
    pub(crate) async fn run(mut self) {
        tracing::debug!(worker = self.id, "Worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                registered = self.pool.register(self.inbox_tx.clone()) => {
                    if !registered {
                        break;
                    }
                }
            }

            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = self.inbox_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            self.execute(job).await;
        }

        self.drain().await;
        tracing::debug!(worker = self.id, "Worker stopped");
    }

    /// Execute jobs handed off right before shutdown.
    async fn drain(&mut self) {
        self.inbox_rx.close();
        while let Ok(job) = self.inbox_rx.try_recv() {
            tracing::debug!(worker = self.id, job_id = %job.id(), "Draining job delivered before shutdown");
            self.execute(job).await;
        }
    }

    async fn execute(&self, mut job: Job) {
        job.set_status(JobStatus::Pending);

        let action = job.action().clone();
        tracing::debug!(
            worker = self.id,
            job_id = %job.id(),
            action = action.name(),
            "Executing job",
        );

        let result = match &action {
            JobAction::ParseChatMessages => self.hooks.parse_chat_messages(job.payload()).await,
            JobAction::SaveChatMessage => self.hooks.save_chat_message(job.payload()).await,
            JobAction::CustomFunction(Some(func)) => func(job.payload().clone()).await,
            JobAction::CustomFunction(None) => {
                tracing::warn!(worker = self.id, job_id = %job.id(), "Job has undefined action, ignoring");
                job.complete(JobOutcome::Ignored);
                return;
            }
        };

        match result {
            Ok(()) => {
                job.set_status(JobStatus::Done);
                tracing::debug!(
                    worker = self.id,
                    job_id = %job.id(),
                    failure_count = job.failure_count(),
                    "Job done",
                );
                let failure_count = job.failure_count();
                job.complete(JobOutcome::Done { failure_count });
            }
            Err(cause) => {
                let error = format!("{cause:#}");
                let report = job.fail(cause);
                tracing::warn!(
                    worker = self.id,
                    job_id = %report.job().id(),
                    failure_count = report.job().failure_count(),
                    error = %error,
                    "Could not execute job, job is now Failed",
                );

                if let Err(mpsc::error::SendError(report)) = self.errors.send(report).await {
                    let (cause, mut job) = report.into_parts();
                    tracing::error!(job_id = %job.id(), "Failure feedback path is closed, dropping job");
                    let failure_count = job.failure_count();
                    job.complete(JobOutcome::Dropped {
                        failure_count,
                        cause: format!("{cause:#}"),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::hooks::NoopHooks;
    use crate::job::Payload;
    use crate::pool::Inbox;

    struct Harness {
        pool_rx: mpsc::Receiver<Inbox>,
        errors_rx: mpsc::Receiver<JobError>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(hooks: Arc<dyn ActionHooks>) -> Harness {
        let (pool_tx, pool_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let worker = Worker::new(0, PoolHandle::new(pool_tx), 1, shutdown.clone(), errors_tx, hooks);
        Harness {
            pool_rx,
            errors_rx,
            shutdown,
            task: tokio::spawn(worker.run()),
        }
    }

    impl Harness {
        async fn hand(&mut self, job: Job) {
            let inbox = self.pool_rx.recv().await.expect("worker should register");
            inbox.send(job).await.expect("inbox should be open");
        }

        async fn stop(self) {
            self.shutdown.cancel();
            self.task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn successful_job_reaches_done() {
        let mut h = start(Arc::new(NoopHooks));
        let (job, rx) = Job::custom(Payload::empty(), |_| async { Ok(()) }).with_completion();

        h.hand(job).await;
        assert_eq!(rx.await.unwrap(), JobOutcome::Done { failure_count: 0 });
        h.stop().await;
    }

    #[tokio::test]
    async fn failure_is_reported_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut h = start(Arc::new(NoopHooks));
        let counter = Arc::clone(&calls);
        let job = Job::custom(Payload::empty(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("nope")) }
        });

        h.hand(job).await;
        let report = h.errors_rx.recv().await.unwrap();
        assert_eq!(report.job().failure_count(), 1);
        assert_eq!(report.job().status(), JobStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        h.stop().await;
    }

    #[tokio::test]
    async fn missing_function_is_ignored() {
        let mut h = start(Arc::new(NoopHooks));
        let (job, rx) = Job::new(JobAction::CustomFunction(None), Payload::empty()).with_completion();

        h.hand(job).await;
        assert_eq!(rx.await.unwrap(), JobOutcome::Ignored);
        assert!(h.errors_rx.try_recv().is_err());
        h.stop().await;
    }

    struct FailingSave;

    #[async_trait]
    impl ActionHooks for FailingSave {
        async fn parse_chat_messages(&self, _payload: &Payload) -> anyhow::Result<()> {
            Ok(())
        }

        async fn save_chat_message(&self, _payload: &Payload) -> anyhow::Result<()> {
            anyhow::bail!("store unavailable")
        }
    }

    #[tokio::test]
    async fn hook_failure_is_reported_like_custom_failure() {
        let mut h = start(Arc::new(FailingSave));

        h.hand(Job::save_chat_message(Payload::empty())).await;
        let report = h.errors_rx.recv().await.unwrap();
        assert_matches!(report.job().action(), JobAction::SaveChatMessage);
        assert_eq!(report.cause().to_string(), "store unavailable");
        h.stop().await;
    }

    #[tokio::test]
    async fn shutdown_stops_idle_worker() {
        let h = start(Arc::new(NoopHooks));
        h.stop().await;
    }
}
