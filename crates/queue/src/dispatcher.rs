//! Job dispatcher.
//!
//! [`Dispatcher`] owns the bounded submission queue and the worker pool.
//! [`Dispatcher::bootstrap`] spawns the workers and runs a single dispatch
//! loop that waits on three event sources:
//!
//! 1. the done signal: stop dequeuing and start draining;
//! 2. the submission queue: hand the job to the handoff stage;
//! 3. the failure feedback path: requeue the job at the tail of the
//!    submission queue, or drop it once the retry budget is spent.
//!
//! The loop only dequeues when it holds a slot in the fixed-capacity
//! handoff channel, so the number of jobs waiting for a free worker is
//! bounded by the worker capacity. Retries are parked in a local buffer and
//! pushed back through the queue once a slot is reserved, so the loop never
//! blocks on its own queue.

use std::collections::VecDeque;
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chatdump_core::validation::validate_capacity;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

use crate::error::DispatchError;
use crate::hooks::{ActionHooks, NoopHooks};
use crate::job::{Job, JobError, JobOutcome};
use crate::pool::{Handoff, Inbox, PoolHandle};
use crate::retry::RetryPolicy;
use crate::worker::Worker;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Fixed capacities and retry policy of one dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Capacity of the submission queue. Producers wait once it is full.
    pub queue_capacity: usize,
    /// Capacity of the worker pool, of each worker's inbox, and of the
    /// handoff stage.
    pub worker_capacity: usize,
    /// What happens to failed jobs.
    pub retry: RetryPolicy,
}

impl DispatcherConfig {
    pub fn new(queue_capacity: usize, worker_capacity: usize) -> Self {
        Self {
            queue_capacity,
            worker_capacity,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        validate_capacity("queue capacity", self.queue_capacity)?;
        validate_capacity("worker capacity", self.worker_capacity)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DispatcherHandle
// ---------------------------------------------------------------------------

/// Producer-side handle: submit jobs and request shutdown.
///
/// Cheap to clone; every clone talks to the same dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    queue: mpsc::Sender<Job>,
    done: CancellationToken,
    destroyed: Arc<AtomicBool>,
}

impl DispatcherHandle {
    /// Submit a job, waiting while the submission queue is full.
    ///
    /// Fails with [`DispatchError::ShuttingDown`] once [`destroy`](Self::destroy)
    /// has been called, including while waiting for queue space.
    pub async fn enqueue(&self, job: Job) -> Result<(), DispatchError> {
        if self.done.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }

        tokio::select! {
            _ = self.done.cancelled() => Err(DispatchError::ShuttingDown),
            sent = self.queue.send(job) => sent.map_err(|_| DispatchError::ShuttingDown),
        }
    }

    /// Raw sending side of the submission queue.
    ///
    /// Sends bypass the shutdown check in [`enqueue`](Self::enqueue) but fail
    /// once the dispatch loop has stopped.
    pub fn queue_sender(&self) -> mpsc::Sender<Job> {
        self.queue.clone()
    }

    /// Signal shutdown. Callable once; a second call is a programming error
    /// and returns [`DispatchError::AlreadyDestroyed`].
    pub fn destroy(&self) -> Result<(), DispatchError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::AlreadyDestroyed);
        }
        tracing::info!("Dispatcher shutdown requested");
        self.done.cancel();
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// One logical work stream: submission queue, worker pool, signals and the
/// failure feedback path. Independent dispatchers share nothing.
pub struct Dispatcher {
    config: DispatcherConfig,
    queue_tx: mpsc::Sender<Job>,
    queue_rx: mpsc::Receiver<Job>,
    pool_tx: mpsc::Sender<Inbox>,
    pool_rx: mpsc::Receiver<Inbox>,
    done: CancellationToken,
    worker_done: CancellationToken,
    destroyed: Arc<AtomicBool>,
    hooks: Arc<dyn ActionHooks>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Allocate the submission queue, the pool and the signals. No job flows until
    /// [`bootstrap`](Self::bootstrap).
    pub fn new(queue_capacity: usize, worker_capacity: usize) -> Result<Self, DispatchError> {
        Self::with_config(DispatcherConfig::new(queue_capacity, worker_capacity))
    }

    pub fn with_config(config: DispatcherConfig) -> Result<Self, DispatchError> {
        config.validate()?;

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (pool_tx, pool_rx) = mpsc::channel(config.worker_capacity);
        Ok(Self {
            config,
            queue_tx,
            queue_rx,
            pool_tx,
            pool_rx,
            done: CancellationToken::new(),
            worker_done: CancellationToken::new(),
            destroyed: Arc::new(AtomicBool::new(false)),
            hooks: Arc::new(NoopHooks),
        })
    }

    /// Inject the persistence hooks used by the built-in chat actions.
    pub fn with_hooks(mut self, hooks: Arc<dyn ActionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            queue: self.queue_tx.clone(),
            done: self.done.clone(),
            destroyed: Arc::clone(&self.destroyed),
        }
    }

    /// Sending side of the submission queue, for producers.
    pub fn queue(&self) -> mpsc::Sender<Job> {
        self.queue_tx.clone()
    }

    /// Signal shutdown; see [`DispatcherHandle::destroy`].
    pub fn destroy(&self) -> Result<(), DispatchError> {
        self.handle().destroy()
    }

    /// Spawn `workers` workers and run the dispatch loop.
    ///
    /// Resolves once shutdown has completed: the loop has stopped, every
    /// worker has finished the job it was running plus anything already in
    /// its inbox, and all failure reports have been accounted for. Spawn the
    /// returned future to run the dispatcher in the background.
    pub async fn bootstrap(self, workers: usize) -> Result<(), DispatchError> {
        validate_capacity("worker count", workers)?;

        let Self {
            config,
            queue_tx,
            queue_rx,
            pool_tx,
            pool_rx,
            done,
            worker_done,
            hooks,
            ..
        } = self;

        tracing::debug!(workers, "Starting worker spawning");

        let (errors_tx, errors_rx) = mpsc::channel(workers);

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let worker = Worker::new(
                id,
                PoolHandle::new(pool_tx.clone()),
                config.worker_capacity,
                worker_done.clone(),
                errors_tx.clone(),
                Arc::clone(&hooks),
            );
            tasks.spawn(worker.run());
        }
        drop(pool_tx);
        drop(errors_tx);

        let (handoff_tx, handoff_rx) = mpsc::channel(config.worker_capacity);
        let mut handoff = tokio::spawn(Handoff::new(handoff_rx, pool_rx).run());

        tracing::info!(workers, "Workers have been spawned");

        let dispatch = DispatchLoop {
            queue_tx,
            queue_rx,
            handoff_tx,
            errors_rx,
            retries: Retries::new(config.retry),
            done,
        };
        let mut errors_rx = dispatch.run().await;

        // Jobs dequeued before shutdown still reach a worker. Failures seen
        // from here on are not retried.
        let handoff_result = loop {
            tokio::select! {
                joined = &mut handoff => break joined,
                Some(report) = errors_rx.recv() => drop_failed_job(report),
            }
        };

        // Workers stop only after the handoff stage, so a job delivered to
        // an inbox is never stranded.
        worker_done.cancel();

        // Keep consuming failure reports until every worker has exited.
        while let Some(report) = errors_rx.recv().await {
            drop_failed_job(report);
        }

        let mut worker_failure = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task failed");
                worker_failure.get_or_insert_with(|| e.to_string());
            }
        }

        handoff_result.map_err(|e| DispatchError::HandoffFailed(e.to_string()))?;
        if let Some(e) = worker_failure {
            return Err(DispatchError::WorkerFailed(e));
        }

        tracing::info!("Dispatcher stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

struct DispatchLoop {
    queue_tx: mpsc::Sender<Job>,
    queue_rx: mpsc::Receiver<Job>,
    handoff_tx: mpsc::Sender<Job>,
    errors_rx: mpsc::Receiver<JobError>,
    retries: Retries,
    done: CancellationToken,
}

impl DispatchLoop {
    /// Run until the done signal fires. Hands the failure feedback path back
    /// so the caller can drain it while workers finish.
    async fn run(mut self) -> mpsc::Receiver<JobError> {
        tracing::info!("Dispatching has been started");

        loop {
            tokio::select! {
                _ = self.done.cancelled() => {
                    tracing::info!("Dispatcher shutting down");
                    break;
                }
                next = next_handoff(&self.handoff_tx, &mut self.queue_rx) => match next {
                    Some((slot, job)) => {
                        tracing::debug!(job_id = %job.id(), "Job dequeued, handing off");
                        slot.send(job);
                    }
                    None => break,
                },
                Some(report) = self.errors_rx.recv() => self.retries.handle_failure(report),
                Some(expired) = poll_fn(|cx| self.retries.delayed.poll_expired(cx)),
                    if !self.retries.delayed.is_empty() =>
                {
                    self.retries.ready.push_back(expired.into_inner());
                }
                slot = self.queue_tx.reserve(), if !self.retries.ready.is_empty() => match slot {
                    Ok(slot) => {
                        if let Some(job) = self.retries.ready.pop_front() {
                            tracing::debug!(job_id = %job.id(), "Requeued failed job");
                            slot.send(job);
                        }
                    }
                    Err(_) => break,
                },
            }
        }

        self.queue_rx.close();
        let mut abandoned = self.retries.len();
        while self.queue_rx.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::info!(abandoned, "Queued jobs abandoned at shutdown");
        }

        self.errors_rx
    }
}

/// Failed jobs on their way back into the submission queue.
struct Retries {
    policy: RetryPolicy,
    /// Waiting for a slot in the submission queue.
    ready: VecDeque<Job>,
    /// Waiting out their backoff delay.
    delayed: DelayQueue<Job>,
}

impl Retries {
    fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            ready: VecDeque::new(),
            delayed: DelayQueue::new(),
        }
    }

    fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    fn handle_failure(&mut self, report: JobError) {
        let (cause, mut job) = report.into_parts();
        let failure_count = job.failure_count();

        if self.policy.should_retry(failure_count) {
            let delay = self.policy.delay_for(failure_count);
            tracing::info!(
                job_id = %job.id(),
                failure_count,
                delay_ms = delay.as_millis() as u64,
                "Trying to restart failed job",
            );
            if delay.is_zero() {
                self.ready.push_back(job);
            } else {
                self.delayed.insert(job, delay);
            }
            return;
        }

        let cause = format!("{cause:#}");
        tracing::error!(
            job_id = %job.id(),
            failure_count,
            max_attempts = self.policy.max_attempts,
            error = %cause,
            "Could not restart failed job, retry budget exhausted",
        );
        job.complete(JobOutcome::Dropped {
            failure_count,
            cause,
        });
    }
}

/// Complete a job that failed while the dispatcher was shutting down.
fn drop_failed_job(report: JobError) {
    let (cause, mut job) = report.into_parts();
    let failure_count = job.failure_count();
    tracing::warn!(
        job_id = %job.id(),
        failure_count,
        "Job failed during shutdown, not retrying",
    );
    job.complete(JobOutcome::Dropped {
        failure_count,
        cause: format!("{cause:#}"),
    });
}

/// Wait for a free handoff slot, then for the next queued job.
///
/// Never holds a job while waiting, so dropping this future loses nothing.
async fn next_handoff<'a>(
    handoff: &'a mpsc::Sender<Job>,
    queue: &mut mpsc::Receiver<Job>,
) -> Option<(mpsc::Permit<'a, Job>, Job)> {
    let slot = handoff.reserve().await.ok()?;
    let job = queue.recv().await?;
    Some((slot, job))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn zero_capacities_are_rejected() {
        assert_matches!(Dispatcher::new(0, 1), Err(DispatchError::InvalidConfig(_)));
        assert_matches!(Dispatcher::new(1, 0), Err(DispatchError::InvalidConfig(_)));
    }

    #[test]
    fn config_defaults_to_three_attempts() {
        let dispatcher = Dispatcher::new(8, 2).unwrap();
        assert_eq!(dispatcher.config().retry.max_attempts, 3);
        assert_eq!(dispatcher.config().queue_capacity, 8);
    }

    #[tokio::test]
    async fn zero_workers_is_rejected() {
        let dispatcher = Dispatcher::new(1, 1).unwrap();
        assert_matches!(
            dispatcher.bootstrap(0).await,
            Err(DispatchError::InvalidConfig(_))
        );
    }

    #[test]
    fn destroy_twice_fails_fast() {
        let dispatcher = Dispatcher::new(1, 1).unwrap();
        let handle = dispatcher.handle();

        assert!(!handle.is_destroyed());
        dispatcher.destroy().unwrap();
        assert!(handle.is_destroyed());
        assert_matches!(handle.destroy(), Err(DispatchError::AlreadyDestroyed));
    }

    #[tokio::test]
    async fn enqueue_after_destroy_is_rejected() {
        let dispatcher = Dispatcher::new(4, 1).unwrap();
        let handle = dispatcher.handle();
        handle.destroy().unwrap();

        let job = Job::save_chat_message(crate::job::Payload::empty());
        assert_matches!(handle.enqueue(job).await, Err(DispatchError::ShuttingDown));
    }
}
