//! Worker pool and the handoff stage.
//!
//! Idle workers advertise their private inbox by sending it into the pool
//! channel. The handoff task pairs every job the dispatcher dequeued with
//! the next advertised inbox, in order. It is the only place where a job
//! waits for a free worker, so the dispatch loop itself never does.

use tokio::sync::mpsc;

use crate::job::Job;

/// Sending side of a worker's private inbox.
pub(crate) type Inbox = mpsc::Sender<Job>;

/// Registration side of the pool, held by every worker.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    tx: mpsc::Sender<Inbox>,
}

impl PoolHandle {
    pub(crate) fn new(tx: mpsc::Sender<Inbox>) -> Self {
        Self { tx }
    }

    /// Advertise `inbox` as ready for one job.
    ///
    /// Returns `false` once the handoff stage is gone.
    pub(crate) async fn register(&self, inbox: Inbox) -> bool {
        self.tx.send(inbox).await.is_ok()
    }
}

/// Pairs dequeued jobs with idle workers.
pub(crate) struct Handoff {
    jobs: mpsc::Receiver<Job>,
    pool: mpsc::Receiver<Inbox>,
}

impl Handoff {
    pub(crate) fn new(jobs: mpsc::Receiver<Job>, pool: mpsc::Receiver<Inbox>) -> Self {
        Self { jobs, pool }
    }

    /// Deliver jobs until the dispatch loop hangs up, including every job it
    /// dequeued before stopping.
    ///
    /// Jobs are only discarded when no worker is left to take them; their
    /// completion channels close.
    pub(crate) async fn run(mut self) {
        while let Some(job) = self.jobs.recv().await {
            if let Err(job) = self.deliver(job).await {
                tracing::warn!(job_id = %job.id(), "No worker left to take the job, discarding");
                break;
            }
        }

        self.jobs.close();
        let mut discarded = 0usize;
        while self.jobs.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::warn!(discarded, "Discarded jobs awaiting handoff");
        }
        tracing::debug!("Handoff stopped");
    }

    /// Hand `job` to the next idle worker, skipping inboxes whose worker has
    /// already exited.
    async fn deliver(&mut self, mut job: Job) -> Result<(), Job> {
        loop {
            let Some(inbox) = self.pool.recv().await else {
                return Err(job);
            };

            // A registered worker is waiting on an empty inbox, so this only
            // fails when that worker has shut down.
            match inbox.send(job).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }
    }
}
