//! Bounded job processor.
//!
//! A fixed pool of workers drains a bounded mailbox. Submission blocks when
//! the mailbox is full, which is the backpressure contract: callers must
//! not hold database locks across a submit. Jobs are responsible for being
//! safely re-runnable; the processor promises no idempotency and no global
//! ordering across workers.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info};

use console_core::db::tasks;
use console_core::jobs::JobKind;

/// Default mailbox capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 256;

/// Default worker pool size.
pub const DEFAULT_POOL_SIZE: usize = 4;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A serializable unit of work executed by the processor.
#[async_trait]
pub trait Job: Send + Sync {
    /// Tag selecting the handler class, used for log correlation.
    fn kind(&self) -> JobKind;

    /// Stable identifier for log correlation. Not a deduplication key.
    fn id(&self) -> String;

    async fn run(&self) -> Result<(), JobError>;
}

pub type BoxedJob = Box<dyn Job>;

struct QueuedJob {
    job: BoxedJob,
    /// Audit-trail row to flip after the job runs, when the job arrived
    /// over the wire.
    task_id: Option<i64>,
}

/// Handle for submitting jobs into the worker pool.
#[derive(Clone)]
pub struct JobProcessor {
    tx: mpsc::Sender<QueuedJob>,
}

impl JobProcessor {
    /// Enqueues a job, waiting whenever the mailbox is full.
    pub async fn submit(&self, job: BoxedJob) {
        self.submit_with_task(job, None).await;
    }

    /// Enqueues a job that carries a `console_tasks` audit row.
    pub async fn submit_with_task(&self, job: BoxedJob, task_id: Option<i64>) {
        // A send error means the queue is closed during shutdown; the job
        // is dropped and recovered by the convergence loops.
        if self.tx.send(QueuedJob { job, task_id }).await.is_err() {
            error!("job queue closed, dropping job");
        }
    }
}

/// The worker pool side of the processor. Owns the join handles; dropping
/// the last [`JobProcessor`] clone and calling [`ProcessorHandle::close`]
/// drains and stops the workers.
pub struct ProcessorHandle {
    workers: JoinSet<()>,
}

impl ProcessorHandle {
    /// Waits for the workers to finish draining the queue.
    ///
    /// Callers must drop every [`JobProcessor`] clone first; the workers
    /// exit when the channel closes.
    pub async fn close(mut self) {
        while self.workers.join_next().await.is_some() {}
        info!("processor stopped");
    }
}

/// Starts `pool_size` workers draining a mailbox of `queue_size` slots.
pub fn start(pool: PgPool, queue_size: usize, pool_size: usize) -> (JobProcessor, ProcessorHandle) {
    let (tx, rx) = mpsc::channel::<QueuedJob>(queue_size);
    let rx = Arc::new(Mutex::new(rx));

    let mut workers = JoinSet::new();
    for _ in 0..pool_size {
        let rx = rx.clone();
        let pool = pool.clone();
        workers.spawn(async move {
            loop {
                // Holding the lock only across the dequeue hands jobs to
                // workers in FIFO order while the rest run concurrently.
                let queued = { rx.lock().await.recv().await };
                let Some(queued) = queued else {
                    return;
                };

                run_one(&pool, queued).await;
            }
        });
    }

    info!(queue_size, pool_size, "processor started");
    (JobProcessor { tx }, ProcessorHandle { workers })
}

async fn run_one(pool: &PgPool, queued: QueuedJob) {
    let kind = queued.job.kind();
    let id = queued.job.id();

    let result = queued.job.run().await;

    if let Err(e) = &result {
        error!(job_type = %kind, job_id = id, "job failed: {e}");
    }

    let Some(task_id) = queued.task_id else {
        return;
    };
    let (status, detail) = match &result {
        Ok(()) => ("completed", String::new()),
        Err(e) => ("failed", e.to_string()),
    };
    if let Err(e) = tasks::update_task_status(pool, task_id, status, &detail).await {
        error!(task_id, "failed to update console task status: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn lazy_pool() -> PgPool {
        // Never connected: the test jobs carry no task rows.
        PgPoolOptions::new().connect_lazy("postgresql://localhost/unused").unwrap()
    }

    struct CountingJob {
        counter: Arc<AtomicUsize>,
        release: Arc<Semaphore>,
    }

    impl CountingJob {
        fn boxed(counter: &Arc<AtomicUsize>, release: &Arc<Semaphore>) -> BoxedJob {
            Box::new(CountingJob {
                counter: counter.clone(),
                release: release.clone(),
            })
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn kind(&self) -> JobKind {
            JobKind::UserAudit
        }

        fn id(&self) -> String {
            "test".to_string()
        }

        async fn run(&self) -> Result<(), JobError> {
            self.release.acquire().await.expect("semaphore open").forget();
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_submitted_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Semaphore::new(0));
        let (processor, handle) = start(lazy_pool(), 8, 2);

        for _ in 0..4 {
            processor.submit(CountingJob::boxed(&counter, &release)).await;
        }
        release.add_permits(4);

        drop(processor);
        handle.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn submit_blocks_when_mailbox_is_full() {
        let counter = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Semaphore::new(0));
        // One worker, one slot: the first job occupies the worker, the
        // second fills the mailbox, the third must wait.
        let (processor, handle) = start(lazy_pool(), 1, 1);

        for _ in 0..2 {
            processor.submit(CountingJob::boxed(&counter, &release)).await;
        }

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            processor.submit(CountingJob::boxed(&counter, &release)),
        )
        .await;
        assert!(blocked.is_err(), "submit should block while the mailbox is full");

        // Draining one job unblocks the submitter.
        release.add_permits(1);
        tokio::time::timeout(
            Duration::from_secs(1),
            processor.submit(CountingJob::boxed(&counter, &release)),
        )
        .await
        .expect("submit should proceed after a worker drains one job");

        release.add_permits(2);
        drop(processor);
        handle.close().await;
        // The timed-out submit never enqueued its job.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    struct FailingJob;

    #[async_trait]
    impl Job for FailingJob {
        fn kind(&self) -> JobKind {
            JobKind::DomainCheck
        }

        fn id(&self) -> String {
            "boom".to_string()
        }

        async fn run(&self) -> Result<(), JobError> {
            Err(JobError::new("synthetic failure"))
        }
    }

    #[tokio::test]
    async fn failing_job_does_not_kill_the_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Semaphore::new(1));
        let (processor, handle) = start(lazy_pool(), 4, 1);

        processor.submit(Box::new(FailingJob)).await;
        processor.submit(CountingJob::boxed(&counter, &release)).await;

        drop(processor);
        handle.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
