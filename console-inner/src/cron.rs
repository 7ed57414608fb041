//! Duration-bucketed cron dispatcher.
//!
//! Registrations are grouped by duration; each distinct duration gets one
//! timer task that submits its whole bucket into the processor on every
//! tick. There is no catch-up for missed ticks and no persisted schedule:
//! every registered job is convergent, so restarting the phases is safe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::info;

use crate::processor::{BoxedJob, Job, JobProcessor};

/// A cron entry must be submittable on every tick, so the scheduler holds
/// shared handles rather than boxed one-shot jobs.
type SharedJob = Arc<dyn Job>;

pub struct CronScheduler {
    processor: JobProcessor,
    buckets: HashMap<Duration, Vec<SharedJob>>,
}

/// Running scheduler. Dropping the handle keeps the timers alive; call
/// [`CronHandle::stop`] to end them.
pub struct CronHandle {
    stop: watch::Sender<bool>,
    timers: JoinSet<()>,
}

impl CronScheduler {
    pub fn new(processor: JobProcessor) -> Self {
        Self {
            processor,
            buckets: HashMap::new(),
        }
    }

    /// Registers a job to be submitted every `period`.
    pub fn register(&mut self, period: Duration, job: SharedJob) {
        self.buckets.entry(period).or_default().push(job);
    }

    /// Number of distinct durations, and therefore timers.
    pub fn timer_count(&self) -> usize {
        self.buckets.len()
    }

    /// Spawns one timer per distinct duration.
    pub fn start(self) -> CronHandle {
        let (stop, _) = watch::channel(false);
        let mut timers = JoinSet::new();

        let timer_count = self.buckets.len();
        for (period, jobs) in self.buckets {
            let processor = self.processor.clone();
            let mut stop_rx = stop.subscribe();

            timers.spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // The first interval tick fires immediately; cron semantics
                // start counting from now.
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            for job in &jobs {
                                processor.submit(shared_to_boxed(job.clone())).await;
                            }
                        }
                        _ = stop_rx.changed() => return,
                    }
                }
            });
        }

        info!(timers = timer_count, "cron started");
        CronHandle { stop, timers }
    }
}

impl CronHandle {
    /// Stops every timer and waits for them to exit.
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        while self.timers.join_next().await.is_some() {}
        info!("cron stopped");
    }
}

/// Adapter submitting a shared cron job through the boxed-job mailbox.
struct SharedJobAdapter(SharedJob);

#[async_trait::async_trait]
impl Job for SharedJobAdapter {
    fn kind(&self) -> console_core::jobs::JobKind {
        self.0.kind()
    }

    fn id(&self) -> String {
        self.0.id()
    }

    async fn run(&self) -> Result<(), crate::processor::JobError> {
        self.0.run().await
    }
}

fn shared_to_boxed(job: SharedJob) -> BoxedJob {
    Box::new(SharedJobAdapter(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{self, JobError};
    use async_trait::async_trait;
    use console_core::jobs::JobKind;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TickCounter {
        ticks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for TickCounter {
        fn kind(&self) -> JobKind {
            JobKind::DomainCheck
        }

        fn id(&self) -> String {
            "periodic".to_string()
        }

        async fn run(&self) -> Result<(), JobError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn jobs_with_the_same_period_share_one_timer() {
        let pool = PgPoolOptions::new().connect_lazy("postgresql://localhost/unused").unwrap();
        let (processor, _handle) = processor::start(pool, 4, 1);
        let mut cron = CronScheduler::new(processor);

        let ticks = Arc::new(AtomicUsize::new(0));
        cron.register(Duration::from_secs(60), Arc::new(TickCounter { ticks: ticks.clone() }));
        cron.register(Duration::from_secs(60), Arc::new(TickCounter { ticks: ticks.clone() }));
        cron.register(Duration::from_secs(3600), Arc::new(TickCounter { ticks }));

        assert_eq!(cron.timer_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_submit_every_job_in_the_bucket() {
        let pool = PgPoolOptions::new().connect_lazy("postgresql://localhost/unused").unwrap();
        let (processor, handle) = processor::start(pool, 16, 1);
        let mut cron = CronScheduler::new(processor.clone());

        let ticks = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            cron.register(Duration::from_secs(60), Arc::new(TickCounter { ticks: ticks.clone() }));
        }
        let cron = cron.start();

        // Two virtual minutes: two ticks of a three-job bucket.
        tokio::time::sleep(Duration::from_secs(121)).await;

        cron.stop().await;
        drop(processor);
        handle.close().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 6);
    }
}
