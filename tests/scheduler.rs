// tests/scheduler.rs
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use feed_herald::error::CycleError;
use feed_herald::ingest::scheduler::{run_guarded, CycleGate, PollJob, Scheduler, TriggerPolicy};

/// Counts started cycles; each cycle takes `busy` of (virtual) time.
struct CountingJob {
    started: AtomicUsize,
    busy: Duration,
}

impl CountingJob {
    fn new(busy: Duration) -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            busy,
        })
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PollJob for CountingJob {
    fn category(&self) -> &'static str {
        "content"
    }

    async fn run_cycle(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.busy).await;
    }
}

/// Blocks inside the cycle until released.
struct BlockingJob {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl PollJob for BlockingJob {
    fn category(&self) -> &'static str {
        "feeds"
    }

    async fn run_cycle(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[tokio::test]
async fn second_trigger_is_skipped_while_cycle_runs() {
    let job = Arc::new(BlockingJob {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let gate = CycleGate::new("feeds");

    let first = {
        let (job, gate) = (job.clone(), gate.clone());
        tokio::spawn(async move { run_guarded(job.as_ref(), &gate).await })
    };
    job.entered.notified().await;

    assert_eq!(
        run_guarded(job.as_ref(), &gate).await,
        Err(CycleError::AlreadyRunning("feeds"))
    );

    job.release.notify_one();
    assert_eq!(first.await.unwrap(), Ok(()));
    assert!(!gate.is_running());
}

#[tokio::test(start_paused = true)]
async fn interval_trigger_fires_after_initial_delay() {
    let job = CountingJob::new(Duration::from_millis(10));
    let mut scheduler = Scheduler::new(CancellationToken::new());
    scheduler
        .schedule(
            TriggerPolicy::Interval {
                every: Duration::from_secs(60),
                initial_delay: Duration::from_secs(5),
            },
            job.clone(),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(job.started(), 0);

    // Ticks at 5s, 65s, 125s.
    tokio::time::sleep(Duration::from_secs(126)).await;
    assert_eq!(job.started(), 3);

    scheduler.shutdown().await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(job.started(), 3, "no cycles after shutdown");
}

#[tokio::test(start_paused = true)]
async fn overlapping_ticks_are_skipped_not_queued() {
    let job = CountingJob::new(Duration::from_secs(150));
    let mut scheduler = Scheduler::new(CancellationToken::new());
    scheduler
        .schedule(
            TriggerPolicy::Interval {
                every: Duration::from_secs(60),
                initial_delay: Duration::ZERO,
            },
            job.clone(),
        )
        .await
        .unwrap();

    // Cycle started at 0s holds the gate until 150s; ticks at 60s and 120s
    // skip, the one at 180s runs.
    tokio::time::sleep(Duration::from_secs(190)).await;
    assert_eq!(job.started(), 2);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn invalid_cron_is_rejected() {
    let mut scheduler = Scheduler::new(CancellationToken::new());
    let job = CountingJob::new(Duration::ZERO);
    let res = scheduler
        .schedule(
            TriggerPolicy::Calendar {
                cron: "every now and then".into(),
            },
            job,
        )
        .await;
    assert!(res.is_err());
    scheduler.shutdown().await;
}
