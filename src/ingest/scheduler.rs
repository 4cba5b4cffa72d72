// src/ingest/scheduler.rs
//! Periodic triggers for poll cycles.
//!
//! Fixed-interval triggers run on a tokio interval; calendar triggers run on a
//! `tokio-cron-scheduler` job. Either way a trigger spawns the cycle on a task
//! tracker, so a slow cycle can overlap the next tick. The per-category
//! `CycleGate` turns that overlap into a logged skip.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::CycleError;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// A full poll cycle over one source category.
#[async_trait]
pub trait PollJob: Send + Sync + 'static {
    fn category(&self) -> &'static str;
    async fn run_cycle(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPolicy {
    Interval {
        every: Duration,
        initial_delay: Duration,
    },
    /// Cron expression with a leading seconds field, e.g. `0 0,30 * * * *`.
    Calendar { cron: String },
}

impl TriggerPolicy {
    pub fn every(every: Duration) -> Self {
        TriggerPolicy::Interval {
            every,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }

    /// Fire at the given minute-of-hour marks, every hour.
    pub fn at_minutes(minutes: &[u32]) -> Result<Self> {
        if minutes.is_empty() {
            bail!("calendar trigger needs at least one minute mark");
        }
        if let Some(bad) = minutes.iter().find(|m| **m > 59) {
            bail!("minute mark {bad} is out of range 0..=59");
        }
        let mut marks = minutes.to_vec();
        marks.sort_unstable();
        marks.dedup();
        let list = marks
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Ok(TriggerPolicy::Calendar {
            cron: format!("0 {list} * * * *"),
        })
    }
}

/// Processing flag for one source category: `Idle -> Running -> Idle`.
#[derive(Debug)]
pub struct CycleGate {
    category: &'static str,
    running: AtomicBool,
}

impl CycleGate {
    pub fn new(category: &'static str) -> Arc<Self> {
        Arc::new(Self {
            category,
            running: AtomicBool::new(false),
        })
    }

    pub fn try_enter(self: &Arc<Self>) -> Result<CycleGuard, CycleError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| CycleGuard { gate: self.clone() })
            .map_err(|_| CycleError::AlreadyRunning(self.category))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Marks the category idle again when dropped.
#[derive(Debug)]
pub struct CycleGuard {
    gate: Arc<CycleGate>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::Release);
    }
}

/// Run one cycle unless the category is already running.
pub async fn run_guarded(job: &dyn PollJob, gate: &Arc<CycleGate>) -> Result<(), CycleError> {
    let _guard = match gate.try_enter() {
        Ok(g) => g,
        Err(e) => {
            counter!("poll_cycles_skipped_total", "category" => job.category()).increment(1);
            tracing::warn!(target: "scheduler", category = job.category(), "{e}; trigger skipped");
            return Err(e);
        }
    };
    tracing::debug!(target: "scheduler", category = job.category(), "poll cycle started");
    job.run_cycle().await;
    Ok(())
}

pub struct Scheduler {
    cancel: CancellationToken,
    tracker: TaskTracker,
    gates: HashMap<&'static str, Arc<CycleGate>>,
    cron: Option<JobScheduler>,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tracker: TaskTracker::new(),
            gates: HashMap::new(),
            cron: None,
        }
    }

    /// Gate shared by every trigger of `category`.
    pub fn gate(&mut self, category: &'static str) -> Arc<CycleGate> {
        self.gates
            .entry(category)
            .or_insert_with(|| CycleGate::new(category))
            .clone()
    }

    pub async fn schedule(&mut self, policy: TriggerPolicy, job: Arc<dyn PollJob>) -> Result<()> {
        let gate = self.gate(job.category());
        match policy {
            TriggerPolicy::Interval {
                every,
                initial_delay,
            } => {
                if every.is_zero() {
                    bail!("{} interval must be greater than zero", job.category());
                }
                tracing::info!(
                    target: "scheduler",
                    category = job.category(),
                    every_ms = every.as_millis() as u64,
                    initial_delay_ms = initial_delay.as_millis() as u64,
                    "interval trigger armed"
                );
                self.tracker.spawn(interval_loop(
                    every,
                    initial_delay,
                    job,
                    gate,
                    self.cancel.clone(),
                    self.tracker.clone(),
                ));
            }
            TriggerPolicy::Calendar { cron } => {
                let category = job.category();
                let cancel = self.cancel.clone();
                let tracker = self.tracker.clone();
                let cron_job = Job::new_async(cron.as_str(), move |_uuid, _l| {
                    let job = job.clone();
                    let gate = gate.clone();
                    let cancel = cancel.clone();
                    let tracker = tracker.clone();
                    Box::pin(async move {
                        if cancel.is_cancelled() {
                            return;
                        }
                        fire(&tracker, job, gate);
                    })
                })
                .with_context(|| format!("creating {category} job for cron {cron}"))?;
                self.cron_scheduler()
                    .await?
                    .add(cron_job)
                    .await
                    .context("adding calendar job")?;
                tracing::info!(target: "scheduler", category, %cron, "calendar trigger armed");
            }
        }
        Ok(())
    }

    async fn cron_scheduler(&mut self) -> Result<&JobScheduler> {
        if self.cron.is_none() {
            let sched = JobScheduler::new().await.context("creating scheduler")?;
            sched.start().await.context("starting scheduler")?;
            self.cron = Some(sched);
        }
        self.cron
            .as_ref()
            .context("calendar scheduler missing after init")
    }

    /// Stop arming triggers and wait for in-flight cycles to wind down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(mut sched) = self.cron.take() {
            if let Err(e) = sched.shutdown().await {
                tracing::warn!(target: "scheduler", error = %e, "calendar scheduler shutdown failed");
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(target: "scheduler", "scheduler stopped");
    }
}

fn fire(tracker: &TaskTracker, job: Arc<dyn PollJob>, gate: Arc<CycleGate>) {
    tracker.spawn(async move {
        let _ = run_guarded(job.as_ref(), &gate).await;
    });
}

async fn interval_loop(
    every: Duration,
    initial_delay: Duration,
    job: Arc<dyn PollJob>,
    gate: Arc<CycleGate>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    tokio::select! {
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(initial_delay) => {}
    }

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => fire(&tracker, job.clone(), gate.clone()),
        }
    }
    tracing::debug!(target: "scheduler", category = job.category(), "interval trigger stopped");
}
