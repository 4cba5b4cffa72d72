// src/poller.rs
//! One poll cycle: fetch every source of a category, run each item through the
//! change detector, deliver what is due and commit markers for what was delivered.
//!
//! Sources are visited sequentially and items within a source oldest-first.
//! A failing source is logged and skipped; it never aborts the cycle.

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::change_detector::{evaluate, Decision};
use crate::commit::{CommitEngine, CommitOutcome};
use crate::error::{DeliveryError, StoreError};
use crate::feed_differ::{new_items, sort_chronologically};
use crate::ingest::scheduler::PollJob;
use crate::ingest::types::{WatchedFeed, WatchedSource};
use crate::item::{
    scoped_id, FeedCursor, Item, ItemState, MarkerMetadata, MarkerSet, NotificationKind,
};
use crate::notify::{Destination, Notification, NotificationSink};
use crate::store::ItemStateStore;

pub const CONTENT_CATEGORY: &str = "content";
pub const FEED_CATEGORY: &str = "feeds";

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poll_cycles_total", "Completed poll cycles by category.");
        describe_counter!(
            "poll_cycles_skipped_total",
            "Triggers skipped because a cycle was still running."
        );
        describe_counter!("source_fetch_errors_total", "Source fetch/parse errors.");
        describe_counter!("items_observed_total", "Items returned by source adapters.");
        describe_counter!("notifications_sent_total", "Delivered notifications by kind.");
        describe_counter!("notification_failures_total", "Deliveries deferred to a later cycle.");
        describe_counter!(
            "marker_commit_conflicts_total",
            "Commits that found the marker already present."
        );
        describe_counter!(
            "marker_commit_failures_total",
            "Delivered notifications whose marker could not be written."
        );
        describe_counter!("store_errors_total", "Store read/write failures.");
        describe_gauge!("poll_last_run_ts", "Unix ts when a poll cycle last finished.");
    });
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PollerOptions {
    /// On store read failure treat the item as unseen instead of skipping it.
    pub fail_open_on_read_error: bool,
}

/// What happened to one observed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Notified(NotificationKind),
    Silent,
    /// Delivery failed; no marker was written and the item stays due.
    DeliveryFailed(NotificationKind),
    /// Prior state could not be read; nothing was done.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub items_seen: usize,
    pub notified: usize,
    pub delivery_failures: usize,
    pub skipped_items: usize,
    /// Stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl CycleReport {
    fn tally(&mut self, outcome: ItemOutcome) {
        self.items_seen += 1;
        match outcome {
            ItemOutcome::Notified(_) => self.notified += 1,
            ItemOutcome::Silent => {}
            ItemOutcome::DeliveryFailed(_) => self.delivery_failures += 1,
            ItemOutcome::Skipped => self.skipped_items += 1,
        }
    }
}

pub struct Poller {
    store: Arc<dyn ItemStateStore>,
    sink: Arc<dyn NotificationSink>,
    commit: CommitEngine,
    options: PollerOptions,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(store: Arc<dyn ItemStateStore>, sink: Arc<dyn NotificationSink>) -> Self {
        ensure_metrics_described();
        Self {
            commit: CommitEngine::new(store.clone()),
            store,
            sink,
            options: PollerOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: PollerOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop between items once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run_content_cycle(&self, sources: &[WatchedSource]) -> CycleReport {
        let mut report = CycleReport::default();

        'sources: for ws in sources {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            let name = ws.source.name();
            let mut items = match ws.source.fetch_recent().await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(target: "poll", source = name, error = %e, "source fetch failed");
                    counter!("source_fetch_errors_total").increment(1);
                    report.sources_failed += 1;
                    continue;
                }
            };
            sort_chronologically(&mut items);

            for item in &items {
                if self.cancel.is_cancelled() {
                    report.interrupted = true;
                    break 'sources;
                }
                let outcome = self.process_item(name, &ws.destination, item).await;
                report.tally(outcome);
            }
            report.sources_ok += 1;
        }

        self.finish_cycle(CONTENT_CATEGORY, &report);
        report
    }

    pub async fn run_feed_cycle(&self, feeds: &[WatchedFeed]) -> CycleReport {
        let mut report = CycleReport::default();

        'feeds: for feed in feeds {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            let name = feed.source.name();
            let batch = match feed.source.fetch_recent().await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(target: "poll", source = name, error = %e, "feed fetch failed");
                    counter!("source_fetch_errors_total").increment(1);
                    report.sources_failed += 1;
                    continue;
                }
            };

            let cursor = match self.store.get_feed_cursor(&feed.url).await {
                Ok(c) => c,
                Err(e) if self.options.fail_open_on_read_error => {
                    counter!("store_errors_total").increment(1);
                    tracing::warn!(target: "poll", source = name, error = %e, "cursor read failed; treating feed as fresh");
                    None
                }
                Err(e) => {
                    counter!("store_errors_total").increment(1);
                    tracing::warn!(target: "poll", source = name, error = %e, "cursor read failed; skipping feed");
                    report.sources_failed += 1;
                    continue;
                }
            };

            let fresh = new_items(batch, cursor.as_ref());
            tracing::debug!(target: "poll", source = name, new = fresh.len(), "feed batch classified");

            let mut handled: Option<&Item> = None;
            for item in &fresh {
                if self.cancel.is_cancelled() {
                    report.interrupted = true;
                    self.advance_cursor(feed, handled).await;
                    break 'feeds;
                }
                let outcome = self.process_item(name, &feed.destination, item).await;
                report.tally(outcome);
                match outcome {
                    ItemOutcome::Notified(_) | ItemOutcome::Silent => handled = Some(item),
                    // Later entries wait so the cursor never passes an unsent one.
                    ItemOutcome::DeliveryFailed(_) | ItemOutcome::Skipped => break,
                }
            }
            self.advance_cursor(feed, handled).await;
            report.sources_ok += 1;
        }

        self.finish_cycle(FEED_CATEGORY, &report);
        report
    }

    async fn advance_cursor(&self, feed: &WatchedFeed, handled: Option<&Item>) {
        let Some(last) = handled else {
            return;
        };
        let cursor = FeedCursor::at(&feed.url, last);
        if let Err(e) = self.store.set_feed_cursor(&cursor).await {
            counter!("store_errors_total").increment(1);
            tracing::warn!(target: "poll", source = feed.source.name(), error = %e, "cursor write failed");
        }
    }

    /// Evaluate → deliver → commit → upsert for a single item.
    pub async fn process_item(
        &self,
        source_name: &str,
        destination: &Destination,
        item: &Item,
    ) -> ItemOutcome {
        let Some((prior, markers)) = self.read_prior(source_name, item).await else {
            return ItemOutcome::Skipped;
        };

        let now = Utc::now();
        let ev = evaluate(item, source_name, prior.as_ref(), markers, now);
        if ev.transitioned {
            tracing::debug!(
                target: "poll",
                source = source_name,
                item_id = %item.id,
                from = ?prior.as_ref().map(|p| p.lifecycle),
                to = %item.lifecycle,
                "lifecycle changed"
            );
        }

        let outcome = match ev.decision {
            Decision::NoNotify => ItemOutcome::Silent,
            Decision::Notify(kind) => {
                let n = Notification {
                    destination: destination.clone(),
                    source_name: source_name.to_string(),
                    item: item.clone(),
                    kind,
                    plain: false,
                    ts: now,
                };
                match self.dispatch(&n).await {
                    Ok(()) => {
                        self.record_sent(&n).await;
                        ItemOutcome::Notified(kind)
                    }
                    Err(e) => {
                        counter!("notification_failures_total").increment(1);
                        tracing::warn!(
                            target: "poll",
                            source = source_name,
                            item_id = %item.id,
                            %kind,
                            error = %e,
                            "delivery failed; will retry next cycle"
                        );
                        ItemOutcome::DeliveryFailed(kind)
                    }
                }
            }
        };

        // An undelivered status change keeps the prior `upcoming` record so the
        // transition is seen again next cycle.
        if outcome != ItemOutcome::DeliveryFailed(NotificationKind::StatusChange) {
            if let Err(e) = self.store.upsert_item_state(&ev.next_state).await {
                counter!("store_errors_total").increment(1);
                tracing::warn!(target: "poll", item_id = %item.id, error = %e, "state upsert failed");
            }
        }
        outcome
    }

    async fn read_prior(
        &self,
        source_name: &str,
        item: &Item,
    ) -> Option<(Option<ItemState>, MarkerSet)> {
        let read = async {
            let key = scoped_id(source_name, &item.id);
            let prior = self.store.get_item_state(&key).await?;
            let markers = self.store.markers_for(&key).await?;
            Ok::<_, StoreError>((prior, markers))
        };
        match read.await {
            Ok(v) => Some(v),
            Err(e) => {
                counter!("store_errors_total").increment(1);
                if self.options.fail_open_on_read_error {
                    tracing::warn!(target: "poll", source = source_name, item_id = %item.id, error = %e, "store read failed; treating item as unseen");
                    Some((None, MarkerSet::empty()))
                } else {
                    tracing::warn!(target: "poll", source = source_name, item_id = %item.id, error = %e, "store read failed; skipping item");
                    None
                }
            }
        }
    }

    /// Deliver once; on failure retry a single time with the fallback rendering
    /// when the destination has one. Other failures wait for the next cycle.
    async fn dispatch(&self, n: &Notification) -> Result<(), DeliveryError> {
        match self.sink.deliver(n).await {
            Ok(()) => Ok(()),
            Err(first)
                if first != DeliveryError::Closed
                    && self.sink.supports_fallback()
                    && n.destination.has_plain_rendering() =>
            {
                tracing::debug!(target: "poll", item_id = %n.item.id, error = %first, "retrying with fallback rendering");
                self.sink.deliver(&n.fallback()).await
            }
            Err(e) => Err(e),
        }
    }

    async fn record_sent(&self, n: &Notification) {
        let metadata = MarkerMetadata {
            source_name: n.source_name.clone(),
            title: n.item.title.clone(),
            destination: n.destination.label(),
        };
        let key = scoped_id(&n.source_name, &n.item.id);
        match self.commit.commit(&key, n.kind, metadata, n.ts).await {
            Ok(CommitOutcome::Created) => {
                counter!("notifications_sent_total", "kind" => n.kind.as_str()).increment(1);
                tracing::info!(
                    target: "poll",
                    source = %n.source_name,
                    item_id = %n.item.id,
                    kind = %n.kind,
                    destination = %n.destination.label(),
                    "notification sent"
                );
            }
            Ok(CommitOutcome::AlreadyExists) => {}
            Err(e) => {
                counter!("marker_commit_failures_total").increment(1);
                tracing::error!(
                    target: "commit",
                    item_id = %n.item.id,
                    kind = %n.kind,
                    error = %e,
                    "delivered but marker not recorded; a duplicate may follow next cycle"
                );
            }
        }
    }

    fn finish_cycle(&self, category: &'static str, report: &CycleReport) {
        counter!("poll_cycles_total", "category" => category).increment(1);
        gauge!("poll_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "poll",
            category,
            sources_ok = report.sources_ok,
            sources_failed = report.sources_failed,
            items = report.items_seen,
            notified = report.notified,
            deferred = report.delivery_failures,
            interrupted = report.interrupted,
            "poll cycle finished"
        );
    }
}

/// Scheduler job polling the content (video) sources.
pub struct ContentCycle {
    pub poller: Arc<Poller>,
    pub sources: Vec<WatchedSource>,
}

#[async_trait]
impl PollJob for ContentCycle {
    fn category(&self) -> &'static str {
        CONTENT_CATEGORY
    }

    async fn run_cycle(&self) {
        self.poller.run_content_cycle(&self.sources).await;
    }
}

/// Scheduler job polling the RSS feeds.
pub struct FeedCycle {
    pub poller: Arc<Poller>,
    pub feeds: Vec<WatchedFeed>,
}

#[async_trait]
impl PollJob for FeedCycle {
    fn category(&self) -> &'static str {
        FEED_CATEGORY
    }

    async fn run_cycle(&self) {
        self.poller.run_feed_cycle(&self.feeds).await;
    }
}
