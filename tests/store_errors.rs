// tests/store_errors.rs
mod common;

use chrono::{TimeZone, Utc};
use common::{log_dest, watched_feed, FlakyStore, RecordingSink, ScriptedSource};

use feed_herald::item::{scoped_id, Item, LifecycleState, NotificationKind};
use feed_herald::poller::{ItemOutcome, Poller, PollerOptions};
use feed_herald::store::ItemStateStore;

const URL: &str = "https://blog.example/rss.xml";

fn fail_open() -> PollerOptions {
    PollerOptions {
        fail_open_on_read_error: true,
    }
}

fn post(n: u32) -> Item {
    Item::feed(
        Some(format!("post-{n}")),
        format!("Post {n}"),
        None,
        Some(Utc.with_ymd_and_hms(2024, 1, n, 9, 0, 0).unwrap()),
    )
}

#[tokio::test]
async fn read_failure_skips_the_item_by_default() {
    let store = FlakyStore::new();
    let sink = RecordingSink::new();
    let poller = Poller::new(store.clone(), sink.clone());
    let item = Item::video("v1", "Stream", LifecycleState::Live);

    store.fail_reads(true);
    let outcome = poller.process_item("chan", &log_dest(), &item).await;
    assert_eq!(outcome, ItemOutcome::Skipped);
    assert_eq!(sink.attempts(), 0);
    assert!(store
        .inner
        .get_item_state(&scoped_id("chan", "v1"))
        .await
        .unwrap()
        .is_none());

    store.fail_reads(false);
    let outcome = poller.process_item("chan", &log_dest(), &item).await;
    assert_eq!(outcome, ItemOutcome::Notified(NotificationKind::Initial));
}

#[tokio::test]
async fn read_failure_with_fail_open_treats_item_as_unseen() {
    let store = FlakyStore::new();
    let sink = RecordingSink::new();
    let poller = Poller::new(store.clone(), sink.clone()).with_options(fail_open());

    store.fail_reads(true);
    let item = Item::video("v2", "Stream", LifecycleState::Upcoming);
    let outcome = poller.process_item("chan", &log_dest(), &item).await;

    assert_eq!(outcome, ItemOutcome::Notified(NotificationKind::Initial));
    assert_eq!(sink.attempts(), 1);
}

#[tokio::test]
async fn delivered_but_unrecorded_notification_is_sent_again() {
    let store = FlakyStore::new();
    let sink = RecordingSink::new();
    let poller = Poller::new(store.clone(), sink.clone());
    let item = Item::video("v3", "Clip", LifecycleState::Final);

    store.fail_marker_writes(true);
    let first = poller.process_item("chan", &log_dest(), &item).await;
    assert_eq!(first, ItemOutcome::Notified(NotificationKind::Initial));
    assert!(store
        .inner
        .marker(&scoped_id("chan", "v3"), NotificationKind::Initial)
        .is_none());

    // Without a marker the next cycle cannot tell the message went out.
    store.fail_marker_writes(false);
    poller.process_item("chan", &log_dest(), &item).await;
    assert_eq!(sink.sent().len(), 2);
    assert!(store
        .inner
        .marker(&scoped_id("chan", "v3"), NotificationKind::Initial)
        .is_some());
}

#[tokio::test]
async fn cursor_read_failure_skips_the_feed() {
    let store = FlakyStore::new();
    let sink = RecordingSink::new();
    let poller = Poller::new(store.clone(), sink.clone());
    let src = ScriptedSource::new("Blog", vec![post(1), post(2)]);

    store.fail_reads(true);
    let report = poller.run_feed_cycle(&[watched_feed(URL, src)]).await;

    assert_eq!(report.sources_failed, 1);
    assert_eq!(report.items_seen, 0);
    assert_eq!(sink.attempts(), 0);
    assert!(store.inner.get_feed_cursor(URL).await.unwrap().is_none());
}

#[tokio::test]
async fn cursor_read_failure_with_fail_open_dispatches_the_batch() {
    let store = FlakyStore::new();
    let sink = RecordingSink::new();
    let poller = Poller::new(store.clone(), sink.clone()).with_options(fail_open());
    let src = ScriptedSource::new("Blog", vec![post(2), post(1)]);

    store.fail_reads(true);
    let report = poller.run_feed_cycle(&[watched_feed(URL, src)]).await;

    assert_eq!(report.sources_failed, 0);
    let ids: Vec<_> = sink.sent().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["post-1", "post-2"]);
    let cursor = store.inner.get_feed_cursor(URL).await.unwrap().unwrap();
    assert_eq!(cursor.last_item_id.as_deref(), Some("post-2"));
}
