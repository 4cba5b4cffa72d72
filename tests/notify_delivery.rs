// tests/notify_delivery.rs
mod common;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use common::RecordingSink;
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use feed_herald::error::DeliveryError;
use feed_herald::item::{scoped_id, Item, LifecycleState, NotificationKind};
use feed_herald::notify::{
    ChannelSink, Destination, DiscordNotifier, Notification, NotificationSink, NotifierMux,
};
use feed_herald::poller::{ItemOutcome, Poller};
use feed_herald::store::MemoryStore;

fn notification(id: &str, destination: Destination) -> Notification {
    Notification {
        destination,
        source_name: "chan".into(),
        item: Item::video(id, "Title", LifecycleState::Live),
        kind: NotificationKind::Initial,
        plain: false,
        ts: Utc::now(),
    }
}

#[tokio::test]
async fn channel_sink_acknowledges_each_request() {
    let inner = RecordingSink::new();
    inner.fail_for("bad");
    let (sink, worker) = ChannelSink::spawn(inner.clone(), 4);

    assert_eq!(sink.deliver(&notification("good", common::log_dest())).await, Ok(()));
    assert_eq!(
        sink.deliver(&notification("bad", common::log_dest())).await,
        Err(DeliveryError::Status(500))
    );
    assert_eq!(inner.sent().len(), 1);

    drop(sink);
    worker.await.unwrap();
}

#[tokio::test]
async fn closed_channel_reports_closed() {
    let (sink, worker) = ChannelSink::spawn(RecordingSink::new(), 1);
    worker.abort();
    let _ = worker.await;
    assert_eq!(
        sink.deliver(&notification("v", common::log_dest())).await,
        Err(DeliveryError::Closed)
    );
}

type Seen = Arc<Mutex<Vec<Value>>>;

/// Webhook stand-in that rejects embeds and accepts plain messages.
async fn hook(State(seen): State<Seen>, Json(body): Json<Value>) -> StatusCode {
    let has_embeds = body["embeds"].as_array().is_some_and(|e| !e.is_empty());
    seen.lock().push(body);
    if has_embeds {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::NO_CONTENT
    }
}

#[tokio::test]
async fn rejected_embed_falls_back_to_plain_message() {
    let seen: Seen = Arc::default();
    let app = Router::new()
        .route("/hook", post(hook))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let client = reqwest::Client::new();
    let mux = NotifierMux::new(client.clone())
        .with_discord(DiscordNotifier::new(client).with_retries(1));
    let (sink, _worker) = ChannelSink::spawn(Arc::new(mux), 4);
    let store = Arc::new(MemoryStore::new());
    let poller = Poller::new(store.clone(), Arc::new(sink));

    let dest = Destination::Discord {
        webhook_url: format!("http://{addr}/hook"),
    };
    let item = Item::video("v9", "Launch day", LifecycleState::Live)
        .with_url("https://www.youtube.com/watch?v=v9");
    let outcome = poller.process_item("chan", &dest, &item).await;

    assert_eq!(outcome, ItemOutcome::Notified(NotificationKind::Initial));
    assert!(store.marker(&scoped_id("chan", "v9"), NotificationKind::Initial).is_some());
    let bodies = seen.lock().clone();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["embeds"][0]["title"], "chan is live: Launch day");
    assert_eq!(
        bodies[1]["content"],
        "chan is live: Launch day\nhttps://www.youtube.com/watch?v=v9"
    );
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

/// Answers 500 for the first two requests, then 204.
async fn flaky(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn always_down(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::SERVICE_UNAVAILABLE
}

#[tokio::test]
async fn discord_retries_server_errors_with_backoff() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = serve(Router::new().route("/hook", post(flaky)).with_state(hits.clone())).await;

    let discord = DiscordNotifier::new(reqwest::Client::new())
        .with_retries(3)
        .with_backoff_base_ms(0);
    let n = notification("v10", common::log_dest());
    discord.send(&format!("http://{addr}/hook"), &n).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_slack_delivery_is_not_resent_in_the_same_cycle() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = serve(
        Router::new()
            .route("/slack", post(always_down))
            .with_state(hits.clone()),
    )
    .await;

    let mux = NotifierMux::new(reqwest::Client::new());
    let (sink, _worker) = ChannelSink::spawn(Arc::new(mux), 4);
    let store = Arc::new(MemoryStore::new());
    let poller = Poller::new(store.clone(), Arc::new(sink));
    let dest = Destination::Slack {
        webhook_url: format!("http://{addr}/slack"),
    };
    let item = Item::video("v11", "Clip", LifecycleState::Final);

    let outcome = poller.process_item("chan", &dest, &item).await;

    assert_eq!(outcome, ItemOutcome::DeliveryFailed(NotificationKind::Initial));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(store.marker(&scoped_id("chan", "v11"), NotificationKind::Initial).is_none());
}
