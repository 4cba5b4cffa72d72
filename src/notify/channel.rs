// src/notify/channel.rs
//! Message-passing boundary between the poller and the delivery worker.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Notification, NotificationSink};
use crate::error::DeliveryError;

pub struct DeliveryRequest {
    pub notification: Notification,
    pub ack: oneshot::Sender<Result<(), DeliveryError>>,
}

/// Sink that enqueues a request and waits for the worker's acknowledgement.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<DeliveryRequest>,
    fallback: bool,
}

impl ChannelSink {
    /// Spawns the delivery worker around `inner`. The worker exits once every
    /// `ChannelSink` clone has been dropped.
    pub fn spawn(inner: Arc<dyn NotificationSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let fallback = inner.supports_fallback();
        let handle = tokio::spawn(run_worker(inner, rx));
        (Self { tx, fallback }, handle)
    }
}

async fn run_worker(inner: Arc<dyn NotificationSink>, mut rx: mpsc::Receiver<DeliveryRequest>) {
    while let Some(req) = rx.recv().await {
        let res = inner.deliver(&req.notification).await;
        if let Err(e) = &res {
            tracing::debug!(
                target: "notify",
                item_id = %req.notification.item.id,
                destination = %req.notification.destination.label(),
                error = %e,
                "delivery failed"
            );
        }
        // The requester may have gone away (shutdown); nothing to do then.
        let _ = req.ack.send(res);
    }
    tracing::debug!(target: "notify", "delivery worker stopped");
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn deliver(&self, n: &Notification) -> Result<(), DeliveryError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(DeliveryRequest {
                notification: n.clone(),
                ack,
            })
            .await
            .map_err(|_| DeliveryError::Closed)?;
        done.await.map_err(|_| DeliveryError::Closed)?
    }

    fn supports_fallback(&self) -> bool {
        self.fallback
    }
}
