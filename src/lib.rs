// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod change_detector;
pub mod commit;
pub mod error;
pub mod feed_differ;
pub mod item;
pub mod metrics;
pub mod poller;
pub mod store;

// Source adapters, config loading and triggers
pub mod ingest;

// Notification sink boundary and webhook clients
pub mod notify;

// ---- Re-exports for stable public API ----
pub use crate::error::{CycleError, DeliveryError, SourceFetchError, StoreError};
pub use crate::ingest::config::{load_config_default, AppConfig};
pub use crate::ingest::scheduler::{Scheduler, TriggerPolicy};
pub use crate::item::{FeedCursor, Item, ItemState, LifecycleState, NotificationKind, SentMarker};
pub use crate::notify::{ChannelSink, Destination, NotificationSink, NotifierMux};
pub use crate::poller::{ContentCycle, FeedCycle, Poller, PollerOptions};
pub use crate::store::{ItemStateStore, JsonFileStore, MemoryStore};
