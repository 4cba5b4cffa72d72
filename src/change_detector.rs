//! # Change Detector
//! Pure logic that maps `(item, prior state, prior markers)` → `Decision`.
//! No I/O; the poller reads the store, calls `evaluate`, and writes back.
//!
//! Policy: the first sighting of an id always notifies (`initial`), whatever
//! its lifecycle. The only second notification is `upcoming -> live`
//! (`status_change`). Everything else is tracked but silent.

use chrono::{DateTime, Utc};

use crate::item::{Item, ItemState, LifecycleState, MarkerSet, NotificationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoNotify,
    Notify(NotificationKind),
}

impl Decision {
    pub fn kind(&self) -> Option<NotificationKind> {
        match self {
            Decision::NoNotify => None,
            Decision::Notify(k) => Some(*k),
        }
    }
}

/// Decision plus the state the caller has to upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: Decision,
    pub next_state: ItemState,
    /// Lifecycle moved relative to the stored record (any direction).
    pub transitioned: bool,
}

pub fn evaluate(
    item: &Item,
    source_name: &str,
    prior: Option<&ItemState>,
    markers: MarkerSet,
    now: DateTime<Utc>,
) -> Evaluation {
    let decision = decide(item, prior, markers);
    let transitioned = prior.is_some_and(|p| p.lifecycle != item.lifecycle);

    Evaluation {
        decision,
        next_state: ItemState::observed(item, source_name, now),
        transitioned,
    }
}

fn decide(item: &Item, prior: Option<&ItemState>, markers: MarkerSet) -> Decision {
    if !markers.contains(NotificationKind::Initial) {
        return Decision::Notify(NotificationKind::Initial);
    }

    let went_live = matches!(
        (prior.map(|p| p.lifecycle), item.lifecycle),
        (Some(LifecycleState::Upcoming), LifecycleState::Live)
    );
    if went_live && !markers.contains(NotificationKind::StatusChange) {
        return Decision::Notify(NotificationKind::StatusChange);
    }

    Decision::NoNotify
}
