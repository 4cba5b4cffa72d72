//! # Feed Batch Differ
//! Classifies an RSS batch against the stored `FeedCursor` and orders the new
//! entries oldest-first for dispatch.
//!
//! Comparison order, first applicable wins:
//! 1. guid equal to `last_item_id` → not new
//! 2. both publish dates known → new iff strictly newer
//! 3. both titles known → new iff different
//! 4. both guids known (and unequal) → new
//! 5. nothing comparable → new (fail open)

use std::cmp::Ordering;

use crate::item::{FeedCursor, Item};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    Seen,
}

/// Which rule produced a classification; kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    NoCursor,
    SameId,
    PublishDate,
    Title,
    DifferentId,
    Incomparable,
}

pub fn classify(item: &Item, cursor: Option<&FeedCursor>) -> (Classification, Basis) {
    let Some(cursor) = cursor else {
        return (Classification::New, Basis::NoCursor);
    };

    let ids = item.guid.as_deref().zip(cursor.last_item_id.as_deref());
    if let Some((id, last)) = ids {
        if id == last {
            return (Classification::Seen, Basis::SameId);
        }
    }

    if let (Some(at), Some(last)) = (item.published_at, cursor.last_publish_date) {
        let c = if at > last {
            Classification::New
        } else {
            Classification::Seen
        };
        return (c, Basis::PublishDate);
    }

    let title = Some(item.title.trim()).filter(|t| !t.is_empty());
    let last_title = cursor.last_title.as_deref().map(str::trim).filter(|t| !t.is_empty());
    if let (Some(t), Some(last)) = (title, last_title) {
        let c = if t != last {
            Classification::New
        } else {
            Classification::Seen
        };
        return (c, Basis::Title);
    }

    if ids.is_some() {
        return (Classification::New, Basis::DifferentId);
    }

    (Classification::New, Basis::Incomparable)
}

/// New items of `batch`, ascending by publish date. Undated items sort first;
/// ties keep fetch order.
pub fn new_items(batch: Vec<Item>, cursor: Option<&FeedCursor>) -> Vec<Item> {
    let mut out: Vec<Item> = batch
        .into_iter()
        .filter(|it| {
            let (c, basis) = classify(it, cursor);
            tracing::trace!(target: "poll", item_id = %it.id, ?c, ?basis, "feed item classified");
            c == Classification::New
        })
        .collect();
    sort_chronologically(&mut out);
    out
}

pub fn sort_chronologically(items: &mut [Item]) {
    items.sort_by(|a, b| match (a.published_at, b.published_at) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    });
}
