//! Property-based test generators using proptest.
//!
//! Timestamps are drawn from a narrow range so that ties, which the store
//! must order stably, show up often.

use crate::fixtures::OWNER;
use chrono::{DateTime, TimeZone, Utc};
use marksync_protocol::{Bookmark, MutationEvent};
use proptest::prelude::*;

/// Strategy for record IDs from a small pool, so events collide.
pub fn bookmark_id_strategy() -> impl Strategy<Value = String> {
    (0u8..16).prop_map(|n| format!("bm-{}", n))
}

/// Strategy for creation timestamps within one minute.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..60).prop_map(|offset| {
        Utc.timestamp_opt(1_704_067_200 + offset, 0)
            .single()
            .unwrap_or_default()
    })
}

/// Strategy for bookmarks owned by the fixture owner.
pub fn bookmark_strategy() -> impl Strategy<Value = Bookmark> {
    (
        bookmark_id_strategy(),
        prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,15}").expect("Invalid regex"),
        prop::string::string_regex("[a-z]{1,8}\\.(com|org|dev)").expect("Invalid regex"),
        timestamp_strategy(),
    )
        .prop_map(|(id, title, host, created_at)| {
            Bookmark::new(id, title, format!("https://{}", host), OWNER, created_at)
        })
}

/// Strategy for a bulk-load result, possibly with duplicate IDs.
pub fn collection_strategy(max_len: usize) -> impl Strategy<Value = Vec<Bookmark>> {
    prop::collection::vec(bookmark_strategy(), 0..=max_len)
}

/// Strategy for a single mutation event.
pub fn mutation_strategy() -> impl Strategy<Value = MutationEvent> {
    prop_oneof![
        3 => bookmark_strategy().prop_map(MutationEvent::Insert),
        1 => bookmark_strategy().prop_map(MutationEvent::Update),
        2 => bookmark_id_strategy().prop_map(MutationEvent::Delete),
    ]
}

/// Strategy for a sequence of mutation events.
pub fn mutation_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<MutationEvent>> {
    prop::collection::vec(mutation_strategy(), 0..=max_len)
}
