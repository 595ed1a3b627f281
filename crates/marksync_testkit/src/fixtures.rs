//! Test fixtures and payload builders.
//!
//! Payloads mirror what the push feed sends: an `eventType` tag plus `new`
//! and `old` row images.

use marksync_protocol::{parse_timestamp, Bookmark, Principal};
use serde_json::{json, Value};

/// Owner used by fixtures unless stated otherwise.
pub const OWNER: &str = "user-1";

/// Another principal, for ownership checks.
pub const OTHER_OWNER: &str = "user-2";

/// The default test principal.
pub fn principal() -> Principal {
    Principal::new(OWNER).with_email("user-1@example.com")
}

/// A bookmark owned by [`OWNER`] created at `created_at`.
///
/// Accepts anything `parse_timestamp` does, e.g. `"2024-01-01"`.
pub fn bookmark(id: &str, created_at: &str) -> Bookmark {
    owned_bookmark(id, created_at, OWNER)
}

/// A bookmark owned by `owner`.
pub fn owned_bookmark(id: &str, created_at: &str, owner: &str) -> Bookmark {
    Bookmark::new(
        id,
        format!("Bookmark {}", id),
        format!("https://{}.example.com", id),
        owner,
        parse_timestamp(created_at).expect("Invalid fixture timestamp"),
    )
}

/// Row image of a bookmark as the push feed sends it.
pub fn row(bookmark: &Bookmark) -> Value {
    json!({
        "id": bookmark.id,
        "title": bookmark.title,
        "url": bookmark.url,
        "user_id": bookmark.owner,
        "created_at": bookmark.created_at.to_rfc3339(),
    })
}

/// An INSERT payload.
pub fn insert_payload(bookmark: &Bookmark) -> Value {
    json!({ "eventType": "INSERT", "new": row(bookmark), "old": {} })
}

/// An UPDATE payload.
pub fn update_payload(bookmark: &Bookmark) -> Value {
    json!({ "eventType": "UPDATE", "new": row(bookmark), "old": { "id": bookmark.id } })
}

/// A DELETE payload carrying only the key.
pub fn delete_payload(id: &str) -> Value {
    json!({ "eventType": "DELETE", "new": {}, "old": { "id": id } })
}

/// Payloads the decoder must reject, with a short description of each.
pub fn malformed_payloads() -> Vec<(&'static str, Value)> {
    vec![
        ("not an object", json!(["INSERT"])),
        ("missing tag", json!({ "new": { "id": "1" } })),
        ("unknown tag", json!({ "eventType": "TRUNCATE", "new": {} })),
        (
            "insert without id",
            json!({
                "eventType": "INSERT",
                "new": {
                    "title": "t",
                    "url": "https://example.com",
                    "user_id": OWNER,
                    "created_at": "2024-01-01T00:00:00Z"
                }
            }),
        ),
        (
            "insert with bad timestamp",
            json!({
                "eventType": "INSERT",
                "new": {
                    "id": "1",
                    "title": "t",
                    "url": "https://example.com",
                    "user_id": OWNER,
                    "created_at": "yesterday"
                }
            }),
        ),
        ("delete without old", json!({ "eventType": "DELETE", "new": {} })),
        (
            "foreign owner",
            json!({
                "eventType": "INSERT",
                "new": {
                    "id": "9",
                    "title": "t",
                    "url": "https://example.com",
                    "user_id": OTHER_OWNER,
                    "created_at": "2024-01-01T00:00:00Z"
                }
            }),
        ),
    ]
}
