//! Pushed mutation events and the decoder that produces them.
//!
//! The push transport delivers loosely shaped JSON. Only [`decode`] turns it
//! into a [`MutationEvent`]; nothing downstream ever sees an unvalidated
//! payload.
//!
//! Expected payload shape:
//!
//! ```json
//! {
//!   "eventType": "INSERT",
//!   "new": { "id": "2", "title": "B", "url": "https://b.com",
//!            "user_id": "u1", "created_at": "2024-01-02T00:00:00Z" },
//!   "old": {}
//! }
//! ```

use crate::bookmark::{normalize_url, parse_timestamp, Bookmark};
use crate::error::DecodeError;
use serde_json::{Map, Value};

/// Type of change carried by a push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// A record was created.
    Insert,
    /// A record was modified.
    Update,
    /// A record was removed.
    Delete,
}

impl ChangeType {
    /// Parses the transport tag (case-insensitive).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeType::Insert),
            "UPDATE" => Some(ChangeType::Update),
            "DELETE" => Some(ChangeType::Delete),
            _ => None,
        }
    }

    /// Returns the canonical transport tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }
}

/// A validated change to the bookmark collection.
///
/// Events carry no sequence number, so consumers treat them as hints
/// rather than an ordered log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    /// A record was created.
    Insert(Bookmark),
    /// A record was modified.
    Update(Bookmark),
    /// A record with this ID was removed.
    Delete(String),
}

impl MutationEvent {
    /// The ID of the affected record.
    pub fn id(&self) -> &str {
        match self {
            MutationEvent::Insert(b) | MutationEvent::Update(b) => &b.id,
            MutationEvent::Delete(id) => id,
        }
    }

    /// The change type.
    pub fn change_type(&self) -> ChangeType {
        match self {
            MutationEvent::Insert(_) => ChangeType::Insert,
            MutationEvent::Update(_) => ChangeType::Update,
            MutationEvent::Delete(_) => ChangeType::Delete,
        }
    }
}

/// Decodes a raw push payload for the principal `owner`.
///
/// Insert and Update need a complete `new` record; Delete needs `old.id`.
/// Records owned by anyone other than `owner` are rejected.
pub fn decode(raw: &Value, owner: &str) -> Result<MutationEvent, DecodeError> {
    let payload = raw.as_object().ok_or(DecodeError::NotAnObject)?;

    let tag = payload
        .get("eventType")
        .or_else(|| payload.get("type"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let change_type =
        ChangeType::from_tag(tag).ok_or_else(|| DecodeError::UnknownEventType(tag.to_string()))?;

    match change_type {
        ChangeType::Insert | ChangeType::Update => {
            let record = record(payload, "new")?;
            let bookmark = bookmark_from_record(record)?;
            if !bookmark.is_owned_by(owner) {
                return Err(DecodeError::ForeignOwner { id: bookmark.id });
            }
            Ok(if change_type == ChangeType::Insert {
                MutationEvent::Insert(bookmark)
            } else {
                MutationEvent::Update(bookmark)
            })
        }
        ChangeType::Delete => {
            let record = record(payload, "old")?;
            let id = required_string(record, "id")?;
            // The transport usually sends only the key for deletes; when it
            // does include the owner it must still match.
            if let Some(record_owner) = record.get("user_id").and_then(Value::as_str) {
                if record_owner != owner {
                    return Err(DecodeError::ForeignOwner { id });
                }
            }
            Ok(MutationEvent::Delete(id))
        }
    }
}

fn record<'a>(
    payload: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a Map<String, Value>, DecodeError> {
    match payload.get(key) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(key)),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(DecodeError::InvalidField {
            field: key,
            reason: "expected an object".into(),
        }),
    }
}

fn bookmark_from_record(record: &Map<String, Value>) -> Result<Bookmark, DecodeError> {
    let id = required_string(record, "id")?;
    let title = required_string(record, "title")?;
    let raw_url = required_string(record, "url")?;
    let owner = required_string(record, "user_id")?;
    let raw_created_at = required_string(record, "created_at")?;

    let url = normalize_url(&raw_url).map_err(|e| DecodeError::InvalidField {
        field: "url",
        reason: e.to_string(),
    })?;
    let created_at = parse_timestamp(&raw_created_at).map_err(|e| DecodeError::InvalidField {
        field: "created_at",
        reason: e.to_string(),
    })?;

    Ok(Bookmark {
        id,
        title,
        url,
        owner,
        created_at,
    })
}

/// Reads a non-empty string field. Numeric IDs are accepted and
/// stringified.
fn required_string(
    record: &Map<String, Value>,
    field: &'static str,
) -> Result<String, DecodeError> {
    let value = match record.get(field) {
        None | Some(Value::Null) => return Err(DecodeError::MissingField(field)),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if field == "id" => n.to_string(),
        Some(other) => {
            return Err(DecodeError::InvalidField {
                field,
                reason: format!("expected a string, got {}", other),
            })
        }
    };

    if value.trim().is_empty() {
        return Err(DecodeError::MissingField(field));
    }
    Ok(value)
}
