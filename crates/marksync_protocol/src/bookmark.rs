//! Bookmark records and the helpers that keep them well formed.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A saved link owned by a single principal.
///
/// # Fields
///
/// - `id`: Opaque unique identifier assigned by the remote store
/// - `title`: Non-empty display string
/// - `url`: Absolute URI with an explicit scheme
/// - `owner`: The principal the record belongs to (`user_id` on the wire)
/// - `created_at`: Creation time, never changes after insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Record ID.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Normalized URL.
    pub url: String,
    /// Owning principal.
    #[serde(rename = "user_id")]
    pub owner: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Creates a bookmark from already-validated parts.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        owner: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            owner: owner.into(),
            created_at,
        }
    }

    /// Returns true if this record belongs to `owner`.
    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner == owner
    }
}

/// An insert draft: a bookmark before the remote store assigns
/// `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBookmark {
    /// Display title (trimmed).
    pub title: String,
    /// Normalized URL.
    pub url: String,
    /// Owning principal.
    #[serde(rename = "user_id")]
    pub owner: String,
}

impl NewBookmark {
    /// Builds a draft from user input.
    ///
    /// Title and URL are trimmed. A URL without an `http://` or `https://`
    /// prefix gets `https://` prepended.
    pub fn new(title: &str, url: &str, owner: &str) -> ProtocolResult<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ProtocolError::EmptyTitle);
        }
        if owner.is_empty() {
            return Err(ProtocolError::EmptyOwner);
        }
        let url = normalize_url(url)?;

        Ok(Self {
            title: title.to_string(),
            url,
            owner: owner.to_string(),
        })
    }

    /// Materializes the draft once the store has assigned identity.
    pub fn into_bookmark(self, id: impl Into<String>, created_at: DateTime<Utc>) -> Bookmark {
        Bookmark {
            id: id.into(),
            title: self.title,
            url: self.url,
            owner: self.owner,
            created_at,
        }
    }
}

/// The authenticated identity whose bookmarks are being managed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identity, matches `Bookmark::owner`.
    pub id: String,
    /// Contact address shown next to the sync status, when known.
    pub email: Option<String>,
}

impl Principal {
    /// Creates a principal without an email.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    /// Sets the email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Normalizes a user-entered URL so it always carries a scheme.
///
/// The result must parse as an absolute URL. The string itself is kept as
/// typed (no trailing slash or case folding is added).
pub fn normalize_url(raw: &str) -> ProtocolResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyUrl);
    }

    let normalized = if has_http_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    match url::Url::parse(&normalized) {
        Ok(parsed) if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(normalized),
        Ok(_) => Err(ProtocolError::InvalidUrl {
            url: normalized,
            reason: "missing host".into(),
        }),
        Err(e) => Err(ProtocolError::InvalidUrl {
            url: normalized,
            reason: e.to_string(),
        }),
    }
}

fn has_http_scheme(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Parses a creation timestamp as sent by the remote store.
///
/// Accepted forms:
/// - RFC 3339 (`2024-01-02T03:04:05.678+00:00`)
/// - Space separated with offset (`2024-01-02 03:04:05.678+00`)
/// - Without offset, read as UTC (`2024-01-02T03:04:05`)
/// - Bare date, read as midnight UTC (`2024-01-02`)
pub fn parse_timestamp(raw: &str) -> ProtocolResult<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| ProtocolError::InvalidTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use proptest::prelude::*;

    #[test]
    fn bare_host_gets_https() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com");
        assert_eq!(
            normalize_url("  example.com/path?q=1 ").unwrap(),
            "https://example.com/path?q=1"
        );
    }

    #[test]
    fn explicit_scheme_is_kept() {
        assert_eq!(normalize_url("http://a.com").unwrap(), "http://a.com");
        assert_eq!(normalize_url("https://a.com").unwrap(), "https://a.com");
        assert_eq!(normalize_url("HTTPS://a.com").unwrap(), "HTTPS://a.com");
    }

    #[test]
    fn empty_and_hostless_urls_rejected() {
        assert_eq!(normalize_url("   "), Err(ProtocolError::EmptyUrl));
        assert!(matches!(
            normalize_url("https://"),
            Err(ProtocolError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn new_bookmark_trims_and_validates() {
        let draft = NewBookmark::new("  Docs ", "docs.rs", "user-1").unwrap();
        assert_eq!(draft.title, "Docs");
        assert_eq!(draft.url, "https://docs.rs");
        assert_eq!(draft.owner, "user-1");

        assert_eq!(
            NewBookmark::new(" ", "docs.rs", "user-1"),
            Err(ProtocolError::EmptyTitle)
        );
        assert_eq!(
            NewBookmark::new("Docs", "", "user-1"),
            Err(ProtocolError::EmptyUrl)
        );
        assert_eq!(
            NewBookmark::new("Docs", "docs.rs", ""),
            Err(ProtocolError::EmptyOwner)
        );
    }

    #[test]
    fn draft_materializes() {
        let created = parse_timestamp("2024-01-01").unwrap();
        let bookmark = NewBookmark::new("A", "a.com", "u")
            .unwrap()
            .into_bookmark("1", created);
        assert_eq!(bookmark.id, "1");
        assert_eq!(bookmark.url, "https://a.com");
        assert!(bookmark.is_owned_by("u"));
    }

    #[test]
    fn timestamp_formats() {
        let date_only = parse_timestamp("2024-01-02").unwrap();
        assert_eq!((date_only.year(), date_only.month(), date_only.day()), (2024, 1, 2));
        assert_eq!(date_only.hour(), 0);

        let rfc = parse_timestamp("2024-01-02T03:04:05.678+00:00").unwrap();
        assert_eq!(rfc.minute(), 4);

        let pg = parse_timestamp("2024-01-02 03:04:05.123456+00").unwrap();
        assert_eq!(pg.second(), 5);

        let shifted = parse_timestamp("2024-01-02T03:00:00+02:00").unwrap();
        assert_eq!(shifted.hour(), 1);

        let naive = parse_timestamp("2024-01-02T03:04:05").unwrap();
        assert_eq!(naive.hour(), 3);

        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(ProtocolError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn bookmark_serializes_owner_as_user_id() {
        let created = parse_timestamp("2024-01-01").unwrap();
        let bookmark = Bookmark::new("1", "A", "https://a.com", "u", created);
        let json = serde_json::to_value(&bookmark).unwrap();
        assert_eq!(json["user_id"], "u");
        assert!(json.get("owner").is_none());
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(
            host in "[a-z]{1,12}\\.(com|org|dev)",
            path in "(/[a-z0-9]{1,8}){0,3}"
        ) {
            let once = normalize_url(&format!("{}{}", host, path)).unwrap();
            let twice = normalize_url(&once).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.starts_with("https://"));
        }
    }
}
