//! Error types for the protocol layer.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building or validating bookmark records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The title is empty after trimming.
    #[error("bookmark title must not be empty")]
    EmptyTitle,

    /// The URL is empty after trimming.
    #[error("bookmark url must not be empty")]
    EmptyUrl,

    /// The URL could not be parsed as an absolute URI.
    #[error("invalid bookmark url {url:?}: {reason}")]
    InvalidUrl {
        /// The normalized URL that failed to parse.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// A record ID is empty.
    #[error("bookmark id must not be empty")]
    EmptyId,

    /// The owner identity is empty.
    #[error("bookmark owner must not be empty")]
    EmptyOwner,

    /// A timestamp was not in any accepted format.
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
}

/// Reasons a raw push payload is rejected by the decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is not a JSON object.
    #[error("payload is not an object")]
    NotAnObject,

    /// The event type tag is absent or not Insert/Update/Delete.
    #[error("unknown event type: {0:?}")]
    UnknownEventType(String),

    /// A required field is absent or empty.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The record belongs to a different principal.
    #[error("record {id} belongs to another owner")]
    ForeignOwner {
        /// Record ID.
        id: String,
    },
}

impl DecodeError {
    /// Short machine-friendly label, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::NotAnObject => "not_an_object",
            DecodeError::UnknownEventType(_) => "unknown_event_type",
            DecodeError::MissingField(_) => "missing_field",
            DecodeError::InvalidField { .. } => "invalid_field",
            DecodeError::ForeignOwner { .. } => "foreign_owner",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidUrl {
            url: "https://".into(),
            reason: "empty host".into(),
        };
        assert!(err.to_string().contains("empty host"));

        let err = DecodeError::MissingField("id");
        assert_eq!(err.to_string(), "missing field `id`");
        assert_eq!(err.kind(), "missing_field");
    }
}
