//! # marksync Protocol
//!
//! Bookmark data model and change event decoding for marksync.
//!
//! This crate provides:
//! - `Bookmark`, `NewBookmark` and `Principal`
//! - `MutationEvent` for pushed changes
//! - The change event decoder (`decode`)
//! - `SubscriptionState` for the push channel lifecycle
//! - URL normalization for user-entered links
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bookmark;
mod error;
mod event;
mod state;

pub use bookmark::{normalize_url, parse_timestamp, Bookmark, NewBookmark, Principal};
pub use error::{DecodeError, ProtocolError, ProtocolResult};
pub use event::{decode, ChangeType, MutationEvent};
pub use state::{StatusBadge, SubscriptionState};
