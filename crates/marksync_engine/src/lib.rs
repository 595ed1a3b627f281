//! # marksync Engine
//!
//! Realtime bookmark synchronization for marksync.
//!
//! This crate provides:
//! - The local collection store (sorted newest first, observable)
//! - The subscription lifecycle state machine with retry
//! - Post-write reconciliation when the push channel is down
//! - `SyncSession`, which wires these to a `DataService`
//! - `MemoryBackend`, an in-memory service for tests and demos
//!
//! ## Architecture
//!
//! The session performs one bulk load, then keeps a push channel open and
//! patches the collection with each change event:
//! 1. Load the principal's collection
//! 2. Open the change channel, filtered to the principal
//! 3. Apply events while subscribed, retry on failure
//!
//! ## Key Invariants
//!
//! - The collection is always sorted by creation time, newest first
//! - Events are applied only while the channel is live
//! - At most one reconnect timer is pending
//! - Nothing is applied after teardown

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod lifecycle;
mod memory;
mod reconcile;
mod session;
mod store;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use lifecycle::{Lifecycle, LifecycleAction};
pub use memory::{change_payload, MemoryBackend};
pub use reconcile::{needs_refetch, ReconcileOutcome};
pub use session::{LoadStatus, SyncSession, SyncStats};
pub use store::{ApplyOutcome, BookmarkStore, Collection};
pub use transport::{
    ChangeChannel, ChannelFilter, ChannelMessage, ChannelSink, DataService, Envelope,
};
