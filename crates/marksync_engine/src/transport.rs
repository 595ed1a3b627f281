//! Boundary with the remote data/auth service.
//!
//! The engine talks to the outside world through two traits:
//! [`DataService`] for request/response calls and [`ChangeChannel`] for the
//! live push subscription. Channel status changes and raw payloads flow back
//! through a [`ChannelSink`] into the engine's message queue.

use crate::error::SyncResult;
use async_trait::async_trait;
use marksync_protocol::{Bookmark, NewBookmark, Principal, SubscriptionState};
use serde_json::Value;
use tokio::sync::mpsc;

/// Remote request/response API plus the channel factory.
///
/// Implementations cover the network (or an in-memory stand-in); the
/// engine only ever sees these calls.
#[async_trait]
pub trait DataService: Send + Sync + 'static {
    /// Returns the signed-in principal, if any.
    async fn current_principal(&self) -> SyncResult<Option<Principal>>;

    /// Fetches every bookmark owned by `owner`, newest first.
    async fn fetch_all(&self, owner: &str) -> SyncResult<Vec<Bookmark>>;

    /// Inserts a bookmark and returns the stored record.
    async fn insert(&self, draft: NewBookmark) -> SyncResult<Bookmark>;

    /// Deletes a bookmark by ID.
    async fn delete_by_id(&self, id: &str) -> SyncResult<()>;

    /// Opens a change channel. Status transitions and raw payloads are
    /// delivered to `sink` until the returned handle is torn down.
    async fn open_change_channel(
        &self,
        filter: &ChannelFilter,
        sink: ChannelSink,
    ) -> SyncResult<Box<dyn ChangeChannel>>;
}

/// Handle to an open push channel.
#[async_trait]
pub trait ChangeChannel: Send {
    /// Releases every resource held by the channel. After this returns no
    /// more messages are delivered to the sink.
    async fn teardown(self: Box<Self>) -> SyncResult<()>;
}

/// What a change channel subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    /// Channel name.
    pub channel: String,
    /// Only rows owned by this principal.
    pub owner: String,
}

impl ChannelFilter {
    /// Creates a filter.
    pub fn new(channel: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            owner: owner.into(),
        }
    }

    /// Row filter expression in the store's syntax.
    pub fn row_filter(&self) -> String {
        format!("user_id=eq.{}", self.owner)
    }
}

/// A message delivered by a change channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// Subscription status changed.
    Status(SubscriptionState),
    /// A raw change payload, not yet decoded.
    Event(Value),
}

/// A channel message tagged with the generation of the channel that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Channel generation.
    pub generation: u64,
    /// The message.
    pub message: ChannelMessage,
}

/// Sending half handed to a change channel.
///
/// Every message is tagged with the channel's generation, so output from a
/// channel that has since been replaced is recognized and dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSink {
    /// Creates a sink feeding `tx`.
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the channel this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports a status transition. Returns false if the engine is gone.
    pub fn status(&self, state: SubscriptionState) -> bool {
        self.send(ChannelMessage::Status(state))
    }

    /// Delivers a raw payload. Returns false if the engine is gone.
    pub fn event(&self, payload: Value) -> bool {
        self.send(ChannelMessage::Event(payload))
    }

    /// Returns true once the engine stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, message: ChannelMessage) -> bool {
        self.tx
            .send(Envelope {
                generation: self.generation,
                message,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_expression() {
        let filter = ChannelFilter::new("bookmarks-changes", "u1");
        assert_eq!(filter.row_filter(), "user_id=eq.u1");
    }

    #[test]
    fn sink_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(3, tx);

        assert!(sink.status(SubscriptionState::Subscribed));
        assert!(sink.event(json!({ "eventType": "DELETE" })));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.generation, 3);
        assert_eq!(
            first.message,
            ChannelMessage::Status(SubscriptionState::Subscribed)
        );
        assert!(matches!(
            rx.try_recv().unwrap().message,
            ChannelMessage::Event(_)
        ));
    }

    #[test]
    fn sink_reports_closed_engine() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(1, tx);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.status(SubscriptionState::ChannelError));
    }
}
