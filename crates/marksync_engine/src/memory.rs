//! In-memory data service.
//!
//! `MemoryBackend` behaves like a remote store with row-level ownership and
//! a push feed: writes are broadcast to open channels as raw change
//! payloads. Handles are cheap to clone and share state, so a test or demo
//! can keep one to inject failures, push status changes and inspect what the
//! engine did.

use crate::error::{SyncError, SyncResult};
use crate::transport::{ChangeChannel, ChannelFilter, ChannelSink, DataService};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use marksync_protocol::{Bookmark, ChangeType, NewBookmark, Principal, SubscriptionState};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// In-memory implementation of [`DataService`].
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    principal: Mutex<Option<Principal>>,
    rows: Mutex<Vec<Bookmark>>,
    channels: Mutex<Vec<OpenChannel>>,
    faults: Mutex<Faults>,
    last_created: Mutex<Option<DateTime<Utc>>>,
    next_channel: AtomicU64,
    fetches: AtomicU64,
    opens: AtomicU64,
    teardowns: AtomicU64,
    manual_subscribe: AtomicBool,
    silent_writes: AtomicBool,
}

#[derive(Default)]
struct Faults {
    fetch_failures: u32,
    open_failures: u32,
    open_rejection: Option<String>,
    insert_failure: Option<String>,
    delete_failure: Option<String>,
    fetch_delay: Option<Duration>,
    open_delay: Option<Duration>,
}

struct OpenChannel {
    id: u64,
    owner: String,
    sink: ChannelSink,
}

impl MemoryBackend {
    /// Creates an empty backend with nobody signed in.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with `principal` signed in.
    pub fn with_principal(principal: Principal) -> Self {
        let backend = Self::new();
        backend.sign_in(principal);
        backend
    }

    /// Signs `principal` in.
    pub fn sign_in(&self, principal: Principal) {
        *self.inner.principal.lock() = Some(principal);
    }

    /// Signs the current principal out.
    pub fn sign_out(&self) {
        *self.inner.principal.lock() = None;
    }

    /// Adds rows without notifying any channel.
    pub fn seed(&self, bookmarks: impl IntoIterator<Item = Bookmark>) {
        self.inner.rows.lock().extend(bookmarks);
    }

    /// Inserts a row on behalf of another client, broadcasting the change
    /// unless writes are silent.
    pub fn remote_insert(&self, bookmark: Bookmark) {
        self.inner.rows.lock().push(bookmark.clone());
        self.broadcast_row(ChangeType::Insert, &bookmark);
    }

    /// Deletes a row on behalf of another client.
    pub fn remote_delete(&self, id: &str) {
        let removed = {
            let mut rows = self.inner.rows.lock();
            rows.iter()
                .position(|b| b.id == id)
                .map(|index| rows.remove(index))
        };
        if let Some(bookmark) = removed {
            self.broadcast_row(ChangeType::Delete, &bookmark);
        }
    }

    /// Rows owned by `owner`, newest first.
    pub fn rows_for(&self, owner: &str) -> Vec<Bookmark> {
        let mut rows: Vec<Bookmark> = self
            .inner
            .rows
            .lock()
            .iter()
            .filter(|b| b.is_owned_by(owner))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    /// Pushes a status transition to every open channel.
    pub fn push_status(&self, state: SubscriptionState) {
        for channel in self.inner.channels.lock().iter() {
            channel.sink.status(state);
        }
    }

    /// Pushes a raw payload to every open channel.
    pub fn push_raw(&self, payload: Value) {
        for channel in self.inner.channels.lock().iter() {
            channel.sink.event(payload.clone());
        }
    }

    /// Fails the next `count` fetches.
    pub fn fail_next_fetch(&self, count: u32) {
        self.inner.faults.lock().fetch_failures = count;
    }

    /// Fails the next `count` channel opens.
    pub fn fail_next_open(&self, count: u32) {
        self.inner.faults.lock().open_failures = count;
    }

    /// Rejects the next channel open with a non-retryable `message`.
    pub fn reject_next_open(&self, message: impl Into<String>) {
        self.inner.faults.lock().open_rejection = Some(message.into());
    }

    /// Rejects the next insert with `message`.
    pub fn fail_next_insert(&self, message: impl Into<String>) {
        self.inner.faults.lock().insert_failure = Some(message.into());
    }

    /// Rejects the next delete with `message`.
    pub fn fail_next_delete(&self, message: impl Into<String>) {
        self.inner.faults.lock().delete_failure = Some(message.into());
    }

    /// Delays every fetch by `delay`.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.inner.faults.lock().fetch_delay = delay;
    }

    /// Delays every channel open by `delay`. The channel is registered only
    /// once the delay has passed.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.inner.faults.lock().open_delay = delay;
    }

    /// When set, new channels stay in `Connecting` until a status is pushed.
    pub fn set_manual_subscribe(&self, manual: bool) {
        self.inner.manual_subscribe.store(manual, Ordering::SeqCst);
    }

    /// When set, writes are not broadcast to open channels.
    pub fn set_silent_writes(&self, silent: bool) {
        self.inner.silent_writes.store(silent, Ordering::SeqCst);
    }

    /// Number of fetches served or failed.
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Number of channel open attempts.
    pub fn open_count(&self) -> u64 {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Number of channels torn down.
    pub fn teardown_count(&self) -> u64 {
        self.inner.teardowns.load(Ordering::SeqCst)
    }

    /// Number of channels currently open.
    pub fn open_channels(&self) -> usize {
        self.inner.channels.lock().len()
    }

    fn broadcast_row(&self, change: ChangeType, bookmark: &Bookmark) {
        if self.inner.silent_writes.load(Ordering::SeqCst) {
            return;
        }
        let payload = change_payload(change, bookmark);
        for channel in self.inner.channels.lock().iter() {
            if bookmark.is_owned_by(&channel.owner) {
                channel.sink.event(payload.clone());
            }
        }
    }

    /// Creation timestamps are strictly increasing so inserts never tie.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.inner.last_created.lock();
        let now = Utc::now();
        let stamp = match *last {
            Some(prev) if prev >= now => prev + ChronoDuration::milliseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("rows", &self.inner.rows.lock().len())
            .field("open_channels", &self.open_channels())
            .finish()
    }
}

/// Builds the raw payload the push feed emits for a row change.
pub fn change_payload(change: ChangeType, bookmark: &Bookmark) -> Value {
    let row = json!({
        "id": bookmark.id,
        "title": bookmark.title,
        "url": bookmark.url,
        "user_id": bookmark.owner,
        "created_at": bookmark.created_at.to_rfc3339(),
    });
    match change {
        ChangeType::Delete => json!({
            "eventType": change.as_tag(),
            "new": {},
            "old": { "id": bookmark.id, "user_id": bookmark.owner },
        }),
        ChangeType::Insert | ChangeType::Update => json!({
            "eventType": change.as_tag(),
            "new": row,
            "old": {},
        }),
    }
}

#[async_trait]
impl DataService for MemoryBackend {
    async fn current_principal(&self) -> SyncResult<Option<Principal>> {
        Ok(self.inner.principal.lock().clone())
    }

    async fn fetch_all(&self, owner: &str) -> SyncResult<Vec<Bookmark>> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);

        let (fail, delay) = {
            let mut faults = self.inner.faults.lock();
            let fail = faults.fetch_failures > 0;
            if fail {
                faults.fetch_failures -= 1;
            }
            (fail, faults.fetch_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(SyncError::Load("service unavailable".into()));
        }

        Ok(self.rows_for(owner))
    }

    async fn insert(&self, draft: NewBookmark) -> SyncResult<Bookmark> {
        if let Some(message) = self.inner.faults.lock().insert_failure.take() {
            return Err(SyncError::Write(message));
        }
        let signed_in = self.inner.principal.lock().as_ref().map(|p| p.id.clone());
        if signed_in.as_deref() != Some(draft.owner.as_str()) {
            return Err(SyncError::Write(
                "new row violates row-level security policy".into(),
            ));
        }

        let bookmark = draft.into_bookmark(uuid::Uuid::new_v4().to_string(), self.next_timestamp());
        debug!(id = %bookmark.id, "Stored bookmark");
        self.inner.rows.lock().push(bookmark.clone());
        self.broadcast_row(ChangeType::Insert, &bookmark);
        Ok(bookmark)
    }

    async fn delete_by_id(&self, id: &str) -> SyncResult<()> {
        if let Some(message) = self.inner.faults.lock().delete_failure.take() {
            return Err(SyncError::Write(message));
        }
        let signed_in = self.inner.principal.lock().as_ref().map(|p| p.id.clone());

        // Rows the caller does not own are invisible, so deleting one is a
        // no-op rather than an error.
        let removed = {
            let mut rows = self.inner.rows.lock();
            rows.iter()
                .position(|b| Some(b.owner.as_str()) == signed_in.as_deref() && b.id == id)
                .map(|index| rows.remove(index))
        };
        if let Some(bookmark) = removed {
            debug!(id, "Deleted bookmark");
            self.broadcast_row(ChangeType::Delete, &bookmark);
        }
        Ok(())
    }

    async fn open_change_channel(
        &self,
        filter: &ChannelFilter,
        sink: ChannelSink,
    ) -> SyncResult<Box<dyn ChangeChannel>> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);

        let delay = self.inner.faults.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut faults = self.inner.faults.lock();
            if let Some(message) = faults.open_rejection.take() {
                return Err(SyncError::transport_fatal(message));
            }
            if faults.open_failures > 0 {
                faults.open_failures -= 1;
                return Err(SyncError::transport_retryable("channel join refused"));
            }
        }

        let id = self.inner.next_channel.fetch_add(1, Ordering::SeqCst);
        if !self.inner.manual_subscribe.load(Ordering::SeqCst) {
            sink.status(SubscriptionState::Subscribed);
        }
        debug!(id, channel = %filter.channel, filter = %filter.row_filter(), "Opened channel");
        self.inner.channels.lock().push(OpenChannel {
            id,
            owner: filter.owner.clone(),
            sink,
        });

        Ok(Box::new(MemoryChannel {
            id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryChannel {
    id: u64,
    inner: Arc<Inner>,
}

#[async_trait]
impl ChangeChannel for MemoryChannel {
    async fn teardown(self: Box<Self>) -> SyncResult<()> {
        self.inner.channels.lock().retain(|c| c.id != self.id);
        self.inner.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelMessage, Envelope};
    use marksync_protocol::decode;
    use tokio::sync::mpsc;

    fn backend() -> MemoryBackend {
        MemoryBackend::with_principal(Principal::new("u1"))
    }

    fn sink(generation: u64) -> (ChannelSink, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink::new(generation, tx), rx)
    }

    #[tokio::test]
    async fn insert_assigns_id_and_timestamp() {
        let backend = backend();
        let first = backend
            .insert(NewBookmark::new("a", "a.example", "u1").unwrap())
            .await
            .unwrap();
        let second = backend
            .insert(NewBookmark::new("b", "b.example", "u1").unwrap())
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert!(second.created_at > first.created_at);
        assert_eq!(first.url, "https://a.example");

        let rows = backend.rows_for("u1");
        assert_eq!(rows[0].id, second.id);
        assert_eq!(rows[1].id, first.id);
    }

    #[tokio::test]
    async fn insert_for_other_owner_is_rejected() {
        let backend = backend();
        let err = backend
            .insert(NewBookmark::new("a", "a.example", "u2").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Write(_)));
    }

    #[tokio::test]
    async fn fetch_is_scoped_to_owner() {
        let backend = backend();
        backend.seed([
            Bookmark::new("1", "t", "https://a.example", "u1", Utc::now()),
            Bookmark::new("2", "t", "https://b.example", "u2", Utc::now()),
        ]);
        let rows = backend.fetch_all("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "1");
        assert_eq!(backend.fetch_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_one_shot() {
        let backend = backend();
        backend.fail_next_fetch(1);
        backend.fail_next_insert("denied");

        assert!(backend.fetch_all("u1").await.is_err());
        assert!(backend.fetch_all("u1").await.is_ok());

        let draft = NewBookmark::new("a", "a.example", "u1").unwrap();
        assert_eq!(
            backend.insert(draft.clone()).await.unwrap_err(),
            SyncError::Write("denied".into())
        );
        assert!(backend.insert(draft).await.is_ok());
    }

    #[tokio::test]
    async fn channel_receives_status_and_writes() {
        let backend = backend();
        let (sink, mut rx) = sink(1);
        let channel = backend
            .open_change_channel(&ChannelFilter::new("bookmarks-changes", "u1"), sink)
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap().message,
            ChannelMessage::Status(SubscriptionState::Subscribed)
        );

        let stored = backend
            .insert(NewBookmark::new("a", "a.example", "u1").unwrap())
            .await
            .unwrap();
        let envelope = rx.recv().await.unwrap();
        let ChannelMessage::Event(payload) = envelope.message else {
            panic!("expected event");
        };
        assert_eq!(decode(&payload, "u1").unwrap().id(), stored.id);

        channel.teardown().await.unwrap();
        assert_eq!(backend.open_channels(), 0);
        assert_eq!(backend.teardown_count(), 1);
    }

    #[tokio::test]
    async fn foreign_rows_are_not_broadcast() {
        let backend = backend();
        let (sink, mut rx) = sink(1);
        backend.set_manual_subscribe(true);
        let _channel = backend
            .open_change_channel(&ChannelFilter::new("bookmarks-changes", "u1"), sink)
            .await
            .unwrap();

        backend.remote_insert(Bookmark::new("x", "t", "https://x.example", "u2", Utc::now()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn open_failure_is_retryable() {
        let backend = backend();
        backend.fail_next_open(1);
        let (sink, _rx) = sink(1);
        let err = match backend
            .open_change_channel(&ChannelFilter::new("c", "u1"), sink)
            .await
        {
            Ok(_) => panic!("expected failure"),
            Err(e) => e,
        };
        assert!(err.is_retryable());
        assert_eq!(backend.open_count(), 1);
        assert_eq!(backend.open_channels(), 0);
    }

    #[tokio::test]
    async fn open_rejection_is_fatal() {
        let backend = backend();
        backend.reject_next_open("invalid credentials");
        let (sink, _rx) = sink(1);
        let err = match backend
            .open_change_channel(&ChannelFilter::new("c", "u1"), sink)
            .await
        {
            Ok(_) => panic!("expected rejection"),
            Err(e) => e,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "transport error: invalid credentials");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_open_registers_after_delay() {
        let backend = backend();
        backend.set_open_delay(Some(Duration::from_secs(10)));
        let (sink, _rx) = sink(1);
        let filter = ChannelFilter::new("c", "u1");
        let open = backend.open_change_channel(&filter, sink);
        tokio::pin!(open);

        assert!(tokio::time::timeout(Duration::from_secs(5), open.as_mut()).await.is_err());
        assert_eq!(backend.open_count(), 1);
        assert_eq!(backend.open_channels(), 0);

        let channel = open.await.unwrap();
        assert_eq!(backend.open_channels(), 1);
        channel.teardown().await.unwrap();
        assert_eq!(backend.open_channels(), 0);
    }
}
