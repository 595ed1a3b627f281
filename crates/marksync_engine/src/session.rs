//! Sync session: the store, the lifecycle and the driver task wired together.
//!
//! A [`SyncSession`] loads the principal's bookmarks, keeps a push channel
//! open and patches the local collection as change events arrive. All
//! channel output funnels through one queue consumed by a single driver
//! task, so events and status transitions are handled one at a time.
//!
//! Lock order: `store` before `lifecycle`. `stats` is a leaf and is never
//! held while taking another lock. No lock is held across an `.await`.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::lifecycle::{Lifecycle, LifecycleAction};
use crate::reconcile::{self, ReconcileOutcome};
use crate::store::{ApplyOutcome, BookmarkStore, Collection};
use crate::transport::{
    ChangeChannel, ChannelFilter, ChannelMessage, ChannelSink, DataService, Envelope,
};
use marksync_protocol::{
    decode, Bookmark, NewBookmark, Principal, ProtocolError, StatusBadge, SubscriptionState,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

/// Progress of the most recent bulk load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum LoadStatus {
    /// The initial load has not finished.
    Loading,
    /// The collection reflects a completed load.
    Ready,
    /// The last load failed.
    Failed(String),
}

/// Counters describing what a session has done.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Events that changed the collection.
    pub events_applied: u64,
    /// Events that decoded but changed nothing.
    pub events_ignored: u64,
    /// Payloads the decoder rejected.
    pub events_rejected: u64,
    /// Events that arrived while the channel was not live.
    pub events_dropped: u64,
    /// Completed bulk loads.
    pub bulk_loads: u64,
    /// Bulk loads triggered by a write while the channel was down.
    pub refetches: u64,
    /// Reconnect attempts.
    pub reconnects: u64,
    /// Failed writes.
    pub write_failures: u64,
    /// Most recent error.
    pub last_error: Option<String>,
}

/// State shared between the session handle and its driver.
pub(crate) struct Shared<S> {
    pub(crate) service: S,
    pub(crate) config: SyncConfig,
    pub(crate) principal: Principal,
    store: Mutex<BookmarkStore>,
    lifecycle: Mutex<Lifecycle>,
    stats: Mutex<SyncStats>,
    state_tx: watch::Sender<SubscriptionState>,
    load_tx: watch::Sender<LoadStatus>,
}

impl<S: DataService> Shared<S> {
    fn new(service: S, config: SyncConfig, principal: Principal) -> Self {
        let lifecycle = Lifecycle::new(config.retry.clone());
        let (state_tx, _) = watch::channel(lifecycle.state());
        let (load_tx, _) = watch::channel(LoadStatus::Loading);
        Self {
            service,
            config,
            principal,
            store: Mutex::new(BookmarkStore::new()),
            lifecycle: Mutex::new(lifecycle),
            stats: Mutex::new(SyncStats::default()),
            state_tx,
            load_tx,
        }
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        self.lifecycle.lock().state()
    }

    fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Runs one lifecycle input and publishes the resulting state.
    fn step(
        &self,
        input: impl FnOnce(&mut Lifecycle) -> Vec<LifecycleAction>,
    ) -> Vec<LifecycleAction> {
        let mut lifecycle = self.lifecycle.lock();
        let actions = input(&mut lifecycle);
        let state = lifecycle.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        actions
    }

    fn is_current(&self, generation: u64) -> bool {
        let lifecycle = self.lifecycle.lock();
        !lifecycle.state().is_terminal() && lifecycle.generation() == generation
    }

    pub(crate) fn record_error(&self, err: &SyncError) {
        self.stats.lock().last_error = Some(err.to_string());
    }

    pub(crate) fn count_refetch(&self) {
        self.stats.lock().refetches += 1;
    }

    /// Fetches the collection from the service and installs it.
    ///
    /// The result is discarded if the session closed while the fetch was in
    /// flight, or if a load that started later has already been installed.
    /// Returns the number of entries in the collection afterwards.
    pub(crate) async fn bulk_load(&self) -> SyncResult<usize> {
        let ticket = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state().is_terminal() {
                return Err(SyncError::Closed);
            }
            lifecycle.begin_load()
        };
        debug!(owner = %self.principal.id, ticket, "Loading bookmarks");

        let fetch = self.service.fetch_all(&self.principal.id);
        let fetched = match self.config.load_timeout {
            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout),
            },
            None => fetch.await,
        };

        let mut items = match fetched {
            Ok(items) => items,
            Err(e) => {
                let e = match e {
                    SyncError::Load(_) | SyncError::Closed => e,
                    other => SyncError::Load(other.to_string()),
                };
                let latest = {
                    let lifecycle = self.lifecycle.lock();
                    !lifecycle.state().is_terminal() && lifecycle.is_latest_load(ticket)
                };
                if latest {
                    error!(error = %e, "Bulk load failed");
                    self.record_error(&e);
                    self.load_tx.send_replace(LoadStatus::Failed(e.to_string()));
                }
                return Err(e);
            }
        };

        let fetched_count = items.len();
        items.retain(|b| b.is_owned_by(&self.principal.id));
        if items.len() != fetched_count {
            warn!(
                dropped = fetched_count - items.len(),
                "Bulk load returned rows owned by another principal"
            );
        }
        let count = items.len();

        let installed = {
            let mut store = self.store.lock();
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state().is_terminal() {
                None
            } else if lifecycle.finish_load(ticket) {
                store.replace_all(items);
                Some(true)
            } else {
                Some(false)
            }
        };
        match installed {
            None => {
                debug!("Discarding bulk load that completed after teardown");
                return Err(SyncError::Closed);
            }
            Some(false) => {
                debug!(ticket, "Discarding bulk load superseded by a newer one");
                return Ok(self.store.lock().len());
            }
            Some(true) => {}
        }

        self.stats.lock().bulk_loads += 1;
        self.load_tx.send_replace(LoadStatus::Ready);
        info!(count, "Loaded bookmarks");
        Ok(count)
    }

    /// Decodes a raw payload and applies it if the channel is live.
    fn dispatch_event(&self, generation: u64, payload: &Value) {
        let event = match decode(payload, &self.principal.id) {
            Ok(event) => event,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Rejected change event");
                self.stats.lock().events_rejected += 1;
                return;
            }
        };
        let id = event.id().to_string();
        let change = event.change_type();

        let outcome = {
            let mut store = self.store.lock();
            let lifecycle = self.lifecycle.lock();
            if lifecycle.accepts_events(generation) {
                Some(store.apply(event))
            } else {
                None
            }
        };

        let mut stats = self.stats.lock();
        match outcome {
            None => {
                debug!(generation, %id, "Dropping event outside a live subscription");
                stats.events_dropped += 1;
            }
            Some(ApplyOutcome::Ignored) => {
                debug!(%id, change = change.as_tag(), "Event changed nothing");
                stats.events_ignored += 1;
            }
            Some(outcome) => {
                debug!(%id, ?outcome, "Applied change event");
                stats.events_applied += 1;
            }
        }
    }
}

/// A live view of one principal's bookmarks.
///
/// Dropping the session stops the driver; [`SyncSession::teardown`] does the
/// same and also waits for the channel to be released.
pub struct SyncSession<S: DataService> {
    shared: Arc<Shared<S>>,
    shutdown: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<S: DataService> SyncSession<S> {
    /// Starts a session for the signed-in principal.
    ///
    /// Loads the collection, then opens the push channel in the background.
    /// A failed initial load is reported through [`SyncSession::load_status`]
    /// and retried once the channel subscribes.
    pub async fn start(service: S, config: SyncConfig) -> SyncResult<Self> {
        let principal = service
            .current_principal()
            .await?
            .ok_or(SyncError::NotSignedIn)?;
        info!(principal = %principal.id, channel = %config.channel_name, "Starting sync session");

        let shared = Arc::new(Shared::new(service, config, principal));
        let mut deferred = Vec::new();
        for action in shared.step(Lifecycle::start) {
            match action {
                LifecycleAction::BulkLoad => {
                    // Failure is already logged and published.
                    let _ = shared.bulk_load().await;
                }
                other => deferred.push(other),
            }
        }

        let (outbox, inbox) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let driver = Driver {
            shared: Arc::clone(&shared),
            inbox,
            outbox,
            opened_rx,
            opened_tx,
            channel: None,
            retry_timer: None,
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(driver.run(deferred));

        Ok(Self {
            shared,
            shutdown,
            driver: Mutex::new(Some(handle)),
        })
    }

    /// The principal this session syncs.
    pub fn principal(&self) -> &Principal {
        &self.shared.principal
    }

    /// The current collection, newest first.
    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.shared.store.lock().snapshot()
    }

    /// Subscribes to collection snapshots.
    pub fn subscribe_bookmarks(&self) -> watch::Receiver<Collection> {
        self.shared.store.lock().subscribe()
    }

    /// Current subscription state.
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// Subscribes to subscription state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SubscriptionState> {
        self.shared.state_tx.subscribe()
    }

    /// Status indicator for the current state.
    pub fn status_badge(&self) -> StatusBadge {
        self.state().badge()
    }

    /// Progress of the most recent bulk load.
    pub fn load_status(&self) -> LoadStatus {
        self.shared.load_tx.borrow().clone()
    }

    /// Subscribes to load status changes.
    pub fn subscribe_load_status(&self) -> watch::Receiver<LoadStatus> {
        self.shared.load_tx.subscribe()
    }

    /// Session counters.
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.lock().clone()
    }

    /// Returns true once the session has been torn down.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Adds a bookmark.
    ///
    /// The URL gets `https://` prepended when it has no scheme. If the push
    /// channel is not live the collection is re-fetched afterwards, since
    /// the change event for this write may never arrive.
    pub async fn add_bookmark(&self, title: &str, url: &str) -> SyncResult<Bookmark> {
        self.ensure_open()?;
        let draft = NewBookmark::new(title, url, &self.shared.principal.id)?;
        debug!(url = %draft.url, "Adding bookmark");

        let created = self
            .shared
            .service
            .insert(draft)
            .await
            .map_err(|e| self.write_failed("insert", e))?;
        info!(id = %created.id, "Bookmark added");

        self.after_write().await;
        Ok(created)
    }

    /// Deletes a bookmark by ID.
    ///
    /// The local entry is removed when the change event arrives, or by the
    /// re-fetch that follows when the channel is not live.
    pub async fn delete_bookmark(&self, id: &str) -> SyncResult<()> {
        self.ensure_open()?;
        let id = id.trim();
        if id.is_empty() {
            return Err(ProtocolError::EmptyId.into());
        }
        debug!(id, "Deleting bookmark");

        self.shared
            .service
            .delete_by_id(id)
            .await
            .map_err(|e| self.write_failed("delete", e))?;
        info!(id, "Bookmark deleted");

        self.after_write().await;
        Ok(())
    }

    /// Re-fetches the collection now.
    pub async fn reload(&self) -> SyncResult<usize> {
        self.ensure_open()?;
        self.shared.bulk_load().await
    }

    /// Closes the session.
    ///
    /// Cancels any pending retry, releases the channel and clears the
    /// collection. Late results from in-flight loads are discarded.
    /// Idempotent.
    pub async fn teardown(&self) {
        let actions = self.shared.step(Lifecycle::close);
        if actions.is_empty() {
            return;
        }
        info!(principal = %self.shared.principal.id, "Tearing down sync session");
        debug!(?actions, "Closing lifecycle");

        self.shutdown.send_replace(true);
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync driver ended abnormally");
            }
        }

        self.shared.store.lock().clear();
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.shared.is_closed() {
            Err(SyncError::Closed)
        } else {
            Ok(())
        }
    }

    fn write_failed(&self, op: &'static str, err: SyncError) -> SyncError {
        let err = match err {
            SyncError::Write(_) | SyncError::Closed | SyncError::NotSignedIn => err,
            other => SyncError::Write(other.to_string()),
        };
        warn!(op, error = %err, "Write failed");
        {
            let mut stats = self.shared.stats.lock();
            stats.write_failures += 1;
            stats.last_error = Some(err.to_string());
        }
        err
    }

    async fn after_write(&self) {
        if let ReconcileOutcome::Refetched(count) = reconcile::after_write(&self.shared).await {
            debug!(count, "Collection re-fetched after write");
        }
    }
}

impl<S: DataService> Drop for SyncSession<S> {
    fn drop(&mut self) {
        self.shared.step(Lifecycle::close);
        self.shutdown.send_replace(true);
    }
}

impl<S: DataService> std::fmt::Debug for SyncSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("principal", &self.shared.principal.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Result of a channel open, handed back to the driver.
struct Opened {
    generation: u64,
    result: SyncResult<Box<dyn ChangeChannel>>,
}

/// Background task that owns the channel and the retry timer.
struct Driver<S> {
    shared: Arc<Shared<S>>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    outbox: mpsc::UnboundedSender<Envelope>,
    opened_rx: mpsc::UnboundedReceiver<Opened>,
    opened_tx: mpsc::UnboundedSender<Opened>,
    channel: Option<Box<dyn ChangeChannel>>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    shutdown: watch::Receiver<bool>,
}

impl<S: DataService> Driver<S> {
    async fn run(mut self, initial: Vec<LifecycleAction>) {
        self.execute(initial).await;

        loop {
            tokio::select! {
                () = shutdown_requested(self.shutdown.clone()) => break,
                Some(envelope) = self.inbox.recv() => self.handle(envelope).await,
                Some(opened) = self.opened_rx.recv() => self.handle_opened(opened).await,
                () = retry_elapsed(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.shared.stats.lock().reconnects += 1;
                    let actions = self.shared.step(Lifecycle::on_retry_elapsed);
                    self.execute(actions).await;
                }
            }
        }

        self.retry_timer = None;
        self.release_channel().await;

        // Opens still in flight see the closed receiver and release their
        // channel themselves; anything already queued is released here.
        self.opened_rx.close();
        while let Ok(opened) = self.opened_rx.try_recv() {
            if let Ok(channel) = opened.result {
                teardown_quietly(channel).await;
            }
        }
        debug!("Sync driver stopped");
    }

    async fn handle(&mut self, envelope: Envelope) {
        match envelope.message {
            ChannelMessage::Status(status) => {
                let actions = self
                    .shared
                    .step(|lifecycle| lifecycle.on_status(envelope.generation, status));
                self.execute(actions).await;
            }
            ChannelMessage::Event(payload) => {
                self.shared.dispatch_event(envelope.generation, &payload)
            }
        }
    }

    async fn execute(&mut self, actions: Vec<LifecycleAction>) {
        for action in actions {
            match action {
                LifecycleAction::BulkLoad => {
                    // Runs detached so a slow fetch never blocks the queue.
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        let _ = shared.bulk_load().await;
                    });
                }
                LifecycleAction::OpenChannel { generation } => self.spawn_open(generation),
                LifecycleAction::ReleaseChannel => self.release_channel().await,
                LifecycleAction::ScheduleRetry { delay, attempt } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Push channel down, reconnect scheduled"
                    );
                    self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
                }
                LifecycleAction::CancelRetry => self.retry_timer = None,
            }
        }
    }

    /// Opens a channel in the background so teardown never waits on it.
    fn spawn_open(&self, generation: u64) {
        let shared = Arc::clone(&self.shared);
        let sink = ChannelSink::new(generation, self.outbox.clone());
        let opened = self.opened_tx.clone();

        tokio::spawn(async move {
            let filter = ChannelFilter::new(
                shared.config.channel_name.clone(),
                shared.principal.id.clone(),
            );
            let result = shared.service.open_change_channel(&filter, sink).await;
            if let Err(SendError(Opened {
                result: Ok(channel),
                ..
            })) = opened.send(Opened { generation, result })
            {
                debug!(generation, "Releasing channel that opened after the session stopped");
                teardown_quietly(channel).await;
            }
        });
    }

    async fn handle_opened(&mut self, opened: Opened) {
        let generation = opened.generation;
        match opened.result {
            Ok(channel) => {
                if !self.shared.is_current(generation) {
                    debug!(generation, "Releasing channel that opened too late");
                    teardown_quietly(channel).await;
                    return;
                }
                info!(
                    generation,
                    channel = %self.shared.config.channel_name,
                    "Push channel opened"
                );
                self.release_channel().await;
                self.channel = Some(channel);
            }
            Err(e) => {
                self.shared.record_error(&e);
                let actions = if e.is_retryable() {
                    warn!(generation, error = %e, "Failed to open push channel");
                    self.shared
                        .step(|lifecycle| lifecycle.on_open_failed(generation))
                } else {
                    error!(generation, error = %e, "Push channel rejected");
                    self.shared
                        .step(|lifecycle| lifecycle.on_open_rejected(generation))
                };
                self.execute(actions).await;
            }
        }
    }

    async fn release_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            match channel.teardown().await {
                Ok(()) => debug!("Push channel released"),
                Err(e) => warn!(error = %e, "Channel teardown failed"),
            }
        }
    }
}

async fn teardown_quietly(channel: Box<dyn ChangeChannel>) {
    if let Err(e) = channel.teardown().await {
        warn!(error = %e, "Channel teardown failed");
    }
}

/// Completes when the retry timer fires; pending forever when none is armed.
async fn retry_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

/// Completes once teardown has been requested or the session is gone.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}
