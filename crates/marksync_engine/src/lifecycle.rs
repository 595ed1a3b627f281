//! Subscription lifecycle state machine.
//!
//! `Lifecycle` owns the subscription state and decides what should happen
//! next; it performs no I/O. Each input returns the [`LifecycleAction`]s the
//! driver must execute, in order.
//!
//! ```text
//!             ┌──────────── retry fires ────────────┐
//!             ▼                                     │
//!        Connecting ──handshake──▶ Subscribed       │
//!             │                        │            │
//!             └──failure/timeout──┬────┘            │
//!                                 ▼                 │
//!                     ChannelError / TimedOut ──────┘
//!
//!        any ──teardown──▶ Closed (terminal)
//! ```

use crate::config::RetryConfig;
use marksync_protocol::SubscriptionState;
use std::time::Duration;
use tracing::{debug, warn};

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Fetch the full collection and install it.
    BulkLoad,
    /// Open a push channel tagged with `generation`.
    OpenChannel {
        /// Generation of the new channel.
        generation: u64,
    },
    /// Tear down the current push channel, if any.
    ReleaseChannel,
    /// Arm the retry timer.
    ScheduleRetry {
        /// How long to wait.
        delay: Duration,
        /// Consecutive attempt number, starting at 1.
        attempt: u32,
    },
    /// Disarm the retry timer.
    CancelRetry,
}

/// The subscription state machine.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SubscriptionState,
    generation: u64,
    retry_pending: bool,
    attempt: u32,
    loaded: bool,
    subscribed_once: bool,
    loads_started: u64,
    load_installed: u64,
    retry: RetryConfig,
}

impl Lifecycle {
    /// Creates a lifecycle in `Connecting`.
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            state: SubscriptionState::Connecting,
            generation: 0,
            retry_pending: false,
            attempt: 0,
            loaded: false,
            subscribed_once: false,
            loads_started: 0,
            load_installed: 0,
            retry,
        }
    }

    /// Current state.
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Generation of the current channel.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true while a retry timer is armed.
    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Consecutive failed attempts since the last successful subscribe.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns true if the collection is fresh for the current principal.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Records a successful bulk load.
    ///
    /// A load only counts as fresh while subscribed, or before the first
    /// subscription. Anything else may predate events the channel missed.
    pub fn mark_loaded(&mut self) {
        if self.state.is_live() || !self.subscribed_once {
            self.loaded = true;
        }
    }

    /// Hands out a ticket for a bulk load that is about to fetch.
    pub fn begin_load(&mut self) -> u64 {
        self.loads_started += 1;
        self.loads_started
    }

    /// Returns true if no load started after `ticket`.
    pub fn is_latest_load(&self, ticket: u64) -> bool {
        ticket == self.loads_started
    }

    /// Records a completed load. Returns false, leaving the lifecycle
    /// untouched, when a load that started later has already been installed.
    pub fn finish_load(&mut self, ticket: u64) -> bool {
        if ticket <= self.load_installed {
            return false;
        }
        self.load_installed = ticket;
        self.mark_loaded();
        true
    }

    /// Initial actions: load the collection, then open the first channel.
    pub fn start(&mut self) -> Vec<LifecycleAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.generation += 1;
        vec![
            LifecycleAction::BulkLoad,
            LifecycleAction::OpenChannel {
                generation: self.generation,
            },
        ]
    }

    /// Returns true if an event from channel `generation` may be applied.
    pub fn accepts_events(&self, generation: u64) -> bool {
        self.state.is_live() && generation == self.generation
    }

    /// Handles a status reported by the channel of `generation`.
    pub fn on_status(
        &mut self,
        generation: u64,
        status: SubscriptionState,
    ) -> Vec<LifecycleAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                %status,
                "Ignoring status from stale channel"
            );
            return Vec::new();
        }

        // Only teardown may close the lifecycle; a channel that closes on
        // its own is a failure like any other.
        let status = if status == SubscriptionState::Closed {
            warn!(generation, "Channel closed by transport");
            SubscriptionState::ChannelError
        } else {
            status
        };

        if status == self.state {
            return Vec::new();
        }
        if !self.state.can_transition_to(status) {
            warn!(from = %self.state, to = %status, "Ignoring invalid subscription transition");
            return Vec::new();
        }

        debug!(from = %self.state, to = %status, generation, "Subscription transition");
        self.state = status;

        match status {
            SubscriptionState::Subscribed => {
                self.attempt = 0;
                self.subscribed_once = true;
                if self.loaded {
                    Vec::new()
                } else {
                    vec![LifecycleAction::BulkLoad]
                }
            }
            SubscriptionState::ChannelError | SubscriptionState::TimedOut => {
                // Events may have been missed from here on.
                self.loaded = false;
                self.schedule_retry()
            }
            SubscriptionState::Connecting | SubscriptionState::Closed => Vec::new(),
        }
    }

    /// Handles a failure to open the channel of `generation`.
    pub fn on_open_failed(&mut self, generation: u64) -> Vec<LifecycleAction> {
        self.on_status(generation, SubscriptionState::ChannelError)
    }

    /// Handles a non-retryable failure to open the channel of `generation`.
    ///
    /// The lifecycle parks in `ChannelError` without arming a retry.
    pub fn on_open_rejected(&mut self, generation: u64) -> Vec<LifecycleAction> {
        if self.state.is_terminal() || generation != self.generation {
            return Vec::new();
        }
        warn!(generation, "Push channel rejected, not retrying");
        self.state = SubscriptionState::ChannelError;
        self.loaded = false;
        if self.retry_pending {
            self.retry_pending = false;
            vec![LifecycleAction::CancelRetry]
        } else {
            Vec::new()
        }
    }

    /// Handles the retry timer firing.
    pub fn on_retry_elapsed(&mut self) -> Vec<LifecycleAction> {
        if self.state.is_terminal() || !self.retry_pending {
            return Vec::new();
        }
        self.retry_pending = false;

        if !self.state.needs_retry() {
            return Vec::new();
        }

        self.state = SubscriptionState::Connecting;
        self.generation += 1;
        debug!(generation = self.generation, attempt = self.attempt, "Reconnecting");
        vec![
            LifecycleAction::ReleaseChannel,
            LifecycleAction::OpenChannel {
                generation: self.generation,
            },
        ]
    }

    /// Tears the lifecycle down. Terminal.
    pub fn close(&mut self) -> Vec<LifecycleAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.state = SubscriptionState::Closed;

        let mut actions = Vec::with_capacity(2);
        if self.retry_pending {
            self.retry_pending = false;
            actions.push(LifecycleAction::CancelRetry);
        }
        actions.push(LifecycleAction::ReleaseChannel);
        actions
    }

    fn schedule_retry(&mut self) -> Vec<LifecycleAction> {
        if self.retry_pending {
            return Vec::new();
        }
        self.retry_pending = true;
        self.attempt = self.attempt.saturating_add(1);
        vec![LifecycleAction::ScheduleRetry {
            delay: self.retry.delay_for_attempt(self.attempt),
            attempt: self.attempt,
        }]
    }
}
