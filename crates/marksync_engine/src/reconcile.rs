//! Post-write reconciliation.
//!
//! After a successful insert or delete the local collection normally catches
//! up through the change event the write produces. When the push channel is
//! not live that event may never arrive, so the collection is re-fetched
//! instead.

use crate::error::SyncError;
use crate::session::Shared;
use crate::transport::DataService;
use marksync_protocol::SubscriptionState;
use tracing::{debug, warn};

/// How the collection was brought up to date after a write.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The channel is live; the change event will patch the collection.
    Trusted,
    /// The collection was re-fetched and now holds this many entries.
    Refetched(usize),
    /// The re-fetch failed. The write itself still stands.
    Failed(SyncError),
    /// The session was torn down.
    Skipped,
}

/// Returns true if a write made in `state` must be followed by a re-fetch.
pub fn needs_refetch(state: SubscriptionState) -> bool {
    !state.is_live() && !state.is_terminal()
}

pub(crate) async fn after_write<S: DataService>(shared: &Shared<S>) -> ReconcileOutcome {
    let state = shared.state();
    if state.is_terminal() {
        return ReconcileOutcome::Skipped;
    }
    if !needs_refetch(state) {
        return ReconcileOutcome::Trusted;
    }

    debug!(%state, "Push channel not live, re-fetching after write");
    match shared.bulk_load().await {
        Ok(count) => {
            shared.count_refetch();
            ReconcileOutcome::Refetched(count)
        }
        Err(SyncError::Closed) => ReconcileOutcome::Skipped,
        Err(e) => {
            warn!(error = %e, "Re-fetch after write failed");
            ReconcileOutcome::Failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionState::*;

    #[test]
    fn refetch_only_when_not_live() {
        assert!(!needs_refetch(Subscribed));
        assert!(needs_refetch(Connecting));
        assert!(needs_refetch(ChannelError));
        assert!(needs_refetch(TimedOut));
        assert!(!needs_refetch(Closed));
    }
}
