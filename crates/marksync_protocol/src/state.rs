//! Push channel subscription states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of the live change subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionState {
    /// A subscription attempt is in flight.
    Connecting,
    /// The handshake succeeded and events are flowing.
    Subscribed,
    /// The transport reported a failure.
    ChannelError,
    /// The transport gave up waiting for the handshake.
    TimedOut,
    /// The lifecycle was torn down. Terminal.
    Closed,
}

impl SubscriptionState {
    /// Returns true if pushed events can be trusted.
    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionState::Subscribed)
    }

    /// Returns true if the state calls for a reconnect.
    pub fn needs_retry(&self) -> bool {
        matches!(
            self,
            SubscriptionState::ChannelError | SubscriptionState::TimedOut
        )
    }

    /// Returns true once nothing more can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionState::Closed)
    }

    /// Returns true if the lifecycle may move directly from `self` to `next`.
    pub fn can_transition_to(&self, next: SubscriptionState) -> bool {
        use SubscriptionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Connecting, Subscribed | ChannelError | TimedOut) => true,
            (Subscribed, ChannelError | TimedOut) => true,
            (ChannelError, Connecting | TimedOut) => true,
            (TimedOut, Connecting | ChannelError) => true,
            _ => false,
        }
    }

    /// Parses the status name used by the push transport.
    pub fn from_wire(status: &str) -> Option<Self> {
        match status.to_ascii_uppercase().as_str() {
            "CONNECTING" => Some(SubscriptionState::Connecting),
            "SUBSCRIBED" => Some(SubscriptionState::Subscribed),
            "CHANNEL_ERROR" => Some(SubscriptionState::ChannelError),
            "TIMED_OUT" => Some(SubscriptionState::TimedOut),
            "CLOSED" => Some(SubscriptionState::Closed),
            _ => None,
        }
    }

    /// The transport's name for this status.
    pub fn as_wire(&self) -> &'static str {
        match self {
            SubscriptionState::Connecting => "connecting",
            SubscriptionState::Subscribed => "SUBSCRIBED",
            SubscriptionState::ChannelError => "CHANNEL_ERROR",
            SubscriptionState::TimedOut => "TIMED_OUT",
            SubscriptionState::Closed => "CLOSED",
        }
    }

    /// The indicator a UI should show for this state.
    pub fn badge(&self) -> StatusBadge {
        match self {
            SubscriptionState::Subscribed => StatusBadge::Live,
            SubscriptionState::ChannelError => StatusBadge::Error,
            SubscriptionState::Connecting | SubscriptionState::TimedOut => StatusBadge::Connecting,
            SubscriptionState::Closed => StatusBadge::Offline,
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_wire())
    }
}

/// Non-blocking sync status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusBadge {
    /// Push channel healthy.
    Live,
    /// Push channel failed, retry pending.
    Error,
    /// Subscribing or waiting on a timed-out handshake.
    Connecting,
    /// Torn down.
    Offline,
}

impl StatusBadge {
    /// Short label.
    pub fn label(&self) -> &'static str {
        match self {
            StatusBadge::Live => "Live",
            StatusBadge::Error => "Error",
            StatusBadge::Connecting => "Connecting",
            StatusBadge::Offline => "Offline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionState::*;

    const ALL: [SubscriptionState; 5] = [Connecting, Subscribed, ChannelError, TimedOut, Closed];

    #[test]
    fn connecting_reaches_only_four_states() {
        let reachable: Vec<_> = ALL
            .iter()
            .copied()
            .filter(|s| Connecting.can_transition_to(*s))
            .collect();
        assert_eq!(reachable, vec![Subscribed, ChannelError, TimedOut, Closed]);
    }

    #[test]
    fn closed_is_terminal() {
        assert!(Closed.is_terminal());
        for next in ALL {
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn failure_states_retry_through_connecting() {
        assert!(ChannelError.can_transition_to(Connecting));
        assert!(TimedOut.can_transition_to(Connecting));
        assert!(!Subscribed.can_transition_to(Connecting));
        assert!(ChannelError.needs_retry());
        assert!(TimedOut.needs_retry());
        assert!(!Subscribed.needs_retry());
    }

    #[test]
    fn wire_names_round_trip() {
        for state in ALL {
            assert_eq!(SubscriptionState::from_wire(state.as_wire()), Some(state));
        }
        assert_eq!(SubscriptionState::from_wire("JOINING"), None);
    }

    #[test]
    fn badges() {
        assert_eq!(Subscribed.badge(), StatusBadge::Live);
        assert_eq!(ChannelError.badge(), StatusBadge::Error);
        assert_eq!(TimedOut.badge(), StatusBadge::Connecting);
        assert_eq!(Closed.badge().label(), "Offline");
    }
}
