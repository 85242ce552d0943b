//! Connection lifecycle states.

use std::fmt;

/// Lifecycle of one client connection.
///
/// ```text
/// Connecting ─► Authenticated ◄─► Active
///      │              │             │
///      └──────────────┴─► Closing ◄─┘
///                            │
///                            ▼
///                         Closed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Transport accepted, `connect` RPC not yet answered.
    Connecting,
    /// Backend accepted the handshake; no stream subscriptions.
    Authenticated,
    /// Authenticated with at least one stream subscription.
    Active,
    /// Teardown in progress.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Active, Authenticated, Closed, Closing, Connecting};
        matches!(
            (self, next),
            (Connecting, Authenticated | Closing)
                | (Authenticated, Active | Closing)
                | (Active, Authenticated | Closing)
                | (Closing, Closed)
        )
    }

    /// Authenticated or Active: inbound actions are processed.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Authenticated | Self::Active)
    }

    /// Closing or Closed.
    pub fn is_terminating(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
