//! Connection state machine and observable events.

use std::fmt;

/// Connection lifecycle.
///
/// ```text
/// Disconnected → Connecting → Connected → Closing → Disconnected
///                    ↑  ↺ retry                         │
///                    └──────── automatic reconnect ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No link and no attempt in progress
    #[default]
    Disconnected,
    /// Attempting to connect (retrying on failure)
    Connecting,
    /// Link established
    Connected,
    /// Link being torn down
    Closing,
}

impl ConnectionState {
    /// Get state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }

    /// Check if a transition is part of the lifecycle
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Disconnected)
                | (Self::Connected, Self::Closing)
                | (Self::Closing, Self::Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something observable happened on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Link established
    Connected {
        /// ID of the new connection
        connection_id: String,
    },
    /// A connect attempt failed; another follows after the retry delay
    ConnectFailed {
        /// Attempt number within this connect cycle (1-based)
        attempt: u32,
        /// Failure description
        error: String,
    },
    /// Server confirmed the session key
    HandshakeComplete {
        /// ID of the connection
        connection_id: String,
    },
    /// Link lost; a reconnect follows
    Disconnected {
        /// Why the link was torn down
        reason: String,
    },
    /// Closed locally; no reconnect follows
    Closed {
        /// Reason given to `close`
        reason: String,
    },
}
