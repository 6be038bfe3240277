use std::time::Duration;

use tokio::time::Instant;

use super::connection::ConnectionState;

/// Snapshot of connection counters and status.
///
/// Counters accumulate for the lifetime of the manager; reconnecting does not reset them.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// User payloads written to the transport (protocol frames are not counted)
    pub messages_sent: u64,
    /// Frames read from the transport, protocol frames included
    pub messages_received: u64,
    /// Opens that followed at least one failed attempt
    pub reconnections: u64,
    /// Transport, open and heartbeat failures
    pub errors: u64,
    /// Time spent open across all finished connections
    pub total_uptime: Duration,
    /// When the current connection opened
    pub connection_started_at: Option<Instant>,
    /// Time the current connection has been open
    pub current_uptime: Duration,
    pub state: ConnectionState,
    /// Attempts made in the current reconnection sequence
    pub reconnect_attempts: u32,
    pub queued_messages: usize,
    /// Identifier assigned by the server on the `system` channel
    pub client_id: Option<String>,
    /// Identity sent as the `userId` query parameter
    pub user_id: Option<String>,
    /// Channels with upstream interest, in name order
    pub subscriptions: Vec<String>,
    pub last_pong_at: Option<Instant>,
}

impl ConnectionStats {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_open()
    }

    /// Total time open, including the connection currently in progress.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.total_uptime + self.current_uptime
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self {
            messages_sent: 0,
            messages_received: 0,
            reconnections: 0,
            errors: 0,
            total_uptime: Duration::ZERO,
            connection_started_at: None,
            current_uptime: Duration::ZERO,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            queued_messages: 0,
            client_id: None,
            user_id: None,
            subscriptions: Vec::new(),
            last_pong_at: None,
        }
    }
}
