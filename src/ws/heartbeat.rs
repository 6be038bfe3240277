//! Application-level PING/PONG liveness monitoring.
//!
//! A transport can stay technically open while the peer has stopped answering
//! (half-open TCP, a hung server). The monitor schedules a `{"type":"ping"}` every
//! `ping_interval` and, right before each one, checks how long the peer has been
//! silent. Past `pong_timeout` it reports a timeout instead of pinging again.
//!
//! The monitor holds deadlines only; the connection actor sleeps on
//! [`Heartbeat::deadline`] through its [`Clock`](crate::clock::Clock) and calls
//! [`Heartbeat::on_tick`] when it passes.

use std::time::Duration;

use tokio::time::Instant;

/// What the connection should do when a heartbeat tick comes due.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a PING frame
    Ping,
    /// The peer has been silent too long; the transport must be closed
    TimedOut {
        /// Time since the last PONG (or since the connection opened)
        silence: Duration,
    },
}

#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    next_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

impl Heartbeat {
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            next_ping: None,
            last_pong: None,
        }
    }

    /// Arm the monitor for a freshly opened transport. Opening counts as a PONG.
    pub fn start(&mut self, now: Instant) {
        self.last_pong = Some(now);
        self.next_ping = Some(now + self.interval);
    }

    /// Disarm the monitor; no tick is due until the next [`Heartbeat::start`].
    pub fn stop(&mut self) {
        self.next_ping = None;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.next_ping.is_some()
    }

    /// When the next tick is due, if the monitor is armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.next_ping
    }

    #[must_use]
    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    pub fn record_pong(&mut self, now: Instant) {
        if self.is_running() {
            self.last_pong = Some(now);
        }
    }

    /// Handle a due tick.
    ///
    /// On [`HeartbeatAction::TimedOut`] the monitor stops itself.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        let silence = self
            .last_pong
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));

        if silence > self.timeout {
            self.stop();
            return HeartbeatAction::TimedOut { silence };
        }

        let scheduled = self.next_ping.unwrap_or(now) + self.interval;
        self.next_ping = Some(if scheduled > now {
            scheduled
        } else {
            now + self.interval
        });
        HeartbeatAction::Ping
    }
}
