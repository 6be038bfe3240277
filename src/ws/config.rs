#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;

use crate::Result;
use crate::error::Error;

const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Configuration for the connection manager, fixed at construction.
///
/// ```
/// use std::time::Duration;
///
/// use resilient_ws::ws::config::{Config, ReconnectConfig};
///
/// let config = Config::builder()
///     .ping_interval(Duration::from_secs(10))
///     .pong_timeout(Duration::from_secs(30))
///     .reconnect(ReconnectConfig::builder().max_attempts(3).build())
///     .build();
///
/// assert!(config.validate().is_ok());
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Interval between heartbeat PING frames while the connection is open
    #[builder(default = DEFAULT_PING_INTERVAL)]
    pub ping_interval: Duration,
    /// Maximum silence since the last PONG before the connection is considered dead
    #[builder(default = DEFAULT_PONG_TIMEOUT)]
    pub pong_timeout: Duration,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Outbound queue used while disconnected
    #[builder(default)]
    pub queue: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    /// Reject settings the state machine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.ping_interval.is_zero() {
            return Err(Error::validation("ping_interval must be greater than zero"));
        }
        if self.pong_timeout < self.ping_interval {
            return Err(Error::validation(format!(
                "pong_timeout ({:?}) must not be shorter than ping_interval ({:?})",
                self.pong_timeout, self.ping_interval
            )));
        }
        self.reconnect.validate()?;
        self.queue.validate()
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt; doubles on every further attempt
    #[builder(default = DEFAULT_BASE_DELAY)]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[builder(default = DEFAULT_MAX_DELAY)]
    pub max_delay: Duration,
    /// Number of scheduled retries before the manager gives up.
    /// Zero disables automatic reconnection.
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before reconnection attempt number `attempt` (1-based).
    ///
    /// `min(base_delay * 2^(attempt - 1), max_delay)`; attempt `0` is treated as `1`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2_u32
            .checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn validate(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(Error::validation("reconnect base_delay must be greater than zero"));
        }
        if self.max_delay < self.base_delay {
            return Err(Error::validation(format!(
                "reconnect max_delay ({:?}) must be >= base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        Ok(())
    }
}

/// What to drop when a message arrives at a full outbound queue.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room (keeps the most recent traffic)
    #[default]
    DropOldest,
    /// Refuse the incoming message and keep what is already queued
    DropNewest,
}

/// Configuration for the outbound message queue.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct QueueConfig {
    /// Maximum number of messages held while disconnected
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    pub capacity: usize,
    /// Eviction behavior once `capacity` is reached
    #[builder(default)]
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::validation("queue capacity must be greater than zero"));
        }
        Ok(())
    }
}
