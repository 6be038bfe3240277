//! Lifecycle and data events emitted by the connection manager.
//!
//! The set of events is closed: [`EventKind`] names every kind a handler can be
//! registered for, and [`Event`] carries the matching payload. Handlers run on the
//! manager's task, in registration order; a panicking handler is logged and skipped.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use super::traits::CloseReason;
use super::types::response::InboundMessage;
use crate::error::Error;

/// Every event a handler can listen for.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Open,
    Close,
    Error,
    Message,
    Reconnecting,
    Reconnected,
}

/// Details of a closed transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close frame sent by the peer, if one arrived
    pub reason: Option<CloseReason>,
    /// `true` when the close was requested through `disconnect`
    pub manual: bool,
}

/// Progress of the reconnection schedule.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectInfo {
    /// Attempt number the scheduled retry will be (or the last one made, when giving up)
    pub attempt: u32,
    pub max_attempts: u32,
    /// Wait before the retry; `None` when no retry was scheduled
    pub delay: Option<Duration>,
    /// `true` once the budget is spent; only an explicit `connect` resumes
    pub gave_up: bool,
}

/// Event payloads.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event {
    /// The transport opened and queued messages were replayed
    Open,
    /// The transport closed
    Close(CloseInfo),
    /// A transport, open or heartbeat failure
    Error(Arc<Error>),
    /// Inbound data that is not a protocol-internal frame
    Message(InboundMessage),
    /// A reconnect was scheduled, or the manager gave up
    Reconnecting(ReconnectInfo),
    /// The transport opened after one or more failed attempts
    Reconnected {
        /// Attempts it took
        attempts: u32,
    },
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close(_) => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::Message(_) => EventKind::Message,
            Self::Reconnecting(_) => EventKind::Reconnecting,
            Self::Reconnected { .. } => EventKind::Reconnected,
        }
    }
}

/// Identifies a registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Run a handler, containing any panic it raises. Returns `false` if it panicked.
pub(crate) fn invoke_isolated<F: FnOnce()>(handler: F) -> bool {
    catch_unwind(AssertUnwindSafe(handler)).is_ok()
}

/// Observer lists, one per [`EventKind`].
#[derive(Default)]
pub struct EventEmitter {
    listeners: HashMap<EventKind, Vec<(ListenerId, EventHandler)>>,
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, kind: EventKind, id: ListenerId, handler: EventHandler) {
        self.listeners.entry(kind).or_default().push((id, handler));
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(handlers) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        before != handlers.len()
    }

    /// Deliver `event` to every handler of its kind. Returns the number of handlers that panicked.
    pub fn emit(&self, event: &Event) -> usize {
        let kind = event.kind();
        let Some(handlers) = self.listeners.get(&kind) else {
            return 0;
        };

        let mut failures = 0;
        for (id, handler) in handlers {
            if !invoke_isolated(|| handler(event)) {
                failures += 1;
                #[cfg(feature = "tracing")]
                tracing::error!(%kind, %id, "Event handler panicked");
                #[cfg(not(feature = "tracing"))]
                let _ = id;
            }
        }
        failures
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self
            .listeners
            .iter()
            .map(|(kind, handlers)| (*kind, handlers.len()))
            .collect();
        f.debug_struct("EventEmitter")
            .field("listeners", &counts)
            .finish()
    }
}
