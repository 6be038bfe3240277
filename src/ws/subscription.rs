use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::events::{ListenerId, invoke_isolated};

pub type ChannelHandler = Arc<dyn Fn(&Value) + Send + Sync + 'static>;

/// Upstream interest and local handlers for named channels multiplexed over one transport.
///
/// Interest (what the server has been asked to route) and handlers (who consumes the
/// data locally) are tracked separately: handlers may be registered before or after
/// subscribing, and survive unsubscribing.
#[derive(Default)]
pub struct ChannelRegistry {
    subscribed: BTreeSet<String>,
    handlers: HashMap<String, Vec<(ListenerId, ChannelHandler)>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record interest in `channel`. Returns `false` if it was already recorded,
    /// in which case no upstream frame should be sent.
    pub fn subscribe(&mut self, channel: &str) -> bool {
        if self.subscribed.contains(channel) {
            return false;
        }
        self.subscribed.insert(channel.to_owned())
    }

    /// Drop interest in `channel`. Returns `false` if there was none.
    pub fn unsubscribe(&mut self, channel: &str) -> bool {
        self.subscribed.remove(channel)
    }

    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscribed.contains(channel)
    }

    /// Subscribed channels in name order.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.subscribed.iter().map(String::as_str)
    }

    pub fn on(&mut self, channel: &str, id: ListenerId, handler: ChannelHandler) {
        self.handlers
            .entry(channel.to_owned())
            .or_default()
            .push((id, handler));
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&mut self, channel: &str, id: ListenerId) -> bool {
        let Some(handlers) = self.handlers.get_mut(channel) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = before != handlers.len();
        if handlers.is_empty() {
            self.handlers.remove(channel);
        }
        removed
    }

    /// Deliver `data` to every handler of `channel`. Returns how many handlers ran.
    pub fn dispatch(&self, channel: &str, data: &Value) -> usize {
        let Some(handlers) = self.handlers.get(channel) else {
            #[cfg(feature = "tracing")]
            tracing::trace!(%channel, "No handlers for channel message");
            return 0;
        };

        for (id, handler) in handlers {
            if !invoke_isolated(|| handler(data)) {
                #[cfg(feature = "tracing")]
                tracing::error!(%channel, %id, "Channel handler panicked");
                #[cfg(not(feature = "tracing"))]
                let _ = id;
            }
        }
        handlers.len()
    }

    #[must_use]
    pub fn handler_count(&self, channel: &str) -> usize {
        self.handlers.get(channel).map_or(0, Vec::len)
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("subscribed", &self.subscribed)
            .field("handler_channels", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
