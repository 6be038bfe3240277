//! Core WebSocket infrastructure.
//!
//! This module provides a persistent connection manager that keeps one logical
//! session alive across transport failures.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: cloneable handle to the single task that owns the connection
//! - [`Connector`]: trait that opens a fresh [`Transport`] for each connection attempt
//! - [`heartbeat`]: PING/PONG liveness monitoring
//! - [`queue`]: bounded FIFO for messages sent while disconnected
//! - [`subscription`]: channel interest and handlers multiplexed over one transport
//! - [`events`]: closed set of lifecycle and data events
//! - `writer`: per-transport task that owns the write half, so a stalled sink never blocks the manager
//!
//! # Example
//!
//! ```ignore
//! let manager = ConnectionManager::new(Config::default())?;
//!
//! manager.on_channel("chat", |data| println!("{data}"));
//! manager.connect(ConnectRequest::builder().url(endpoint).user_id("ada").build());
//! manager.subscribe("chat");
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod queue;
pub mod stats;
pub mod subscription;
pub mod traits;
pub mod transport;
pub mod types;
mod writer;

pub use connection::{ConnectRequest, ConnectionManager, ConnectionState, Listener, ListenerTarget};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use events::{CloseInfo, Event, EventKind, ListenerId, ReconnectInfo};
pub use stats::ConnectionStats;
pub use traits::*;
pub use transport::TungsteniteConnector;
pub use types::request::Payload;
pub use types::response::InboundMessage;
