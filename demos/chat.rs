//! Chat client against a real-time channel server.
//!
//! Connects with an identity, joins the `chat` channel, publishes a greeting and
//! logs every lifecycle event for a minute.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,resilient_ws=debug cargo run --example chat --features tracing -- ws://localhost:8080/ws ada
//! ```

use std::time::Duration;

use resilient_ws::ws::config::{Config, ReconnectConfig};
use resilient_ws::ws::{ConnectRequest, ConnectionManager, Event, EventKind, InboundMessage};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "ws://localhost:8080/ws".to_owned());
    let user = args.next().unwrap_or_else(|| "guest".to_owned());

    let config = Config::builder()
        .reconnect(ReconnectConfig::builder().max_attempts(5).build())
        .build();
    let manager = ConnectionManager::new(config)?;

    for kind in [
        EventKind::Open,
        EventKind::Close,
        EventKind::Error,
        EventKind::Reconnecting,
        EventKind::Reconnected,
    ] {
        manager.on(kind, |event| match event {
            Event::Open => info!(event = "open"),
            Event::Close(close) => info!(event = "close", reason = ?close.reason, manual = close.manual),
            Event::Error(error) => warn!(event = "error", %error),
            Event::Reconnecting(schedule) => info!(
                event = "reconnecting",
                attempt = schedule.attempt,
                max_attempts = schedule.max_attempts,
                delay = ?schedule.delay,
                gave_up = schedule.gave_up
            ),
            Event::Reconnected { attempts } => info!(event = "reconnected", attempts),
            other => info!(event = %other.kind()),
        });
    }

    manager.on(EventKind::Message, |event| match event {
        Event::Message(InboundMessage::Raw(text)) => info!(event = "message", raw = %text),
        Event::Message(InboundMessage::Binary(bytes)) => {
            info!(event = "message", binary_len = bytes.len());
        }
        _ => {}
    });
    manager.on_channel("chat", |data| info!(channel = "chat", %data));

    manager.connect(ConnectRequest::builder().url(url).user_id(user.clone()).build());
    manager.subscribe("chat");
    let delivered = manager.publish("chat", json!({"user": user, "text": "hello"}));
    info!(delivered, "Greeting handed to the manager");

    tokio::time::sleep(Duration::from_secs(60)).await;

    let stats = manager.stats();
    info!(
        sent = stats.messages_sent,
        received = stats.messages_received,
        reconnections = stats.reconnections,
        errors = stats.errors,
        uptime = ?stats.uptime(),
        client_id = ?stats.client_id,
        "Session summary"
    );

    manager.disconnect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
