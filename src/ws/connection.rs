#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bon::Builder;
use futures::future::BoxFuture;
use futures::StreamExt as _;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::events::{
    CloseInfo, Event, EventEmitter, EventHandler, EventKind, ListenerId, ReconnectInfo,
};
use super::heartbeat::{Heartbeat, HeartbeatAction};
use super::queue::MessageQueue;
use super::stats::ConnectionStats;
use super::subscription::{ChannelHandler, ChannelRegistry};
use super::traits::{CloseReason, Connector, Frame, FrameStream, Transport};
use super::transport::TungsteniteConnector;
use super::types::request::{ClientFrame, Payload};
use super::types::response::{Decoded, InboundMessage, decode};
use super::writer::{WriteFailure, Writer};
use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Kind};

/// Query parameter carrying the caller's identity.
const USER_ID_PARAM: &str = "userId";

/// How long a close handshake may take before the transport is dropped regardless.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Close code sent when the heartbeat declares the peer dead.
const HEARTBEAT_CLOSE_CODE: u16 = 4000;

const NORMAL_CLOSE_CODE: u16 = 1000;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// No transport; a reconnect may be scheduled
    Disconnected,
    /// Opening handshake in flight
    Connecting,
    /// Transport open
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Close frame handed to the transport; the handshake finishes in the background
    Closing,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Where and how to connect.
///
/// ```
/// use resilient_ws::ws::ConnectRequest;
///
/// let request = ConnectRequest::builder()
///     .url("wss://chat.example.com/ws")
///     .user_id("ada@example.com")
///     .protocols(vec!["chat.v1".to_owned()])
///     .build();
///
/// assert_eq!(
///     request.resolve().unwrap().as_str(),
///     "wss://chat.example.com/ws?userId=ada%40example.com"
/// );
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ConnectRequest {
    /// WebSocket endpoint, `ws://` or `wss://`
    #[builder(into)]
    pub url: String,
    /// Sub-protocols offered in the handshake
    #[builder(default)]
    pub protocols: Vec<String>,
    /// Identity appended as the `userId` query parameter
    #[builder(into)]
    pub user_id: Option<String>,
}

impl ConnectRequest {
    /// Final URL for the handshake, identity parameter included.
    pub fn resolve(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        if let Some(user_id) = &self.user_id {
            url.query_pairs_mut().append_pair(USER_ID_PARAM, user_id);
        }
        Ok(url)
    }
}

impl From<&str> for ConnectRequest {
    fn from(url: &str) -> Self {
        Self::builder().url(url).build()
    }
}

impl From<String> for ConnectRequest {
    fn from(url: String) -> Self {
        Self::builder().url(url).build()
    }
}

impl From<Url> for ConnectRequest {
    fn from(url: Url) -> Self {
        Self::builder().url(url.as_str()).build()
    }
}

/// What a [`Listener`] is attached to.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerTarget {
    Event(EventKind),
    Channel(String),
}

/// A registered handler. Call [`Listener::remove`] (or [`ConnectionManager::off`]) to detach it.
///
/// Dropping a `Listener` leaves the handler registered.
#[derive(Debug)]
pub struct Listener {
    id: ListenerId,
    target: ListenerTarget,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Listener {
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    #[must_use]
    pub fn target(&self) -> &ListenerTarget {
        &self.target
    }

    /// Unregister the handler.
    pub fn remove(self) {
        if let Some(commands) = self.commands.upgrade() {
            _ = commands.send(Command::Off {
                target: self.target,
                id: self.id,
            });
        }
    }
}

enum Registration {
    Event {
        kind: EventKind,
        id: ListenerId,
        handler: EventHandler,
    },
    Channel {
        channel: String,
        id: ListenerId,
        handler: ChannelHandler,
    },
}

enum Command {
    Connect(ConnectRequest),
    Disconnect,
    Send(Payload),
    Subscribe(String),
    Unsubscribe(String),
    On(Registration),
    Off { target: ListenerTarget, id: ListenerId },
    ClearQueue,
}

// Manual impl: handlers are not `Debug`.
impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(request) => f.debug_tuple("Connect").field(request).finish(),
            Self::Disconnect => f.write_str("Disconnect"),
            Self::Send(payload) => f.debug_tuple("Send").field(payload).finish(),
            Self::Subscribe(channel) => f.debug_tuple("Subscribe").field(channel).finish(),
            Self::Unsubscribe(channel) => f.debug_tuple("Unsubscribe").field(channel).finish(),
            Self::On(Registration::Event { kind, id, .. }) => {
                write!(f, "On({kind}, {id})")
            }
            Self::On(Registration::Channel { channel, id, .. }) => {
                write!(f, "On({channel:?}, {id})")
            }
            Self::Off { target, id } => write!(f, "Off({target:?}, {id})"),
            Self::ClearQueue => f.write_str("ClearQueue"),
        }
    }
}

/// Manages one logical real-time session: connection lifecycle, reconnection,
/// heartbeat, channel multiplexing and the offline queue.
///
/// The manager is a cheap, cloneable handle to a background task that owns all
/// mutable state. Every method returns immediately; outcomes are reported through
/// events registered with [`ConnectionManager::on`].
///
/// # Example
///
/// ```rust, no_run
/// use resilient_ws::ws::{ConnectionManager, EventKind, config::Config};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let manager = ConnectionManager::new(Config::default())?;
///
///     manager.on(EventKind::Open, |_| println!("connected"));
///     manager.on_channel("chat", |data| println!("chat: {data}"));
///
///     manager.connect("wss://chat.example.com/ws");
///     manager.subscribe("chat");
///     manager.publish("chat", serde_json::json!({"text": "hello"}));
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    /// Sender channel for commands processed by the connection task
    commands: mpsc::UnboundedSender<Command>,
    /// Watch channel receiver for state changes
    state_rx: watch::Receiver<ConnectionState>,
    /// Latest counters published by the connection task
    stats_rx: watch::Receiver<ConnectionStats>,
    clock: Arc<dyn Clock>,
    next_listener: Arc<AtomicU64>,
}

impl ConnectionManager {
    /// Create a manager using `tokio-tungstenite` and the tokio clock.
    ///
    /// Must be called from within a tokio runtime. No connection is made until
    /// [`ConnectionManager::connect`].
    pub fn new(config: Config) -> Result<Self> {
        Self::with_connector(config, TungsteniteConnector, SystemClock)
    }

    /// Create a manager with a custom transport and time source.
    pub fn with_connector<C, K>(config: Config, connector: C, clock: K) -> Result<Self>
    where
        C: Connector,
        K: Clock,
    {
        config.validate()?;

        let clock: Arc<dyn Clock> = Arc::new(clock);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (stats_tx, stats_rx) = watch::channel(ConnectionStats::default());
        let (failures_tx, failures) = mpsc::unbounded_channel();

        let actor = Actor {
            queue: MessageQueue::new(&config.queue),
            heartbeat: Heartbeat::new(config.ping_interval, config.pong_timeout),
            config,
            connector: Arc::new(connector),
            clock: Arc::clone(&clock),
            commands: commands_rx,
            state_tx,
            stats_tx,
            state: ConnectionState::Disconnected,
            request: None,
            attempt: 0,
            reconnect_at: None,
            pending: None,
            stream: None,
            writer: None,
            generation: 0,
            failures_tx,
            failures,
            channels: ChannelRegistry::new(),
            emitter: EventEmitter::new(),
            counters: Counters::default(),
            client_id: None,
        };

        tokio::spawn(actor.run());

        Ok(Self {
            commands,
            state_rx,
            stats_rx,
            clock,
            next_listener: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Open the connection. Ignored while already connecting or open.
    ///
    /// Accepts a URL (`&str`, `String`, [`Url`]) or a full [`ConnectRequest`].
    /// An explicit call starts a fresh reconnection budget, which also resumes a
    /// manager that gave up.
    pub fn connect<R: Into<ConnectRequest>>(&self, request: R) {
        self.command(Command::Connect(request.into()));
    }

    /// Close the connection and stop reconnecting until the next [`ConnectionManager::connect`].
    ///
    /// Cancels any pending reconnect and the heartbeat. Queued messages are kept.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Send user data: text, JSON or bytes.
    ///
    /// Returns `true` if the connection was open and the data was handed to it, `false`
    /// if it was queued for replay on the next open.
    ///
    /// The result is a snapshot of [`ConnectionManager::is_connected`] taken before the
    /// connection task sees the message. A close that is already in flight (a manual
    /// `disconnect`, a server close or a transport error not yet processed) can turn a
    /// `true` into a queued message. The data is not lost either way: it is replayed on
    /// the next open unless the queue evicts it.
    pub fn send<P: Into<Payload>>(&self, data: P) -> bool {
        let open = self.is_connected();
        self.command(Command::Send(data.into())) && open
    }

    /// Send `data` on `channel` as `{"type":"message","channel":..,"data":..}`.
    ///
    /// Same delivery rules as [`ConnectionManager::send`].
    pub fn publish<S: AsRef<str>>(&self, channel: S, data: Value) -> bool {
        match Payload::channel_message(channel.as_ref(), &data) {
            Ok(payload) => self.send(payload),
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::error!(%error, channel = channel.as_ref(), "Unable to encode channel message");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
                false
            }
        }
    }

    /// Ask the server to route `channel` to this client. Repeated calls are no-ops.
    pub fn subscribe<S: Into<String>>(&self, channel: S) {
        self.command(Command::Subscribe(channel.into()));
    }

    /// Withdraw interest in `channel`. No-op if not subscribed.
    pub fn unsubscribe<S: Into<String>>(&self, channel: S) {
        self.command(Command::Unsubscribe(channel.into()));
    }

    /// Register a handler for a lifecycle or data event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        self.command(Command::On(Registration::Event {
            kind,
            id,
            handler: Arc::new(handler),
        }));
        self.listener(id, ListenerTarget::Event(kind))
    }

    /// Register a handler for data arriving on `channel`.
    ///
    /// Independent of [`ConnectionManager::subscribe`]: handlers may be attached before
    /// or after upstream interest is declared.
    pub fn on_channel<S, F>(&self, channel: S, handler: F) -> Listener
    where
        S: Into<String>,
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = self.next_listener_id();
        self.command(Command::On(Registration::Channel {
            channel: channel.clone(),
            id,
            handler: Arc::new(handler),
        }));
        self.listener(id, ListenerTarget::Channel(channel))
    }

    /// Unregister a handler.
    pub fn off(&self, listener: &Listener) {
        self.command(Command::Off {
            target: listener.target.clone(),
            id: listener.id,
        });
    }

    /// Drop every queued outbound message.
    pub fn clear_queue(&self) {
        self.command(Command::ClearQueue);
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Current counters, with uptime measured up to now.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        let mut stats = self.stats_rx.borrow().clone();
        stats.current_uptime = stats
            .connection_started_at
            .map_or(Duration::ZERO, |since| {
                self.clock.now().saturating_duration_since(since)
            });
        stats
    }

    /// Subscribe to counter updates; a new value is published after every processed input.
    #[must_use]
    pub fn stats_receiver(&self) -> watch::Receiver<ConnectionStats> {
        self.stats_rx.clone()
    }

    fn command(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    fn listener(&self, id: ListenerId, target: ListenerTarget) -> Listener {
        Listener {
            id,
            target,
            commands: self.commands.downgrade(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    messages_sent: u64,
    messages_received: u64,
    reconnections: u64,
    errors: u64,
    total_uptime: Duration,
    started_at: Option<Instant>,
}

/// Everything the connection task reacts to.
enum Input {
    Command(Command),
    Opened(Result<Transport>),
    Frame(Option<Result<Frame>>),
    WriteFailed(WriteFailure),
    HeartbeatDue,
    ReconnectDue,
    /// Every handle was dropped
    Shutdown,
}

/// Single owner of the connection state. Runs on its own task; commands, transport
/// frames and timer deadlines are handled one at a time and never await I/O.
struct Actor {
    config: Config,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    stats_tx: watch::Sender<ConnectionStats>,
    state: ConnectionState,
    request: Option<ConnectRequest>,
    /// Attempt number of the current reconnection sequence; 0 while open
    attempt: u32,
    reconnect_at: Option<Instant>,
    /// Opening handshake in flight
    pending: Option<BoxFuture<'static, Result<Transport>>>,
    /// Read half of the open transport
    stream: Option<FrameStream>,
    /// Write half of the open transport, on its own task
    writer: Option<Writer>,
    /// Incremented for every opened transport
    generation: u64,
    failures_tx: mpsc::UnboundedSender<WriteFailure>,
    failures: mpsc::UnboundedReceiver<WriteFailure>,
    heartbeat: Heartbeat,
    queue: MessageQueue,
    channels: ChannelRegistry,
    emitter: EventEmitter,
    counters: Counters,
    client_id: Option<String>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let input = self.next_input().await;
            if matches!(input, Input::Shutdown) {
                break;
            }
            self.handle(input);
            self.publish_stats();
        }

        self.pending = None;
        self.reconnect_at = None;
        self.close_transport(CloseReason::new(NORMAL_CLOSE_CODE, "client shutdown"), true);

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection task stopped: all handles dropped");
    }

    async fn next_input(&mut self) -> Input {
        let heartbeat = sleep_until(self.clock.as_ref(), self.heartbeat.deadline());
        let reconnect = sleep_until(self.clock.as_ref(), self.reconnect_at);

        tokio::select! {
            biased;

            command = self.commands.recv() => command.map_or(Input::Shutdown, Input::Command),
            Some(failure) = self.failures.recv() => Input::WriteFailed(failure),
            result = poll_pending(self.pending.as_mut()) => Input::Opened(result),
            frame = next_frame(self.stream.as_mut()) => Input::Frame(frame),
            () = heartbeat => Input::HeartbeatDue,
            () = reconnect => Input::ReconnectDue,
        }
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.handle_command(command),
            Input::Opened(Ok(transport)) => self.on_open(transport),
            Input::Opened(Err(error)) => {
                self.pending = None;
                self.record_error(error);
                self.on_close(None, false);
            }
            Input::Frame(Some(Ok(frame))) => self.on_frame(frame),
            Input::Frame(Some(Err(error))) => self.fail_transport(error),
            Input::Frame(None) => {
                self.release_transport();
                self.on_close(None, false);
            }
            Input::WriteFailed(failure) => self.on_write_failed(failure),
            Input::HeartbeatDue => self.on_heartbeat(),
            Input::ReconnectDue => {
                self.reconnect_at = None;
                self.start_connect();
            }
            Input::Shutdown => {}
        }
    }

    fn handle_command(&mut self, command: Command) {
        #[cfg(feature = "tracing")]
        tracing::trace!(?command, "Handling command");

        match command {
            Command::Connect(request) => {
                if matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::Open { .. }
                ) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(state = %self.state, "Connect ignored: already connecting or open");
                    return;
                }
                self.request = Some(request);
                self.attempt = 0;
                self.reconnect_at = None;
                self.start_connect();
            }
            Command::Disconnect => self.disconnect(),
            Command::Send(payload) => self.send(payload),
            Command::Subscribe(channel) => {
                if self.channels.subscribe(&channel) {
                    self.send_control(&ClientFrame::Subscribe { channel: &channel });
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%channel, "Already subscribed");
                }
            }
            Command::Unsubscribe(channel) => {
                if self.channels.unsubscribe(&channel) {
                    self.send_control(&ClientFrame::Unsubscribe { channel: &channel });
                }
            }
            Command::On(Registration::Event { kind, id, handler }) => {
                self.emitter.on(kind, id, handler);
            }
            Command::On(Registration::Channel {
                channel,
                id,
                handler,
            }) => self.channels.on(&channel, id, handler),
            Command::Off {
                target: ListenerTarget::Event(kind),
                id,
            } => {
                self.emitter.off(kind, id);
            }
            Command::Off {
                target: ListenerTarget::Channel(channel),
                id,
            } => {
                self.channels.off(&channel, id);
            }
            Command::ClearQueue => {
                let cleared = self.queue.clear();
                #[cfg(feature = "tracing")]
                tracing::info!(cleared, "Cleared queued messages");
                #[cfg(not(feature = "tracing"))]
                let _ = cleared;
            }
        }
    }

    /// Begin an opening handshake with the stored request.
    fn start_connect(&mut self) {
        let Some(request) = self.request.clone() else {
            return;
        };

        self.set_state(ConnectionState::Connecting);

        match request.resolve() {
            Ok(url) => {
                #[cfg(feature = "tracing")]
                tracing::info!(%url, attempt = self.attempt, "Connecting");

                let connector = Arc::clone(&self.connector);
                let protocols = request.protocols;
                self.pending = Some(Box::pin(async move {
                    connector.connect(&url, &protocols).await
                }));
            }
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(url = %request.url, %error, "Unable to build transport");

                self.record_error(Error::with_source(
                    Kind::WebSocket,
                    WsError::OpenFailed(Box::new(error)),
                ));
                self.on_close(None, false);
            }
        }
    }

    fn on_open(&mut self, transport: Transport) {
        self.pending = None;
        self.generation += 1;
        let Transport { sink, stream } = transport;
        self.stream = Some(stream);
        self.writer = Some(Writer::spawn(
            sink,
            self.generation,
            self.failures_tx.clone(),
        ));

        let now = self.clock.now();
        let attempts = std::mem::take(&mut self.attempt);
        self.counters.started_at = Some(now);
        self.set_state(ConnectionState::Open { since: now });

        #[cfg(feature = "tracing")]
        tracing::info!(attempts, generation = self.generation, "Connected");

        if attempts > 0 {
            self.counters.reconnections += 1;
            self.emit(&Event::Reconnected { attempts });
        }

        self.heartbeat.start(now);
        self.announce_subscriptions();
        self.flush_queue();

        if self.state.is_open() {
            self.emit(&Event::Open);
        }
    }

    /// Bookkeeping for a transport that is gone. The transport must already be released.
    fn on_close(&mut self, reason: Option<CloseReason>, manual: bool) {
        self.heartbeat.stop();
        self.end_uptime();
        self.set_state(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        tracing::info!(?reason, manual, "Disconnected");

        self.emit(&Event::Close(CloseInfo { reason, manual }));

        if !manual {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.reconnect_at = None;
        let max_attempts = self.config.reconnect.max_attempts;

        if self.attempt >= max_attempts {
            #[cfg(feature = "tracing")]
            tracing::warn!(attempts = self.attempt, "Not reconnecting");

            self.record_error(
                WsError::ReconnectExhausted {
                    attempts: self.attempt,
                }
                .into(),
            );
            self.emit(&Event::Reconnecting(ReconnectInfo {
                attempt: self.attempt,
                max_attempts,
                delay: None,
                gave_up: true,
            }));
            return;
        }

        self.attempt += 1;
        let delay = self.config.reconnect.delay_for_attempt(self.attempt);
        self.reconnect_at = Some(self.clock.now() + delay);

        #[cfg(feature = "tracing")]
        tracing::info!(attempt = self.attempt, max_attempts, ?delay, "Reconnecting");

        self.emit(&Event::Reconnecting(ReconnectInfo {
            attempt: self.attempt,
            max_attempts,
            delay: Some(delay),
            gave_up: false,
        }));
    }

    fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.pending = None;
        self.heartbeat.stop();

        if self.writer.is_some() {
            self.close_transport(CloseReason::new(NORMAL_CLOSE_CODE, "client disconnect"), true);
        } else {
            self.set_state(ConnectionState::Disconnected);
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Manually disconnected");
    }

    /// Hand a close frame to the writer, release the transport and run close bookkeeping.
    ///
    /// The close handshake finishes on the writer task, bounded by [`CLOSE_GRACE`].
    fn close_transport(&mut self, reason: CloseReason, manual: bool) {
        self.stream = None;
        let Some(writer) = self.writer.take() else {
            return;
        };

        self.set_state(ConnectionState::Closing);
        writer.close(Some(reason.clone()), self.clock.as_ref(), CLOSE_GRACE);

        self.on_close(Some(reason), manual);
    }

    /// Drop the read half and let the writer flush and close the sink.
    fn release_transport(&mut self) {
        self.stream = None;
        if let Some(writer) = self.writer.take() {
            writer.close(None, self.clock.as_ref(), CLOSE_GRACE);
        }
    }

    /// Transport reported an error: record it and treat the transport as closed.
    fn fail_transport(&mut self, error: Error) {
        self.stream = None;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.record_error(error);
        self.on_close(None, false);
    }

    /// The writer task could not write. The transport is failed unless it was already
    /// replaced; unsent user data is sent again, which queues it while disconnected.
    fn on_write_failed(&mut self, failure: WriteFailure) {
        let WriteFailure {
            generation,
            error,
            unsent,
        } = failure;

        let current = self
            .writer
            .as_ref()
            .is_some_and(|writer| writer.generation() == generation);
        if current {
            self.fail_transport(error);
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(%error, generation, "Write failure on a released transport");
            #[cfg(not(feature = "tracing"))]
            let _ = &error;
        }

        let unsent_count = u64::try_from(unsent.len()).unwrap_or(u64::MAX);
        self.counters.messages_sent = self.counters.messages_sent.saturating_sub(unsent_count);
        for payload in unsent {
            self.send(payload);
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Text(text) => self.on_text(text),
            Frame::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => self.on_text(text),
                Err(error) => {
                    self.counters.messages_received += 1;
                    self.emit(&Event::Message(InboundMessage::Binary(error.into_bytes())));
                }
            },
            Frame::Close(reason) => {
                self.release_transport();
                self.on_close(reason, false);
            }
        }
    }

    fn on_text(&mut self, text: String) {
        self.counters.messages_received += 1;

        match decode(&text) {
            Decoded::Pong => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Received PONG");
                self.heartbeat.record_pong(self.clock.now());
            }
            Decoded::System(notice) => {
                #[cfg(feature = "tracing")]
                if let Some(message) = &notice.message {
                    tracing::info!(%message, "System notice");
                }
                if let Some(client_id) = notice.client_id {
                    #[cfg(feature = "tracing")]
                    tracing::info!(%client_id, "Client id assigned");
                    self.client_id = Some(client_id);
                }
            }
            Decoded::Channel {
                channel,
                data,
                frame,
            } => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%channel, "Channel message");
                self.channels.dispatch(&channel, &data);
                self.emit(&Event::Message(InboundMessage::Json(frame)));
            }
            Decoded::Other(value) => self.emit(&Event::Message(InboundMessage::Json(value))),
            Decoded::Undecodable(error) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %WsError::MessageParse(error), "Forwarding raw frame");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
                self.emit(&Event::Message(InboundMessage::Raw(text)));
            }
        }
    }

    fn on_heartbeat(&mut self) {
        match self.heartbeat.on_tick(self.clock.now()) {
            HeartbeatAction::Ping => {
                self.send_control(&ClientFrame::Ping);
            }
            HeartbeatAction::TimedOut { silence } => {
                #[cfg(feature = "tracing")]
                tracing::warn!(?silence, "Heartbeat timeout, forcing reconnect");

                self.record_error(WsError::HeartbeatTimeout { silence }.into());
                self.close_transport(
                    CloseReason::new(HEARTBEAT_CLOSE_CODE, "heartbeat timeout"),
                    false,
                );
            }
        }
    }

    fn send(&mut self, payload: Payload) {
        if self.state.is_open() {
            self.transmit(payload);
        } else {
            self.enqueue(payload);
        }
    }

    /// Hand a user payload to the writer. Counted as sent once handed over; the writer
    /// gives back what it could not write.
    fn transmit(&mut self, payload: Payload) {
        let Some(writer) = self.writer.as_ref() else {
            self.enqueue(payload);
            return;
        };

        match writer.user(payload) {
            Ok(()) => {
                self.counters.messages_sent += 1;
                #[cfg(feature = "tracing")]
                tracing::trace!(sent = self.counters.messages_sent, "Sent message");
            }
            Err(payload) => {
                self.fail_transport(WsError::ConnectionClosed.into());
                self.enqueue(payload);
            }
        }
    }

    fn enqueue(&mut self, payload: Payload) {
        let evicted = self.queue.enqueue(payload, self.clock.now());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            queued = self.queue.len(),
            capacity = self.queue.capacity(),
            dropped = evicted.is_some(),
            "Message queued"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = evicted;
    }

    /// Replay queued messages in FIFO order. Anything the writer fails to write comes
    /// back through `on_write_failed`.
    fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let queued = self.queue.drain();
        #[cfg(feature = "tracing")]
        tracing::info!(count = queued.len(), "Flushing queued messages");

        for message in queued {
            self.send(message.payload);
        }
    }

    fn announce_subscriptions(&mut self) {
        let channels: Vec<String> = self.channels.channels().map(str::to_owned).collect();
        for channel in &channels {
            self.send_control(&ClientFrame::Subscribe { channel });
        }
    }

    /// Hand a protocol frame to the writer. Only while open; protocol frames are never queued.
    fn send_control(&mut self, frame: &ClientFrame<'_>) {
        if !self.state.is_open() {
            return;
        }
        let Some(writer) = self.writer.as_ref() else {
            return;
        };

        let text = match frame.to_json() {
            Ok(text) => text,
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::error!(%error, ?frame, "Unable to encode protocol frame");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
                return;
            }
        };

        if !writer.control(Frame::Text(text)) {
            self.fail_transport(WsError::ConnectionClosed.into());
        }
    }

    fn record_error(&mut self, error: Error) {
        self.counters.errors += 1;

        #[cfg(feature = "tracing")]
        tracing::warn!(%error, "Connection error");

        self.emit(&Event::Error(Arc::new(error)));
    }

    fn end_uptime(&mut self) {
        if let Some(started) = self.counters.started_at.take() {
            self.counters.total_uptime += self.clock.now().saturating_duration_since(started);
        }
    }

    fn emit(&self, event: &Event) {
        self.emitter.emit(event);
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn publish_stats(&self) {
        let now = self.clock.now();
        self.stats_tx.send_replace(ConnectionStats {
            messages_sent: self.counters.messages_sent,
            messages_received: self.counters.messages_received,
            reconnections: self.counters.reconnections,
            errors: self.counters.errors,
            total_uptime: self.counters.total_uptime,
            connection_started_at: self.counters.started_at,
            current_uptime: self
                .counters
                .started_at
                .map_or(Duration::ZERO, |since| now.saturating_duration_since(since)),
            state: self.state,
            reconnect_attempts: self.attempt,
            queued_messages: self.queue.len(),
            client_id: self.client_id.clone(),
            user_id: self.request.as_ref().and_then(|r| r.user_id.clone()),
            subscriptions: self.channels.channels().map(str::to_owned).collect(),
            last_pong_at: self.heartbeat.last_pong(),
        });
    }
}

fn sleep_until(clock: &dyn Clock, deadline: Option<Instant>) -> BoxFuture<'static, ()> {
    match deadline {
        Some(deadline) => clock.sleep_until(deadline),
        None => Box::pin(pending()),
    }
}

async fn poll_pending(
    pending_open: Option<&mut BoxFuture<'static, Result<Transport>>>,
) -> Result<Transport> {
    match pending_open {
        Some(open) => open.await,
        None => pending().await,
    }
}

async fn next_frame(stream: Option<&mut FrameStream>) -> Option<Result<Frame>> {
    match stream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}
