#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the helpers"
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as chan;
use futures::{FutureExt as _, SinkExt as _, StreamExt as _};
use resilient_ws::Result;
use resilient_ws::clock::ManualClock;
use resilient_ws::error::{Error, Kind};
use resilient_ws::ws::config::Config;
use resilient_ws::ws::{
    CloseReason, ConnectionManager, ConnectionStats, Connector, Event, EventKind, Frame,
    FrameSink, Transport, WsError,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

/// How long a test waits for the connection task before failing.
pub const WAIT: Duration = Duration::from_secs(2);

pub const ALL_EVENTS: [EventKind; 6] = [
    EventKind::Open,
    EventKind::Close,
    EventKind::Error,
    EventKind::Message,
    EventKind::Reconnecting,
    EventKind::Reconnected,
];

/// Scripted result of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse,
    /// Accept, but the write half never has room for more than one frame and is never read
    Stall,
}

/// Server side of an accepted in-memory transport.
pub struct Peer {
    pub url: Url,
    pub protocols: Vec<String>,
    /// Frames written by the client
    sent: chan::UnboundedReceiver<Frame>,
    /// Frames delivered to the client
    inbound: chan::UnboundedSender<Result<Frame>>,
    /// Kept open and never read, for [`Outcome::Stall`]
    stalled: Option<chan::Receiver<Frame>>,
}

impl Peer {
    /// Next frame the client wrote.
    pub async fn recv(&mut self) -> Frame {
        timeout(WAIT, self.sent.next())
            .await
            .expect("client did not write a frame in time")
            .expect("client transport dropped")
    }

    /// Next text frame, parsed as JSON.
    pub async fn recv_json(&mut self) -> Value {
        match self.recv().await {
            Frame::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    pub async fn recv_text(&mut self) -> String {
        match self.recv().await {
            Frame::Text(text) => text,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    pub fn send_text(&self, text: &str) {
        self.inbound
            .unbounded_send(Ok(Frame::text(text)))
            .unwrap();
    }

    pub fn send_binary(&self, bytes: &[u8]) {
        self.inbound
            .unbounded_send(Ok(Frame::Binary(bytes.to_vec())))
            .unwrap();
    }

    pub fn send_json(&self, value: &Value) {
        self.send_text(&value.to_string());
    }

    pub fn pong(&self) {
        self.send_text(r#"{"type":"pong"}"#);
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.inbound
            .unbounded_send(Ok(Frame::Close(Some(CloseReason::new(code, reason)))))
            .unwrap();
    }

    /// Surface a transport failure to the client.
    pub fn fail(&self) {
        self.inbound
            .unbounded_send(Err(Error::with_source(
                Kind::WebSocket,
                WsError::ConnectionClosed,
            )))
            .unwrap();
    }

    /// Make every further client write fail. Frames already written stay readable.
    pub fn refuse_writes(&mut self) {
        self.sent.close();
    }

    /// Wait for the client to close its write half.
    pub async fn closed(&mut self) {
        loop {
            let frame = timeout(WAIT, self.sent.next())
                .await
                .expect("client did not close its write half in time");
            if frame.is_none() {
                return;
            }
        }
    }

    /// Frames the client wrote that have not been read yet.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(Some(frame)) = self.sent.next().now_or_never() {
            frames.push(frame);
        }
        frames
    }
}

/// In-memory [`Connector`] whose attempts follow a script; accepts once the script runs out.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    attempts: Arc<AtomicUsize>,
    peers: Arc<Mutex<Option<mpsc::UnboundedSender<Peer>>>>,
}

impl MockConnector {
    pub fn script<I: IntoIterator<Item = Outcome>>(&self, outcomes: I) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn refuse_always(&self) {
        self.script(std::iter::repeat_n(Outcome::Refuse, 64));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn peers(&self) -> mpsc::UnboundedReceiver<Peer> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.peers.lock().unwrap() = Some(tx);
        rx
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url, protocols: &[String]) -> Result<Transport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Accept);

        if outcome == Outcome::Refuse {
            return Err(Error::with_source(
                Kind::WebSocket,
                WsError::OpenFailed("connection refused".into()),
            ));
        }

        let (client_tx, sent) = chan::unbounded::<Frame>();
        let (inbound, client_rx) = chan::unbounded::<Result<Frame>>();

        let mut stalled = None;
        let sink: FrameSink = if outcome == Outcome::Stall {
            let (stalled_tx, stalled_rx) = chan::channel::<Frame>(0);
            stalled = Some(stalled_rx);
            Box::pin(stalled_tx.sink_map_err(|e| Error::with_source(Kind::WebSocket, e)))
        } else {
            Box::pin(client_tx.sink_map_err(|e| Error::with_source(Kind::WebSocket, e)))
        };

        let peer = Peer {
            url: url.clone(),
            protocols: protocols.to_vec(),
            sent,
            inbound,
            stalled,
        };
        if let Some(peers) = self.peers.lock().unwrap().as_ref() {
            peers.send(peer).unwrap();
        }

        Ok(Transport::new(sink, Box::pin(client_rx)))
    }
}

/// A manager wired to a [`MockConnector`] and a [`ManualClock`], with every event recorded.
pub struct Harness {
    pub manager: ConnectionManager,
    pub clock: ManualClock,
    pub connector: MockConnector,
    peers: mpsc::UnboundedReceiver<Peer>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let clock = ManualClock::new();
        let connector = MockConnector::default();
        let peers = connector.peers();
        let manager =
            ConnectionManager::with_connector(config, connector.clone(), clock.clone()).unwrap();

        let (tx, events) = mpsc::unbounded_channel();
        for kind in ALL_EVENTS {
            let tx = tx.clone();
            manager.on(kind, move |event| {
                _ = tx.send(event.clone());
            });
        }

        Self {
            manager,
            clock,
            connector,
            peers,
            events,
        }
    }

    pub async fn next_peer(&mut self) -> Peer {
        timeout(WAIT, self.peers.recv())
            .await
            .expect("no connection attempt was accepted in time")
            .unwrap()
    }

    pub async fn next_event(&mut self) -> Event {
        timeout(WAIT, self.events.recv())
            .await
            .expect("no event in time")
            .unwrap()
    }

    /// Skip events until one of `kind` arrives.
    pub async fn expect_event(&mut self, kind: EventKind) -> Event {
        loop {
            let event = self.next_event().await;
            if event.kind() == kind {
                return event;
            }
        }
    }

    /// Events already emitted and not yet read.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Connect and wait for the transport to open.
    pub async fn open(&mut self, url: &str) -> Peer {
        self.manager.connect(url);
        let peer = self.next_peer().await;
        self.expect_event(EventKind::Open).await;
        self.wait_stats(ConnectionStats::is_connected).await;
        peer
    }

    /// Wait until published stats satisfy `predicate`.
    pub async fn wait_stats<F>(&self, predicate: F) -> ConnectionStats
    where
        F: FnMut(&ConnectionStats) -> bool,
    {
        let mut stats = self.manager.stats_receiver();
        let snapshot = timeout(WAIT, stats.wait_for(predicate))
            .await
            .expect("stats did not reach the expected value in time")
            .unwrap()
            .clone();
        snapshot
    }

    /// Wait until every command sent so far has been processed.
    ///
    /// Round-trips a marker subscription, so only use it while the connection is not open.
    pub async fn barrier(&self) {
        const MARKER: &str = "__barrier__";
        self.manager.subscribe(MARKER);
        self.wait_stats(|s| s.subscriptions.iter().any(|c| c == MARKER))
            .await;
        self.manager.unsubscribe(MARKER);
        self.wait_stats(|s| s.subscriptions.iter().all(|c| c != MARKER))
            .await;
    }
}
