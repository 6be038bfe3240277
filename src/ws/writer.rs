//! Write half of an open transport, driven on its own task.
//!
//! The connection task never awaits the sink: frames are handed over an unbounded
//! channel and a failed write comes back as a [`WriteFailure`]. A sink that stops
//! accepting data therefore stalls only this task.

use std::time::Duration;

use futures::SinkExt as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::traits::{CloseReason, Frame, FrameSink};
use super::types::request::Payload;
use crate::clock::Clock;
use crate::error::Error;

enum Op {
    /// Protocol frame; dropped if the transport fails
    Control(Frame),
    /// User data; handed back on failure so it can be queued again
    User(Payload),
    /// Send the close frame (if any), then close the sink
    Close(Option<CloseReason>),
}

/// A write that did not make it to the wire.
#[derive(Debug)]
pub(crate) struct WriteFailure {
    /// Transport the writer belonged to
    pub generation: u64,
    pub error: Error,
    /// User payloads accepted by the writer but never written, oldest first
    pub unsent: Vec<Payload>,
}

/// Handle to the writer task of one transport.
pub(crate) struct Writer {
    generation: u64,
    ops: mpsc::UnboundedSender<Op>,
    task: JoinHandle<()>,
}

impl Writer {
    pub(crate) fn spawn(
        sink: FrameSink,
        generation: u64,
        failures: mpsc::UnboundedSender<WriteFailure>,
    ) -> Self {
        let (ops, ops_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(sink, ops_rx, generation, failures));

        Self {
            generation,
            ops,
            task,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a protocol frame. Returns `false` if the writer task has stopped.
    pub(crate) fn control(&self, frame: Frame) -> bool {
        self.ops.send(Op::Control(frame)).is_ok()
    }

    /// Queue user data. Gives the payload back if the writer task has stopped.
    pub(crate) fn user(&self, payload: Payload) -> Result<(), Payload> {
        match self.ops.send(Op::User(payload)) {
            Err(mpsc::error::SendError(Op::User(payload))) => Err(payload),
            _ => Ok(()),
        }
    }

    /// Finish pending writes, send `reason` as a close frame and close the sink.
    ///
    /// The task is aborted once `grace` elapses on `clock`, written or not.
    pub(crate) fn close(self, reason: Option<CloseReason>, clock: &dyn Clock, grace: Duration) {
        let Self { ops, mut task, .. } = self;
        _ = ops.send(Op::Close(reason));

        let deadline = clock.sleep_until(clock.now() + grace);
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut task => {}
                () = deadline => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Close handshake timed out");
                    task.abort();
                }
            }
        });
    }

    /// Stop writing immediately. Pending frames are discarded.
    pub(crate) fn abort(self) {
        self.task.abort();
    }
}

async fn write_loop(
    mut sink: FrameSink,
    mut ops: mpsc::UnboundedReceiver<Op>,
    generation: u64,
    failures: mpsc::UnboundedSender<WriteFailure>,
) {
    while let Some(op) = ops.recv().await {
        let (frame, payload) = match op {
            Op::Control(frame) => (frame, None),
            Op::User(payload) => (payload.to_frame(), Some(payload)),
            Op::Close(reason) => {
                let result = async {
                    if let Some(reason) = reason {
                        sink.send(Frame::Close(Some(reason))).await?;
                    }
                    sink.close().await
                }
                .await;

                if let Err(error) = result {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%error, "Close handshake failed");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &error;
                }
                return;
            }
        };

        let result = sink.send(frame).await;
        if let Err(error) = result {
            ops.close();
            let mut unsent: Vec<Payload> = payload.into_iter().collect();
            while let Ok(op) = ops.try_recv() {
                if let Op::User(payload) = op {
                    unsent.push(payload);
                }
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(%error, generation, unsent = unsent.len(), "Write failed");

            _ = failures.send(WriteFailure {
                generation,
                error,
                unsent,
            });
            return;
        }
    }
}
