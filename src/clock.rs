//! Time sources for reconnection and heartbeat scheduling.
//!
//! The connection actor never calls `tokio::time` directly. It asks a [`Clock`]
//! for the current instant and for a future that resolves at a deadline, so the
//! same state machine can run on wall-clock time ([`SystemClock`]) or on virtual
//! time that a test advances by hand ([`ManualClock`]).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Source of "now" and of deadline-based sleeps.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// Current instant on this clock's timeline.
    fn now(&self) -> Instant;

    /// Future that completes once [`Clock::now`] reaches `deadline`.
    ///
    /// Dropping the future cancels the wait.
    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()>;
}

/// Clock backed by the tokio timer.
///
/// Honours `tokio::time::pause`, so it is also usable under paused tests.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep_until(deadline))
    }
}

/// Virtual clock that only moves when [`ManualClock::advance`] is called.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualInner>>,
}

struct ManualInner {
    now: Instant,
    waiters: Vec<(Instant, oneshot::Sender<()>)>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualInner {
                now: Instant::now(),
                waiters: Vec::new(),
            })),
        }
    }

    /// Move time forward, waking every sleeper whose deadline has passed.
    pub fn advance(&self, by: Duration) {
        // Waiter list has no intermediate state worth protecting, so a poisoned lock is recovered.
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.now += by;
        let now = inner.now;

        let (due, pending): (Vec<_>, Vec<_>) = inner
            .waiters
            .drain(..)
            .partition(|(deadline, _)| *deadline <= now);
        inner.waiters = pending;
        drop(inner);

        for (_, waker) in due {
            _ = waker.send(());
        }
    }

    /// Number of sleeps currently waiting on this clock.
    #[must_use]
    pub fn pending_sleeps(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .waiters
            .iter()
            .filter(|(_, waker)| !waker.is_closed())
            .count()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ManualClock")
            .field("now", &inner.now)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .now
    }

    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if deadline <= inner.now {
            return Box::pin(futures::future::ready(()));
        }

        // Sleeps abandoned by a `select!` leave closed senders behind.
        inner.waiters.retain(|(_, waker)| !waker.is_closed());

        let (tx, rx) = oneshot::channel();
        inner.waiters.push((deadline, tx));
        drop(inner);

        Box::pin(async move {
            if rx.await.is_err() {
                // The clock was dropped; nothing can ever wake this sleep.
                std::future::pending::<()>().await;
            }
        })
    }
}
