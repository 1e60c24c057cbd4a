//! Reconnect timer
//!
//! A [`Sleeper`] turns a reconnect delay into a future; swapping it makes reconnect tests fast
//! and deterministic. [`RetryTimer`] is the single pending reconnect of a socket: the event pump
//! owns it and awaits [`RetryTimer::expired`], while [`close`](crate::Websocket::close) disarms
//! it from any thread through a [`RetryCanceller`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Boxed sleep future returned by a [`Sleeper`].
pub type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Produces the future a reconnect waits on.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> SleepFuture;
}

/// Waits on the tokio clock. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Reconnects immediately whatever the backoff says.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> SleepFuture {
        Box::pin(async {})
    }
}

/// Reconnects immediately and records each delay it was asked for, in order.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every reconnect delay requested so far.
    pub fn calls(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Time a real timer would have spent waiting.
    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture {
        self.delays.lock().unwrap_or_else(|e| e.into_inner()).push(duration);
        Box::pin(async {})
    }
}

/// Cross-thread handle that disarms a [`RetryTimer`].
#[derive(Debug, Clone)]
pub struct RetryCanceller {
    signal: Arc<Notify>,
}

impl RetryCanceller {
    /// Drop the pending reconnect, if any. A cancel issued while nothing is armed is consumed
    /// the next time the timer is awaited.
    pub fn cancel(&self) {
        self.signal.notify_one();
    }
}

/// At most one pending reconnect, carrying the payload to act on when it fires.
pub struct RetryTimer<T> {
    pending: Option<(SleepFuture, T)>,
    signal: Arc<Notify>,
}

impl<T> RetryTimer<T> {
    pub fn new() -> (Self, RetryCanceller) {
        let signal = Arc::new(Notify::new());
        let canceller = RetryCanceller { signal: Arc::clone(&signal) };
        (Self { pending: None, signal }, canceller)
    }

    /// Arm with `sleep`, replacing whatever was pending.
    pub fn arm(&mut self, sleep: SleepFuture, payload: T) {
        self.pending = Some((sleep, payload));
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolve with the payload once the armed sleep completes. Never resolves while disarmed;
    /// a cancel disarms and keeps waiting. Dropping the future keeps the timer armed.
    pub async fn expired(&mut self) -> T {
        loop {
            let fired = match self.pending.as_mut() {
                None => {
                    self.signal.notified().await;
                    false
                }
                Some((sleep, _)) => tokio::select! {
                    biased;
                    _ = self.signal.notified() => false,
                    _ = sleep.as_mut() => true,
                },
            };

            if fired {
                if let Some((_, payload)) = self.pending.take() {
                    return payload;
                }
            } else if self.pending.take().is_some() {
                trace!("pending reconnect cancelled");
            }
        }
    }
}

impl<T> std::fmt::Debug for RetryTimer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryTimer").field("armed", &self.is_armed()).finish()
    }
}
