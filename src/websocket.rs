//! The reconnecting socket handle.
//!
//! [`Websocket`] owns at most one live transport connection at a time. When that connection
//! closes without the user asking for it, the configured backoff decides how long to wait and
//! a fresh connection is opened. Messages sent in the meantime go to the outbound buffer and are
//! flushed, oldest first, once the socket is open again.
//!
//! Transport notifications and retry timers are handled by a single tokio task per socket (the
//! event pump), one at a time and to completion. `send`, `close` and the listener methods are
//! plain synchronous calls. Listeners run with no lock held, so a listener may call back into
//! the handle it is given.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use resocket::{Backoff, OpenEvent, RingBuffer, WebsocketBuilder};
//! use resocket::transport::tungstenite::TungsteniteTransport;
//!
//! # async fn run() -> Result<(), resocket::ConfigError> {
//! let socket = WebsocketBuilder::new("ws://127.0.0.1:9001/feed")
//!     .backoff(Backoff::exponential(Duration::from_millis(100)).with_max_exponent(7)?)
//!     .buffer(RingBuffer::new(64)?)
//!     .on_open(|socket, _: &OpenEvent| socket.send("hello"))
//!     .connect(TungsteniteTransport::new())?;
//!
//! socket.send("queued until open");
//! # Ok(())
//! # }
//! ```

use crate::backoff::{Backoff, BackoffStrategy};
use crate::buffer::Buffer;
use crate::builder::WebsocketConfig;
use crate::event::{
    CloseEvent, ErrorEvent, EventKind, Message, MessageEvent, OpenEvent, ReadyState,
    ReconnectEvent, RetryEvent,
};
use crate::jitter::Jitter;
use crate::listener::{invoke_all, Listener, ListenerOptions, ListenerRegistry, WebsocketEvent};
use crate::sleeper::{RetryCanceller, RetryTimer, SleepFuture, Sleeper};
use crate::transport::{Transport, TransportConnection, TransportEvent, TransportEvents};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use url::Url;

type EventSender = mpsc::UnboundedSender<(u64, TransportEvent)>;
type EventReceiver = mpsc::UnboundedReceiver<(u64, TransportEvent)>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Resilient socket handle. Clones refer to the same connection.
#[derive(Clone)]
pub struct Websocket {
    shared: Arc<Shared>,
}

struct Shared {
    url: Url,
    protocols: Vec<String>,
    max_retries: Option<u32>,
    instant_reconnect: bool,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    transport: Arc<dyn Transport>,
    events: EventSender,
    cancel_retry: RetryCanceller,
    state: Mutex<State>,
    listeners: Mutex<ListenerRegistry>,
}

struct State {
    connection: Box<dyn TransportConnection>,
    generation: u64,
    closed_by_user: bool,
    last_connection: Option<SystemTime>,
    retries: u32,
    backoff: Option<Backoff>,
    buffer: Option<Box<dyn Buffer<Message>>>,
}

impl State {
    /// Forward to the live connection if it is open and nothing is queued ahead, otherwise
    /// buffer or drop.
    fn send_or_buffer(&mut self, message: Message) {
        let queued = self.buffer.as_mut().is_some_and(|buffer| !buffer.is_empty());
        let message = if !queued && self.connection.ready_state() == ReadyState::Open {
            match self.connection.send(message) {
                Ok(()) => return,
                Err(err) => {
                    debug!(generation = self.generation, error = %err.source, "write failed on open transport");
                    err.message
                }
            }
        } else {
            message
        };

        match self.buffer.as_mut() {
            Some(buffer) => buffer.add(message),
            None => trace!(generation = self.generation, "no buffer; dropping message"),
        }
    }
}

/// What the pump does after handling one notification.
enum Flow {
    Continue,
    Schedule { sleep: SleepFuture, event: RetryEvent },
    Stop,
}

impl Websocket {
    /// Start connecting with `config` over `transport`.
    ///
    /// Must be called from within a tokio runtime: the socket's event pump is spawned here.
    pub fn connect(config: WebsocketConfig, transport: impl Transport + 'static) -> Self {
        Self::connect_shared(config, Arc::new(transport))
    }

    pub(crate) fn connect_shared(config: WebsocketConfig, transport: Arc<dyn Transport>) -> Self {
        let WebsocketConfig {
            url,
            protocols,
            buffer,
            backoff,
            max_retries,
            instant_reconnect,
            jitter,
            sleeper,
            listeners,
        } = config;

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = 1;
        debug!(url = %url, generation, "connecting");
        let connection =
            transport.open(&url, &protocols, TransportEvents::new(generation, tx.clone()));

        let (timer, cancel_retry) = RetryTimer::new();
        let shared = Arc::new(Shared {
            url,
            protocols,
            max_retries,
            instant_reconnect,
            jitter,
            sleeper,
            transport,
            events: tx,
            cancel_retry,
            state: Mutex::new(State {
                connection,
                generation,
                closed_by_user: false,
                last_connection: None,
                retries: 0,
                backoff,
                buffer,
            }),
            listeners: Mutex::new(listeners),
        });

        tokio::spawn(run_pump(Arc::downgrade(&shared), rx, timer));
        Self { shared }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.shared.state)
    }

    fn listeners(&self) -> MutexGuard<'_, ListenerRegistry> {
        lock(&self.shared.listeners)
    }

    /// Send `message` now if connected, otherwise buffer it (or drop it when no buffer is
    /// configured). Does nothing after [`close`](Self::close).
    pub fn send(&self, message: impl Into<Message>) {
        let mut state = self.state();
        if state.closed_by_user {
            trace!(url = %self.shared.url, "send after close ignored");
            return;
        }
        state.send_or_buffer(message.into());
    }

    /// Close for good: cancel any pending retry and close the live connection. Only the first
    /// call has an effect.
    pub fn close(&self, code: Option<u16>, reason: Option<String>) {
        let mut state = self.state();
        if state.closed_by_user {
            return;
        }
        state.closed_by_user = true;
        self.shared.cancel_retry.cancel();
        info!(url = %self.shared.url, generation = state.generation, ?code, "closed by user");
        state.connection.close(code, reason);
    }

    pub fn add_event_listener<E: WebsocketEvent>(
        &self,
        listener: Listener<E>,
        options: Option<ListenerOptions>,
    ) {
        self.listeners().add(listener, options);
    }

    /// Remove registrations of `listener` made with exactly `options`. Returns how many were
    /// removed.
    pub fn remove_event_listener<E: WebsocketEvent>(
        &self,
        listener: &Listener<E>,
        options: Option<ListenerOptions>,
    ) -> usize {
        self.listeners().remove(listener, options)
    }

    /// Register a closure and return the listener so it can be removed later.
    pub fn on<E, F>(&self, f: F) -> Listener<E>
    where
        E: WebsocketEvent,
        F: Fn(&Websocket, &E) + Send + Sync + 'static,
    {
        let listener: Listener<E> = Arc::new(f);
        self.add_event_listener(Arc::clone(&listener), None);
        listener
    }

    /// Like [`on`](Self::on), but the listener fires for the next `E` only.
    pub fn once<E, F>(&self, f: F) -> Listener<E>
    where
        E: WebsocketEvent,
        F: Fn(&Websocket, &E) + Send + Sync + 'static,
    {
        let listener: Listener<E> = Arc::new(f);
        self.add_event_listener(Arc::clone(&listener), Some(ListenerOptions::once()));
        listener
    }

    pub fn has_event_listener<E: WebsocketEvent>(&self, listener: &Listener<E>) -> bool {
        self.listeners().contains(listener)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners().len(kind)
    }

    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    pub fn protocols(&self) -> &[String] {
        &self.shared.protocols
    }

    /// State of the current transport connection.
    pub fn ready_state(&self) -> ReadyState {
        self.state().connection.ready_state()
    }

    pub fn closed_by_user(&self) -> bool {
        self.state().closed_by_user
    }

    /// When the socket last opened, `None` before the first open.
    pub fn last_connection(&self) -> Option<SystemTime> {
        self.state().last_connection
    }

    /// Retries since the last successful open.
    pub fn retries(&self) -> u32 {
        self.state().retries
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.shared.max_retries
    }

    pub fn instant_reconnect(&self) -> bool {
        self.shared.instant_reconnect
    }

    /// Messages waiting in the outbound buffer. Zero when no buffer is configured.
    pub fn buffered_len(&self) -> usize {
        self.state().buffer.as_mut().map_or(0, |buffer| buffer.len())
    }

    /// Retry counter of the backoff, `None` when reconnecting is disabled.
    pub fn backoff_retries(&self) -> Option<u32> {
        self.state().backoff.as_ref().map(|backoff| backoff.retries())
    }

    /// The delay the backoff would apply right now, without advancing it.
    pub fn backoff_current(&self) -> Option<Duration> {
        self.state().backoff.as_ref().map(|backoff| backoff.current())
    }

    fn dispatch<E: WebsocketEvent>(&self, event: &E) {
        let entries = self.listeners().snapshot::<E>();
        if entries.is_empty() {
            return;
        }
        invoke_all(&entries, self, event);
        self.listeners().retire_fired(&entries);
    }

    fn handle_transport_event(&self, generation: u64, event: TransportEvent) -> Flow {
        let current = self.state().generation;
        if generation != current {
            trace!(url = %self.shared.url, generation, current, "ignoring notification from superseded connection");
            return Flow::Continue;
        }

        match event {
            TransportEvent::Open => {
                self.on_open();
                Flow::Continue
            }
            TransportEvent::Close(close) => self.on_close(close),
            TransportEvent::Error(message) => {
                debug!(url = %self.shared.url, generation, error = %message, "transport error");
                self.dispatch(&ErrorEvent { message });
                Flow::Continue
            }
            TransportEvent::Message(data) => {
                self.dispatch(&MessageEvent { data });
                Flow::Continue
            }
        }
    }

    fn on_open(&self) {
        let reconnect = {
            let state = self.state();
            state.last_connection.map(|previous| ReconnectEvent {
                retries: state.retries,
                last_connection: Some(previous),
            })
        };

        if let Some(event) = reconnect {
            info!(url = %self.shared.url, retries = event.retries, "reconnected");
            self.dispatch(&event);
            if let Some(backoff) = self.state().backoff.as_mut() {
                backoff.reset();
            }
            self.shared.jitter.reset();
        } else {
            info!(url = %self.shared.url, "connected");
        }

        {
            let mut state = self.state();
            state.last_connection = Some(SystemTime::now());
            state.retries = 0;
        }

        self.dispatch(&OpenEvent);
        self.flush_buffer();
    }

    /// Write buffered messages oldest first while the connection stays open.
    fn flush_buffer(&self) {
        let mut flushed = 0usize;
        loop {
            let mut state = self.state();
            let state = &mut *state;
            if state.closed_by_user || state.connection.ready_state() != ReadyState::Open {
                break;
            }
            let Some(buffer) = state.buffer.as_mut() else {
                break;
            };
            let Some(next) = buffer.peek().cloned() else {
                break;
            };
            match state.connection.send(next) {
                Ok(()) => {
                    buffer.read();
                    flushed += 1;
                }
                Err(err) => {
                    debug!(generation = state.generation, error = %err.source, "flush interrupted");
                    break;
                }
            }
        }
        if flushed > 0 {
            debug!(url = %self.shared.url, flushed, "flushed buffered messages");
        }
    }

    fn on_close(&self, close: CloseEvent) -> Flow {
        debug!(url = %self.shared.url, %close, "connection closed");
        self.dispatch(&close);

        let mut state = self.state();
        if state.closed_by_user {
            return Flow::Stop;
        }
        let retries = state.retries;
        let attempt = retries.saturating_add(1);
        if let Some(max) = self.shared.max_retries {
            if attempt > max {
                info!(url = %self.shared.url, max_retries = max, "max retries reached; giving up");
                return Flow::Stop;
            }
        }
        let Some(backoff) = state.backoff.as_mut() else {
            info!(url = %self.shared.url, "no backoff configured; not reconnecting");
            return Flow::Stop;
        };

        let delay = if self.shared.instant_reconnect && retries == 0 {
            Duration::ZERO
        } else {
            backoff.next()
        };
        let delay = self.shared.jitter.apply(delay);
        state.retries = attempt;

        debug!(
            url = %self.shared.url,
            retries = attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        Flow::Schedule {
            sleep: self.shared.sleeper.sleep(delay),
            event: RetryEvent { retries: attempt, backoff: delay, last_connection: state.last_connection },
        }
    }

    fn fire_retry(&self, event: RetryEvent) {
        if self.state().closed_by_user {
            return;
        }
        self.dispatch(&event);

        let mut state = self.state();
        if state.closed_by_user {
            return;
        }
        // bump first so the old connection's close notification is recognised as stale
        state.generation += 1;
        let generation = state.generation;
        state.connection.close(None, None);
        debug!(url = %self.shared.url, generation, retries = event.retries, "reconnecting");
        state.connection = self.shared.transport.open(
            &self.shared.url,
            &self.shared.protocols,
            TransportEvents::new(generation, self.shared.events.clone()),
        );
    }
}

impl fmt::Debug for Websocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Websocket")
            .field("url", &self.shared.url.as_str())
            .field("ready_state", &state.connection.ready_state())
            .field("generation", &state.generation)
            .field("retries", &state.retries)
            .field("closed_by_user", &state.closed_by_user)
            .finish()
    }
}

/// Serialises transport notifications and retry timers for one socket. Exits when the socket
/// is dropped or finished for good.
async fn run_pump(
    shared: Weak<Shared>,
    mut rx: EventReceiver,
    mut timer: RetryTimer<RetryEvent>,
) {
    loop {
        tokio::select! {
            biased;
            received = rx.recv() => {
                let Some((generation, event)) = received else { break };
                let Some(shared) = shared.upgrade() else { break };
                let socket = Websocket { shared };
                match socket.handle_transport_event(generation, event) {
                    Flow::Continue => {}
                    Flow::Schedule { sleep, event } => timer.arm(sleep, event),
                    Flow::Stop => break,
                }
            }
            event = timer.expired() => {
                let Some(shared) = shared.upgrade() else { break };
                Websocket { shared }.fire_retry(event);
            }
        }
    }
    trace!("event pump stopped");
}
