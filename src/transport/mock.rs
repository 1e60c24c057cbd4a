//! In-memory scripted transport.
//!
//! Every `open` creates a [`MockConnection`] the test drives by hand: accept it, drop it, feed
//! it messages, inspect what was written to it. Nothing touches the network.
//!
//! ```rust
//! use resocket::transport::mock::MockTransport;
//!
//! let transport = MockTransport::auto_open();
//! assert_eq!(transport.open_count(), 0);
//! ```

use super::{Transport, TransportConnection, TransportEvent, TransportEvents};
use crate::error::{SendError, TransportError};
use crate::event::{CloseEvent, Message, ReadyState};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

/// Close code reported when a connection goes away without a closing handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct MockInner {
    connections: Vec<MockConnection>,
    auto_open: bool,
    refusing: bool,
}

/// Scripted [`Transport`]. Clones share the same connection log.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    /// Connections stay `Connecting` until [`MockConnection::accept`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections open as soon as they are created.
    pub fn auto_open() -> Self {
        let transport = Self::default();
        transport.set_auto_open(true);
        transport
    }

    pub fn set_auto_open(&self, auto_open: bool) {
        lock(&self.inner).auto_open = auto_open;
    }

    /// While refusing, new connections fail immediately with an error followed by an abnormal
    /// close, as if nothing were listening.
    pub fn set_refusing(&self, refusing: bool) {
        lock(&self.inner).refusing = refusing;
    }

    /// Number of connections opened so far.
    pub fn open_count(&self) -> usize {
        lock(&self.inner).connections.len()
    }

    pub fn connection(&self, index: usize) -> Option<MockConnection> {
        lock(&self.inner).connections.get(index).cloned()
    }

    /// The most recently opened connection.
    pub fn latest(&self) -> Option<MockConnection> {
        lock(&self.inner).connections.last().cloned()
    }

    pub fn connections(&self) -> Vec<MockConnection> {
        lock(&self.inner).connections.clone()
    }

    /// Write attempts across every connection, failed ones included.
    pub fn send_count(&self) -> usize {
        self.connections().iter().map(MockConnection::send_count).sum()
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        url: &Url,
        protocols: &[String],
        events: TransportEvents,
    ) -> Box<dyn TransportConnection> {
        let mut inner = lock(&self.inner);
        let connection = MockConnection {
            shared: Arc::new(Mutex::new(ConnectionState {
                ready_state: ReadyState::Connecting,
                events,
                url: url.clone(),
                protocols: protocols.to_vec(),
                sent: Vec::new(),
                send_count: 0,
                close_calls: Vec::new(),
                failing_sends: false,
            })),
        };

        if inner.refusing {
            connection.fail("connection refused");
        } else if inner.auto_open {
            connection.accept();
        }

        inner.connections.push(connection.clone());
        Box::new(MockSocket { shared: Arc::clone(&connection.shared) })
    }
}

#[derive(Debug)]
struct ConnectionState {
    ready_state: ReadyState,
    events: TransportEvents,
    url: Url,
    protocols: Vec<String>,
    sent: Vec<Message>,
    send_count: usize,
    close_calls: Vec<(Option<u16>, Option<String>)>,
    failing_sends: bool,
}

impl ConnectionState {
    fn shut(&mut self, close: CloseEvent) -> bool {
        if self.ready_state == ReadyState::Closed {
            return false;
        }
        self.ready_state = ReadyState::Closed;
        self.events.emit(TransportEvent::Close(close));
        true
    }
}

/// Test-side handle on one mock connection.
#[derive(Debug, Clone)]
pub struct MockConnection {
    shared: Arc<Mutex<ConnectionState>>,
}

impl MockConnection {
    /// Complete the handshake. Returns `false` unless the connection was still connecting.
    pub fn accept(&self) -> bool {
        let mut state = lock(&self.shared);
        if state.ready_state != ReadyState::Connecting {
            return false;
        }
        state.ready_state = ReadyState::Open;
        state.events.emit(TransportEvent::Open);
        true
    }

    /// The peer vanished: abnormal close, not clean.
    pub fn drop_connection(&self) -> bool {
        lock(&self.shared).shut(CloseEvent {
            code: Some(ABNORMAL_CLOSURE),
            reason: String::new(),
            was_clean: false,
        })
    }

    /// The peer completed a closing handshake.
    pub fn server_close(&self, code: u16, reason: &str) -> bool {
        lock(&self.shared).shut(CloseEvent {
            code: Some(code),
            reason: reason.to_owned(),
            was_clean: true,
        })
    }

    /// Report an error and then close abnormally.
    pub fn fail(&self, message: &str) -> bool {
        let mut state = lock(&self.shared);
        state.events.emit(TransportEvent::Error(message.to_owned()));
        state.shut(CloseEvent {
            code: Some(ABNORMAL_CLOSURE),
            reason: String::new(),
            was_clean: false,
        })
    }

    /// Report an error without changing state.
    pub fn error(&self, message: &str) {
        lock(&self.shared).events.emit(TransportEvent::Error(message.to_owned()));
    }

    /// Deliver an inbound message.
    pub fn receive(&self, message: impl Into<Message>) {
        lock(&self.shared).events.emit(TransportEvent::Message(message.into()));
    }

    /// Make writes fail while the connection still reports itself open.
    pub fn set_failing_sends(&self, failing: bool) {
        lock(&self.shared).failing_sends = failing;
    }

    pub fn ready_state(&self) -> ReadyState {
        lock(&self.shared).ready_state
    }

    /// Messages successfully written, in order.
    pub fn sent(&self) -> Vec<Message> {
        lock(&self.shared).sent.clone()
    }

    /// Write attempts, failed ones included.
    pub fn send_count(&self) -> usize {
        lock(&self.shared).send_count
    }

    pub fn close_calls(&self) -> Vec<(Option<u16>, Option<String>)> {
        lock(&self.shared).close_calls.clone()
    }

    pub fn url(&self) -> Url {
        lock(&self.shared).url.clone()
    }

    pub fn protocols(&self) -> Vec<String> {
        lock(&self.shared).protocols.clone()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.shared).events.generation()
    }
}

/// Engine-side half of a mock connection.
#[derive(Debug)]
struct MockSocket {
    shared: Arc<Mutex<ConnectionState>>,
}

impl TransportConnection for MockSocket {
    fn ready_state(&self) -> ReadyState {
        lock(&self.shared).ready_state
    }

    fn send(&mut self, message: Message) -> Result<(), SendError> {
        let mut state = lock(&self.shared);
        state.send_count += 1;
        if state.ready_state != ReadyState::Open {
            let current = state.ready_state;
            return Err(SendError::new(message, TransportError::NotOpen(current)));
        }
        if state.failing_sends {
            return Err(SendError::new(message, TransportError::Io("broken pipe".into())));
        }
        state.sent.push(message);
        Ok(())
    }

    fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        let mut state = lock(&self.shared);
        state.close_calls.push((code, reason.clone()));
        state.shut(CloseEvent { code, reason: reason.unwrap_or_default(), was_clean: true });
    }
}
