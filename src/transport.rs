//! Transport abstraction consumed by the connection engine.
//!
//! A [`Transport`] opens raw connections; each [`TransportConnection`] reports its
//! [`ReadyState`], accepts writes while open, and reports what happens to it through the
//! [`TransportEvents`] sink it was opened with. The engine never blocks on a transport: `open`
//! returns immediately and the outcome arrives later as a [`TransportEvent`].

pub mod mock;
#[cfg(feature = "tungstenite")]
pub mod tungstenite;

use crate::error::SendError;
use crate::event::{CloseEvent, Message, ReadyState};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Notification emitted by a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Close(CloseEvent),
    Error(String),
    Message(Message),
}

/// Sink a connection reports through. Tagged with the generation of the connection it belongs
/// to, so notifications from a superseded connection can be told apart and ignored.
#[derive(Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Emit a notification. Returns `false` once the owning socket is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the owning socket has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents").field("generation", &self.generation).finish()
    }
}

/// Factory for raw connections.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Begin connecting to `url`. Must not block; the result is reported through `events`.
    fn open(
        &self,
        url: &Url,
        protocols: &[String],
        events: TransportEvents,
    ) -> Box<dyn TransportConnection>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn open(
        &self,
        url: &Url,
        protocols: &[String],
        events: TransportEvents,
    ) -> Box<dyn TransportConnection> {
        (**self).open(url, protocols, events)
    }
}

/// One raw connection.
pub trait TransportConnection: Send + fmt::Debug {
    fn ready_state(&self) -> ReadyState;

    /// Write a message. Only valid while [`ReadyState::Open`]; on failure the message is
    /// handed back inside the error.
    fn send(&mut self, message: Message) -> Result<(), SendError>;

    /// Request closure. Closing an already closed connection does nothing.
    fn close(&mut self, code: Option<u16>, reason: Option<String>);
}
