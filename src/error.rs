//! Error types for configuration and transports
//!
//! Configuration problems fail fast when a socket is built. Connectivity problems never surface
//! as errors from [`Websocket`](crate::Websocket): they show up as `close`/`retry`/`reconnect`
//! events instead, and sends while disconnected are buffered or dropped silently.
use crate::backoff::BackoffError;
use crate::buffer::BufferError;
use crate::event::{Message, ReadyState};
use crate::jitter::JitterError;

/// Invalid socket configuration, reported by `WebsocketBuilder::build` and
/// `WebsocketBuilder::connect`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("sub-protocol names must not be empty")]
    EmptyProtocol,
    #[error("sub-protocol {0:?} listed more than once")]
    DuplicateProtocol(String),
    #[error(transparent)]
    Backoff(#[from] BackoffError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Jitter(#[from] JitterError),
    /// `connect` was called outside a tokio runtime.
    #[error("connect must be called from within a tokio runtime")]
    NoRuntime,
}

/// Failures reported by a transport connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection is not ready for writes.
    #[error("transport not open (state: {0:?})")]
    NotOpen(ReadyState),
    /// The connection task is gone.
    #[error("transport closed")]
    Closed,
    #[error("transport i/o error: {0}")]
    Io(String),
}

/// A send that did not reach the transport. Hands the message back so it can be buffered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("send failed: {source}")]
pub struct SendError {
    pub message: Message,
    pub source: TransportError,
}

impl SendError {
    pub fn new(message: Message, source: TransportError) -> Self {
        Self { message, source }
    }
}
