//! Messages, lifecycle states, and the typed events dispatched to listeners.
//!
//! Every event kind has its own payload type:
//!
//! - **Open**: [`OpenEvent`]
//! - **Close**: [`CloseEvent`]
//! - **Error**: [`ErrorEvent`]
//! - **Message**: [`MessageEvent`]
//! - **Retry**: [`RetryEvent`], a retry is about to happen
//! - **Reconnect**: [`ReconnectEvent`], a retry succeeded

use std::fmt;
use std::time::{Duration, SystemTime};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque payload carried over the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Message::Text(text) => text.len(),
            Message::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::Text(value)
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(value: Vec<u8>) -> Self {
        Message::Binary(value)
    }
}

impl From<&[u8]> for Message {
    fn from(value: &[u8]) -> Self {
        Message::Binary(value.to_vec())
    }
}

/// Lifecycle phase of one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// The fixed set of event kinds a [`Websocket`](crate::Websocket) dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EventKind {
    Open,
    Close,
    Error,
    Message,
    Retry,
    Reconnect,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Open,
        EventKind::Close,
        EventKind::Error,
        EventKind::Message,
        EventKind::Retry,
        EventKind::Reconnect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::Message => "message",
            EventKind::Retry => "retry",
            EventKind::Reconnect => "reconnect",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transport signalled it is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenEvent;

/// The transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CloseEvent {
    pub code: Option<u16>,
    pub reason: String,
    pub was_clean: bool,
}

/// Opaque transport error. Does not by itself trigger a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
}

/// A message arrived from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub data: Message,
}

/// A reconnect attempt is about to be made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    /// Retries since the last successful open, this one included.
    pub retries: u32,
    /// Time waited before this attempt.
    pub backoff: Duration,
    /// When the connection was last open, `None` if it never was.
    pub last_connection: Option<SystemTime>,
}

/// A retry succeeded and the connection is open again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectEvent {
    /// Retries it took to get back.
    pub retries: u32,
    /// When the previous connection was opened.
    pub last_connection: Option<SystemTime>,
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "Close(code={}, clean={}, reason={:?})", code, self.was_clean, self.reason),
            None => write!(f, "Close(clean={}, reason={:?})", self.was_clean, self.reason),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Retry(#{}, backoff={:?})", self.retries, self.backoff)
    }
}

impl fmt::Display for ReconnectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reconnect(after {} retries)", self.retries)
    }
}
