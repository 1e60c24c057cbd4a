//! Convenient re-exports for common resocket types.
pub use crate::{
    backoff::{
        Backoff, BackoffError, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff,
        MAX_BACKOFF,
    },
    buffer::{Buffer, BufferError, RingBuffer, TimeBuffer, UnboundedBuffer, MAX_RING_CAPACITY},
    builder::{WebsocketBuilder, WebsocketConfig},
    error::{ConfigError, SendError, TransportError},
    event::{
        CloseEvent, ErrorEvent, EventKind, Message, MessageEvent, OpenEvent, ReadyState,
        ReconnectEvent, RetryEvent,
    },
    jitter::Jitter,
    listener::{listener, Listener, ListenerOptions},
    transport::{mock::MockTransport, Transport},
    websocket::Websocket,
};

#[cfg(feature = "tungstenite")]
pub use crate::transport::tungstenite::TungsteniteTransport;
