#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # resocket
//!
//! A WebSocket client handle that survives its connection. When the connection drops without
//! being asked to, the socket waits out a backoff delay and connects again; messages sent in
//! the meantime are buffered and delivered in order once it is back.
//!
//! ## Features
//!
//! - **Backoff strategies** (constant, linear, exponential) pacing reconnect attempts
//! - **Outbound buffers**: bounded ring, time-windowed, or unbounded
//! - **Typed events** for open/close/error/message plus retry and reconnect
//! - **Once-listeners** and exact-match listener removal
//! - **Pluggable transports**: `tokio-tungstenite` by default, an in-memory mock for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resocket::{Backoff, MessageEvent, WebsocketBuilder};
//! use resocket::transport::tungstenite::TungsteniteTransport;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), resocket::ConfigError> {
//!     let socket = WebsocketBuilder::new("ws://127.0.0.1:9001")
//!         .backoff(Backoff::linear(Duration::from_secs(1), Duration::from_secs(1)).with_max(Duration::from_secs(5))?)
//!         .ring_buffer(128)
//!         .max_retries(10)
//!         .on_message(|_, event: &MessageEvent| println!("got {:?}", event.data))
//!         .connect(TungsteniteTransport::new())?;
//!
//!     socket.send("hello");
//!     socket.close(Some(1000), Some("done".into()));
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod buffer;
pub mod builder;
pub mod clock;
pub mod error;
pub mod event;
pub mod jitter;
pub mod listener;
pub mod prelude;
pub mod sleeper;
pub mod transport;
pub mod websocket;

// Re-exports
pub use backoff::{Backoff, BackoffError, BackoffStrategy};
pub use buffer::{Buffer, BufferError, RingBuffer, TimeBuffer, UnboundedBuffer};
pub use builder::{WebsocketBuilder, WebsocketConfig};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{ConfigError, SendError, TransportError};
pub use event::{
    CloseEvent, ErrorEvent, EventKind, Message, MessageEvent, OpenEvent, ReadyState,
    ReconnectEvent, RetryEvent,
};
pub use jitter::Jitter;
pub use listener::{listener, Listener, ListenerOptions, ListenerRegistry, WebsocketEvent};
pub use sleeper::{InstantSleeper, RetryCanceller, RetryTimer, Sleeper, TokioSleeper, TrackingSleeper};
pub use transport::{Transport, TransportConnection, TransportEvent, TransportEvents};
pub use websocket::Websocket;
