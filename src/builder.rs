//! Builder for socket configuration.
//!
//! [`WebsocketBuilder`] collects options and validates them in [`build`](WebsocketBuilder::build),
//! producing an immutable [`WebsocketConfig`]. Nothing connects until the config is handed to
//! [`Websocket::connect`] (or [`WebsocketBuilder::connect`] does both steps).

use crate::backoff::Backoff;
use crate::buffer::{Buffer, RingBuffer, TimeBuffer};
use crate::error::ConfigError;
use crate::event::{
    CloseEvent, ErrorEvent, Message, MessageEvent, OpenEvent, ReconnectEvent, RetryEvent,
};
use crate::jitter::Jitter;
use crate::listener::{Listener, ListenerOptions, ListenerRegistry, WebsocketEvent};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::transport::Transport;
use crate::websocket::Websocket;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Validated, immutable socket configuration.
#[derive(Debug)]
pub struct WebsocketConfig {
    pub(crate) url: Url,
    pub(crate) protocols: Vec<String>,
    pub(crate) buffer: Option<Box<dyn Buffer<Message>>>,
    pub(crate) backoff: Option<Backoff>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) instant_reconnect: bool,
    pub(crate) jitter: Jitter,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) listeners: ListenerRegistry,
}

impl WebsocketConfig {
    pub fn builder(url: impl Into<String>) -> WebsocketBuilder {
        WebsocketBuilder::new(url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Reconnecting is disabled when no backoff is configured.
    pub fn backoff(&self) -> Option<&Backoff> {
        self.backoff.as_ref()
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn instant_reconnect(&self) -> bool {
        self.instant_reconnect
    }

    pub fn jitter(&self) -> &Jitter {
        &self.jitter
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}

#[derive(Debug)]
enum BufferChoice {
    Ring(usize),
    Time(Duration),
    Custom(Box<dyn Buffer<Message>>),
}

/// Builder for [`WebsocketConfig`].
#[derive(Debug)]
pub struct WebsocketBuilder {
    url: String,
    protocols: Vec<String>,
    buffer: Option<BufferChoice>,
    backoff: Option<Backoff>,
    max_retries: Option<u32>,
    instant_reconnect: bool,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    listeners: ListenerRegistry,
}

impl WebsocketBuilder {
    /// Start from defaults: no buffer, no backoff (never reconnect), unlimited retries, no
    /// jitter, tokio timers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocols: Vec::new(),
            buffer: None,
            backoff: None,
            max_retries: None,
            instant_reconnect: false,
            jitter: Jitter::None,
            sleeper: Arc::new(TokioSleeper),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Add one sub-protocol to offer during the handshake.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols.extend(protocols.into_iter().map(Into::into));
        self
    }

    /// Hold messages sent while disconnected in `buffer`.
    pub fn buffer<B>(mut self, buffer: B) -> Self
    where
        B: Buffer<Message> + 'static,
    {
        self.buffer = Some(BufferChoice::Custom(Box::new(buffer)));
        self
    }

    /// Buffer up to `capacity` messages, evicting the oldest. Validated by `build`.
    pub fn ring_buffer(mut self, capacity: usize) -> Self {
        self.buffer = Some(BufferChoice::Ring(capacity));
        self
    }

    /// Buffer messages for at most `max_age`.
    pub fn time_buffer(mut self, max_age: Duration) -> Self {
        self.buffer = Some(BufferChoice::Time(max_age));
        self
    }

    /// Reconnect after unexpected closes, pacing attempts with `backoff`.
    pub fn backoff<B>(mut self, backoff: B) -> Self
    where
        B: Into<Backoff>,
    {
        self.backoff = Some(backoff.into());
        self
    }

    /// Stop reconnecting after `retries` consecutive failed attempts.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Skip the backoff delay on the first retry after a connection was lost.
    pub fn instant_reconnect(mut self, instant: bool) -> Self {
        self.instant_reconnect = instant;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Provide a custom sleeper implementation for the retry timer.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Register a listener before the socket starts connecting.
    pub fn listener<E: WebsocketEvent>(
        mut self,
        listener: Listener<E>,
        options: Option<ListenerOptions>,
    ) -> Self {
        self.listeners.add(listener, options);
        self
    }

    pub fn on<E, F>(self, f: F) -> Self
    where
        E: WebsocketEvent,
        F: Fn(&Websocket, &E) + Send + Sync + 'static,
    {
        self.listener::<E>(Arc::new(f), None)
    }

    pub fn once<E, F>(self, f: F) -> Self
    where
        E: WebsocketEvent,
        F: Fn(&Websocket, &E) + Send + Sync + 'static,
    {
        self.listener::<E>(Arc::new(f), Some(ListenerOptions::once()))
    }

    pub fn on_open<F>(self, f: F) -> Self
    where
        F: Fn(&Websocket, &OpenEvent) + Send + Sync + 'static,
    {
        self.on::<OpenEvent, F>(f)
    }

    pub fn on_close<F>(self, f: F) -> Self
    where
        F: Fn(&Websocket, &CloseEvent) + Send + Sync + 'static,
    {
        self.on::<CloseEvent, F>(f)
    }

    pub fn on_error<F>(self, f: F) -> Self
    where
        F: Fn(&Websocket, &ErrorEvent) + Send + Sync + 'static,
    {
        self.on::<ErrorEvent, F>(f)
    }

    pub fn on_message<F>(self, f: F) -> Self
    where
        F: Fn(&Websocket, &MessageEvent) + Send + Sync + 'static,
    {
        self.on::<MessageEvent, F>(f)
    }

    pub fn on_retry<F>(self, f: F) -> Self
    where
        F: Fn(&Websocket, &RetryEvent) + Send + Sync + 'static,
    {
        self.on::<RetryEvent, F>(f)
    }

    pub fn on_reconnect<F>(self, f: F) -> Self
    where
        F: Fn(&Websocket, &ReconnectEvent) + Send + Sync + 'static,
    {
        self.on::<ReconnectEvent, F>(f)
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<WebsocketConfig, ConfigError> {
        let url = Url::parse(&self.url)?;

        let mut seen = HashSet::new();
        for protocol in &self.protocols {
            if protocol.trim().is_empty() {
                return Err(ConfigError::EmptyProtocol);
            }
            if !seen.insert(protocol.as_str()) {
                return Err(ConfigError::DuplicateProtocol(protocol.clone()));
            }
        }

        let buffer: Option<Box<dyn Buffer<Message>>> = match self.buffer {
            None => None,
            Some(BufferChoice::Ring(capacity)) => Some(Box::new(RingBuffer::new(capacity)?)),
            Some(BufferChoice::Time(max_age)) => Some(Box::new(TimeBuffer::new(max_age))),
            Some(BufferChoice::Custom(buffer)) => Some(buffer),
        };

        Ok(WebsocketConfig {
            url,
            protocols: self.protocols,
            buffer,
            backoff: self.backoff,
            max_retries: self.max_retries,
            instant_reconnect: self.instant_reconnect,
            jitter: self.jitter,
            sleeper: self.sleeper,
            listeners: self.listeners,
        })
    }

    /// Build the configuration and start connecting over `transport`.
    ///
    /// Fails with [`ConfigError::NoRuntime`] outside a tokio runtime, before `transport` is
    /// asked to open anything.
    pub fn connect<T>(self, transport: T) -> Result<Websocket, ConfigError>
    where
        T: Transport + 'static,
    {
        let config = self.build()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ConfigError::NoRuntime);
        }
        Ok(Websocket::connect(config, transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MAX_RING_CAPACITY;
    use crate::error::ConfigError;
    use crate::event::EventKind;

    #[test]
    fn defaults_never_reconnect() {
        let config = WebsocketBuilder::new("ws://localhost:9001").build().unwrap();
        assert!(config.backoff().is_none());
        assert!(!config.has_buffer());
        assert_eq!(config.max_retries(), None);
        assert!(!config.instant_reconnect());
        assert_eq!(config.url().as_str(), "ws://localhost:9001/");
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = WebsocketBuilder::new("not a url").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }

    #[test]
    fn protocols_are_validated() {
        let err = WebsocketBuilder::new("ws://h/").protocol("").build().unwrap_err();
        assert_eq!(err, ConfigError::EmptyProtocol);

        let err = WebsocketBuilder::new("ws://h/").protocols(["a", "b", "a"]).build().unwrap_err();
        assert_eq!(err, ConfigError::DuplicateProtocol("a".into()));

        let config = WebsocketBuilder::new("ws://h/").protocols(["v1", "v2"]).build().unwrap();
        assert_eq!(config.protocols(), ["v1".to_string(), "v2".to_string()]);
    }

    #[test]
    fn connect_outside_a_runtime_is_an_error() {
        let transport = crate::transport::mock::MockTransport::new();
        let result = WebsocketBuilder::new("ws://h/").connect(transport.clone());
        assert!(matches!(result, Err(ConfigError::NoRuntime)));
        assert_eq!(transport.open_count(), 0);
    }

    #[test]
    fn oversized_ring_buffer_fails_at_build() {
        let err = WebsocketBuilder::new("ws://h/")
            .ring_buffer(MAX_RING_CAPACITY + 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Buffer(_)));
    }

    #[test]
    fn invalid_backoff_surfaces_as_config_error() {
        fn configure() -> Result<WebsocketConfig, ConfigError> {
            WebsocketBuilder::new("ws://h/")
                .backoff(Backoff::constant(Duration::from_secs(1)).with_max(Duration::from_secs(5))?)
                .build()
        }
        assert!(matches!(configure(), Err(ConfigError::Backoff(_))));
    }

    #[test]
    fn initial_listeners_are_registered() {
        let config = WebsocketBuilder::new("ws://h/")
            .on_open(|_, _| {})
            .on_message(|_, _| {})
            .once(|_: &Websocket, _: &RetryEvent| {})
            .build()
            .unwrap();
        assert_eq!(config.listeners().len(EventKind::Open), 1);
        assert_eq!(config.listeners().len(EventKind::Message), 1);
        assert_eq!(config.listeners().len(EventKind::Retry), 1);
        assert_eq!(config.listeners().len(EventKind::Close), 0);
    }
}
