//! WebSocket transport backed by `tokio-tungstenite`.
//!
//! Each connection runs one tokio task that performs the handshake and then multiplexes
//! outgoing writes with incoming frames. The handle the engine holds only talks to that task
//! through channels and an atomic ready state, so none of its methods block or await.

use super::{Transport, TransportConnection, TransportEvent, TransportEvents};
use crate::error::{SendError, TransportError};
use crate::event::{CloseEvent, Message, ReadyState};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

const ABNORMAL_CLOSURE: u16 = 1006;
const NO_STATUS_RECEIVED: u16 = 1005;

/// Real WebSocket client transport.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport {
    connect_timeout: Option<Duration>,
}

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up on a handshake that takes longer than `timeout`. The attempt is reported as an
    /// error followed by an abnormal close, which feeds the normal retry loop.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Transport for TungsteniteTransport {
    fn open(
        &self,
        url: &Url,
        protocols: &[String],
        events: TransportEvents,
    ) -> Box<dyn TransportConnection> {
        let state = Arc::new(AtomicU8::new(encode(ReadyState::Connecting)));
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();

        let task = ConnectionTask {
            url: url.clone(),
            protocols: protocols.to_vec(),
            connect_timeout: self.connect_timeout,
            state: Arc::clone(&state),
            events,
        };
        tokio::spawn(task.run(messages_rx, close_rx));

        Box::new(TungsteniteConnection { state, messages: messages_tx, close: Some(close_tx) })
    }
}

fn encode(state: ReadyState) -> u8 {
    match state {
        ReadyState::Connecting => 0,
        ReadyState::Open => 1,
        ReadyState::Closing => 2,
        ReadyState::Closed => 3,
    }
}

fn decode(raw: u8) -> ReadyState {
    match raw {
        0 => ReadyState::Connecting,
        1 => ReadyState::Open,
        2 => ReadyState::Closing,
        _ => ReadyState::Closed,
    }
}

#[derive(Debug)]
struct TungsteniteConnection {
    state: Arc<AtomicU8>,
    messages: mpsc::UnboundedSender<Message>,
    close: Option<oneshot::Sender<Option<CloseFrame>>>,
}

impl TransportConnection for TungsteniteConnection {
    fn ready_state(&self) -> ReadyState {
        decode(self.state.load(Ordering::Acquire))
    }

    fn send(&mut self, message: Message) -> Result<(), SendError> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(SendError::new(message, TransportError::NotOpen(state)));
        }
        self.messages
            .send(message)
            .map_err(|err| SendError::new(err.0, TransportError::Closed))
    }

    fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        let Some(close) = self.close.take() else {
            return;
        };
        let frame = code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: reason.unwrap_or_default().into(),
        });
        let _ = self.state.compare_exchange(
            encode(ReadyState::Open),
            encode(ReadyState::Closing),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        // the task may already be gone; nothing left to close then
        let _ = close.send(frame);
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct ConnectionTask {
    url: Url,
    protocols: Vec<String>,
    connect_timeout: Option<Duration>,
    state: Arc<AtomicU8>,
    events: TransportEvents,
}

impl ConnectionTask {
    fn set_state(&self, state: ReadyState) {
        self.state.store(encode(state), Ordering::Release);
    }

    fn finish(&self, close: CloseEvent) {
        self.set_state(ReadyState::Closed);
        debug!(url = %self.url, generation = self.events.generation(), %close, "transport closed");
        self.events.emit(TransportEvent::Close(close));
    }

    fn fail(&self, message: String) {
        warn!(url = %self.url, generation = self.events.generation(), error = %message, "transport error");
        self.events.emit(TransportEvent::Error(message));
        self.finish(abnormal());
    }

    async fn connect(&self) -> Result<Socket, String> {
        let request = client_request(&self.url, &self.protocols)?;
        let handshake = tokio_tungstenite::connect_async(request);
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| format!("connect timed out after {:?}", limit))?,
            None => handshake.await,
        };
        result.map(|(socket, _response)| socket).map_err(|err| err.to_string())
    }

    async fn run(
        self,
        mut messages: mpsc::UnboundedReceiver<Message>,
        mut close_rx: oneshot::Receiver<Option<CloseFrame>>,
    ) {
        let connected = tokio::select! {
            result = self.connect() => result,
            _ = &mut close_rx => {
                self.finish(CloseEvent {
                    code: Some(ABNORMAL_CLOSURE),
                    reason: "closed before the connection was established".into(),
                    was_clean: false,
                });
                return;
            }
        };

        let mut socket = match connected {
            Ok(socket) => socket,
            Err(message) => return self.fail(message),
        };

        let opened = self.state.compare_exchange(
            encode(ReadyState::Connecting),
            encode(ReadyState::Open),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if opened.is_err() {
            let _ = socket.close(None).await;
            return self.finish(abnormal());
        }

        debug!(url = %self.url, generation = self.events.generation(), "transport open");
        self.events.emit(TransportEvent::Open);

        let (mut sink, mut stream) = socket.split();
        let mut writable = true;
        let mut closing = false;
        let mut peer_close: Option<Option<CloseFrame>> = None;

        let close = loop {
            tokio::select! {
                biased;
                outgoing = messages.recv(), if writable => match outgoing {
                    Some(message) => {
                        if let Err(err) = sink.send(to_frame(message)).await {
                            self.events.emit(TransportEvent::Error(err.to_string()));
                            break abnormal();
                        }
                    }
                    None => {
                        // owning handle dropped
                        writable = false;
                        if !closing {
                            closing = true;
                            self.set_state(ReadyState::Closing);
                            let _ = sink.send(WsMessage::Close(None)).await;
                        }
                    }
                },
                request = &mut close_rx, if !closing => {
                    closing = true;
                    self.set_state(ReadyState::Closing);
                    let frame = request.unwrap_or(None);
                    if let Err(err) = sink.send(WsMessage::Close(frame)).await {
                        self.events.emit(TransportEvent::Error(err.to_string()));
                        break abnormal();
                    }
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        self.events.emit(TransportEvent::Message(Message::Text(text.as_str().to_owned())));
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        self.events.emit(TransportEvent::Message(Message::Binary(bytes.to_vec())));
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        peer_close = Some(frame);
                        self.set_state(ReadyState::Closing);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                        break closed_by_peer(peer_close.take());
                    }
                    Some(Err(err)) => {
                        self.events.emit(TransportEvent::Error(err.to_string()));
                        break abnormal();
                    }
                },
            }
        };

        self.finish(close);
    }
}

fn client_request(url: &Url, protocols: &[String]) -> Result<Request, String> {
    let mut request = url.as_str().into_client_request().map_err(|err| err.to_string())?;
    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", ")).map_err(|err| err.to_string())?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }
    Ok(request)
}

fn to_frame(message: Message) -> WsMessage {
    match message {
        Message::Text(text) => WsMessage::text(text),
        Message::Binary(bytes) => WsMessage::binary(bytes),
    }
}

fn abnormal() -> CloseEvent {
    CloseEvent { code: Some(ABNORMAL_CLOSURE), reason: String::new(), was_clean: false }
}

fn closed_by_peer(frame: Option<Option<CloseFrame>>) -> CloseEvent {
    match frame {
        Some(Some(frame)) => CloseEvent {
            code: Some(u16::from(frame.code)),
            reason: frame.reason.as_str().to_owned(),
            was_clean: true,
        },
        Some(None) => {
            CloseEvent { code: Some(NO_STATUS_RECEIVED), reason: String::new(), was_clean: true }
        }
        None => abnormal(),
    }
}
