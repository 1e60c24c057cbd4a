mod common;

use common::test_helpers::{eventually, init_tracing, recorder};
use resocket::transport::mock::MockTransport;
use resocket::{
    Backoff, CloseEvent, ErrorEvent, EventKind, ListenerOptions, Message, MessageEvent, OpenEvent,
    ReadyState, ReconnectEvent, RetryEvent, TrackingSleeper, UnboundedBuffer, Websocket,
    WebsocketBuilder,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const URL: &str = "ws://mock.test/feed";

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

async fn wait_open(socket: &Websocket) {
    eventually("socket open", || socket.ready_state() == ReadyState::Open).await;
    // let the pump finish dispatching the open notification
    tokio::time::sleep(ms(1)).await;
}

#[tokio::test(start_paused = true)]
async fn close_twice_has_one_round_of_side_effects() {
    init_tracing();
    let transport = MockTransport::auto_open();
    let (on_close, closes) = recorder::<CloseEvent>();
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::constant(ms(100)))
        .listener(on_close, None)
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;

    socket.close(Some(1000), Some("bye".into()));
    socket.close(None, None);

    eventually("close dispatched", || closes.len() == 1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(closes.len(), 1);
    let close = closes.last().unwrap();
    assert_eq!(close.code, Some(1000));
    assert_eq!(close.reason, "bye");
    assert_eq!(transport.latest().unwrap().close_calls(), vec![(Some(1000), Some("bye".to_string()))]);
    assert_eq!(transport.open_count(), 1);
    assert!(socket.closed_by_user());
}

#[tokio::test(start_paused = true)]
async fn once_listener_fires_once_across_two_reconnect_cycles() {
    let transport = MockTransport::auto_open();
    let opens = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&opens);
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::constant(ms(50)))
        .connect(transport.clone())
        .unwrap();
    let once = socket.once(move |_: &Websocket, _: &OpenEvent| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    let (on_reconnect, reconnects) = recorder::<ReconnectEvent>();
    socket.add_event_listener(on_reconnect, None);

    wait_open(&socket).await;
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert!(!socket.has_event_listener(&once));

    for cycle in 1..=2 {
        transport.latest().unwrap().drop_connection();
        eventually("reconnected", || reconnects.len() == cycle).await;
    }

    assert_eq!(transport.open_count(), 3);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(socket.listener_count(EventKind::Open), 0);
}

#[tokio::test(start_paused = true)]
async fn buffered_messages_are_delivered_in_order_after_the_server_returns() {
    let transport = MockTransport::auto_open();
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::constant(ms(1_000)))
        .buffer(UnboundedBuffer::new())
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;

    transport.set_refusing(true);
    transport.latest().unwrap().drop_connection();
    for text in ["one", "two", "three"] {
        socket.send(text);
    }
    assert_eq!(socket.buffered_len(), 3);

    // a few refused attempts while the server is down
    eventually("refused attempts", || transport.open_count() >= 3).await;
    assert_eq!(socket.buffered_len(), 3);

    transport.set_refusing(false);
    eventually("buffer flushed", || socket.buffered_len() == 0).await;

    let current = transport.latest().unwrap();
    assert_eq!(current.ready_state(), ReadyState::Open);
    assert_eq!(current.sent(), vec![Message::from("one"), Message::from("two"), Message::from("three")]);
}

#[tokio::test(start_paused = true)]
async fn send_right_after_reconnect_queues_behind_buffered_messages() {
    let transport = MockTransport::auto_open();
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::constant(ms(100)))
        .buffer(UnboundedBuffer::new())
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;

    transport.set_auto_open(false);
    transport.latest().unwrap().drop_connection();
    for text in ["one", "two", "three"] {
        socket.send(text);
    }
    eventually("second attempt", || transport.open_count() == 2).await;

    let conn = transport.latest().unwrap();
    conn.accept();
    socket.send("four");
    eventually("buffer flushed", || socket.buffered_len() == 0).await;

    assert_eq!(
        conn.sent(),
        vec![Message::from("one"), Message::from("two"), Message::from("three"), Message::from("four")]
    );
}

#[tokio::test(start_paused = true)]
async fn send_after_close_never_reaches_the_transport() {
    let transport = MockTransport::auto_open();
    let socket = WebsocketBuilder::new(URL)
        .buffer(UnboundedBuffer::new())
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;

    socket.close(None, None);
    socket.send("ignored");
    socket.send(vec![1u8, 2, 3]);

    assert_eq!(transport.send_count(), 0);
    assert_eq!(socket.buffered_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn max_retries_stops_reconnecting() {
    let transport = MockTransport::auto_open();
    let (on_retry, retries) = recorder::<RetryEvent>();
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::constant(ms(10)))
        .max_retries(3)
        .listener(on_retry, None)
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;

    transport.set_refusing(true);
    transport.latest().unwrap().drop_connection();
    eventually("three retries", || retries.len() == 3).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let counts: Vec<u32> = retries.all().iter().map(|r| r.retries).collect();
    assert_eq!(counts, vec![1, 2, 3]);
    assert_eq!(transport.open_count(), 4);
    assert_eq!(socket.retries(), 3);
    assert_eq!(socket.ready_state(), ReadyState::Closed);
    assert!(!socket.closed_by_user());
}

#[tokio::test]
async fn instant_reconnect_skips_only_the_first_delay() {
    let transport = MockTransport::auto_open();
    let sleeper = TrackingSleeper::new();
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::exponential(ms(100)))
        .instant_reconnect(true)
        .max_retries(3)
        .with_sleeper(sleeper.clone())
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;

    transport.set_refusing(true);
    transport.latest().unwrap().drop_connection();
    eventually("retries exhausted", || transport.open_count() == 4).await;

    assert_eq!(sleeper.calls(), vec![ms(0), ms(100), ms(200)]);
    assert_eq!(sleeper.total(), ms(300));
    assert_eq!(socket.backoff_retries(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn reconnect_resets_backoff_and_reports_retries() {
    let transport = MockTransport::auto_open();
    let (on_retry, retries) = recorder::<RetryEvent>();
    let (on_reconnect, reconnects) = recorder::<ReconnectEvent>();
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::exponential(ms(100)))
        .listener(on_retry, None)
        .listener(on_reconnect, None)
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;
    let first_open = socket.last_connection();
    assert!(first_open.is_some());

    transport.set_refusing(true);
    transport.latest().unwrap().drop_connection();
    eventually("two retries", || retries.len() >= 2).await;
    transport.set_refusing(false);
    eventually("reconnected", || reconnects.len() == 1).await;

    let delays: Vec<Duration> = retries.all().iter().map(|r| r.backoff).collect();
    assert_eq!(&delays[..2], &[ms(100), ms(200)]);

    let reconnect = reconnects.last().unwrap();
    assert_eq!(reconnect.retries as usize, retries.len());
    assert_eq!(reconnect.last_connection, first_open);
    assert_eq!(retries.last().unwrap().last_connection, first_open);
    assert_eq!(socket.backoff_retries(), Some(0));
    assert_eq!(socket.retries(), 0);
    assert!(socket.last_connection() >= first_open);
}

#[tokio::test(start_paused = true)]
async fn errors_and_messages_pass_through_without_reconnecting() {
    let transport = MockTransport::auto_open();
    let (on_error, errors) = recorder::<ErrorEvent>();
    let (on_message, messages) = recorder::<MessageEvent>();
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::constant(ms(10)))
        .listener(on_error, None)
        .listener(on_message, None)
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;

    let conn = transport.latest().unwrap();
    conn.error("flaky");
    conn.receive("text");
    conn.receive(vec![0u8, 1]);
    eventually("messages", || messages.len() == 2).await;

    assert_eq!(errors.all(), vec![ErrorEvent { message: "flaky".into() }]);
    assert_eq!(messages.all()[0].data, Message::from("text"));
    assert!(messages.all()[1].data.is_binary());
    assert_eq!(transport.open_count(), 1);
    assert_eq!(socket.ready_state(), ReadyState::Open);
}

#[tokio::test(start_paused = true)]
async fn user_close_cancels_a_pending_retry() {
    let transport = MockTransport::auto_open();
    let (on_retry, retries) = recorder::<RetryEvent>();
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::constant(Duration::from_secs(1)))
        .listener(on_retry, None)
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;

    transport.latest().unwrap().drop_connection();
    eventually("retry scheduled", || socket.retries() == 1).await;
    socket.close(None, None);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(retries.len(), 0);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn closing_from_a_retry_listener_prevents_the_attempt() {
    let transport = MockTransport::auto_open();
    let socket = WebsocketBuilder::new(URL)
        .backoff(Backoff::constant(ms(10)))
        .on_retry(|socket, _| socket.close(None, None))
        .connect(transport.clone())
        .unwrap();
    wait_open(&socket).await;

    transport.latest().unwrap().drop_connection();
    eventually("closed by listener", || socket.closed_by_user()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn listener_removal_matches_options_exactly() {
    let transport = MockTransport::auto_open();
    let socket = WebsocketBuilder::new(URL).connect(transport.clone()).unwrap();
    let (listener, messages) = recorder::<MessageEvent>();
    socket.add_event_listener(listener.clone(), Some(ListenerOptions::once()));

    assert_eq!(socket.remove_event_listener(&listener, None), 0);
    assert_eq!(socket.remove_event_listener(&listener, Some(ListenerOptions::default())), 0);
    assert_eq!(socket.remove_event_listener(&listener, Some(ListenerOptions::once())), 1);

    wait_open(&socket).await;
    transport.latest().unwrap().receive("unheard");
    tokio::time::sleep(ms(10)).await;
    assert_eq!(messages.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn handshake_uses_configured_url_and_protocols() {
    let transport = MockTransport::new();
    let socket = WebsocketBuilder::new(URL)
        .protocols(["v2.chat", "v1.chat"])
        .connect(transport.clone())
        .unwrap();

    let conn = transport.latest().unwrap();
    assert_eq!(conn.url().as_str(), URL);
    assert_eq!(conn.protocols(), vec!["v2.chat".to_string(), "v1.chat".to_string()]);
    assert_eq!(socket.protocols(), ["v2.chat".to_string(), "v1.chat".to_string()]);
    assert_eq!(socket.ready_state(), ReadyState::Connecting);
    assert_eq!(socket.last_connection(), None);

    conn.accept();
    wait_open(&socket).await;
    assert!(socket.last_connection().is_some());
}
