mod common;

use common::test_helpers::eventually;
use resocket::prelude::*;
use resocket::{ManualClock, ReadyState};
use std::sync::Arc;
use std::time::Duration;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn take(backoff: &mut Backoff, n: usize) -> Vec<u64> {
    (0..n).map(|_| backoff.next().as_millis() as u64).collect()
}

#[test]
fn documented_backoff_sequences() {
    let mut constant = Backoff::constant(ms(5));
    assert_eq!(take(&mut constant, 10), vec![5; 10]);

    let mut exponential = Backoff::exponential(ms(100)).with_max_exponent(7).unwrap();
    assert_eq!(
        take(&mut exponential, 10),
        vec![100, 200, 400, 800, 1600, 3200, 6400, 6400, 6400, 6400]
    );

    let mut linear = Backoff::linear(ms(1000), ms(1000)).with_max(ms(5000)).unwrap();
    assert_eq!(take(&mut linear, 7), vec![1000, 2000, 3000, 4000, 5000, 5000, 5000]);
    assert_eq!(linear.retries(), 7);

    linear.reset();
    assert_eq!(linear.retries(), 0);
    assert_eq!(take(&mut linear, 5), vec![1000, 2000, 3000, 4000, 5000]);
}

#[test]
fn ring_buffer_of_five_keeps_the_last_five_writes() {
    let mut ring = RingBuffer::new(5).unwrap();
    for i in 0..7 {
        ring.add(i);
    }
    assert_eq!(ring.capacity(), Some(5));
    assert_eq!(ring.drain_all(), vec![2, 3, 4, 5, 6]);
    assert!(ring.is_empty());
}

#[test]
fn time_buffer_forgets_entries_older_than_max_age() {
    let clock = ManualClock::new();
    let mut buffer = TimeBuffer::with_clock(ms(1000), Arc::new(clock.clone()));
    buffer.add("a");
    buffer.add("b");

    clock.advance_millis(500);
    assert_eq!(buffer.len(), 2);

    clock.advance_millis(1000);
    assert_eq!(buffer.len(), 0);
    assert_eq!(buffer.read(), None);
}

#[tokio::test(start_paused = true)]
async fn ring_buffered_socket_delivers_only_the_newest_messages() {
    let transport = MockTransport::new();
    let socket = WebsocketBuilder::new("ws://mock.test/")
        .ring_buffer(2)
        .connect(transport.clone())
        .unwrap();

    for text in ["a", "b", "c", "d"] {
        socket.send(text);
    }
    assert_eq!(socket.buffered_len(), 2);

    let conn = transport.latest().unwrap();
    conn.accept();
    eventually("flushed", || socket.buffered_len() == 0).await;
    assert_eq!(socket.ready_state(), ReadyState::Open);
    assert_eq!(conn.sent(), vec![Message::from("c"), Message::from("d")]);
}

#[tokio::test(start_paused = true)]
async fn jittered_retry_delays_stay_within_the_backoff() {
    let transport = MockTransport::auto_open();
    let (on_retry, retries) = common::test_helpers::recorder::<RetryEvent>();
    let socket = WebsocketBuilder::new("ws://mock.test/")
        .backoff(Backoff::constant(ms(400)))
        .with_jitter(Jitter::equal())
        .listener(on_retry, None)
        .connect(transport.clone())
        .unwrap();
    eventually("open", || socket.ready_state() == ReadyState::Open).await;
    tokio::time::sleep(ms(1)).await;

    for cycle in 1..=3 {
        transport.latest().unwrap().drop_connection();
        eventually("retried", || retries.len() == cycle).await;
    }
    for retry in retries.all() {
        assert!(retry.backoff >= ms(200) && retry.backoff <= ms(400), "{:?}", retry.backoff);
    }
}
