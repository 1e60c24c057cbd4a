#![allow(dead_code)]

use resocket::{Listener, Websocket, WebsocketEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Install a tracing subscriber once per test binary. Output goes through the test writer.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every millisecond (virtual time under `start_paused`) until it holds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Events seen by a recording listener, in dispatch order.
#[derive(Clone)]
pub struct Recorded<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E: Clone> Recorded<E> {
    pub fn all(&self) -> Vec<E> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<E> {
        self.events.lock().unwrap().last().cloned()
    }
}

/// A listener that records every payload it receives.
pub fn recorder<E>() -> (Listener<E>, Recorded<E>)
where
    E: WebsocketEvent + Clone,
{
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let listener: Listener<E> = Arc::new(move |_: &Websocket, event: &E| {
        sink.lock().unwrap().push(event.clone());
    });
    (listener, Recorded { events })
}
