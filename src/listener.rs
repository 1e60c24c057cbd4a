//! Listener registry: per-event-kind ordered callbacks with once semantics.
//!
//! Semantics:
//! - `add` appends; registering the same callback twice yields two entries.
//! - `remove` drops entries whose callback identity (`Arc` pointer) *and* options both match.
//!   `None` options never match `Some(ListenerOptions::default())`.
//! - Dispatch invokes the entries present when the pass starts, in registration order, then
//!   removes the once-entries it invoked. A once-listener therefore fires on the next event of
//!   its kind and never again, no matter how many reconnects happen in between.
//! - A panicking listener is caught and logged; the remaining listeners still run.

use crate::event::{
    CloseEvent, ErrorEvent, EventKind, MessageEvent, OpenEvent, ReconnectEvent, RetryEvent,
};
use crate::websocket::Websocket;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Callback invoked with the owning handle and the event payload.
pub type Listener<E> = Arc<dyn Fn(&Websocket, &E) + Send + Sync>;

/// Wrap a closure as a [`Listener`]. Keep the returned `Arc` to remove it later.
pub fn listener<E, F>(f: F) -> Listener<E>
where
    F: Fn(&Websocket, &E) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Options recorded with a listener registration.
///
/// Only `once` changes dispatch behaviour; `capture` and `passive` are kept so that removal can
/// match on the exact options used at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ListenerOptions {
    pub once: bool,
    pub capture: bool,
    pub passive: bool,
}

impl ListenerOptions {
    pub fn once() -> Self {
        Self { once: true, ..Self::default() }
    }
}

/// One registered callback and its options.
pub struct ListenerEntry<E> {
    listener: Listener<E>,
    options: Option<ListenerOptions>,
}

impl<E> ListenerEntry<E> {
    fn is_once(&self) -> bool {
        self.options.map(|o| o.once).unwrap_or(false)
    }

    fn matches(&self, listener: &Listener<E>, options: Option<ListenerOptions>) -> bool {
        same_listener(&self.listener, listener) && self.options == options
    }
}

impl<E> Clone for ListenerEntry<E> {
    fn clone(&self) -> Self {
        Self { listener: Arc::clone(&self.listener), options: self.options }
    }
}

fn same_listener<E>(a: &Listener<E>, b: &Listener<E>) -> bool {
    // compare data pointers only; vtable addresses are not stable across codegen units
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Ordered entries for one event kind.
pub struct ListenerSlot<E> {
    entries: Vec<ListenerEntry<E>>,
}

impl<E> Default for ListenerSlot<E> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<E> Clone for ListenerSlot<E> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone() }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Payload types that can be listened for. Implemented for the six event payloads only.
pub trait WebsocketEvent: sealed::Sealed + Sized + Send + Sync + 'static {
    const KIND: EventKind;

    #[doc(hidden)]
    fn slot(registry: &ListenerRegistry) -> &ListenerSlot<Self>;

    #[doc(hidden)]
    fn slot_mut(registry: &mut ListenerRegistry) -> &mut ListenerSlot<Self>;
}

macro_rules! websocket_event {
    ($payload:ty, $kind:expr, $field:ident) => {
        impl sealed::Sealed for $payload {}

        impl WebsocketEvent for $payload {
            const KIND: EventKind = $kind;

            fn slot(registry: &ListenerRegistry) -> &ListenerSlot<Self> {
                &registry.$field
            }

            fn slot_mut(registry: &mut ListenerRegistry) -> &mut ListenerSlot<Self> {
                &mut registry.$field
            }
        }
    };
}

websocket_event!(OpenEvent, EventKind::Open, open);
websocket_event!(CloseEvent, EventKind::Close, close);
websocket_event!(ErrorEvent, EventKind::Error, error);
websocket_event!(MessageEvent, EventKind::Message, message);
websocket_event!(RetryEvent, EventKind::Retry, retry);
websocket_event!(ReconnectEvent, EventKind::Reconnect, reconnect);

/// Listener collections for every event kind.
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    open: ListenerSlot<OpenEvent>,
    close: ListenerSlot<CloseEvent>,
    error: ListenerSlot<ErrorEvent>,
    message: ListenerSlot<MessageEvent>,
    retry: ListenerSlot<RetryEvent>,
    reconnect: ListenerSlot<ReconnectEvent>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `E`.
    pub fn add<E: WebsocketEvent>(&mut self, listener: Listener<E>, options: Option<ListenerOptions>) {
        E::slot_mut(self).entries.push(ListenerEntry { listener, options });
    }

    /// Remove every entry matching both `listener` and `options`. Returns how many were removed.
    pub fn remove<E: WebsocketEvent>(
        &mut self,
        listener: &Listener<E>,
        options: Option<ListenerOptions>,
    ) -> usize {
        let entries = &mut E::slot_mut(self).entries;
        let before = entries.len();
        entries.retain(|entry| !entry.matches(listener, options));
        before - entries.len()
    }

    /// Entries present right now, for a dispatch pass.
    pub(crate) fn snapshot<E: WebsocketEvent>(&self) -> Vec<ListenerEntry<E>> {
        E::slot(self).entries.clone()
    }

    /// Drop the once-entries a dispatch pass invoked. Entries removed by a listener during the
    /// pass are simply not found.
    pub(crate) fn retire_fired<E: WebsocketEvent>(&mut self, fired: &[ListenerEntry<E>]) {
        let entries = &mut E::slot_mut(self).entries;
        for done in fired.iter().filter(|e| e.is_once()) {
            if let Some(pos) = entries.iter().position(|e| e.matches(&done.listener, done.options))
            {
                entries.remove(pos);
            }
        }
    }

    pub fn len(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Open => self.open.entries.len(),
            EventKind::Close => self.close.entries.len(),
            EventKind::Error => self.error.entries.len(),
            EventKind::Message => self.message.entries.len(),
            EventKind::Retry => self.retry.entries.len(),
            EventKind::Reconnect => self.reconnect.entries.len(),
        }
    }

    pub fn is_empty(&self, kind: EventKind) -> bool {
        self.len(kind) == 0
    }

    /// Whether `listener` is currently registered for `E` under any options.
    pub fn contains<E: WebsocketEvent>(&self, listener: &Listener<E>) -> bool {
        E::slot(self).entries.iter().any(|e| same_listener(&e.listener, listener))
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            map.entry(&kind.as_str(), &self.len(kind));
        }
        map.finish()
    }
}

/// Invoke `entries` in order. Panics are caught per listener and logged.
pub(crate) fn invoke_all<E: WebsocketEvent>(
    entries: &[ListenerEntry<E>],
    socket: &Websocket,
    event: &E,
) {
    let kind = E::KIND;
    for entry in entries {
        let outcome = catch_unwind(AssertUnwindSafe(|| (entry.listener)(socket, event)));
        if outcome.is_err() {
            tracing::error!(event = %kind, "listener panicked; continuing dispatch");
        }
    }
}
