//! Callback dispatch on the polling thread.
//!
//! Callbacks are stored here and only ever invoked from [`Dispatcher::dispatch`],
//! which the caller reaches through `run_callbacks`. The worker thread never
//! touches this type.

use crate::event::{Event, EventQueue};
use crate::types::PeerId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Connection change callback: `(peer, connected)`
pub type ConnectionCallback = Box<dyn FnMut(PeerId, bool) + Send>;

/// Inbound packet callback: `(peer, payload)`
pub type DataCallback = Box<dyn FnMut(PeerId, &[u8]) + Send>;

/// Receiver for peer events, as an alternative to two closures.
///
/// Both methods default to doing nothing.
pub trait PeerHandler: Send {
    /// A peer connected (`true`) or disconnected (`false`)
    fn on_connection_change(&mut self, _peer: PeerId, _connected: bool) {}

    /// A complete packet arrived from a peer
    fn on_data(&mut self, _peer: PeerId, _payload: &[u8]) {}
}

/// One registered callback plus a counter bumped on every replacement.
///
/// The callback is taken out while it runs so it may replace itself (or the
/// other callback) without deadlocking; it is only put back if nobody
/// replaced it in the meantime.
struct Slot<F> {
    callback: Option<F>,
    generation: u64,
}

impl<F> Default for Slot<F> {
    fn default() -> Self {
        Self {
            callback: None,
            generation: 0,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn replace<F>(slot: &Mutex<Slot<F>>, callback: Option<F>) {
    let mut slot = lock(slot);
    slot.callback = callback;
    slot.generation = slot.generation.wrapping_add(1);
}

fn invoke<F>(slot: &Mutex<Slot<F>>, call: impl FnOnce(&mut F)) -> bool {
    let (mut callback, generation) = {
        let mut slot = lock(slot);
        match slot.callback.take() {
            Some(cb) => (cb, slot.generation),
            None => return false,
        }
    };

    call(&mut callback);

    let mut slot = lock(slot);
    if slot.generation == generation {
        slot.callback = Some(callback);
    }
    true
}

/// Clears the dispatching flag even if a callback panics.
struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Registered callbacks and the re-entrancy guard
#[derive(Default)]
pub struct Dispatcher {
    connection: Mutex<Slot<ConnectionCallback>>,
    data: Mutex<Slot<DataCallback>>,
    dispatching: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("has_connection_callback", &lock(&self.connection).callback.is_some())
            .field("has_data_callback", &lock(&self.data).callback.is_some())
            .field("dispatching", &self.dispatching.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher with no callbacks
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or clear the connection callback
    pub fn set_connection_callback(&self, callback: Option<ConnectionCallback>) {
        replace(&self.connection, callback);
    }

    /// Register or clear the data callback
    pub fn set_data_callback(&self, callback: Option<DataCallback>) {
        replace(&self.data, callback);
    }

    /// Route both callbacks to one handler
    pub fn set_handler<H: PeerHandler + 'static>(&self, handler: H) {
        let handler = Arc::new(Mutex::new(handler));
        let on_conn = handler.clone();
        self.set_connection_callback(Some(Box::new(move |peer: PeerId, connected: bool| {
            lock(&on_conn).on_connection_change(peer, connected)
        })));
        self.set_data_callback(Some(Box::new(move |peer: PeerId, payload: &[u8]| {
            lock(&handler).on_data(peer, payload)
        })));
    }

    /// Whether a dispatch is running right now
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }

    /// Drop both callbacks and refuse to deliver anything from now on.
    ///
    /// A dispatch already in progress stops before its next event.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.set_connection_callback(None);
        self.set_data_callback(None);
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deliver a snapshot of `queue` in order.
    ///
    /// Events pushed while callbacks run stay queued for the next call.
    /// Returns `None` when called from inside a callback, otherwise the
    /// number of events taken from the queue.
    pub fn dispatch(&self, queue: &EventQueue) -> Option<usize> {
        if self
            .dispatching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Ignoring re-entrant dispatch");
            return None;
        }
        let _guard = DispatchGuard(&self.dispatching);

        if self.is_closed() {
            return Some(0);
        }

        let events = queue.take_snapshot();
        let count = events.len();
        for event in events {
            if self.is_closed() {
                debug!("Dispatcher closed mid-dispatch, dropping remaining events");
                break;
            }
            match event {
                Event::Connected(peer) => {
                    invoke(&self.connection, |cb| cb(peer, true));
                }
                Event::Disconnected(peer) => {
                    invoke(&self.connection, |cb| cb(peer, false));
                }
                Event::Packet(peer, payload) => {
                    if !invoke(&self.data, |cb| cb(peer, &payload)) {
                        trace!("No data callback, discarding packet from peer {}", peer);
                    }
                }
            }
        }
        Some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn events(list: Vec<Event>) -> EventQueue {
        let queue = EventQueue::new();
        for event in list {
            queue.push(event);
        }
        queue
    }

    #[test]
    fn test_dispatch_in_order() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        dispatcher.set_connection_callback(Some(Box::new(move |peer: PeerId, up: bool| {
            l.lock().unwrap().push(format!("{}:{}", peer, up))
        })));
        let l = log.clone();
        dispatcher.set_data_callback(Some(Box::new(move |peer: PeerId, data: &[u8]| {
            l.lock().unwrap().push(format!("{}:{}", peer, String::from_utf8_lossy(data)))
        })));

        let n = dispatcher.dispatch(&events(vec![
            Event::Connected(PeerId(1)),
            Event::Packet(PeerId(1), Bytes::from_static(b"hi")),
            Event::Disconnected(PeerId(1)),
        ]));

        assert_eq!(n, Some(3));
        assert_eq!(*log.lock().unwrap(), vec!["1:true", "1:hi", "1:false"]);
    }

    #[test]
    fn test_missing_callback_discards() {
        let dispatcher = Dispatcher::new();
        let n = dispatcher.dispatch(&events(vec![Event::Packet(
            PeerId(2),
            Bytes::from_static(b"x"),
        )]));
        assert_eq!(n, Some(1));
    }

    #[test]
    fn test_callback_may_replace_itself() {
        let dispatcher = Arc::new(Dispatcher::new());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let d = dispatcher.clone();
        let c = calls.clone();
        dispatcher.set_connection_callback(Some(Box::new(move |_: PeerId, _: bool| {
            c.lock().unwrap().push("first");
            let c2 = c.clone();
            d.set_connection_callback(Some(Box::new(move |_: PeerId, _: bool| {
                c2.lock().unwrap().push("second")
            })));
        })));

        dispatcher.dispatch(&events(vec![Event::Connected(PeerId(1)), Event::Connected(PeerId(2))]));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_reentrant_dispatch_is_ignored() {
        let dispatcher = Arc::new(Dispatcher::new());
        let inner = Arc::new(Mutex::new(None));

        let d = dispatcher.clone();
        let r = inner.clone();
        dispatcher.set_connection_callback(Some(Box::new(move |_: PeerId, _: bool| {
            *r.lock().unwrap() = Some(d.dispatch(&EventQueue::new()));
        })));

        assert_eq!(
            dispatcher.dispatch(&events(vec![Event::Connected(PeerId(1))])),
            Some(1)
        );
        assert_eq!(*inner.lock().unwrap(), Some(None));
        assert!(!dispatcher.is_dispatching());
    }

    #[test]
    fn test_handler_receives_both_kinds() {
        #[derive(Default)]
        struct Recorder {
            log: Arc<Mutex<Vec<String>>>,
        }

        impl PeerHandler for Recorder {
            fn on_connection_change(&mut self, peer: PeerId, connected: bool) {
                self.log.lock().unwrap().push(format!("conn {} {}", peer, connected));
            }

            fn on_data(&mut self, peer: PeerId, payload: &[u8]) {
                self.log.lock().unwrap().push(format!("data {} {}", peer, payload.len()));
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();
        dispatcher.set_handler(Recorder { log: log.clone() });

        dispatcher.dispatch(&events(vec![
            Event::Connected(PeerId(7)),
            Event::Packet(PeerId(7), Bytes::from_static(b"abc")),
        ]));
        assert_eq!(*log.lock().unwrap(), vec!["conn 7 true", "data 7 3"]);
    }

    #[test]
    fn test_events_pushed_during_dispatch_wait_for_next_poll() {
        let dispatcher = Dispatcher::new();
        let queue = Arc::new(events(vec![Event::Connected(PeerId(1))]));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let q = queue.clone();
        let s = seen.clone();
        dispatcher.set_connection_callback(Some(Box::new(move |peer: PeerId, up: bool| {
            s.lock().unwrap().push(up);
            if up {
                q.push(Event::Disconnected(peer));
            }
        })));

        assert_eq!(dispatcher.dispatch(&queue), Some(1));
        assert_eq!(*seen.lock().unwrap(), vec![true]);
        assert_eq!(queue.len(), 1);

        assert_eq!(dispatcher.dispatch(&queue), Some(1));
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_close_stops_delivery() {
        let dispatcher = Arc::new(Dispatcher::new());
        let count = Arc::new(Mutex::new(0));

        let d = dispatcher.clone();
        let c = count.clone();
        dispatcher.set_connection_callback(Some(Box::new(move |_: PeerId, _: bool| {
            *c.lock().unwrap() += 1;
            d.close();
        })));

        let queue = events(vec![
            Event::Connected(PeerId(1)),
            Event::Connected(PeerId(2)),
        ]);
        dispatcher.dispatch(&queue);
        assert_eq!(*count.lock().unwrap(), 1);
        assert!(dispatcher.is_closed());

        queue.push(Event::Disconnected(PeerId(1)));
        assert_eq!(dispatcher.dispatch(&queue), Some(0));
        assert_eq!(queue.len(), 1);
    }
}
