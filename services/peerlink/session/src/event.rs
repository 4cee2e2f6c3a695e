//! Application-visible events and the queue that carries them from the
//! worker thread to the polling thread.

use crate::types::PeerId;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Something the caller learns about on the next poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Handshake completed
    Connected(PeerId),
    /// Link lost, connect failed, or explicit disconnect of a live link
    Disconnected(PeerId),
    /// One complete inbound packet
    Packet(PeerId, Bytes),
}

impl Event {
    /// Peer this event belongs to
    pub fn peer(&self) -> PeerId {
        match self {
            Event::Connected(peer) | Event::Disconnected(peer) | Event::Packet(peer, _) => *peer,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<Event>,
    // Peers whose last queued connection event was `Connected`.
    up: HashSet<PeerId>,
    // Peers the caller disconnected whose task has not been reaped yet.
    retired: HashSet<PeerId>,
}

/// FIFO shared between the worker (producer) and the poller (consumer).
///
/// Once a peer is [retired](Self::retire), events already queued for it are
/// kept; later pushes are dropped, except the disconnect closing a link the
/// caller still sees as up.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<Inner>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking callback must not wedge the queue for everyone else.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event. Returns false if it was dropped for a retired peer.
    pub fn push(&self, event: Event) -> bool {
        let mut inner = self.lock();
        let peer = event.peer();
        if inner.retired.contains(&peer) {
            let keep = matches!(event, Event::Disconnected(_)) && inner.up.remove(&peer);
            if !keep {
                trace!("Dropping {:?} for retired peer {}", event, peer);
                return false;
            }
        } else {
            match event {
                Event::Connected(_) => {
                    inner.up.insert(peer);
                }
                Event::Disconnected(_) => {
                    inner.up.remove(&peer);
                }
                Event::Packet(..) => {}
            }
        }
        inner.queue.push_back(event);
        true
    }

    /// Stop accepting new events for a peer the caller disconnected
    pub fn retire(&self, peer: PeerId) {
        self.lock().retired.insert(peer);
    }

    /// Forget a peer whose task has finished
    pub fn release(&self, peer: PeerId) {
        let mut inner = self.lock();
        inner.retired.remove(&peer);
        inner.up.remove(&peer);
    }

    /// Take everything queued right now, leaving later pushes for the next call
    pub fn take_snapshot(&self) -> VecDeque<Event> {
        std::mem::take(&mut self.lock().queue)
    }

    /// Drop everything, including retirement bookkeeping
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let n = inner.queue.len();
        inner.queue.clear();
        inner.up.clear();
        inner.retired.clear();
        n
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_preserves_order_and_empties() {
        let queue = EventQueue::new();
        queue.push(Event::Connected(PeerId(1)));
        queue.push(Event::Packet(PeerId(1), Bytes::from_static(b"x")));
        queue.push(Event::Disconnected(PeerId(1)));

        let snapshot: Vec<Event> = queue.take_snapshot().into();
        assert_eq!(
            snapshot,
            vec![
                Event::Connected(PeerId(1)),
                Event::Packet(PeerId(1), Bytes::from_static(b"x")),
                Event::Disconnected(PeerId(1)),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_reports_dropped_count() {
        let queue = EventQueue::new();
        queue.push(Event::Connected(PeerId(1)));
        queue.push(Event::Packet(PeerId(2), Bytes::new()));

        assert_eq!(queue.take_snapshot().front().map(Event::peer), Some(PeerId(1)));
        queue.push(Event::Disconnected(PeerId(1)));
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_retire_keeps_queued_events() {
        let queue = EventQueue::new();
        queue.push(Event::Connected(PeerId(1)));
        queue.push(Event::Packet(PeerId(1), Bytes::from_static(b"abc")));

        queue.retire(PeerId(1));
        assert!(!queue.push(Event::Packet(PeerId(1), Bytes::from_static(b"late"))));
        assert!(queue.push(Event::Disconnected(PeerId(1))));
        assert!(!queue.push(Event::Disconnected(PeerId(1))));

        let snapshot: Vec<Event> = queue.take_snapshot().into();
        assert_eq!(
            snapshot,
            vec![
                Event::Connected(PeerId(1)),
                Event::Packet(PeerId(1), Bytes::from_static(b"abc")),
                Event::Disconnected(PeerId(1)),
            ]
        );
    }

    #[test]
    fn test_retired_peer_link_down_stays_silent() {
        let queue = EventQueue::new();
        queue.push(Event::Connected(PeerId(2)));
        queue.push(Event::Disconnected(PeerId(2)));
        queue.take_snapshot();

        // A retry completing after the disconnect request is never reported.
        queue.retire(PeerId(2));
        assert!(!queue.push(Event::Connected(PeerId(2))));
        assert!(!queue.push(Event::Disconnected(PeerId(2))));
        assert!(queue.is_empty());

        queue.release(PeerId(2));
        assert!(queue.push(Event::Connected(PeerId(2))));
    }
}
