//! Connected-client registry.
//!
//! Each WebSocket connection registers an outbound channel here; frame
//! flushes hand encoded wire messages to the hub, which forwards them into
//! the per-client queues fire-and-forget. A client that has disconnected
//! simply stops receiving: sends to it are dropped, never queued or retried.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Opaque per-connection identifier.
pub type ClientId = u64;

/// Where a frame is headed: one client or everybody.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Client(ClientId),
    Broadcast,
}

/// The set of currently connected clients and their outbound queues.
#[derive(Debug, Default)]
pub struct ClientHub {
    clients: Mutex<HashMap<ClientId, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection; returns its id and the outbound queue the
    /// connection's writer task drains into the socket.
    pub fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().unwrap().insert(id, tx);
        debug!(client = id, "client registered");
        (id, rx)
    }

    pub fn unregister(&self, id: ClientId) {
        self.clients.lock().unwrap().remove(&id);
        debug!(client = id, "client unregistered");
    }

    /// Send one wire message. Unknown or disconnected destinations are
    /// silently dropped.
    pub fn send(&self, dest: Destination, text: String) {
        let clients = self.clients.lock().unwrap();
        match dest {
            Destination::Client(id) => {
                if let Some(tx) = clients.get(&id) {
                    let _ = tx.send(text);
                } else {
                    trace!(client = id, "send to gone client dropped");
                }
            }
            Destination::Broadcast => {
                for tx in clients.values() {
                    let _ = tx.send(text.clone());
                }
            }
        }
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Drop entries whose connection task has gone away.
    ///
    /// Runs on the housekeeping cadence; between runs sends to dead clients
    /// are already no-ops.
    pub fn cleanup(&self) {
        self.clients.lock().unwrap().retain(|_, tx| !tx.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_to_single_client() {
        let hub = ClientHub::new();
        let (id, mut rx) = hub.register();
        let (_other, mut other_rx) = hub.register();

        hub.send(Destination::Client(id), "hello".to_string());
        assert_eq!(rx.try_recv().unwrap(), "hello");
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let hub = ClientHub::new();
        let (_a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        hub.send(Destination::Broadcast, "all".to_string());
        assert_eq!(rx_a.try_recv().unwrap(), "all");
        assert_eq!(rx_b.try_recv().unwrap(), "all");
    }

    #[test]
    fn test_send_to_gone_client_is_noop() {
        let hub = ClientHub::new();
        let (id, rx) = hub.register();
        drop(rx);
        hub.unregister(id);
        hub.send(Destination::Client(id), "lost".to_string());
        assert_eq!(hub.count(), 0);
    }

    #[test]
    fn test_cleanup_drops_closed_queues() {
        let hub = ClientHub::new();
        let (_id, rx) = hub.register();
        assert_eq!(hub.count(), 1);
        drop(rx);
        hub.cleanup();
        assert_eq!(hub.count(), 0);
    }
}
