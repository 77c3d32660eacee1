//! Connection Registry for the relay server
//!
//! This module tracks every client that has completed its handshake, including:
//! - Client identity allocation (monotonic, starting at 1, never reused)
//! - The outbound handle used to queue frames for each connection
//! - Capacity enforcement for concurrent players
//!
//! The registry never touches sockets. Each connection owns a bounded queue
//! drained by its own writer task; the registry only holds the sending side.
//! A send that cannot be queued immediately is reported back to the caller so
//! the recipient can be evicted instead of stalling everyone else.

use log::info;
use shared::ClientId;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// One encoded message, shared by every recipient of a fan-out.
pub type Frame = Arc<str>;

/// Which transport a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    WebSocket,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::WebSocket => write!(f, "ws"),
        }
    }
}

/// Why a frame could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The client is not (or no longer) registered.
    Unknown,
    /// The outbound queue is full; the peer is not keeping up.
    QueueFull,
    /// The writer task has exited.
    Closed,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Unknown => write!(f, "unknown client"),
            DeliveryFailure::QueueFull => write!(f, "outbound queue full"),
            DeliveryFailure::Closed => write!(f, "connection closed"),
        }
    }
}

/// A registered connection and the handle used to reach it.
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: ClientId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    pub transport: Transport,
    pub connected_at: Instant,
    sender: mpsc::Sender<Frame>,
}

impl Client {
    pub fn new(
        id: ClientId,
        addr: SocketAddr,
        transport: Transport,
        sender: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            id,
            addr,
            transport,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// Queues a frame without waiting.
    pub fn try_send(&self, frame: Frame) -> Result<(), DeliveryFailure> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }
}

/// Manages all registered clients.
///
/// Identities come from a counter that only ever increases, so an id is never
/// handed out twice during the lifetime of the process, even after the client
/// holding it disconnects.
pub struct ClientManager {
    clients: HashMap<ClientId, Client>,
    next_client_id: ClientId,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    /// Registers a connection under a fresh id.
    ///
    /// Returns `None` without consuming an id when the registry is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        transport: Transport,
        sender: mpsc::Sender<Frame>,
    ) -> Option<ClientId> {
        if self.is_full() {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {} ({})", client_id, addr, transport);
        self.clients
            .insert(client_id, Client::new(client_id, addr, transport, sender));

        Some(client_id)
    }

    /// Removes a client. Dropping its sender lets the writer task drain and exit.
    pub fn remove_client(&mut self, client_id: &ClientId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected after {:.1}s",
                client.id,
                client.connected_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Queues a frame for one client.
    pub fn send_to(&self, client_id: ClientId, frame: Frame) -> Result<(), DeliveryFailure> {
        match self.clients.get(&client_id) {
            Some(client) => client.try_send(frame),
            None => Err(DeliveryFailure::Unknown),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn channel() -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        mpsc::channel(4)
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut manager = ClientManager::new(8);
        let (tx, _rx) = channel();

        let ids: Vec<ClientId> = (0..4)
            .map(|_| manager.add_client(test_addr(), Transport::Tcp, tx.clone()).unwrap())
            .collect();

        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut manager = ClientManager::new(8);
        let (tx, _rx) = channel();

        let first = manager.add_client(test_addr(), Transport::Tcp, tx.clone()).unwrap();
        assert!(manager.remove_client(&first));

        let second = manager
            .add_client(test_addr(), Transport::WebSocket, tx.clone())
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        let (tx, _rx) = channel();

        assert_eq!(manager.add_client(test_addr(), Transport::Tcp, tx.clone()), Some(1));
        assert!(manager.is_full());
        assert_eq!(manager.add_client(test_addr(), Transport::Tcp, tx.clone()), None);

        // A rejected join does not consume an id.
        manager.remove_client(&1);
        assert_eq!(manager.add_client(test_addr(), Transport::Tcp, tx), Some(2));
    }

    #[test]
    fn test_remove_nonexistent_client() {
        let mut manager = ClientManager::new(2);
        assert!(!manager.remove_client(&999));
    }

    #[tokio::test]
    async fn test_send_to_queues_frame() {
        let mut manager = ClientManager::new(2);
        let (tx, mut rx) = channel();
        let id = manager.add_client(test_addr(), Transport::Tcp, tx).unwrap();

        let frame: Frame = Arc::from(r#"{"type":"pong"}"#);
        assert_eq!(manager.send_to(id, frame.clone()), Ok(()));
        assert_eq!(rx.recv().await, Some(frame));
    }

    #[test]
    fn test_send_to_reports_failures() {
        let mut manager = ClientManager::new(4);
        let frame: Frame = Arc::from("{}");

        assert_eq!(manager.send_to(7, frame.clone()), Err(DeliveryFailure::Unknown));

        let (tx, _rx) = mpsc::channel(1);
        let slow = manager.add_client(test_addr(), Transport::Tcp, tx).unwrap();
        assert_eq!(manager.send_to(slow, frame.clone()), Ok(()));
        assert_eq!(
            manager.send_to(slow, frame.clone()),
            Err(DeliveryFailure::QueueFull)
        );

        let (tx, rx) = mpsc::channel(1);
        let gone = manager.add_client(test_addr(), Transport::Tcp, tx).unwrap();
        drop(rx);
        assert_eq!(manager.send_to(gone, frame), Err(DeliveryFailure::Closed));
    }

    #[test]
    fn test_transport_display() {
        assert_eq!(Transport::Tcp.to_string(), "tcp");
        assert_eq!(Transport::WebSocket.to_string(), "ws");
    }
}
