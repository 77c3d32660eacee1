//! Shared state of the relay: the connection registry and the player table,
//! owned together and guarded by one lock.
//!
//! Every operation that reads and then writes either map runs inside a single
//! critical section, so no observer ever sees an id present in one map and
//! missing from the other. Fan-out inside a critical section is safe because
//! it only queues frames and never waits on a socket.

use crate::client_manager::{ClientManager, DeliveryFailure, Frame, Transport};
use crate::error::JoinError;
use crate::game::{GameState, PlayerRecord};
use crate::relay::{self, encode_frame, DeliveryReport};
use log::{debug, warn};
use shared::{ClientId, Hello, PlayerView, ServerMessage, ShotRequest};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};

struct ArenaState {
    clients: ClientManager,
    game: GameState,
}

impl ArenaState {
    fn remove(&mut self, id: &ClientId) -> bool {
        let had_client = self.clients.remove_client(id);
        let had_player = self.game.remove_player(id).is_some();
        had_client || had_player
    }
}

pub struct Arena {
    state: RwLock<ArenaState>,
}

impl Arena {
    pub fn new(max_clients: usize) -> Self {
        Self {
            state: RwLock::new(ArenaState {
                clients: ClientManager::new(max_clients),
                game: GameState::new(),
            }),
        }
    }

    /// Completes a handshake: allocates the next id, queues `welcome` on the
    /// new connection and registers both the connection and its player record.
    ///
    /// The welcome is queued before the connection becomes visible to the
    /// broadcaster, so it is always the first frame the client receives.
    pub async fn join(
        &self,
        hello: Hello,
        addr: SocketAddr,
        transport: Transport,
        sender: mpsc::Sender<Frame>,
    ) -> Result<ClientId, JoinError> {
        let mut state = self.state.write().await;

        let id = state
            .clients
            .add_client(addr, transport, sender)
            .ok_or(JoinError::ServerFull)?;

        if let Some(frame) = encode_frame(&ServerMessage::Welcome { id }) {
            if let Err(reason) = state.clients.send_to(id, frame) {
                state.clients.remove_client(&id);
                return Err(JoinError::Unreachable(reason));
            }
        }

        state.game.add_player(id, PlayerRecord::from_hello(id, hello));
        Ok(id)
    }

    /// Removes a client from both maps. Safe to call more than once.
    pub async fn leave(&self, id: ClientId) -> bool {
        self.state.write().await.remove(&id)
    }

    /// Removes every listed client, typically the failures of a fan-out.
    pub async fn evict(&self, ids: &[ClientId]) {
        if ids.is_empty() {
            return;
        }

        let mut state = self.state.write().await;
        for id in ids {
            if state.remove(id) {
                warn!("Evicted client {}: outbound delivery failed", id);
            }
        }
    }

    pub async fn update_position(&self, id: ClientId, x: f64, y: f64) -> bool {
        self.state.write().await.game.set_position(id, x, y)
    }

    /// Relays a shot to every connection, the shooter included.
    pub async fn relay_shot(&self, owner: ClientId, shot: ShotRequest) -> DeliveryReport {
        let report = {
            let state = self.state.read().await;
            if !state.clients.contains(&owner) {
                return DeliveryReport::default();
            }
            relay::relay(&state.clients, &ServerMessage::Shot(shot.into_event(owner)))
        };

        self.evict(&report.failed).await;
        report
    }

    /// Applies a hit and relays the victim's resulting hp to everyone.
    ///
    /// Returns `None` without relaying anything when the victim does not exist
    /// or the attacker is no longer registered.
    pub async fn apply_hit(&self, attacker: ClientId, victim: ClientId, damage: i32) -> Option<i32> {
        let (hp, report) = {
            let mut state = self.state.write().await;
            if !state.clients.contains(&attacker) {
                return None;
            }
            let hp = state.game.apply_hit(victim, damage, Instant::now())?;
            debug!("Client {} hit {} for {}, hp now {}", attacker, victim, damage, hp);
            let report = relay::relay(&state.clients, &ServerMessage::Hp { id: victim, hp });
            (hp, report)
        };

        self.evict(&report.failed).await;
        Some(hp)
    }

    /// Restores the client to full health, opens its invulnerability window
    /// and relays the new hp to everyone.
    pub async fn revive(&self, id: ClientId) -> Option<i32> {
        let (hp, report) = {
            let mut state = self.state.write().await;
            let hp = state.game.revive(id, Instant::now())?;
            debug!("Client {} revived", id);
            let report = relay::relay(&state.clients, &ServerMessage::Hp { id, hp });
            (hp, report)
        };

        self.evict(&report.failed).await;
        Some(hp)
    }

    /// Queues a message for one client only.
    pub async fn send_to(&self, id: ClientId, message: &ServerMessage) -> bool {
        let Some(frame) = encode_frame(message) else {
            return false;
        };

        let result = self.state.read().await.clients.send_to(id, frame);
        match result {
            Ok(()) => true,
            Err(DeliveryFailure::Unknown) => false,
            Err(_) => {
                self.evict(&[id]).await;
                false
            }
        }
    }

    /// Fans out a `state` snapshot of every player to every connection.
    ///
    /// The snapshot is taken and queued under one read lock, so each record
    /// appears exactly once and never half-removed.
    pub async fn broadcast_state(&self) -> DeliveryReport {
        let report = {
            let state = self.state.read().await;
            if state.clients.is_empty() {
                return DeliveryReport::default();
            }
            let players = state.game.snapshot();
            relay::relay(&state.clients, &ServerMessage::State { players })
        };

        self.evict(&report.failed).await;
        report
    }

    pub async fn snapshot(&self) -> BTreeMap<ClientId, PlayerView> {
        self.state.read().await.game.snapshot()
    }

    pub async fn player(&self, id: ClientId) -> Option<PlayerRecord> {
        self.state.read().await.game.get(&id).cloned()
    }

    pub async fn is_registered(&self, id: ClientId) -> bool {
        self.state.read().await.clients.contains(&id)
    }

    /// Registered clients and player records, read in one critical section.
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.read().await;
        (state.clients.len(), state.game.len())
    }

    pub async fn player_count(&self) -> usize {
        self.state.read().await.game.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode_server_message, MAX_HP};
    use std::sync::Arc;

    fn addr() -> SocketAddr {
        "127.0.0.1:7000".parse().unwrap()
    }

    async fn join(arena: &Arena, capacity: usize) -> (ClientId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = arena
            .join(Hello::default(), addr(), Transport::Tcp, tx)
            .await
            .unwrap();
        (id, rx)
    }

    fn next_message(rx: &mut mpsc::Receiver<Frame>) -> ServerMessage {
        let frame = rx.try_recv().expect("frame queued");
        decode_server_message(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_join_queues_welcome_first() {
        let arena = Arena::new(8);
        let (id, mut rx) = join(&arena, 8).await;

        assert_eq!(id, 1);
        assert_eq!(next_message(&mut rx), ServerMessage::Welcome { id: 1 });
        assert!(arena.is_registered(id).await);
        assert_eq!(arena.counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_join_when_full() {
        let arena = Arena::new(1);
        join(&arena, 8).await;

        let (tx, _rx) = mpsc::channel(8);
        let result = arena.join(Hello::default(), addr(), Transport::Tcp, tx).await;
        assert!(matches!(result, Err(JoinError::ServerFull)));
        assert_eq!(arena.counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_join_with_closed_outbound_is_rolled_back() {
        let arena = Arena::new(4);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let result = arena.join(Hello::default(), addr(), Transport::Tcp, tx).await;
        assert!(matches!(
            result,
            Err(JoinError::Unreachable(DeliveryFailure::Closed))
        ));
        assert_eq!(arena.counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_leave_removes_from_both_maps() {
        let arena = Arena::new(8);
        let (a, _rx_a) = join(&arena, 8).await;
        let (b, _rx_b) = join(&arena, 8).await;

        assert!(arena.leave(a).await);
        assert!(!arena.leave(a).await);
        assert_eq!(arena.counts().await, (1, 1));
        assert!(arena.player(a).await.is_none());
        assert!(arena.player(b).await.is_some());
    }

    #[tokio::test]
    async fn test_hit_relays_hp_to_everyone() {
        let arena = Arena::new(8);
        let (a, mut rx_a) = join(&arena, 8).await;
        let (b, mut rx_b) = join(&arena, 8).await;
        next_message(&mut rx_a);
        next_message(&mut rx_b);

        assert_eq!(arena.apply_hit(a, b, 30).await, Some(70));

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(next_message(rx), ServerMessage::Hp { id: b, hp: 70 });
        }
    }

    #[tokio::test]
    async fn test_hit_on_missing_victim_relays_nothing() {
        let arena = Arena::new(8);
        let (a, mut rx_a) = join(&arena, 8).await;
        next_message(&mut rx_a);

        assert_eq!(arena.apply_hit(a, 42, 30).await, None);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_revive_then_hit_is_ignored() {
        let arena = Arena::new(8);
        let (a, mut rx_a) = join(&arena, 16).await;
        let (b, _rx_b) = join(&arena, 16).await;
        next_message(&mut rx_a);

        arena.apply_hit(b, a, 100).await;
        assert_eq!(arena.revive(a).await, Some(MAX_HP));
        assert_eq!(arena.apply_hit(b, a, 30).await, Some(MAX_HP));

        assert_eq!(next_message(&mut rx_a), ServerMessage::Hp { id: a, hp: 0 });
        assert_eq!(next_message(&mut rx_a), ServerMessage::Hp { id: a, hp: MAX_HP });
        assert_eq!(next_message(&mut rx_a), ServerMessage::Hp { id: a, hp: MAX_HP });
    }

    #[tokio::test]
    async fn test_shot_is_relayed_to_shooter_too() {
        let arena = Arena::new(8);
        let (a, mut rx_a) = join(&arena, 8).await;
        let (_b, mut rx_b) = join(&arena, 8).await;
        next_message(&mut rx_a);
        next_message(&mut rx_b);

        let report = arena.relay_shot(a, ShotRequest::new(10.0, 10.0, 5.0, 0.0)).await;
        assert_eq!(report.delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match next_message(rx) {
                ServerMessage::Shot(event) => assert_eq!(event.owner, a),
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_evicts_stalled_client() {
        let arena = Arena::new(8);
        // Capacity 1 is used up by the welcome frame.
        let (stalled, _rx_stalled) = join(&arena, 1).await;
        let (healthy, mut rx_healthy) = join(&arena, 8).await;
        next_message(&mut rx_healthy);

        let report = arena.broadcast_state().await;
        assert_eq!(report.failed, vec![stalled]);
        assert_eq!(report.delivered, 1);

        assert!(!arena.is_registered(stalled).await);
        assert!(arena.player(stalled).await.is_none());

        match next_message(&mut rx_healthy) {
            ServerMessage::State { players } => {
                assert!(players.contains_key(&healthy));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // The next tick no longer includes the evicted player.
        arena.broadcast_state().await;
        match next_message(&mut rx_healthy) {
            ServerMessage::State { players } => {
                assert_eq!(players.keys().copied().collect::<Vec<_>>(), vec![healthy]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_evicted_client_cannot_hit() {
        let arena = Arena::new(8);
        let (stalled, _rx_stalled) = join(&arena, 1).await;
        let (healthy, mut rx_healthy) = join(&arena, 8).await;
        next_message(&mut rx_healthy);

        arena.broadcast_state().await;
        assert!(!arena.is_registered(stalled).await);
        next_message(&mut rx_healthy);

        assert_eq!(arena.apply_hit(stalled, healthy, 30).await, None);
        assert_eq!(arena.player(healthy).await.unwrap().hp, MAX_HP);
        assert!(rx_healthy.try_recv().is_err());

        let shot = arena.relay_shot(stalled, ShotRequest::new(0.0, 0.0, 1.0, 1.0)).await;
        assert_eq!(shot, DeliveryReport::default());
        assert!(rx_healthy.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_with_no_clients() {
        let arena = Arena::new(8);
        assert_eq!(arena.broadcast_state().await, DeliveryReport::default());
    }

    #[tokio::test]
    async fn test_send_to_evicts_closed_connection() {
        let arena = Arena::new(8);
        let (a, rx) = join(&arena, 8).await;
        drop(rx);

        assert!(!arena.send_to(a, &ServerMessage::Pong).await);
        assert_eq!(arena.counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_concurrent_joins_get_distinct_ids() {
        let arena = Arc::new(Arena::new(64));
        let mut handles = Vec::new();

        for _ in 0..32 {
            let arena = Arc::clone(&arena);
            handles.push(tokio::spawn(async move {
                let (tx, rx) = mpsc::channel(4);
                let id = arena
                    .join(Hello::default(), addr(), Transport::Tcp, tx)
                    .await
                    .unwrap();
                (id, rx)
            }));
        }

        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for handle in handles {
            let (id, rx) = handle.await.unwrap();
            ids.push(id);
            receivers.push(rx);
        }
        ids.sort_unstable();

        assert_eq!(ids, (1..=32).collect::<Vec<ClientId>>());
        assert_eq!(arena.snapshot().await.len(), 32);
    }
}
