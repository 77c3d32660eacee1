//! Per-connection protocol state machine.
//!
//! A session starts in [`SessionState::AwaitingHello`], becomes
//! [`SessionState::Active`] once a well-formed `hello` is accepted and ends in
//! [`SessionState::Terminated`]. It is transport-agnostic: the transport feeds
//! it one inbound unit at a time and it replies through the arena.

use crate::arena::Arena;
use crate::client_manager::{Frame, Transport};
use crate::error::JoinError;
use log::{debug, info, trace, warn};
use shared::{decode_client_message, ClientId, ClientMessage, Hello, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHello,
    Active(ClientId),
    Terminated,
}

/// What the transport should do after handing a unit to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Close,
}

pub struct Session {
    arena: Arc<Arena>,
    peer: SocketAddr,
    transport: Transport,
    state: SessionState,
    /// Held until the handshake moves it into the registry.
    outbound: Option<mpsc::Sender<Frame>>,
}

impl Session {
    pub fn new(
        arena: Arc<Arena>,
        peer: SocketAddr,
        transport: Transport,
        outbound: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            arena,
            peer,
            transport,
            state: SessionState::AwaitingHello,
            outbound: Some(outbound),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_id(&self) -> Option<ClientId> {
        match self.state {
            SessionState::Active(id) => Some(id),
            _ => None,
        }
    }

    /// Decodes one inbound unit and handles it. Malformed units are dropped.
    pub async fn handle_line(&mut self, line: &str) -> SessionFlow {
        if line.trim().is_empty() {
            return self.flow();
        }

        match decode_client_message(line) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                trace!("Dropping unit from {}: {}", self.peer, e);
                self.flow()
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) -> SessionFlow {
        match (self.state, message) {
            (SessionState::Terminated, _) => SessionFlow::Close,

            (SessionState::AwaitingHello, ClientMessage::Hello(hello)) => self.accept_hello(hello).await,

            (SessionState::AwaitingHello, other) => {
                trace!("Ignoring {} from {} before hello", other.kind(), self.peer);
                SessionFlow::Continue
            }

            (SessionState::Active(id), ClientMessage::Hello(_)) => {
                debug!("Client {} sent a second hello, ignored", id);
                SessionFlow::Continue
            }

            (SessionState::Active(id), ClientMessage::Pos { x, y }) => {
                self.arena.update_position(id, x, y).await;
                SessionFlow::Continue
            }

            (SessionState::Active(id), ClientMessage::Shot(shot)) => {
                self.arena.relay_shot(id, shot).await;
                SessionFlow::Continue
            }

            (SessionState::Active(id), ClientMessage::Hit { victim, damage }) => {
                if self.arena.apply_hit(id, victim, damage).await.is_none() {
                    trace!("Client {} hit unknown player {}", id, victim);
                }
                SessionFlow::Continue
            }

            (SessionState::Active(id), ClientMessage::Revive) => {
                self.arena.revive(id).await;
                SessionFlow::Continue
            }

            (SessionState::Active(id), ClientMessage::Ping) => {
                self.arena.send_to(id, &ServerMessage::Pong).await;
                SessionFlow::Continue
            }
        }
    }

    async fn accept_hello(&mut self, hello: Hello) -> SessionFlow {
        let Some(outbound) = self.outbound.take() else {
            return SessionFlow::Close;
        };

        match self
            .arena
            .join(hello, self.peer, self.transport, outbound)
            .await
        {
            Ok(id) => {
                self.state = SessionState::Active(id);
                SessionFlow::Continue
            }
            Err(JoinError::ServerFull) => {
                warn!("Rejecting hello from {}: server full", self.peer);
                self.state = SessionState::Terminated;
                SessionFlow::Close
            }
            Err(e) => {
                debug!("Handshake with {} failed: {}", self.peer, e);
                self.state = SessionState::Terminated;
                SessionFlow::Close
            }
        }
    }

    fn flow(&self) -> SessionFlow {
        match self.state {
            SessionState::Terminated => SessionFlow::Close,
            _ => SessionFlow::Continue,
        }
    }

    /// Ends the session and releases its registry entry and player record.
    pub async fn terminate(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Terminated);
        self.outbound = None;
        if let SessionState::Active(id) = previous {
            self.arena.leave(id).await;
            info!("Session {} from {} ended", id, self.peer);
        }
    }
}

impl Drop for Session {
    // Covers aborted or panicking connection tasks that never reached
    // `terminate`.
    fn drop(&mut self) {
        if let SessionState::Active(id) = self.state {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let arena = Arc::clone(&self.arena);
                handle.spawn(async move {
                    arena.leave(id).await;
                });
            }
        }
    }
}
