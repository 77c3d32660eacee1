//! Server network layer: listeners, connection supervision and the
//! broadcast task.

use crate::arena::Arena;
use crate::broadcast::BroadcastScheduler;
use crate::config::{ServerConfig, MAX_LINE_BYTES};
use crate::error::ServerError;
use crate::transport::{serve_tcp_client, serve_ws_client, ConnectionSettings};
use log::{error, info, warn};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

/// The relay server: owns the listeners, the shared arena and every
/// connection task it spawns.
pub struct Server {
    listener: TcpListener,
    ws_listener: Option<TcpListener>,
    arena: Arc<Arena>,
    config: ServerConfig,
}

impl Server {
    /// Validates the configuration and binds every configured listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = bind_listener(&config.tcp_addr).await?;
        info!("Server listening on {} (tcp)", listener.local_addr()?);

        let ws_listener = match &config.ws_addr {
            Some(addr) => {
                let listener = bind_listener(addr).await?;
                info!("Server listening on {} (websocket)", listener.local_addr()?);
                Some(listener)
            }
            None => None,
        };

        Ok(Server {
            listener,
            ws_listener,
            arena: Arc::new(Arena::new(config.max_clients)),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn ws_local_addr(&self) -> Option<SocketAddr> {
        self.ws_listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    pub fn arena(&self) -> Arc<Arena> {
        Arc::clone(&self.arena)
    }

    fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            idle_timeout: self.config.idle_timeout,
            send_timeout: self.config.send_timeout,
            outbound_queue: self.config.outbound_queue,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Serves until the process is stopped.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` completes, then aborts every connection task.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let settings = self.connection_settings();
        let mut sessions = JoinSet::new();

        let scheduler = BroadcastScheduler::new(self.arena(), self.config.broadcast_interval());
        let mut broadcaster = tokio::spawn(scheduler.run());

        tokio::pin!(shutdown);
        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if self.admit(&sessions, peer) {
                            sessions.spawn(serve_tcp_client(stream, peer, self.arena(), settings));
                        }
                    }
                    Err(e) => Self::accept_failed(e).await,
                },

                accepted = accept_optional(self.ws_listener.as_ref()) => match accepted {
                    Ok((stream, peer)) => {
                        if self.admit(&sessions, peer) {
                            sessions.spawn(serve_ws_client(stream, peer, self.arena(), settings));
                        }
                    }
                    Err(e) => Self::accept_failed(e).await,
                },

                Some(finished) = sessions.join_next() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("Connection task panicked: {}", e);
                        }
                    }
                }

                result = &mut broadcaster => {
                    // The scheduler loops forever; getting here means it panicked.
                    error!("Broadcast task stopped: {:?}", result.err());
                    let scheduler = BroadcastScheduler::new(self.arena(), self.config.broadcast_interval());
                    broadcaster = tokio::spawn(scheduler.run());
                }

                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        broadcaster.abort();
        sessions.shutdown().await;

        let (clients, players) = self.arena.counts().await;
        info!("Shutdown complete ({} clients, {} players left)", clients, players);
        Ok(())
    }

    /// Enforces the connection cap at accept time.
    fn admit(&self, sessions: &JoinSet<()>, peer: SocketAddr) -> bool {
        if sessions.len() >= self.config.max_clients {
            warn!("Refusing connection from {}: {} connections open", peer, sessions.len());
            return false;
        }
        true
    }

    async fn accept_failed(e: io::Error) {
        error!("Failed to accept connection: {}", e);
        // Usually descriptor exhaustion; back off instead of spinning.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn bind_listener(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

async fn accept_optional(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}
