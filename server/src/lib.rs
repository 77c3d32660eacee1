//! # Arena Relay Server Library
//!
//! This library provides the relay server for a small real-time multiplayer
//! arena. Clients connect over a newline-delimited JSON stream or a WebSocket,
//! introduce themselves with `hello`, and from then on report their own
//! position, shots, hits and revives. The server keeps the shared player table
//! and pushes it to everyone at a fixed rate.
//!
//! ## Core Responsibilities
//!
//! ### Player Table
//! The server owns the only authoritative copy of every player's name,
//! position, color and hit points. Clients report; the server records and
//! redistributes. Movement is not simulated here.
//!
//! ### Client Management
//! Handles the complete lifecycle of client connections including:
//! - Handshake and monotonically increasing id assignment
//! - Per-connection outbound queues and write timeouts
//! - Eviction of clients that cannot keep up
//! - Cleanup on every disconnect path
//!
//! ### State Broadcasting
//! A scheduler sends the full player table to every registered client at the
//! configured tick rate (20Hz by default), independently of inbound traffic.
//!
//! ### Event Relay
//! Shots and hit point changes are pushed to every registered client as soon
//! as they are received, including the client that caused them.
//!
//! ## Architecture Design
//!
//! ### One Task Per Connection
//! Every connection gets a reader loop and a writer task. The reader decodes
//! inbound units and drives a [`session::Session`]; the writer drains a
//! bounded queue onto the socket. Nothing anywhere blocks on another client's
//! socket: fan-out only ever does a non-blocking enqueue.
//!
//! ### One Coarse Lock
//! The connection registry and the player table live together behind a
//! single lock in [`arena::Arena`], so a snapshot never shows a player whose
//! connection is gone or a connection whose player is gone.
//!
//! ## Module Organization
//!
//! ### Arena Module (`arena`)
//! Shared state and every operation that touches both tables.
//!
//! ### Client Manager Module (`client_manager`)
//! The connection registry: id assignment, outbound handles, delivery.
//!
//! ### Game Module (`game`)
//! Player records and the rules for damage, revive and invulnerability.
//!
//! ### Relay and Broadcast Modules (`relay`, `broadcast`)
//! Fan-out of one encoded frame to every client, and the periodic snapshot.
//!
//! ### Session and Transport Modules (`session`, `transport`)
//! The per-connection protocol state machine and the two wire drivers.
//!
//! ### Network Module (`network`)
//! Listeners, connection supervision and shutdown.
//!
//! ### Health Module (`health`)
//! Plain HTTP status and `/health` answers on the WebSocket port.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         tcp_addr: "127.0.0.1:12345".to_string(),
//!         ws_addr: Some("127.0.0.1:8080".to_string()),
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod arena;
pub mod broadcast;
pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod health;
pub mod network;
pub mod relay;
pub mod session;
pub mod transport;
