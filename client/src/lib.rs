//! # Arena Relay Client Library
//!
//! This library provides a headless client for the arena relay server. It
//! speaks the newline-delimited JSON transport and tracks the arena purely
//! from what the server sends, which makes it useful both for load testing
//! and as a reference for writing real game clients.
//!
//! ## Architecture Overview
//!
//! The relay does not simulate anything. Each client is authoritative for its
//! own position and reports it; the server collects those reports and sends
//! the full player table back to everyone at a fixed rate. Shots and hit point
//! changes arrive as separate events between snapshots.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connection handling and the wire protocol:
//! - Handshake (`hello` / `welcome`)
//! - Line framing and message encoding
//! - Receiving with deadlines, skipping undecodable lines
//!
//! ### Game Module (`game`)
//! The client-side view of the arena:
//! - Latest player snapshot and own hit points
//! - Recently relayed shots from other players
//! - Round-trip time from `ping` / `pong`
//!
//! ### Bot Module (`bot`)
//! A scripted player that moves, shoots, reports hits and revives.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use shared::{ClientMessage, Hello};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:12345").await?;
//!     let id = client.hello(Hello::named("Ana"), Duration::from_secs(5)).await?;
//!     println!("joined as {}", id);
//!
//!     client.send(&ClientMessage::Pos { x: 120.0, y: 80.0 }).await?;
//!     let message = client.recv().await?;
//!     println!("server said {}", message.kind());
//!
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod game;
pub mod network;
