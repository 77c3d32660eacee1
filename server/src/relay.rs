//! Event Relay: immediate fan-out of one message to every registered client.
//!
//! Fan-out only queues frames; it never waits on a socket. A recipient whose
//! queue is full or closed is reported in [`DeliveryReport::failed`] and the
//! caller evicts it, exactly as if it had disconnected.

use crate::client_manager::{ClientManager, DeliveryFailure, Frame};
use log::{error, warn};
use serde::Serialize;
use shared::{encode_message, ClientId, ServerMessage};
use std::sync::Arc;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<ClientId>,
}

impl DeliveryReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// Encodes a message once so every recipient shares the same frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Option<Frame> {
    match encode_message(message) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            error!("Dropping outbound message: {}", e);
            None
        }
    }
}

/// Queues `frame` for every registered client.
pub fn fan_out(clients: &ClientManager, frame: &Frame) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    for client in clients.iter() {
        match client.try_send(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(reason) => {
                if reason == DeliveryFailure::QueueFull {
                    warn!("Client {} is not keeping up: {}", client.id, reason);
                }
                report.failed.push(client.id);
            }
        }
    }

    report
}

/// Encodes and fans out a server message.
pub fn relay(clients: &ClientManager, message: &ServerMessage) -> DeliveryReport {
    match encode_frame(message) {
        Some(frame) => fan_out(clients, &frame),
        None => DeliveryReport::default(),
    }
}
