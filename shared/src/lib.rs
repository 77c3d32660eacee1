//! Wire protocol shared by the relay server and its clients.
//!
//! Every message is a JSON object with a mandatory `type` field. On the stream
//! transport each message occupies exactly one newline-terminated line; on the
//! WebSocket transport each text frame carries exactly one message. The codec
//! functions here deal in single messages and never see the framing.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const MAX_HP: i32 = 100;
pub const DEFAULT_SPAWN_X: f64 = 100.0;
pub const DEFAULT_SPAWN_Y: f64 = 100.0;
pub const DEFAULT_SHOT_DAMAGE: i32 = 10;
pub const DEFAULT_SHOT_SIZE: i32 = 6;
pub const DEFAULT_SHOT_COLOR: Color = [255, 90, 90];
pub const COLOR_CHANNEL_MIN: u8 = 50;
pub const MAX_NAME_CHARS: usize = 32;
pub const REVIVE_INVULNERABILITY: Duration = Duration::from_millis(1500);

/// Server-assigned identity of one connected session. Starts at 1.
pub type ClientId = u64;

/// RGB triple, one byte per channel.
pub type Color = [u8; 3];

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Hello(Hello),
    Pos { x: f64, y: f64 },
    Shot(ShotRequest),
    Hit { victim: ClientId, damage: i32 },
    Revive,
    Ping,
}

impl ClientMessage {
    /// The value of the `type` field, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Hello(_) => "hello",
            ClientMessage::Pos { .. } => "pos",
            ClientMessage::Shot(_) => "shot",
            ClientMessage::Hit { .. } => "hit",
            ClientMessage::Revive => "revive",
            ClientMessage::Ping => "ping",
        }
    }
}

/// Handshake payload. Every field is optional; the server fills in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
}

impl Hello {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// A projectile fired by a client, as received from that client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotRequest {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    #[serde(default = "default_shot_damage")]
    pub damage: i32,
    #[serde(default = "default_shot_size")]
    pub size: i32,
    #[serde(default = "default_shot_color")]
    pub color: Color,
}

impl ShotRequest {
    pub fn new(x: f64, y: f64, vx: f64, vy: f64) -> Self {
        Self {
            x,
            y,
            vx,
            vy,
            damage: DEFAULT_SHOT_DAMAGE,
            size: DEFAULT_SHOT_SIZE,
            color: DEFAULT_SHOT_COLOR,
        }
    }

    /// Tags the shot with the id of the client that fired it.
    pub fn into_event(self, owner: ClientId) -> ShotEvent {
        ShotEvent {
            owner,
            x: self.x,
            y: self.y,
            vx: self.vx,
            vy: self.vy,
            damage: self.damage,
            size: self.size,
            color: self.color,
        }
    }
}

fn default_shot_damage() -> i32 {
    DEFAULT_SHOT_DAMAGE
}

fn default_shot_size() -> i32 {
    DEFAULT_SHOT_SIZE
}

fn default_shot_color() -> Color {
    DEFAULT_SHOT_COLOR
}

/// A shot as relayed to every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotEvent {
    pub owner: ClientId,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub damage: i32,
    pub size: i32,
    pub color: Color,
}

/// Public view of one player inside a `state` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub color: Color,
    pub hp: i32,
    pub max_hp: i32,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Welcome { id: ClientId },
    State {
        #[serde(deserialize_with = "player_table")]
        players: BTreeMap<ClientId, PlayerView>,
    },
    Shot(ShotEvent),
    Hp { id: ClientId, hp: i32 },
    Pong,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::State { .. } => "state",
            ServerMessage::Shot(_) => "shot",
            ServerMessage::Hp { .. } => "hp",
            ServerMessage::Pong => "pong",
        }
    }
}

/// Reads the `players` object of a snapshot.
///
/// JSON object keys are strings. Inside an internally tagged enum serde
/// buffers the message first and then refuses to turn a string key back into
/// an integer, so ids are parsed by hand.
fn player_table<'de, D>(deserializer: D) -> Result<BTreeMap<ClientId, PlayerView>, D::Error>
where
    D: Deserializer<'de>,
{
    BTreeMap::<String, PlayerView>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, player)| {
            key.parse::<ClientId>()
                .map(|id| (id, player))
                .map_err(|_| D::Error::custom(format!("invalid player id {:?}", key)))
        })
        .collect()
}

/// Decodes one inbound unit sent by a client.
///
/// Surrounding whitespace (including a trailing `\r`) is ignored.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_str(text.trim()).map_err(ProtocolError::Malformed)
}

/// Decodes one unit sent by the server.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text.trim()).map_err(ProtocolError::Malformed)
}

/// Encodes a message as a single JSON object without framing.
///
/// The output never contains a raw newline, so it can be written as one line.
pub fn encode_message<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}
