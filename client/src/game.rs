use log::{debug, info};
use shared::{ClientId, PlayerView, ServerMessage, ShotEvent, MAX_HP};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// Foreign shots kept for inspection; older ones are dropped first.
const RECENT_SHOT_CAPACITY: usize = 64;

/// Number of server messages applied, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub states: u64,
    pub shots: u64,
    pub hp_updates: u64,
    pub pongs: u64,
}

/// The client's picture of the arena, built only from what the server sends.
#[derive(Debug, Clone)]
pub struct ClientGameState {
    pub client_id: Option<ClientId>,
    /// Latest snapshot, including this client's own entry.
    pub players: BTreeMap<ClientId, PlayerView>,
    pub hp: i32,
    pub recent_shots: VecDeque<ShotEvent>,
    pub rtt: Option<Duration>,
    pub counts: MessageCounts,
    ping_sent_at: Option<Instant>,
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientGameState {
    pub fn new() -> Self {
        Self {
            client_id: None,
            players: BTreeMap::new(),
            hp: MAX_HP,
            recent_shots: VecDeque::with_capacity(RECENT_SHOT_CAPACITY),
            rtt: None,
            counts: MessageCounts::default(),
            ping_sent_at: None,
        }
    }

    pub fn apply(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome { id } => {
                self.client_id = Some(id);
                self.hp = MAX_HP;
            }

            ServerMessage::State { players } => {
                self.counts.states += 1;
                self.players = players;
            }

            ServerMessage::Shot(shot) => {
                self.counts.shots += 1;
                // Own shots are already known locally.
                if Some(shot.owner) != self.client_id {
                    if self.recent_shots.len() == RECENT_SHOT_CAPACITY {
                        self.recent_shots.pop_front();
                    }
                    self.recent_shots.push_back(shot);
                }
            }

            ServerMessage::Hp { id, hp } => {
                self.counts.hp_updates += 1;
                if Some(id) == self.client_id {
                    if hp == 0 && self.hp > 0 {
                        info!("Eliminated");
                    }
                    self.hp = hp;
                }
                if let Some(player) = self.players.get_mut(&id) {
                    player.hp = hp;
                }
            }

            ServerMessage::Pong => {
                self.counts.pongs += 1;
                if let Some(sent) = self.ping_sent_at.take() {
                    let rtt = sent.elapsed();
                    debug!("Ping: {:?}", rtt);
                    self.rtt = Some(rtt);
                }
            }
        }
    }

    pub fn mark_ping_sent(&mut self, now: Instant) {
        self.ping_sent_at = Some(now);
    }

    pub fn is_dead(&self) -> bool {
        self.client_id.is_some() && self.hp <= 0
    }

    /// Every player in the latest snapshot except this client.
    pub fn others(&self) -> impl Iterator<Item = (ClientId, &PlayerView)> + '_ {
        let own = self.client_id;
        self.players
            .iter()
            .filter(move |(id, _)| Some(**id) != own)
            .map(|(id, view)| (*id, view))
    }
}
