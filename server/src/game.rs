//! Player State Table: the live gameplay attributes of every joined client.
//!
//! Records are created on hello-acceptance and removed on disconnect by the
//! [`Arena`](crate::arena::Arena), which keeps this table and the connection
//! registry in step under one lock. Nothing here touches the network.

use log::{debug, info};
use shared::{
    ClientId, Color, Hello, PlayerView, COLOR_CHANNEL_MIN, DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y,
    MAX_HP, MAX_NAME_CHARS, REVIVE_INVULNERABILITY,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub color: Color,
    pub hp: i32,
    pub max_hp: i32,
    /// Damage is ignored while `now` is before this instant.
    pub invuln_until: Option<Instant>,
}

impl PlayerRecord {
    /// Builds the record for a freshly accepted hello, filling defaults.
    pub fn from_hello(id: ClientId, hello: Hello) -> Self {
        let name = hello
            .name
            .as_deref()
            .and_then(sanitize_name)
            .unwrap_or_else(|| format!("Player{}", id));

        Self {
            name,
            x: hello.x.unwrap_or(DEFAULT_SPAWN_X),
            y: hello.y.unwrap_or(DEFAULT_SPAWN_Y),
            color: hello.color.unwrap_or_else(random_color),
            hp: MAX_HP,
            max_hp: MAX_HP,
            invuln_until: None,
        }
    }

    pub fn is_invulnerable(&self, now: Instant) -> bool {
        self.invuln_until.is_some_and(|until| now < until)
    }

    /// Applies damage unless invulnerable and returns the resulting hp.
    pub fn apply_damage(&mut self, damage: i32, now: Instant) -> i32 {
        if !self.is_invulnerable(now) {
            self.hp = self.hp.saturating_sub(damage).clamp(0, self.max_hp);
        }
        self.hp
    }

    /// Restores full health and opens the invulnerability window.
    pub fn revive(&mut self, now: Instant) -> i32 {
        self.hp = self.max_hp;
        self.invuln_until = Some(now + REVIVE_INVULNERABILITY);
        self.hp
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            color: self.color,
            hp: self.hp,
            max_hp: self.max_hp,
        }
    }
}

/// Trims the name, strips control characters and caps its length.
/// Returns `None` when nothing printable is left.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .chars()
        .take(MAX_NAME_CHARS)
        .collect();

    let cleaned = cleaned.trim_end().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn random_color() -> Color {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    [
        rng.gen_range(COLOR_CHANNEL_MIN..=u8::MAX),
        rng.gen_range(COLOR_CHANNEL_MIN..=u8::MAX),
        rng.gen_range(COLOR_CHANNEL_MIN..=u8::MAX),
    ]
}

#[derive(Debug, Clone, Default)]
pub struct GameState {
    players: HashMap<ClientId, PlayerRecord>,
}

impl GameState {
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
        }
    }

    pub fn add_player(&mut self, id: ClientId, record: PlayerRecord) {
        info!(
            "Added player {} ({}) at ({}, {})",
            id, record.name, record.x, record.y
        );
        self.players.insert(id, record);
    }

    pub fn remove_player(&mut self, id: &ClientId) -> Option<PlayerRecord> {
        let removed = self.players.remove(id);
        if removed.is_some() {
            info!("Removed player {}", id);
        }
        removed
    }

    pub fn get(&self, id: &ClientId) -> Option<&PlayerRecord> {
        self.players.get(id)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.players.contains_key(id)
    }

    /// Overwrites the player's coordinates. Returns false for unknown ids.
    pub fn set_position(&mut self, id: ClientId, x: f64, y: f64) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.x = x;
                player.y = y;
                true
            }
            None => false,
        }
    }

    /// Resolves a hit against `victim`. Returns the victim's resulting hp, or
    /// `None` when no such player exists.
    pub fn apply_hit(&mut self, victim: ClientId, damage: i32, now: Instant) -> Option<i32> {
        let player = self.players.get_mut(&victim)?;
        let before = player.hp;
        let hp = player.apply_damage(damage, now);
        if hp == before && player.is_invulnerable(now) {
            debug!("Player {} is invulnerable, hit ignored", victim);
        }
        Some(hp)
    }

    pub fn revive(&mut self, id: ClientId, now: Instant) -> Option<i32> {
        self.players.get_mut(&id).map(|player| player.revive(now))
    }

    /// Copies every record into its public view, ordered by id.
    pub fn snapshot(&self) -> BTreeMap<ClientId, PlayerView> {
        self.players
            .iter()
            .map(|(id, player)| (*id, player.view()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::time::Duration;

    fn state_with_players(ids: &[ClientId]) -> GameState {
        let mut state = GameState::new();
        for id in ids {
            state.add_player(*id, PlayerRecord::from_hello(*id, Hello::default()));
        }
        state
    }

    #[test]
    fn test_record_defaults_from_empty_hello() {
        let record = PlayerRecord::from_hello(1, Hello::default());

        assert_eq!(record.name, "Player1");
        assert_approx_eq!(record.x, 100.0);
        assert_approx_eq!(record.y, 100.0);
        assert_eq!(record.hp, 100);
        assert_eq!(record.max_hp, 100);
        assert!(record.invuln_until.is_none());
        assert!(record.color.iter().all(|c| *c >= COLOR_CHANNEL_MIN));
    }

    #[test]
    fn test_record_uses_hello_fields() {
        let hello = Hello {
            name: Some("  Rook  ".to_string()),
            x: Some(5.5),
            y: Some(-2.0),
            color: Some([1, 2, 3]),
        };
        let record = PlayerRecord::from_hello(4, hello);

        assert_eq!(record.name, "Rook");
        assert_approx_eq!(record.x, 5.5);
        assert_approx_eq!(record.y, -2.0);
        assert_eq!(record.color, [1, 2, 3]);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Ana"), Some("Ana".to_string()));
        assert_eq!(sanitize_name("\tBo\nb\u{7}"), Some("Bob".to_string()));
        assert_eq!(sanitize_name("   "), None);
        assert_eq!(sanitize_name(""), None);

        let long = "x".repeat(100);
        assert_eq!(sanitize_name(&long).unwrap().chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_blank_name_falls_back_to_default() {
        let record = PlayerRecord::from_hello(3, Hello::named("\n\n"));
        assert_eq!(record.name, "Player3");
    }

    #[test]
    fn test_hit_reduces_hp() {
        let mut state = state_with_players(&[1, 2]);
        let now = Instant::now();

        assert_eq!(state.apply_hit(2, 30, now), Some(70));
        assert_eq!(state.get(&2).unwrap().hp, 70);
        assert_eq!(state.get(&1).unwrap().hp, 100);
    }

    #[test]
    fn test_hit_clamps_at_zero() {
        let mut state = state_with_players(&[1]);
        let now = Instant::now();

        assert_eq!(state.apply_hit(1, 60, now), Some(40));
        assert_eq!(state.apply_hit(1, 60, now), Some(0));
        assert_eq!(state.apply_hit(1, i32::MAX, now), Some(0));
    }

    #[test]
    fn test_negative_damage_never_exceeds_max_hp() {
        let mut state = state_with_players(&[1]);
        let now = Instant::now();

        state.apply_hit(1, 10, now);
        assert_eq!(state.apply_hit(1, -500, now), Some(100));
        assert_eq!(state.apply_hit(1, i32::MIN, now), Some(100));
    }

    #[test]
    fn test_hit_on_missing_player_is_noop() {
        let mut state = state_with_players(&[1]);
        assert_eq!(state.apply_hit(99, 10, Instant::now()), None);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_revive_restores_hp_and_grants_invulnerability() {
        let mut state = state_with_players(&[1]);
        let now = Instant::now();

        state.apply_hit(1, 100, now);
        assert_eq!(state.get(&1).unwrap().hp, 0);

        assert_eq!(state.revive(1, now), Some(100));
        let record = state.get(&1).unwrap();
        assert!(record.invuln_until.unwrap() >= now + Duration::from_millis(1500));

        // Inside the window damage is ignored but the hp is still reported.
        assert_eq!(state.apply_hit(1, 40, now + Duration::from_millis(1000)), Some(100));

        // At the boundary the window is closed.
        let boundary = now + REVIVE_INVULNERABILITY;
        assert_eq!(state.apply_hit(1, 40, boundary), Some(60));
    }

    #[test]
    fn test_revive_missing_player() {
        let mut state = GameState::new();
        assert_eq!(state.revive(5, Instant::now()), None);
    }

    #[test]
    fn test_set_position() {
        let mut state = state_with_players(&[1]);

        assert!(state.set_position(1, 42.0, -7.5));
        assert!(!state.set_position(2, 1.0, 1.0));

        let record = state.get(&1).unwrap();
        assert_approx_eq!(record.x, 42.0);
        assert_approx_eq!(record.y, -7.5);
    }

    #[test]
    fn test_snapshot_contains_every_player_once() {
        let mut state = state_with_players(&[3, 1, 2]);
        state.set_position(2, 9.0, 8.0);

        let snapshot = state.snapshot();
        let ids: Vec<ClientId> = snapshot.keys().copied().collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_approx_eq!(snapshot[&2].x, 9.0);
        assert_eq!(snapshot[&3].max_hp, MAX_HP);
    }

    #[test]
    fn test_remove_player() {
        let mut state = state_with_players(&[1, 2]);

        assert!(state.remove_player(&1).is_some());
        assert!(state.remove_player(&1).is_none());
        assert!(!state.contains(&1));
        assert_eq!(state.len(), 1);
        assert!(!state.is_empty());
    }
}
