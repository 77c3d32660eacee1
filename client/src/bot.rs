//! Headless bot: exercises every client operation against a running relay.
//!
//! A bot circles around its spawn point reporting positions, fires shots at a
//! fixed rate, occasionally reports a hit on a random opponent, revives when
//! its hit points reach zero and pings once a second to measure latency.

use crate::game::{ClientGameState, MessageCounts};
use crate::network::{Client, ClientError};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ClientId, ClientMessage, Hello, ServerMessage, ShotRequest};
use std::time::Duration;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

const HELLO_TIMEOUT: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(1);
const ORBIT_RADIUS: f64 = 60.0;
const SHOT_SPEED: f64 = 400.0;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub server: String,
    pub name: String,
    /// Position reports per second
    pub send_rate: u32,
    /// Shots per second
    pub fire_rate: u32,
    /// Probability that a shot is followed by a reported hit
    pub hit_chance: f64,
    pub damage: i32,
    /// Stop after this long; run until disconnected when unset
    pub duration: Option<Duration>,
}

impl BotConfig {
    pub fn new(server: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            name: name.into(),
            send_rate: 8,
            fire_rate: 2,
            hit_chance: 0.3,
            damage: 10,
            duration: None,
        }
    }
}

/// What a bot saw during its run.
#[derive(Debug, Clone)]
pub struct BotReport {
    pub id: ClientId,
    pub counts: MessageCounts,
    pub rtt: Option<Duration>,
    pub revives: u32,
}

fn rate_interval(per_second: u32) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs(1) / per_second.max(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

pub async fn run_bot(config: BotConfig) -> Result<BotReport, ClientError> {
    let mut rng = StdRng::from_entropy();
    let center = (rng.gen_range(100.0..700.0), rng.gen_range(100.0..500.0));
    let mut angle: f64 = rng.gen_range(0.0..std::f64::consts::TAU);

    let mut client = Client::connect(&config.server).await?;
    let hello = Hello {
        name: Some(config.name.clone()),
        x: Some(center.0),
        y: Some(center.1),
        color: None,
    };
    let id = client.hello(hello, HELLO_TIMEOUT).await?;

    let mut state = ClientGameState::new();
    state.apply(ServerMessage::Welcome { id });
    let mut revives = 0;

    let mut move_ticker = rate_interval(config.send_rate);
    let mut fire_ticker = rate_interval(config.fire_rate);
    let mut ping_ticker = interval(PING_INTERVAL);
    ping_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let deadline = config.duration.map(|d| Instant::now() + d);
    let stop = async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            message = client.recv() => {
                let message = message?;
                let eliminated = matches!(message, ServerMessage::Hp { id: hit, hp } if hit == id && hp <= 0);
                state.apply(message);
                if eliminated {
                    debug!("{} eliminated, reviving", config.name);
                    client.send(&ClientMessage::Revive).await?;
                    revives += 1;
                }
            }

            _ = move_ticker.tick() => {
                angle = (angle + 0.15) % std::f64::consts::TAU;
                let x = center.0 + ORBIT_RADIUS * angle.cos();
                let y = center.1 + ORBIT_RADIUS * angle.sin();
                client.send(&ClientMessage::Pos { x, y }).await?;
            }

            _ = fire_ticker.tick(), if !state.is_dead() => {
                let heading: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
                let shot = ShotRequest::new(
                    center.0,
                    center.1,
                    SHOT_SPEED * heading.cos(),
                    SHOT_SPEED * heading.sin(),
                );
                client.send(&ClientMessage::Shot(shot)).await?;

                let targets: Vec<ClientId> = state.others().map(|(other, _)| other).collect();
                if !targets.is_empty() && rng.gen_bool(config.hit_chance.clamp(0.0, 1.0)) {
                    let victim = targets[rng.gen_range(0..targets.len())];
                    client
                        .send(&ClientMessage::Hit { victim, damage: config.damage })
                        .await?;
                }
            }

            _ = ping_ticker.tick() => {
                state.mark_ping_sent(std::time::Instant::now());
                client.send(&ClientMessage::Ping).await?;
            }

            _ = &mut stop => break,
        }
    }

    client.shutdown().await?;
    info!(
        "{} (id {}) done: {} states, {} shots, {} hp updates, rtt {:?}",
        config.name, id, state.counts.states, state.counts.shots, state.counts.hp_updates, state.rtt
    );

    Ok(BotReport {
        id,
        counts: state.counts,
        rtt: state.rtt,
        revives,
    })
}
