//! Broadcast Scheduler: periodic fan-out of the full player table.
//!
//! Runs independently of per-client traffic. Each tick takes one consistent
//! snapshot and queues it for every registered connection; recipients that
//! cannot accept it are evicted by the arena, so a stalled peer costs the tick
//! nothing beyond a failed `try_send`.

use crate::arena::Arena;
use crate::relay::DeliveryReport;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

pub struct BroadcastScheduler {
    arena: Arc<Arena>,
    period: Duration,
}

/// Totals accumulated between two statistics lines.
#[derive(Debug, Default)]
struct TickStats {
    ticks: u64,
    frames_queued: usize,
    evictions: usize,
}

impl BroadcastScheduler {
    pub fn new(arena: Arc<Arena>, period: Duration) -> Self {
        Self { arena, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Broadcasts one snapshot.
    pub async fn tick(&self) -> DeliveryReport {
        self.arena.broadcast_state().await
    }

    /// Broadcasts forever at the configured period.
    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Ticks per statistics line: roughly one per second.
        let stats_every = (Duration::from_secs(1).as_nanos() / self.period.as_nanos().max(1)).max(1) as u64;
        let mut stats = TickStats::default();
        let mut window_start = Instant::now();

        info!("Broadcasting state every {:?}", self.period);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let report = self.tick().await;
            stats.ticks += 1;
            stats.frames_queued += report.delivered;
            stats.evictions += report.failed.len();

            if stats.ticks % stats_every == 0 {
                let players = self.arena.player_count().await;
                if players > 0 || stats.evictions > 0 {
                    let elapsed = window_start.elapsed().as_secs_f32().max(f32::EPSILON);
                    debug!(
                        "{} players, {:.1} Hz, {} frames queued, {} evictions",
                        players,
                        stats_every as f32 / elapsed,
                        stats.frames_queued,
                        stats.evictions
                    );
                }
                stats.frames_queued = 0;
                stats.evictions = 0;
                window_start = Instant::now();
            }
        }
    }
}
