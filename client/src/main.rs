use clap::Parser;
use client::bot::{run_bot, BotConfig};
use env_logger::Env;
use log::{error, info};
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, env = "RELAY_SERVER", default_value = "127.0.0.1:12345")]
    server: String,

    /// Number of bots to run
    #[arg(short = 'b', long, default_value = "1")]
    bots: usize,

    /// Name prefix; bots are numbered from 1
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Seconds to run before disconnecting (0 runs until interrupted)
    #[arg(short = 'd', long, default_value = "0")]
    duration: u64,

    /// Position updates per second, per bot
    #[arg(long, default_value = "8")]
    send_rate: u32,

    /// Shots per second, per bot
    #[arg(long, default_value = "2")]
    fire_rate: u32,

    /// Probability that a shot is followed by a reported hit
    #[arg(long, default_value = "0.3")]
    hit_chance: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Starting {} bot(s) against {}", args.bots, args.server);

    let duration = match args.duration {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let mut bots = JoinSet::new();
    for index in 1..=args.bots {
        let config = BotConfig {
            send_rate: args.send_rate,
            fire_rate: args.fire_rate,
            hit_chance: args.hit_chance,
            duration,
            ..BotConfig::new(args.server.clone(), format!("{}{}", args.name, index))
        };
        bots.spawn(run_bot(config));
        // Stagger connections a little so handshakes do not all land at once.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut finished = 0;
    let mut failed = 0;

    loop {
        tokio::select! {
            joined = bots.join_next() => match joined {
                Some(Ok(Ok(report))) => {
                    finished += 1;
                    info!(
                        "Bot {} finished: {} revives, last rtt {:?}",
                        report.id, report.revives, report.rtt
                    );
                }
                Some(Ok(Err(e))) => {
                    failed += 1;
                    error!("Bot failed: {}", e);
                }
                Some(Err(e)) => {
                    failed += 1;
                    error!("Bot task panicked: {}", e);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping bots...");
                bots.shutdown().await;
                break;
            }
        }
    }

    info!("{} bot(s) finished, {} failed", finished, failed);
    Ok(())
}
