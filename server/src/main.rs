use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use server::config::Args;
use server::network::Server;

/// Main-method of the application.
/// Parses command-line arguments, binds the listeners and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let config = Args::parse().into_config()?;
    info!(
        "Starting relay at {} Hz, up to {} clients",
        config.tick_rate, config.max_clients
    );

    let server = Server::bind(config).await?;

    // Handle shutdown gracefully
    server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => {
                    warn!("Cannot listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    Ok(())
}
