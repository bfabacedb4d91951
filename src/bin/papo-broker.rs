//! papo-broker - in-memory message broker daemon
//!
//! Serves the chat wire protocol on one port and the read-only admin API
//! on another. State lives in memory only; restarting the broker starts
//! from an empty directory.

use anyhow::Result;
use clap::Parser;

/// papo message broker
#[derive(Debug, Parser)]
#[command(name = "papo-broker")]
#[command(about = "In-memory queue/exchange broker for papo chat clients")]
struct Cli {
    /// Address for the wire protocol listener
    #[arg(long, default_value = "127.0.0.1:5674")]
    bind: String,

    /// Address for the admin API listener
    #[arg(long, default_value = "127.0.0.1:15674")]
    admin_bind: String,

    /// Admin API user
    #[arg(long, default_value = "guest")]
    user: String,

    /// Admin API password
    #[arg(long, default_value = "guest")]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let broker = papo::broker::start(&cli.bind, &cli.admin_bind, &cli.user, &cli.password).await?;

    println!("papo-broker running");
    println!("  wire protocol: {}", broker.addr);
    println!("  admin API:     http://{}", broker.admin_addr);
    println!("\nPress Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    println!("\nStopped");
    Ok(())
}
