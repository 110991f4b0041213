//! ZeroTrace: VPN session driver
//!
//! Main entry point. Initializes the global allocator, sets up logging,
//! and drives a session manager from the command line the way the
//! mobile home screen does: connect, poll stats once per interval,
//! disconnect.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Args, Commands};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zerotrace_vpn::{ClientConfig, Protocol, SessionManager};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(protocol) = args.protocol {
        config.protocol = protocol;
    }

    match args.command {
        Commands::Servers { search } => list_servers(&config, search.as_deref()),
        Commands::Protocols => {
            list_protocols(config.protocol);
            Ok(())
        }
        Commands::Connect { server, duration } => {
            run_session(&config, &server, duration.map(Duration::from_secs)).await
        }
    }
}

fn list_servers(config: &ClientConfig, search: Option<&str>) -> Result<()> {
    let catalog = config.catalog()?;

    println!("Transport: {} (entries list their own protocol)", config.protocol.title());
    for server in catalog.search(search.unwrap_or("")) {
        println!(
            "{:<16} {:<16} {:<6} {:<8} {}",
            server.id,
            server.name,
            server.country_code,
            server.protocol.title(),
            server.endpoint()
        );
    }
    Ok(())
}

fn list_protocols(selected: Protocol) {
    for protocol in Protocol::all() {
        let marker = if *protocol == selected { "*" } else { " " };
        println!("{} {:<10} {}", marker, protocol.title(), protocol.description());
    }
}

async fn run_session(
    config: &ClientConfig,
    server_id: &str,
    duration: Option<Duration>,
) -> Result<()> {
    let vpn = SessionManager::from_config(config)?;
    let server = vpn
        .catalog()
        .find(server_id)
        .cloned()
        .with_context(|| format!("unknown server id {server_id}"))?;

    if let Err(e) = vpn.initialize().await {
        vpn.cleanup().await;
        return Err(e).context("transport initialization failed");
    }
    info!("ZeroTrace starting ({})", vpn.protocol());

    println!("{}", vpn.status().label());
    if let Err(e) = vpn.connect(&server).await {
        println!("{}", vpn.status().label());
        vpn.cleanup().await;
        return Err(e).context("connect failed");
    }
    println!("{} to {}", vpn.status().label(), server.name);

    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    let mut stats_rx = vpn.subscribe_stats();
    let mut status_rx = vpn.subscribe();

    loop {
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt signal");
                break;
            }
            _ = expired => break,
            changed = stats_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let stats = *stats_rx.borrow_and_update();
                if let Some(stats) = stats {
                    println!(
                        "Up {} Mbps | Down {} Mbps | {}",
                        stats.upload_label(),
                        stats.download_label(),
                        stats.duration_label()
                    );
                }
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                if !status.is_connected() {
                    warn!("Session ended: {}", status.label());
                    break;
                }
            }
        }
    }

    vpn.disconnect().await;
    println!("{}", vpn.status().label());
    vpn.cleanup().await;

    info!("ZeroTrace shutting down");
    Ok(())
}
