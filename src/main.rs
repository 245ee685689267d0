use std::net::IpAddr;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use canhubd::{CanServer, StatisticsSnapshot};

/// CLI arguments.
///
/// Network configuration beyond this (names, feature toggles, hardware
/// plugins) is applied through the library API.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// Bind address for all networks, e.g. 0.0.0.0
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// TCP port of the first network; network N listens on port + N - 1
    #[arg(long, default_value_t = 55_660)]
    port: u16,

    /// Number of virtual CAN networks to host
    #[arg(long, default_value_t = 1)]
    networks: u8,

    /// Dispatch period in milliseconds
    #[arg(long, default_value_t = 20)]
    dispatch_ms: u64,

    /// Attach a SocketCAN interface (e.g. can0, vcan0) to the first network
    #[cfg(target_os = "linux")]
    #[arg(long)]
    can_if: Option<String>,

    /// Log statistics snapshots as JSON lines
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Structured logs; can be controlled with:
    // RUST_LOG=info or RUST_LOG=debug
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!(bind = %args.bind, port = args.port, networks = args.networks, "canhubd starting");

    let mut server = CanServer::new();
    for i in 0..args.networks {
        let network = server.add_network(args.port + u16::from(i))?;
        network.set_server_address(args.bind);
        network.set_dispatch_period(args.dispatch_ms);
        if args.stats {
            spawn_stats_logger(network.id(), network.subscribe_statistics());
        }
        network.enable().await?;
    }

    #[cfg(target_os = "linux")]
    if let Some(iface) = args.can_if.as_deref() {
        use canhubd::infra::SocketCanInterface;

        if let Some(network) = server.networks().next() {
            match network.add_interface(Box::new(SocketCanInterface::new(iface))) {
                Ok(()) => info!(iface, net = network.id(), "SocketCAN interface attached"),
                // The virtual bus keeps running without the adapter.
                Err(e) => warn!(iface, error = %e, "failed to attach SocketCAN interface"),
            }
        }
    }

    info!("server running (terminate with Ctrl+C)");
    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received; shutting down");

    for network in server.networks_mut() {
        network.disable();
    }

    Ok(())
}

/// Forward statistics snapshots of one network into the log as JSON lines.
fn spawn_stats_logger(net: u8, mut rx: broadcast::Receiver<StatisticsSnapshot>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(line) => info!(net, stats = %line, "statistics"),
                    Err(e) => warn!(net, error = %e, "failed to serialize statistics"),
                },
                // Falling behind only costs old snapshots.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
