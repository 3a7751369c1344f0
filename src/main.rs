//! Rallf Incubator - Entry Point
//!
//! Runs the control-plane daemon: connects to the container runtime, ensures
//! the tasks network, restores the catalog and serves JSON-RPC until stopped.

use rallf_incubator::{rpc, Config, ControlPlane, Daemon, RpcServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Rallf Incubator v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: incubator");
        println!();
        println!("Environment variables:");
        println!("  INCUBATOR_BIND_ADDR        Bind address (default: 0.0.0.0)");
        println!("  INCUBATOR_PORT             RPC port (default: 4000)");
        println!("  INCUBATOR_CONFIG           Catalog snapshot (default: /config/daemon.json)");
        println!("  INCUBATOR_NETWORK          Tasks network (default: rallf_tasks_network)");
        println!("  INCUBATOR_RUNTIME          docker | memory (default: docker)");
        println!("  INCUBATOR_RUNTIME_TIMEOUT  Runtime call deadline in seconds (default: 30)");
        println!("  INCUBATOR_LOG_JSON         Log as JSON when 1/true");
        println!("  DOCKER_HOST                Docker endpoint");
        println!("  DEBUG                      Debug logging when set (dev mode)");
        return Ok(());
    }

    let dev_mode = std::env::var("DEBUG").is_ok();
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(if dev_mode { Level::DEBUG } else { Level::INFO });

    let json_logs = std::env::var("INCUBATOR_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Rallf Incubator v{}", env!("CARGO_PKG_VERSION"));

    rpc::validate_method_table()?;

    let config = Config::from_env()?;
    let runtime = Daemon::runtime_from_config(&config);
    let daemon = Arc::new(Daemon::start(&config, runtime).await?);

    let server = RpcServer::new(
        config.socket_addr(),
        ControlPlane::new(daemon),
        config.log_requests,
    );
    server.run().await?;

    Ok(())
}
