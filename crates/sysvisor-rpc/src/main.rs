//! Sysvisor RPC Server - entry point of the supervisor.
//!
//! Owns the single supervisor instance, runs its timer, exposes the control
//! operations as JSON-RPC 2.0 over HTTP and publishes itself in the catalog.

mod handlers;
mod server;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sysvisor_core::{Catalog, SqliteCatalog, Supervisor, SupervisorConfig, SupervisorDefaults};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How long in-flight responses get to drain once the session has ended.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "sysvisor-rpc")]
#[command(about = "User-space process supervisor with a JSON-RPC control surface")]
struct Args {
    /// Domain config file
    #[arg(short, long, default_value = SupervisorDefaults::CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Session file (defaults to the config path with a `session.json` extension)
    #[arg(long)]
    session: Option<PathBuf>,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Monitor and config poll interval
    #[arg(long, default_value_t = SupervisorDefaults::POLL_INTERVAL.as_millis() as u64)]
    poll_interval_ms: u64,

    /// Per-domain wait for a requested exit before killing
    #[arg(long, default_value_t = SupervisorDefaults::STOP_TIMEOUT.as_millis() as u64)]
    stop_timeout_ms: u64,

    /// Shared catalog database; domains are not published without one
    #[arg(long)]
    catalog_db: Option<PathBuf>,

    /// Directory for per-domain stdout/stderr logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Command run to power off, e.g. "systemctl poweroff"
    #[arg(long)]
    power_off_command: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Do not start the boot set
    #[arg(long)]
    no_boot: bool,
}

impl Args {
    fn supervisor_config(&self) -> SupervisorConfig {
        let mut config = SupervisorConfig::new(&self.config)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_stop_timeout(Duration::from_millis(self.stop_timeout_ms));

        if let Some(session) = &self.session {
            config = config.with_session_path(session);
        }
        if let Some(dir) = &self.log_dir {
            config = config.with_log_dir(dir);
        }
        if let Some(command) = &self.power_off_command {
            config = config.with_power_off_command(command.split_whitespace());
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Sysvisor RPC Server");

    let config = args.supervisor_config();
    let service_name = config.service_name.clone();
    info!("Config file: {}", config.config_path.display());

    let catalog = match &args.catalog_db {
        Some(path) => {
            let catalog = Arc::new(SqliteCatalog::open_at(path)?);
            match catalog.cleanup_stale() {
                Ok(0) => {}
                Ok(n) => info!("Removed {} stale catalog entries", n),
                Err(e) => warn!("Catalog cleanup failed: {}", e),
            }
            Some(catalog)
        }
        None => None,
    };

    let mut builder = Supervisor::builder(config);
    if let Some(catalog) = &catalog {
        builder = builder.catalog(catalog.clone());
    }
    let supervisor = builder.build()?;

    if args.no_boot {
        info!("Skipping boot");
    } else {
        let report = supervisor.boot().await;
        info!(
            "Boot started {} domains ({} failed)",
            report.started.len(),
            report.failed.len()
        );
    }

    let timer = Arc::clone(&supervisor).run();

    let (addr, server_task) =
        server::start_server(Arc::clone(&supervisor), &args.host, args.port).await?;

    // Port discovery for the launching process (intentional stdout)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    if let Some(catalog) = &catalog {
        if let Err(e) = catalog.register(&service_name, std::process::id(), Some(addr.port())) {
            warn!("Failed to publish {} in the catalog: {}", service_name, e);
        }
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
            let report = supervisor
                .shut_down(SupervisorDefaults::SHUTDOWN_OPERATION)
                .await;
            if !report.is_clean() {
                warn!(
                    "Shutdown forced {:?}, abandoned {:?}",
                    report.forced, report.failed
                );
            }
        }
        _ = supervisor.session_ended() => {
            info!("Session ended by log-out");
        }
    }

    timer.shutdown().await;

    if let Some(catalog) = &catalog {
        if let Err(e) = catalog.unregister(&service_name) {
            warn!("Failed to withdraw {} from the catalog: {}", service_name, e);
        }
    }

    if tokio::time::timeout(SERVER_DRAIN_TIMEOUT, server_task).await.is_err() {
        warn!("Server did not drain within {:?}", SERVER_DRAIN_TIMEOUT);
    }

    info!("Exiting");
    Ok(())
}
