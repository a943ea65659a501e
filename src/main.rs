//! Traffic dispatcher daemon.
//!
//! ```text
//!   config.toml ──▶ loader ──▶ Dispatcher ◀── HealthMonitor (probe cycle)
//!        │                       ▲   ▲
//!        └── watcher (reload) ───┘   └── sticky cleanup
//!                                │
//!              admin API ────────┘  /admin/*, /dispatch/next, /dispatch/report
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use traffic_dispatcher::admin::{self, AppState};
use traffic_dispatcher::config::loader::load_config;
use traffic_dispatcher::config::watcher::ConfigWatcher;
use traffic_dispatcher::config::DispatchConfig;
use traffic_dispatcher::lifecycle::{wait_for_signal, Shutdown};
use traffic_dispatcher::observability::{logging, metrics};
use traffic_dispatcher::Dispatcher;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "traffic-dispatcher")]
#[command(about = "Health-aware endpoint dispatcher", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "dispatcher.toml")]
    config: PathBuf,

    /// Do not reload the configuration when the file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        eprintln!("config file {} not found, using defaults", args.config.display());
        DispatchConfig::default()
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "traffic-dispatcher starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(config.clone())?);
    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    if config.health_check.enabled {
        tasks.push(tokio::spawn(dispatcher.health_monitor().run(shutdown.subscribe())));
    }

    if config.sticky_session.enabled && config.sticky_session.cleanup_interval_ms > 0 {
        let interval = Duration::from_millis(config.sticky_session.cleanup_interval_ms);
        tasks.push(dispatcher.sticky().clone().spawn_cleanup(interval, shutdown.subscribe()));
    }

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AppState::new(dispatcher.clone(), &config.admin.api_key);
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, state, rx).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        }));
    }

    // Keep the watcher handle alive until shutdown.
    let _watcher = if args.no_watch || !args.config.exists() {
        None
    } else {
        let (watcher, mut updates) = ConfigWatcher::new(&args.config);
        let handle = watcher.run()?;
        let dispatcher = dispatcher.clone();
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(next) = updates.recv() => {
                        match dispatcher.reconfigure(&next) {
                            Ok(()) => tracing::info!("Configuration reloaded"),
                            Err(e) => tracing::error!(error = %e, "Rejected reloaded configuration"),
                        }
                    }
                    _ = rx.recv() => break,
                }
            }
        }));
        Some(handle)
    };

    wait_for_signal().await;
    shutdown.trigger();
    Shutdown::drain(tasks, SHUTDOWN_DEADLINE).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
