//! NIAC daemon: bring up the packet plane and the control API.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use niac::api::{self, AppState};
use niac::config::Config;
use niac::db::{RunStore, SledRunStore};
use niac::inject::ErrorStateManager;
use niac::sim::Simulation;
use niac::types::VERSION;

/// Exit codes: 1 config load, 2 interface open, 3 listener bind.
const EXIT_CONFIG: i32 = 1;
const EXIT_INTERFACE: i32 = 2;
const EXIT_LISTEN: i32 = 3;

#[derive(Parser)]
#[command(name = "niac", version, about = "NIAC: Network In A Can")]
struct Args {
    /// Capture interface (required unless --daemon)
    #[arg(short, long)]
    interface: Option<String>,

    /// Configuration file
    #[arg(short, long, default_value = "niac.yaml")]
    config: PathBuf,

    /// Control API listen address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Daemon mode: serve the API and start simulations on demand
    #[arg(long)]
    daemon: bool,

    /// Data directory for run history
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("niac=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    info!("════════════════════════════════════════════════════════════");
    info!("  NIAC v{VERSION} — Network In A Can");
    info!("════════════════════════════════════════════════════════════");

    let config = match Config::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("configuration load failed: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };
    info!(
        path = %args.config.display(),
        devices = config.devices.len(),
        "configuration loaded"
    );

    let store: Option<Arc<dyn RunStore>> = match SledRunStore::open(&args.data_dir) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("run history disabled: {e}");
            None
        }
    };

    let token = std::env::var("NIAC_API_TOKEN").unwrap_or_default();
    let errors = Arc::new(ErrorStateManager::new());

    let state = AppState::new(
        args.config.clone(),
        config.clone(),
        errors.clone(),
        store,
        token,
        args.daemon,
        args.interface.clone(),
    );

    if !args.daemon {
        let Some(interface) = args.interface.as_deref() else {
            error!("an interface is required outside daemon mode");
            std::process::exit(EXIT_INTERFACE);
        };
        match Simulation::start(interface, config, errors).await {
            Ok(sim) => state.set_simulation(Some(sim)),
            Err(e) => {
                error!("capture open failed: {e}");
                std::process::exit(EXIT_INTERFACE);
            }
        }
    }

    state.alerts.restart(api::totals_fn(&state)).await;

    let listener = match tokio::net::TcpListener::bind(&args.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %args.listen, "listener bind failed: {e}");
            std::process::exit(EXIT_LISTEN);
        }
    };
    info!(addr = %args.listen, "control API listening");

    let router = api::router(state.clone());
    let serve = axum::serve(listener, router).with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        info!("shutting down...");
    });
    if let Err(e) = serve.await {
        error!("http server error: {e}");
    }

    // Orderly teardown; the HTTP listener is already drained
    if let Some(sim) = state.simulation() {
        state.set_simulation(None);
        sim.shutdown().await;
        if let Some(store) = &state.store {
            if let Err(e) = store.append(&sim.run_record()) {
                warn!("run record not stored: {e}");
            }
        }
    }
    state.alerts.stop().await;

    info!("bye");
}
