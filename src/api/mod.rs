//! HTTP control plane: bearer-guarded JSON API, Prometheus metrics,
//! and the embedded status page.

pub mod alerts;
pub mod auth;
pub mod handlers;
pub mod metrics;

pub use alerts::{AlertConfig, AlertManager, TotalsFn};

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::warn;

use crate::config::Config;
use crate::db::RunStore;
use crate::inject::ErrorStateManager;
use crate::sim::Simulation;

/// Request body cap on mutating endpoints.
const BODY_LIMIT_BYTES: usize = 1024 * 1024;

pub struct AppState {
    pub config_path: PathBuf,
    pub config: RwLock<Arc<Config>>,
    pub sim: RwLock<Option<Arc<Simulation>>>,
    pub errors: Arc<ErrorStateManager>,
    pub alerts: Arc<AlertManager>,
    pub store: Option<Arc<dyn RunStore>>,
    pub token: String,
    pub daemon: bool,
    pub default_interface: Option<String>,
    pub started: Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config_path: PathBuf,
        config: Arc<Config>,
        errors: Arc<ErrorStateManager>,
        store: Option<Arc<dyn RunStore>>,
        token: String,
        daemon: bool,
        default_interface: Option<String>,
    ) -> Arc<Self> {
        if token.is_empty() {
            warn!("API token is empty: authentication is DISABLED");
        }
        Arc::new(Self {
            config_path,
            config: RwLock::new(config),
            sim: RwLock::new(None),
            errors,
            alerts: Arc::new(AlertManager::new()),
            store,
            token,
            daemon,
            default_interface,
            started: Instant::now(),
        })
    }

    pub fn current_config(&self) -> Arc<Config> {
        self.config.read().unwrap().clone()
    }

    pub fn simulation(&self) -> Option<Arc<Simulation>> {
        self.sim.read().unwrap().clone()
    }

    pub fn set_simulation(&self, sim: Option<Arc<Simulation>>) {
        *self.sim.write().unwrap() = sim;
    }
}

/// Packet-total supplier for the alert loop; `None` while no simulation
/// is running.
pub fn totals_fn(state: &Arc<AppState>) -> TotalsFn {
    let weak = Arc::downgrade(state);
    Arc::new(move || {
        let state = weak.upgrade()?;
        let sim = state.simulation()?;
        let stats = sim.stack().stats();
        Some((
            stats.packets_sent + stats.packets_received,
            sim.interface().to_string(),
        ))
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/stats", get(handlers::stats))
        .route("/devices", get(handlers::devices))
        .route("/history", get(handlers::history))
        .route(
            "/config",
            get(handlers::config_get)
                .put(handlers::config_write)
                .post(handlers::config_write)
                .patch(handlers::config_write),
        )
        .route(
            "/replay",
            get(handlers::replay_status)
                .post(handlers::replay_start)
                .delete(handlers::replay_stop),
        )
        .route(
            "/alerts",
            get(handlers::alerts_get)
                .put(handlers::alerts_update)
                .post(handlers::alerts_update),
        )
        .route("/files", get(handlers::files))
        .route("/topology", get(handlers::topology))
        .route("/topology/export", get(handlers::topology_export))
        .route(
            "/errors",
            get(handlers::errors_get)
                .post(handlers::errors_set)
                .put(handlers::errors_set)
                .delete(handlers::errors_delete),
        )
        .route("/interfaces", get(handlers::interfaces))
        .route("/runtime", get(handlers::runtime))
        .route(
            "/simulation",
            get(handlers::simulation_status)
                .post(handlers::simulation_start)
                .delete(handlers::simulation_stop),
        )
        .route("/version", get(handlers::version))
        .route("/neighbors", get(handlers::neighbors))
        .route("/metrics", get(handlers::prometheus));

    Router::new()
        .nest("/api/v1", api)
        .fallback(handlers::spa)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer))
        .layer(middleware::from_fn(auth::security_headers))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
