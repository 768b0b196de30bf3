//! Endpoint handlers for the control API. Errors are plain text with
//! an HTTP status; success bodies are JSON unless noted.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::capture::{ReplayError, ReplayRequest, list_interfaces};
use crate::config::Config;
use crate::inject::ErrorKind;
use crate::sim::Simulation;
use crate::topology;
use crate::types::VERSION;

use super::{AppState, metrics, totals_fn};

const INDEX_HTML: &str = include_str!("index.html");

/// Maximum entries `/files` returns.
const MAX_FILE_ENTRIES: usize = 200;

const HISTORY_LIMIT: usize = 20;

pub struct ApiError(pub StatusCode, pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn bad_request(msg: impl Into<String>) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, msg.into())
}

fn no_simulation() -> ApiError {
    ApiError(StatusCode::SERVICE_UNAVAILABLE, "no simulation running".into())
}

fn require_sim(state: &AppState) -> ApiResult<Arc<Simulation>> {
    state.simulation().ok_or_else(no_simulation)
}

// =============================================================================
// STATS / RUNTIME / VERSION
// =============================================================================

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let sim = require_sim(&state)?;
    let mut body = serde_json::to_value(sim.stack().stats())
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    body["device_count"] = json!(sim.fleet().device_count());
    body["interface"] = json!(sim.interface());
    body["version"] = json!(VERSION);
    Ok(Json(body))
}

pub async fn runtime(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config_name = state
        .config_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    match state.simulation() {
        Some(sim) => {
            let stats = sim.stack().stats();
            Json(json!({
                "running": true,
                "interface": sim.interface(),
                "uptime_secs": sim.uptime_secs(),
                "packets_sent": stats.packets_sent,
                "packets_received": stats.packets_received,
                "config": config_name,
            }))
        }
        None => Json(json!({
            "running": false,
            "uptime_secs": state.started.elapsed().as_secs(),
            "config": config_name,
        })),
    }
}

pub async fn version() -> Json<Value> {
    Json(json!({ "version": VERSION }))
}

// =============================================================================
// DEVICES / NEIGHBORS / HISTORY
// =============================================================================

pub async fn devices(State(state): State<Arc<AppState>>) -> Json<Value> {
    match state.simulation() {
        Some(sim) => {
            let list: Vec<Value> = sim
                .fleet()
                .all()
                .into_iter()
                .map(|device| {
                    let cfg = device.config();
                    json!({
                        "name": cfg.name,
                        "type": cfg.device_type.as_str(),
                        "ips": cfg.all_ips(),
                        "protocols": cfg.protocols_enabled(),
                        "state": device.state().as_str(),
                    })
                })
                .collect();
            Json(json!(list))
        }
        None => {
            let config = state.current_config();
            let list: Vec<Value> = config
                .devices
                .iter()
                .map(|d| {
                    json!({
                        "name": d.name,
                        "type": d.device_type.as_str(),
                        "ips": d.all_ips(),
                        "protocols": d.protocols_enabled(),
                    })
                })
                .collect();
            Json(json!(list))
        }
    }
}

pub async fn neighbors(State(state): State<Arc<AppState>>) -> Json<Value> {
    match state.simulation() {
        Some(sim) => Json(json!(sim.stack().neighbors().snapshot())),
        None => Json(json!([])),
    }
}

pub async fn history(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let Some(store) = &state.store else {
        return Ok(Json(json!([])));
    };
    let records = store
        .recent(HISTORY_LIMIT)
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!(records)))
}

// =============================================================================
// CONFIG
// =============================================================================

pub async fn config_get(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let path = &state.config_path;
    let content = std::fs::read_to_string(path)
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let metadata = std::fs::metadata(path)
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::from);

    Ok(Json(json!({
        "path": path.display().to_string(),
        "filename": path.file_name().map(|n| n.to_string_lossy().to_string()),
        "modified": modified,
        "size": metadata.len(),
        "device_count": state.current_config().devices.len(),
        "content": content,
    })))
}

pub async fn config_write(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let text = std::str::from_utf8(&body).map_err(|_| bad_request("body is not UTF-8"))?;
    let new_config =
        Arc::new(Config::from_yaml(text).map_err(|e| bad_request(e.to_string()))?);

    // Apply before persisting; roll back to the running config on failure
    if let Some(sim) = state.simulation() {
        let old = state.current_config();
        if let Err(e) = sim.fleet().apply(new_config.clone()).await {
            let _ = sim.fleet().apply(old).await;
            return Err(bad_request(format!("apply failed: {e}")));
        }
    }

    write_atomic(&state.config_path, text)
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    *state.config.write().unwrap() = new_config.clone();

    info!(devices = new_config.devices.len(), "configuration replaced");
    Ok(Json(json!({
        "status": "ok",
        "device_count": new_config.devices.len(),
    })))
}

/// Write via temp + rename in the same directory, mode 0644.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644))?;
    }
    std::fs::rename(&tmp, path)
}

// =============================================================================
// REPLAY
// =============================================================================

pub async fn replay_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let sim = require_sim(&state)?;
    Ok(Json(json!(sim.replay().status())))
}

pub async fn replay_start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReplayRequest>,
) -> ApiResult<Json<Value>> {
    let sim = require_sim(&state)?;
    sim.replay().start(request).await.map_err(|e| match e {
        ReplayError::AlreadyRunning => ApiError(StatusCode::CONFLICT, e.to_string()),
        ReplayError::Io(_) | ReplayError::Pcap(_) => {
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        _ => bad_request(e.to_string()),
    })?;
    Ok(Json(json!(sim.replay().status())))
}

pub async fn replay_stop(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let sim = require_sim(&state)?;
    sim.replay().stop().await;
    Ok(Json(json!(sim.replay().status())))
}

// =============================================================================
// ALERTS
// =============================================================================

pub async fn alerts_get(State(state): State<Arc<AppState>>) -> Json<super::AlertConfig> {
    Json(state.alerts.config())
}

pub async fn alerts_update(
    State(state): State<Arc<AppState>>,
    Json(cfg): Json<super::AlertConfig>,
) -> Json<super::AlertConfig> {
    let totals = totals_fn(&state);
    state.alerts.update(cfg, totals).await;
    Json(state.alerts.config())
}

// =============================================================================
// FILES
// =============================================================================

#[derive(Deserialize)]
pub struct FilesQuery {
    kind: Option<String>,
}

pub async fn files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FilesQuery>,
) -> ApiResult<Json<Value>> {
    let config = state.current_config();
    let (root, extensions): (PathBuf, &[&str]) = match query.kind.as_deref() {
        Some("walks") => {
            let base = config
                .include_path
                .clone()
                .map(PathBuf::from)
                .or_else(|| state.config_path.parent().map(|p| p.to_path_buf()))
                .unwrap_or_else(|| PathBuf::from("."));
            (base, &["walk", "snmpwalk", "txt"])
        }
        Some("pcaps") => {
            let base = state
                .config_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (base, &["pcap", "pcapng", "cap"])
        }
        other => {
            return Err(bad_request(format!(
                "unknown file kind: {}",
                other.unwrap_or("<missing>")
            )));
        }
    };

    let mut entries = Vec::new();
    collect_files(&root, extensions, &mut entries);
    entries.truncate(MAX_FILE_ENTRIES);
    Ok(Json(json!(entries)))
}

fn collect_files(dir: &Path, extensions: &[&str], out: &mut Vec<Value>) {
    if out.len() >= MAX_FILE_ENTRIES {
        return;
    }
    let Ok(read) = std::fs::read_dir(dir) else { return };
    let mut items: Vec<_> = read.flatten().collect();
    items.sort_by_key(|e| e.file_name());

    for entry in items {
        if out.len() >= MAX_FILE_ENTRIES {
            return;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, extensions, out);
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.contains(&ext.to_ascii_lowercase().as_str()));
        if !matches {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::from);
        out.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "path": path.display().to_string(),
            "size": metadata.len(),
            "modified": modified,
        }));
    }
}

// =============================================================================
// TOPOLOGY
// =============================================================================

pub async fn topology(State(state): State<Arc<AppState>>) -> Json<topology::Topology> {
    let config = state.current_config();
    let states = state.simulation().map(|s| s.device_states()).unwrap_or_default();
    Json(topology::build(&config, &states))
}

#[derive(Deserialize)]
pub struct ExportQuery {
    format: Option<String>,
}

pub async fn topology_export(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let config = state.current_config();
    let states = state.simulation().map(|s| s.device_states()).unwrap_or_default();
    let graph = topology::build(&config, &states);

    match query.format.as_deref() {
        Some("graphml") => Ok((
            [(header::CONTENT_TYPE, "application/xml")],
            topology::export_graphml(&graph),
        )
            .into_response()),
        Some("dot") => Ok((
            [(header::CONTENT_TYPE, "text/vnd.graphviz")],
            topology::export_dot(&graph),
        )
            .into_response()),
        other => Err(bad_request(format!(
            "unknown format: {}",
            other.unwrap_or("<missing>")
        ))),
    }
}

// =============================================================================
// ERROR INJECTION
// =============================================================================

pub async fn errors_get(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    require_sim(&state)?;
    let kinds: Vec<&str> = ErrorKind::ALL.iter().map(|k| k.label()).collect();
    Ok(Json(json!({
        "available": kinds,
        "active": state.errors.all_states(),
    })))
}

#[derive(Deserialize)]
pub struct ErrorSetRequest {
    pub device_ip: IpAddr,
    pub interface: String,
    pub error_type: String,
    pub value: u8,
}

pub async fn errors_set(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ErrorSetRequest>,
) -> ApiResult<Json<Value>> {
    let kind = ErrorKind::parse(&request.error_type)
        .ok_or_else(|| bad_request(format!("unknown error type: {}", request.error_type)))?;
    if request.value > 100 {
        return Err(bad_request("value must be 0..=100"));
    }
    state
        .errors
        .set(request.device_ip, &request.interface, kind, request.value);
    Ok(Json(json!({ "active": state.errors.all_states() })))
}

#[derive(Deserialize)]
pub struct ErrorDeleteQuery {
    pub device_ip: Option<IpAddr>,
    pub interface: Option<String>,
    pub error_type: Option<String>,
}

pub async fn errors_delete(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ErrorDeleteQuery>,
) -> ApiResult<Json<Value>> {
    match (query.device_ip, query.interface) {
        (Some(ip), Some(ifname)) => match query.error_type {
            Some(label) => {
                let kind = ErrorKind::parse(&label)
                    .ok_or_else(|| bad_request(format!("unknown error type: {label}")))?;
                state.errors.set(ip, &ifname, kind, 0);
            }
            None => state.errors.clear(ip, &ifname),
        },
        (None, None) => state.errors.clear_all(),
        _ => return Err(bad_request("device_ip and interface go together")),
    }
    Ok(Json(json!({ "active": state.errors.all_states() })))
}

// =============================================================================
// INTERFACES / SIMULATION LIFECYCLE
// =============================================================================

pub async fn interfaces(State(state): State<Arc<AppState>>) -> Json<Value> {
    let current = state.simulation().map(|s| s.interface().to_string());
    let list: Vec<Value> = list_interfaces()
        .into_iter()
        .map(|name| {
            let is_current = current.as_deref() == Some(name.as_str());
            json!({ "name": name, "current": is_current })
        })
        .collect();
    Json(json!(list))
}

fn daemon_only(state: &AppState) -> ApiResult<()> {
    if state.daemon {
        Ok(())
    } else {
        Err(ApiError(
            StatusCode::NOT_IMPLEMENTED,
            "simulation lifecycle requires daemon mode".into(),
        ))
    }
}

pub async fn simulation_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    daemon_only(&state)?;
    Ok(match state.simulation() {
        Some(sim) => Json(json!({
            "running": true,
            "interface": sim.interface(),
            "uptime_secs": sim.uptime_secs(),
            "started_at": sim.started_at(),
        })),
        None => Json(json!({ "running": false })),
    })
}

#[derive(Deserialize, Default)]
pub struct SimulationStartRequest {
    pub interface: Option<String>,
}

pub async fn simulation_start(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SimulationStartRequest>>,
) -> ApiResult<Json<Value>> {
    daemon_only(&state)?;
    if state.simulation().is_some() {
        return Err(ApiError(StatusCode::CONFLICT, "simulation already running".into()));
    }
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let interface = request
        .interface
        .or_else(|| state.default_interface.clone())
        .ok_or_else(|| bad_request("interface required"))?;

    let sim = Simulation::start(&interface, state.current_config(), state.errors.clone())
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state.set_simulation(Some(sim.clone()));

    Ok(Json(json!({ "running": true, "interface": sim.interface() })))
}

pub async fn simulation_stop(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    daemon_only(&state)?;
    let Some(sim) = state.simulation() else {
        return Ok(Json(json!({ "running": false })));
    };
    state.set_simulation(None);
    sim.shutdown().await;

    if let Some(store) = &state.store {
        if let Err(e) = store.append(&sim.run_record()) {
            tracing::warn!("run record not stored: {e}");
        }
    }
    Ok(Json(json!({ "running": false })))
}

// =============================================================================
// METRICS / SPA
// =============================================================================

pub async fn prometheus(State(state): State<Arc<AppState>>) -> Response {
    let stats = state
        .simulation()
        .map(|s| s.stack().stats())
        .unwrap_or_default();
    let device_count = state.current_config().devices.len();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(&stats, device_count),
    )
        .into_response()
}

/// Embedded single-page fallback for anything outside `/api/v1/`.
pub async fn spa(method: Method, uri: Uri) -> Response {
    if uri.path().contains("..") {
        return (StatusCode::BAD_REQUEST, "invalid path").into_response();
    }
    match method {
        Method::GET => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            INDEX_HTML,
        )
            .into_response(),
        Method::HEAD => ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], "")
            .into_response(),
        _ => (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
            "method not allowed",
        )
            .into_response(),
    }
}
