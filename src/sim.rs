//! One running simulation: capture engine, fleet, stack, replay, and
//! traffic generation, with ordered shutdown.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::capture::{CaptureEngine, CaptureError, ReplayManager};
use crate::config::{Config, ConfigError};
use crate::db::RunRecord;
use crate::device::Fleet;
use crate::inject::ErrorStateManager;
use crate::snmp::{MetricSource, RandomMetrics};
use crate::stack::ProtocolStack;
use crate::traffic::TrafficGenerator;
use crate::types::DeviceState;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

pub struct Simulation {
    interface: String,
    engine: Arc<CaptureEngine>,
    fleet: Arc<Fleet>,
    stack: Arc<ProtocolStack>,
    replay: Arc<ReplayManager>,
    traffic: TrafficGenerator,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Simulation {
    /// Open the interface and bring the whole plane up.
    pub async fn start(
        interface: &str,
        config: Arc<Config>,
        errors: Arc<ErrorStateManager>,
    ) -> Result<Arc<Self>, SimError> {
        Self::start_with_metrics(interface, config, errors, Arc::new(RandomMetrics)).await
    }

    pub async fn start_with_metrics(
        interface: &str,
        config: Arc<Config>,
        errors: Arc<ErrorStateManager>,
        metrics: Arc<dyn MetricSource>,
    ) -> Result<Arc<Self>, SimError> {
        config.validate()?;
        let playbacks = config.capture_playbacks.clone();
        let engine = Arc::new(CaptureEngine::open(interface)?);
        let fleet = Arc::new(Fleet::new(config, errors.clone(), metrics)?);
        let stack = Arc::new(ProtocolStack::new(engine.clone(), fleet.clone(), errors));
        let replay = Arc::new(ReplayManager::new(engine.clone()));
        let traffic = TrafficGenerator::new();

        stack.start().await;
        fleet.start_all().await;
        traffic.start(stack.context());

        // Configured playbacks start with the simulation; the replay
        // engine runs one capture at a time
        if let Some(file) = playbacks.first() {
            if playbacks.len() > 1 {
                warn!("only the first capture playback runs; {} ignored", playbacks.len() - 1);
            }
            let request =
                crate::capture::ReplayRequest { file: Some(file.clone()), ..Default::default() };
            if let Err(e) = replay.start(request).await {
                warn!(file = %file, "capture playback not started: {e}");
            }
        }

        info!(interface, devices = fleet.device_count(), "simulation started");
        Ok(Arc::new(Self {
            interface: interface.to_string(),
            engine,
            fleet,
            stack,
            replay,
            traffic,
            started: Instant::now(),
            started_at: Utc::now(),
        }))
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn engine(&self) -> &Arc<CaptureEngine> {
        &self.engine
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    pub fn stack(&self) -> &Arc<ProtocolStack> {
        &self.stack
    }

    pub fn replay(&self) -> &Arc<ReplayManager> {
        &self.replay
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn device_states(&self) -> HashMap<String, DeviceState> {
        self.fleet
            .all()
            .into_iter()
            .map(|d| (d.name().to_string(), d.state()))
            .collect()
    }

    pub fn run_record(&self) -> RunRecord {
        let stats = self.stack.stats();
        RunRecord {
            interface: self.interface.clone(),
            device_count: self.fleet.device_count(),
            duration_secs: self.uptime_secs(),
            packets_sent: stats.packets_sent,
            packets_received: stats.packets_received,
            started_at: self.started_at,
        }
    }

    /// Ordered teardown: capture handle first (unblocks the reader),
    /// then the stack loops, device tickers and trap senders, and the
    /// replay engine last.
    pub async fn shutdown(&self) {
        self.engine.close();
        self.traffic.stop();
        self.stack.stop().await;
        self.fleet.stop_all().await;
        self.replay.stop().await;
        info!(interface = %self.interface, "simulation stopped");
    }
}
