//! Alert loop: every 5 seconds, compare total packets against the
//! configured threshold and POST to the webhook on an upward crossing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

const ALERT_TICK_SECS: u64 = 5;
const WEBHOOK_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlertConfig {
    #[serde(default)]
    pub packets_threshold: u64,
    #[serde(default)]
    pub webhook_url: String,
}

/// Supplies the current (total packets, interface) when a simulation is
/// running.
pub type TotalsFn = Arc<dyn Fn() -> Option<(u64, String)> + Send + Sync>;

pub struct AlertManager {
    cfg: std::sync::RwLock<AlertConfig>,
    last_alerted: AtomicU64,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    client: reqwest::Client,
}

impl AlertManager {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            cfg: std::sync::RwLock::new(AlertConfig::default()),
            last_alerted: AtomicU64::new(0),
            task: Mutex::new(None),
            client,
        }
    }

    pub fn config(&self) -> AlertConfig {
        self.cfg.read().unwrap().clone()
    }

    /// Replace the configuration and restart the loop.
    pub async fn update(self: &Arc<Self>, cfg: AlertConfig, totals: TotalsFn) {
        *self.cfg.write().unwrap() = cfg;
        self.last_alerted.store(0, Ordering::Relaxed);
        self.restart(totals).await;
    }

    pub async fn restart(self: &Arc<Self>, totals: TotalsFn) {
        let mut task = self.task.lock().await;
        if let Some(old) = task.take() {
            old.abort();
        }
        let manager = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(ALERT_TICK_SECS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.tick(&totals).await;
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }

    async fn tick(&self, totals: &TotalsFn) {
        let cfg = self.config();
        if cfg.packets_threshold == 0 || cfg.webhook_url.is_empty() {
            return;
        }
        let Some((total, interface)) = totals() else { return };
        if total < cfg.packets_threshold {
            return;
        }
        // Fire once per observed total; an unchanged counter stays quiet
        if self.last_alerted.swap(total, Ordering::Relaxed) == total {
            return;
        }

        let body = serde_json::json!({
            "type": "packet_threshold",
            "threshold": cfg.packets_threshold,
            "total": total,
            "interface": interface,
            "triggeredAt": Utc::now().to_rfc3339(),
        });

        match self.client.post(&cfg.webhook_url).json(&body).send().await {
            Ok(response) => debug!(status = %response.status(), "alert webhook delivered"),
            Err(e) => trace!("alert webhook failed, will retry next crossing: {e}"),
        }
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}
