//! Simulated devices: runtime state, lifecycle, and hot reload.

use pnet::util::MacAddr;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError, Device, TrapConfig, diff};
use crate::inject::ErrorStateManager;
use crate::snmp::{MetricSource, SnmpAgent, TrapSender, effective_interfaces};
use crate::types::{Counters, DeviceState, now};

/// Per-device behavior tick. The body is the extension point for
/// role-specific traffic; today it only refreshes liveness.
const BEHAVIOR_TICK_SECS: u64 = 30;

/// Per-device mutable runtime, replaced wholesale on reload.
struct Runtime {
    config: Arc<Device>,
    mac: MacAddr,
    agent: Option<Arc<SnmpAgent>>,
    traps: Option<Arc<TrapSender>>,
}

pub struct SimulatedDevice {
    name: String,
    runtime: RwLock<Runtime>,
    state: RwLock<DeviceState>,
    last_activity: AtomicU64,
    counters: Counters,
    ticker: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl SimulatedDevice {
    fn new(runtime: Runtime, name: String) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            name,
            runtime: RwLock::new(runtime),
            state: RwLock::new(DeviceState::Up),
            last_activity: AtomicU64::new(now()),
            counters: Counters::new(),
            ticker: std::sync::Mutex::new(None),
            stop_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<Device> {
        self.runtime.read().unwrap().config.clone()
    }

    pub fn mac(&self) -> MacAddr {
        self.runtime.read().unwrap().mac
    }

    pub fn agent(&self) -> Option<Arc<SnmpAgent>> {
        self.runtime.read().unwrap().agent.clone()
    }

    pub fn traps(&self) -> Option<Arc<TrapSender>> {
        self.runtime.read().unwrap().traps.clone()
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read().unwrap()
    }

    pub fn is_up(&self) -> bool {
        self.state() == DeviceState::Up
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_activity.store(now(), Ordering::Relaxed);
    }

    /// Transition the administrative state, emitting linkDown/linkUp
    /// traps when a sender is configured.
    pub async fn set_state(&self, new: DeviceState) {
        let old = {
            let mut state = self.state.write().unwrap();
            let old = *state;
            if old == new {
                return;
            }
            *state = new;
            old
        };
        self.touch();
        debug!(device = %self.name, from = %old, to = %new, "state transition");

        let went_down = matches!(new, DeviceState::Down | DeviceState::Stopping)
            && !matches!(old, DeviceState::Down | DeviceState::Stopping);
        let came_up = new == DeviceState::Up
            && matches!(old, DeviceState::Down | DeviceState::Starting | DeviceState::Stopping);

        if !went_down && !came_up {
            return;
        }

        let (traps, interfaces) = {
            let runtime = self.runtime.read().unwrap();
            (runtime.traps.clone(), effective_interfaces(&runtime.config))
        };
        let Some(traps) = traps else { return };

        for (ifindex, name, descr) in interfaces {
            let descr = descr.unwrap_or(name);
            if went_down {
                traps.link_down(ifindex, &descr).await;
            } else {
                traps.link_up(ifindex, &descr).await;
            }
        }
    }

    fn start_ticker(self: &Arc<Self>) {
        let mut guard = self.ticker.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let device = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(BEHAVIOR_TICK_SECS));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Role-specific periodic behavior plugs in here
                        device.touch();
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
    }

    /// Stop the device: Stopping transition (trap), then tear down the
    /// ticker and trap probes.
    async fn stop(&self) {
        self.set_state(DeviceState::Stopping).await;
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.ticker.lock().unwrap().take() {
            task.abort();
        }
        if let Some(traps) = self.traps() {
            traps.stop().await;
        }
    }
}

/// The device fleet: registry, IP index, and the reload procedure.
pub struct Fleet {
    config: RwLock<Arc<Config>>,
    devices: RwLock<HashMap<String, Arc<SimulatedDevice>>>,
    by_ip: RwLock<HashMap<IpAddr, String>>,
    errors: Arc<ErrorStateManager>,
    metrics: Arc<dyn MetricSource>,
}

impl Fleet {
    pub fn new(
        config: Arc<Config>,
        errors: Arc<ErrorStateManager>,
        metrics: Arc<dyn MetricSource>,
    ) -> Result<Self, ConfigError> {
        let fleet = Self {
            config: RwLock::new(config.clone()),
            devices: RwLock::new(HashMap::new()),
            by_ip: RwLock::new(HashMap::new()),
            errors,
            metrics,
        };

        {
            let mut devices = fleet.devices.write().unwrap();
            for device in &config.devices {
                let sim = fleet.build_device(device, &config)?;
                devices.insert(device.name.clone(), sim);
            }
        }
        fleet.rebuild_ip_index();
        Ok(fleet)
    }

    fn build_device(
        &self,
        device: &Device,
        config: &Config,
    ) -> Result<Arc<SimulatedDevice>, ConfigError> {
        let mac = device.mac_addr()?;

        let agent = device
            .snmp_agent
            .as_ref()
            .filter(|cfg| cfg.enabled)
            .map(|cfg| {
                let walk = cfg.walk_file.as_ref().and_then(|file| {
                    let path = config.resolve_walk(file);
                    match crate::snmp::walk::parse_file(&path) {
                        Ok(entries) => Some(entries),
                        Err(e) => {
                            warn!(device = %device.name, path = %path.display(),
                                "walk file unreadable: {e}");
                            None
                        }
                    }
                });
                Arc::new(SnmpAgent::new(device, cfg, walk.as_deref(), self.errors.clone()))
            });

        let traps = device
            .traps
            .as_ref()
            .filter(|cfg| cfg.enabled && !cfg.receivers.is_empty())
            .map(|cfg| Arc::new(TrapSender::new(&device.name, cfg)));

        Ok(Arc::new(SimulatedDevice::new(
            Runtime { config: Arc::new(device.clone()), mac, agent, traps },
            device.name.clone(),
        )))
    }

    /// Start tickers, probes, and startup traps for every device.
    pub async fn start_all(&self) {
        let devices: Vec<Arc<SimulatedDevice>> = self.all();
        for device in devices {
            self.start_device(&device).await;
        }
        info!(devices = self.device_count(), "fleet started");
    }

    async fn start_device(&self, device: &Arc<SimulatedDevice>) {
        device.start_ticker();
        let cfg = device.config();
        if let (Some(traps), Some(trap_cfg)) = (device.traps(), cfg.traps.as_ref()) {
            if trap_cfg.on_startup {
                traps.cold_start().await;
            }
            traps.start_probes(&trap_cfg.probes, self.metrics.clone()).await;
        }
    }

    /// Stop every device (Stopping transition + trap teardown).
    pub async fn stop_all(&self) {
        let devices: Vec<Arc<SimulatedDevice>> = self.all();
        for device in devices {
            device.stop().await;
        }
    }

    /// Diff-based hot reload. In-flight I/O keeps the old snapshot until
    /// the swap; observers see either the whole old fleet or the whole
    /// new one.
    pub async fn apply(&self, new_config: Arc<Config>) -> Result<(), ConfigError> {
        new_config.validate()?;

        let old_config = self.config();
        let fleet_diff = diff(&old_config, &new_config);
        info!(
            added = fleet_diff.added.len(),
            removed = fleet_diff.removed.len(),
            retained = fleet_diff.retained.len(),
            "applying configuration"
        );

        // Build everything that can fail before touching live state
        let mut fresh: HashMap<String, Arc<SimulatedDevice>> = HashMap::new();
        for name in &fleet_diff.added {
            let Some(device) = new_config.device(name) else { continue };
            fresh.insert(name.clone(), self.build_device(device, &new_config)?);
        }

        struct Refresh {
            config: Arc<Device>,
            mac: MacAddr,
            agent: Option<Arc<SnmpAgent>>,
            traps: Option<Option<Arc<TrapSender>>>,
        }
        let mut refreshed: HashMap<String, Refresh> = HashMap::new();
        for name in &fleet_diff.retained {
            let Some(device) = new_config.device(name) else { continue };
            let mac = device.mac_addr()?;
            let rebuilt = self.build_device(device, &new_config)?;
            let old_device = new_trap_relevant(&old_config, name);
            let new_device = new_trap_relevant(&new_config, name);
            let traps_changed = old_device != new_device;
            let runtime = rebuilt.runtime.read().unwrap();
            refreshed.insert(
                name.clone(),
                Refresh {
                    config: runtime.config.clone(),
                    mac,
                    agent: runtime.agent.clone(),
                    traps: traps_changed.then(|| runtime.traps.clone()),
                },
            );
        }

        // Stop and drop removed devices
        let removed: Vec<Arc<SimulatedDevice>> = {
            let mut devices = self.devices.write().unwrap();
            fleet_diff
                .removed
                .iter()
                .filter_map(|name| devices.remove(name))
                .collect()
        };
        for device in removed {
            device.stop().await;
            debug!(device = %device.name(), "device removed");
        }

        // Refresh retained devices in place
        let mut stale_traps: Vec<Arc<TrapSender>> = Vec::new();
        let mut restart_probes: Vec<Arc<SimulatedDevice>> = Vec::new();
        {
            let devices = self.devices.read().unwrap();
            for (name, refresh) in refreshed {
                let Some(device) = devices.get(&name) else { continue };
                let mut runtime = device.runtime.write().unwrap();
                runtime.config = refresh.config;
                runtime.mac = refresh.mac;
                runtime.agent = refresh.agent;
                if let Some(new_traps) = refresh.traps {
                    if let Some(old) = runtime.traps.take() {
                        stale_traps.push(old);
                    }
                    runtime.traps = new_traps;
                    drop(runtime);
                    restart_probes.push(device.clone());
                }
            }
        }
        for old in stale_traps {
            old.stop().await;
        }
        for device in restart_probes {
            let cfg = device.config();
            if let (Some(traps), Some(trap_cfg)) = (device.traps(), cfg.traps.as_ref()) {
                traps.start_probes(&trap_cfg.probes, self.metrics.clone()).await;
            }
        }

        // Insert and start added devices
        {
            let mut devices = self.devices.write().unwrap();
            for (name, device) in &fresh {
                devices.insert(name.clone(), device.clone());
            }
        }
        for device in fresh.values() {
            self.start_device(device).await;
            debug!(device = %device.name(), "device added");
        }

        // Swap the snapshot and rebuild the IP index
        *self.config.write().unwrap() = new_config;
        self.rebuild_ip_index();
        Ok(())
    }

    fn rebuild_ip_index(&self) {
        let devices = self.devices.read().unwrap();
        let mut index = HashMap::new();
        for (name, device) in devices.iter() {
            for ip in device.config().all_ips() {
                index.insert(ip, name.clone());
            }
        }
        *self.by_ip.write().unwrap() = index;
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.read().unwrap().clone()
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    pub fn all(&self) -> Vec<Arc<SimulatedDevice>> {
        let mut devices: Vec<Arc<SimulatedDevice>> =
            self.devices.read().unwrap().values().cloned().collect();
        devices.sort_by(|a, b| a.name().cmp(b.name()));
        devices
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<SimulatedDevice>> {
        self.devices.read().unwrap().get(name).cloned()
    }

    pub fn by_ip(&self, ip: &IpAddr) -> Option<Arc<SimulatedDevice>> {
        let name = self.by_ip.read().unwrap().get(ip).cloned()?;
        self.by_name(&name)
    }

    pub fn by_mac(&self, mac: MacAddr) -> Option<Arc<SimulatedDevice>> {
        self.devices.read().unwrap().values().find(|d| d.mac() == mac).cloned()
    }
}

/// The trap-sender fields whose change forces a sender rebuild.
fn new_trap_relevant(config: &Config, name: &str) -> Option<(bool, Vec<String>)> {
    config
        .device(name)
        .and_then(|d| d.traps.as_ref())
        .map(|t: &TrapConfig| (t.enabled, t.receivers.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::ProbeKind;

    struct NullMetrics;
    impl MetricSource for NullMetrics {
        fn sample(&self, _kind: ProbeKind) -> u8 {
            0
        }
    }

    fn fleet(yaml: &str) -> Fleet {
        let config = Arc::new(Config::from_yaml(yaml).unwrap());
        Fleet::new(config, Arc::new(ErrorStateManager::new()), Arc::new(NullMetrics)).unwrap()
    }

    const TWO: &str = r#"
devices:
  - name: core1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
    type: router
    snmp_agent: { community: public }
  - name: edge1
    mac: "aa:bb:cc:00:00:02"
    ip: 10.0.0.2
    type: switch
"#;

    #[tokio::test]
    async fn test_fleet_build_and_lookup() {
        let fleet = fleet(TWO);
        assert_eq!(fleet.device_count(), 2);

        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let device = fleet.by_ip(&ip).unwrap();
        assert_eq!(device.name(), "core1");
        assert!(device.agent().is_some());
        assert!(fleet.by_name("edge1").unwrap().agent().is_none());
        assert_eq!(device.state(), DeviceState::Up);
    }

    #[tokio::test]
    async fn test_reload_add_remove_retain() {
        let fleet = fleet(TWO);
        let new = Arc::new(
            Config::from_yaml(
                r#"
devices:
  - name: core1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
    type: router
  - name: core2
    mac: "aa:bb:cc:00:00:03"
    ip: 10.0.0.3
"#,
            )
            .unwrap(),
        );
        fleet.apply(new).await.unwrap();

        assert_eq!(fleet.device_count(), 2);
        assert!(fleet.by_name("edge1").is_none());
        assert!(fleet.by_name("core2").is_some());

        // Retained device lost its agent (snmp_agent removed from config)
        assert!(fleet.by_name("core1").unwrap().agent().is_none());

        // IP index follows the swap
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(fleet.by_ip(&ip).is_none());
        let ip3: IpAddr = "10.0.0.3".parse().unwrap();
        assert_eq!(fleet.by_ip(&ip3).unwrap().name(), "core2");
    }

    #[tokio::test]
    async fn test_reload_rejects_invalid() {
        let fleet = fleet(TWO);
        let bad = Arc::new(Config {
            devices: vec![
                crate::config::Config::from_yaml(TWO).unwrap().devices[0].clone(),
                {
                    let mut d = crate::config::Config::from_yaml(TWO).unwrap().devices[1].clone();
                    d.ip = Some("10.0.0.1".into()); // collides with core1
                    d
                },
            ],
            ..Config::default()
        });
        assert!(fleet.apply(bad).await.is_err());
        // Fleet unchanged
        assert_eq!(fleet.device_count(), 2);
        assert!(fleet.by_name("edge1").is_some());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let fleet = fleet(TWO);
        let device = fleet.by_name("core1").unwrap();

        device.set_state(DeviceState::Down).await;
        assert_eq!(device.state(), DeviceState::Down);
        assert!(!device.is_up());

        device.set_state(DeviceState::Starting).await;
        device.set_state(DeviceState::Up).await;
        assert!(device.is_up());
    }
}
