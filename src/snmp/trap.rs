//! SNMPv2c trap emission: lifecycle traps and periodic threshold probes.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, watch};
use tracing::{debug, trace, warn};

use crate::config::{TrapConfig, TrapProbeConfig};

use super::ber::{self, Pdu, PduType, SnmpMessage, VarBind, VERSION_2C};
use super::value::OidValue;

pub const TRAP_COLD_START: &str = "1.3.6.1.6.3.1.1.5.1";
pub const TRAP_LINK_DOWN: &str = "1.3.6.1.6.3.1.1.5.3";
pub const TRAP_LINK_UP: &str = "1.3.6.1.6.3.1.1.5.4";
pub const TRAP_AUTH_FAILURE: &str = "1.3.6.1.6.3.1.1.5.5";

const OID_SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
const OID_SNMP_TRAP_OID: &str = "1.3.6.1.6.3.1.1.4.1.0";

// Enterprise subtree for threshold probe traps
const TRAP_HIGH_CPU: &str = "1.3.6.1.4.1.99999.0.1";
const TRAP_HIGH_MEMORY: &str = "1.3.6.1.4.1.99999.0.2";
const TRAP_IF_ERRORS: &str = "1.3.6.1.4.1.99999.0.3";
const OID_PROBE_VALUE: &str = "1.3.6.1.4.1.99999.1.1";

const DEFAULT_TRAP_PORT: u16 = 162;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    HighCpu,
    HighMemory,
    InterfaceErrors,
}

impl ProbeKind {
    pub fn parse(s: &str) -> Option<ProbeKind> {
        match s {
            "high_cpu" | "highCPU" | "cpu" => Some(ProbeKind::HighCpu),
            "high_memory" | "highMemory" | "memory" => Some(ProbeKind::HighMemory),
            "interface_errors" | "interfaceErrors" | "errors" => Some(ProbeKind::InterfaceErrors),
            _ => None,
        }
    }

    fn trap_oid(&self) -> &'static str {
        match self {
            ProbeKind::HighCpu => TRAP_HIGH_CPU,
            ProbeKind::HighMemory => TRAP_HIGH_MEMORY,
            ProbeKind::InterfaceErrors => TRAP_IF_ERRORS,
        }
    }
}

/// Where probe samples come from. Injected so tests drive thresholds
/// deterministically instead of depending on the RNG.
pub trait MetricSource: Send + Sync {
    fn sample(&self, kind: ProbeKind) -> u8;
}

/// Default sampler: uniform 0..=100.
pub struct RandomMetrics;

impl MetricSource for RandomMetrics {
    fn sample(&self, _kind: ProbeKind) -> u8 {
        rand::Rng::gen_range(&mut rand::thread_rng(), 0..=100)
    }
}

/// One per device with traps enabled. Fans every trap out to all
/// configured receivers; a trap counts as sent if any receiver took it.
pub struct TrapSender {
    device_name: String,
    community: String,
    receivers: Vec<SocketAddr>,
    started: Instant,
    request_id: AtomicI64,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl TrapSender {
    /// Build from config. Unresolvable receivers are dropped with a
    /// warning; a sender with no receivers sends nothing.
    pub fn new(device_name: &str, cfg: &TrapConfig) -> Self {
        let receivers = cfg
            .receivers
            .iter()
            .filter_map(|raw| match resolve_receiver(raw) {
                Some(addr) => Some(addr),
                None => {
                    warn!(device = device_name, receiver = raw, "unresolvable trap receiver");
                    None
                }
            })
            .collect();

        let (stop_tx, _) = watch::channel(false);
        Self {
            device_name: device_name.to_string(),
            community: cfg.community.clone().unwrap_or_else(|| "public".to_string()),
            receivers,
            started: Instant::now(),
            request_id: AtomicI64::new(1),
            tasks: Mutex::new(Vec::new()),
            stop_tx,
        }
    }

    pub fn receivers(&self) -> &[SocketAddr] {
        &self.receivers
    }

    pub fn uptime_ticks(&self) -> u32 {
        (self.started.elapsed().as_millis() / 10) as u32
    }

    /// Send one trap. The first two varbinds are always sysUpTime.0 and
    /// snmpTrapOID.0; `extra` follows.
    pub async fn send(&self, trap_oid: &str, extra: Vec<VarBind>) -> bool {
        if self.receivers.is_empty() {
            return false;
        }

        let mut bindings = vec![
            VarBind::new(OID_SYS_UPTIME, OidValue::TimeTicks(self.uptime_ticks())),
            VarBind::new(
                OID_SNMP_TRAP_OID,
                OidValue::ObjectIdentifier(trap_oid.to_string()),
            ),
        ];
        bindings.extend(extra);

        let msg = SnmpMessage {
            version: VERSION_2C,
            community: self.community.as_bytes().to_vec(),
            pdu: Pdu {
                pdu_type: PduType::TrapV2,
                request_id: self.request_id.fetch_add(1, Ordering::Relaxed),
                error_status: 0,
                error_index: 0,
                bindings,
            },
        };

        let bytes = match ber::encode(&msg) {
            Ok(b) => b,
            Err(e) => {
                warn!(device = %self.device_name, "trap encode failed: {e}");
                return false;
            }
        };

        let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
            Ok(s) => s,
            Err(e) => {
                trace!(device = %self.device_name, "trap socket bind failed: {e}");
                return false;
            }
        };

        let mut any = false;
        for receiver in &self.receivers {
            match socket.send_to(&bytes, receiver).await {
                Ok(_) => any = true,
                Err(e) => {
                    trace!(device = %self.device_name, receiver = %receiver,
                        "trap send failed: {e}");
                }
            }
        }

        if any {
            debug!(device = %self.device_name, oid = trap_oid, "trap sent");
        }
        any
    }

    pub async fn cold_start(&self) -> bool {
        self.send(TRAP_COLD_START, Vec::new()).await
    }

    pub async fn link_down(&self, ifindex: u32, descr: &str) -> bool {
        self.send(TRAP_LINK_DOWN, link_varbinds(ifindex, descr, 2)).await
    }

    pub async fn link_up(&self, ifindex: u32, descr: &str) -> bool {
        self.send(TRAP_LINK_UP, link_varbinds(ifindex, descr, 1)).await
    }

    pub async fn auth_failure(&self, source: IpAddr) -> bool {
        let bindings = vec![VarBind::new(
            "1.3.6.1.6.3.18.1.3.0", // snmpTrapAddress
            match source {
                IpAddr::V4(v4) => OidValue::IpAddress(v4),
                IpAddr::V6(_) => OidValue::string(&source.to_string()),
            },
        )];
        self.send(TRAP_AUTH_FAILURE, bindings).await
    }

    /// Spawn the configured threshold probes. Each samples the metric
    /// source at its interval and traps when the sample exceeds the
    /// threshold.
    pub async fn start_probes(
        self: &Arc<Self>,
        probes: &[TrapProbeConfig],
        metrics: Arc<dyn MetricSource>,
    ) {
        let mut tasks = self.tasks.lock().await;
        for probe in probes {
            let Some(kind) = ProbeKind::parse(&probe.kind) else {
                warn!(device = %self.device_name, kind = %probe.kind, "unknown probe kind");
                continue;
            };
            let sender = Arc::clone(self);
            let metrics = metrics.clone();
            let threshold = probe.threshold;
            let interval = Duration::from_secs(probe.interval_secs.max(1));
            let mut stop_rx = self.stop_tx.subscribe();

            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await; // consume the immediate first tick
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let value = metrics.sample(kind);
                            if value > threshold {
                                let bindings = vec![VarBind::new(
                                    OID_PROBE_VALUE,
                                    OidValue::Gauge32(value as u32),
                                )];
                                sender.send(kind.trap_oid(), bindings).await;
                            }
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
    }

    /// Stop all probe tasks. Idempotent.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

fn link_varbinds(ifindex: u32, descr: &str, status: i64) -> Vec<VarBind> {
    vec![
        VarBind::new(
            &format!("1.3.6.1.2.1.2.2.1.1.{ifindex}"),
            OidValue::Integer(ifindex as i64),
        ),
        VarBind::new(
            &format!("1.3.6.1.2.1.2.2.1.7.{ifindex}"),
            OidValue::Integer(status),
        ),
        VarBind::new(
            &format!("1.3.6.1.2.1.2.2.1.8.{ifindex}"),
            OidValue::Integer(status),
        ),
        VarBind::new(&format!("1.3.6.1.2.1.2.2.1.2.{ifindex}"), OidValue::string(descr)),
    ]
}

fn resolve_receiver(raw: &str) -> Option<SocketAddr> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr);
    }
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, DEFAULT_TRAP_PORT));
    }
    // Hostname, with or without port
    let with_port = if raw.contains(':') {
        raw.to_string()
    } else {
        format!("{raw}:{DEFAULT_TRAP_PORT}")
    };
    with_port.to_socket_addrs().ok()?.next()
}
