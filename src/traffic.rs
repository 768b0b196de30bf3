//! Background traffic generator: gratuitous ARP, periodic pings, and
//! low-rate noise frames, per device `traffic` config.

use rand::Rng;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;

use crate::proto::arp::build_gratuitous;
use crate::proto::icmp::build_echo_request;
use crate::stack::StackContext;

/// Experimental ethertype used for background noise frames.
const NOISE_ETHERTYPE: u16 = 0x88b5;

pub struct TrafficGenerator {
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl TrafficGenerator {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self { task: std::sync::Mutex::new(None), stop_tx }
    }

    pub fn start(&self, ctx: StackContext) {
        let mut guard = self.task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let mut stop_rx = self.stop_tx.subscribe();
        *guard = Some(tokio::spawn(async move {
            announce(&ctx).await;

            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut elapsed: u64 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        elapsed += 1;
                        tick(&ctx, elapsed).await;
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

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Default for TrafficGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Gratuitous ARP for every traffic-enabled device address at startup.
async fn announce(ctx: &StackContext) {
    for device in ctx.fleet.all() {
        let cfg = device.config();
        let Some(traffic) = cfg.traffic.as_ref().filter(|c| c.enabled) else { continue };
        if !traffic.gratuitous_arp {
            continue;
        }
        for ip in cfg.ipv4s() {
            if let Some(frame) = build_gratuitous(device.mac(), ip) {
                trace!(device = %device.name(), %ip, "gratuitous arp");
                ctx.outbound.send(frame).await;
            }
        }
    }
}

async fn tick(ctx: &StackContext, elapsed: u64) {
    for device in ctx.fleet.all() {
        if !device.is_up() {
            continue;
        }
        let cfg = device.config();
        let Some(traffic) = cfg.traffic.as_ref().filter(|c| c.enabled) else { continue };

        // Periodic pings to configured targets
        let interval = traffic.ping_interval_secs.max(1);
        if !traffic.ping_targets.is_empty() && elapsed % interval == 0 {
            let Some(src_ip) = cfg.ipv4s().first().copied() else { continue };
            for target in &traffic.ping_targets {
                let IpAddr::V4(target) = target else { continue };
                // Resolve the target MAC from the cache; broadcast otherwise
                let dst_mac = ctx
                    .neighbors
                    .lookup(&IpAddr::V4(*target))
                    .and_then(|r| r.mac.parse().ok())
                    .unwrap_or(pnet::util::MacAddr::broadcast());
                let seq = (elapsed / interval) as u16;
                if let Some(frame) = build_echo_request(
                    device.mac(),
                    dst_mac,
                    src_ip,
                    *target,
                    device_ident(device.name()),
                    seq,
                    cfg.icmp_ttl(),
                ) {
                    ctx.outbound.send(frame).await;
                }
            }
        }

        // Random background noise
        if traffic.background_fpm > 0 {
            let period = (60 / traffic.background_fpm.min(60) as u64).max(1);
            if elapsed % period == 0 {
                let mut payload = vec![0u8; 46];
                rand::thread_rng().fill(payload.as_mut_slice());
                if let Some(frame) = crate::capture::build_ethernet(
                    pnet::util::MacAddr::broadcast(),
                    device.mac(),
                    NOISE_ETHERTYPE,
                    &payload,
                ) {
                    ctx.outbound.send(frame).await;
                }
            }
        }
    }
}

fn device_ident(name: &str) -> u16 {
    let mut hash: u16 = 0x1234;
    for b in name.bytes() {
        hash = hash.rotate_left(3) ^ b as u16;
    }
    hash
}
