//! Discovery protocols: LLDP, CDP, EDP, FDP.
//!
//! Each handler periodically advertises every Up device that enables
//! the protocol, and learns neighbors from inbound advertisements that
//! carry a management address.

use pnet::util::MacAddr;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;

use crate::capture::build_ethernet;
use crate::config::{Device, DeviceType, DiscoveryConfig};
use crate::stack::StackContext;
use crate::types::ProtocolKind;

use super::frame::{ETHERTYPE_LLDP, Frame, L3, build_llc};
use super::{Discriminator, ProtocolHandler};

pub const LLDP_MULTICAST: MacAddr = MacAddr(0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e);
pub const CDP_MULTICAST: MacAddr = MacAddr(0x01, 0x00, 0x0c, 0xcc, 0xcc, 0xcc);
pub const EDP_MULTICAST: MacAddr = MacAddr(0x00, 0xe0, 0x2b, 0x00, 0x00, 0x00);
pub const FDP_MULTICAST: MacAddr = MacAddr(0x01, 0xe0, 0x52, 0xcc, 0xcc, 0xcc);

pub const CDP_OUI: [u8; 3] = [0x00, 0x00, 0x0c];
pub const EDP_OUI: [u8; 3] = [0x00, 0xe0, 0x2b];
pub const FDP_OUI: [u8; 3] = [0x00, 0xe0, 0x52];

const CDP_PID: u16 = 0x2000;
const EDP_PID: u16 = 0x00bb;
const FDP_PID: u16 = 0x2000;

/// Advertiser base tick; per-device intervals are multiples of this.
const BASE_TICK_SECS: u64 = 5;

type BuildFn = fn(&Device, &DiscoveryConfig, MacAddr) -> Option<Vec<u8>>;

/// Shared periodic-advertisement plumbing for the four protocols.
struct Advertiser {
    kind: ProtocolKind,
    build: BuildFn,
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl Advertiser {
    fn new(kind: ProtocolKind, build: BuildFn) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self { kind, build, task: std::sync::Mutex::new(None), stop_tx }
    }

    fn start(&self, ctx: StackContext) {
        let mut guard = self.task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let kind = self.kind;
        let build = self.build;
        let mut stop_rx = self.stop_tx.subscribe();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(BASE_TICK_SECS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut elapsed: u64 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        elapsed += BASE_TICK_SECS;
                        advertise_round(&ctx, kind, build, elapsed).await;
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

    fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

async fn advertise_round(ctx: &StackContext, kind: ProtocolKind, build: BuildFn, elapsed: u64) {
    let config = ctx.fleet.config();
    for device in ctx.fleet.all() {
        if !device.is_up() {
            continue;
        }
        let device_cfg = device.config();
        let Some(disc) = config.discovery_for(&device_cfg, kind) else { continue };
        let interval = disc.interval_secs.max(BASE_TICK_SECS);
        if elapsed % interval != 0 {
            continue;
        }
        if let Some(frame) = build(&device_cfg, disc, device.mac()) {
            trace!(device = %device.name(), protocol = %kind, "advertisement");
            ctx.outbound.send(frame).await;
        }
    }
}

fn port_id(device: &Device, cfg: &DiscoveryConfig) -> String {
    cfg.port_id
        .clone()
        .or_else(|| device.interfaces.first().map(|i| i.name.clone()))
        .unwrap_or_else(|| "eth0".to_string())
}

fn system_description(device: &Device, cfg: &DiscoveryConfig) -> String {
    cfg.system_description
        .clone()
        .or_else(|| device.properties.get("sysDescr").cloned())
        .unwrap_or_else(|| format!("{} {}", device.device_type.as_str(), device.name))
}

fn capability_bits(device_type: DeviceType) -> u16 {
    match device_type {
        DeviceType::Router | DeviceType::Firewall => 0x0010,
        DeviceType::Switch => 0x0004,
        DeviceType::Ap => 0x0008,
        _ => 0x0080,
    }
}

// =============================================================================
// LLDP
// =============================================================================

pub struct LldpHandler {
    advertiser: Advertiser,
}

impl LldpHandler {
    pub fn new() -> Self {
        Self { advertiser: Advertiser::new(ProtocolKind::Lldp, build_lldp) }
    }
}

impl Default for LldpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for LldpHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Lldp
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::EtherType(ETHERTYPE_LLDP)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        frame.ethertype == ETHERTYPE_LLDP && frame.data.len() > 14
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        // Our own advertisements come back in promiscuous mode
        if ctx.fleet.by_mac(frame.src_mac).is_some() {
            return Vec::new();
        }
        let payload = &frame.data[14..];
        let mut name = None;
        let mut mgmt_ip = None;

        let mut pos = 0;
        while pos + 2 <= payload.len() {
            let header = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
            let tlv_type = (header >> 9) as u8;
            let len = (header & 0x01ff) as usize;
            let Some(value) = payload.get(pos + 2..pos + 2 + len) else { break };
            match tlv_type {
                0 => break,
                5 => name = Some(String::from_utf8_lossy(value).to_string()),
                8 => {
                    // addr_len, subtype, address...
                    if value.len() >= 6 && value[0] == 5 && value[1] == 1 {
                        mgmt_ip =
                            Some(Ipv4Addr::new(value[2], value[3], value[4], value[5]));
                    }
                }
                _ => {}
            }
            pos += 2 + len;
        }

        if let Some(ip) = mgmt_ip {
            ctx.neighbors.learn(ip.into(), frame.src_mac, name.as_deref());
        }
        Vec::new()
    }

    fn start(&self, ctx: StackContext) {
        self.advertiser.start(ctx);
    }

    fn stop(&self) {
        self.advertiser.stop();
    }
}

fn lldp_tlv(out: &mut Vec<u8>, tlv_type: u8, value: &[u8]) {
    let header = ((tlv_type as u16) << 9) | (value.len() as u16 & 0x01ff);
    out.extend_from_slice(&header.to_be_bytes());
    out.extend_from_slice(value);
}

pub fn build_lldp(device: &Device, cfg: &DiscoveryConfig, mac: MacAddr) -> Option<Vec<u8>> {
    let mut p = Vec::with_capacity(128);

    let mut chassis = vec![4u8]; // subtype: MAC address
    chassis.extend_from_slice(&[mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]);
    lldp_tlv(&mut p, 1, &chassis);

    let mut port = vec![5u8]; // subtype: interface name
    port.extend_from_slice(port_id(device, cfg).as_bytes());
    lldp_tlv(&mut p, 2, &port);

    let ttl = (cfg.interval_secs.saturating_mul(4)).clamp(120, 65535) as u16;
    lldp_tlv(&mut p, 3, &ttl.to_be_bytes());

    if let Some(descr) = &cfg.port_description {
        lldp_tlv(&mut p, 4, descr.as_bytes());
    }
    lldp_tlv(&mut p, 5, device.name.as_bytes());
    lldp_tlv(&mut p, 6, system_description(device, cfg).as_bytes());

    let caps = capability_bits(device.device_type);
    let mut cap_value = caps.to_be_bytes().to_vec();
    cap_value.extend_from_slice(&caps.to_be_bytes());
    lldp_tlv(&mut p, 7, &cap_value);

    if let Some(ip) = device.ipv4s().first() {
        let mut mgmt = vec![5u8, 1u8]; // addr len, subtype ipv4
        mgmt.extend_from_slice(&ip.octets());
        mgmt.extend_from_slice(&[2, 0, 0, 0, 1, 0]); // ifIndex 1, no OID
        lldp_tlv(&mut p, 8, &mgmt);
    }

    lldp_tlv(&mut p, 0, &[]);
    build_ethernet(LLDP_MULTICAST, mac, ETHERTYPE_LLDP, &p)
}

// =============================================================================
// CDP / FDP (shared TLV shape)
// =============================================================================

fn cdp_like_tlv(out: &mut Vec<u8>, tlv_type: u16, value: &[u8]) {
    out.extend_from_slice(&tlv_type.to_be_bytes());
    out.extend_from_slice(&((value.len() + 4) as u16).to_be_bytes());
    out.extend_from_slice(value);
}

fn build_cdp_like(device: &Device, cfg: &DiscoveryConfig, ttl: u8) -> Vec<u8> {
    let mut p = vec![2u8, ttl, 0, 0]; // version, ttl, checksum placeholder

    cdp_like_tlv(&mut p, 1, device.name.as_bytes());

    if let Some(ip) = device.ipv4s().first() {
        // address TLV: count, then NLPID/IPv4 entry
        let mut addr = 1u32.to_be_bytes().to_vec();
        addr.extend_from_slice(&[1, 1, 0xcc, 0, 4]);
        addr.extend_from_slice(&ip.octets());
        cdp_like_tlv(&mut p, 2, &addr);
    }

    cdp_like_tlv(&mut p, 3, port_id(device, cfg).as_bytes());

    let caps: u32 = match device.device_type {
        DeviceType::Router | DeviceType::Firewall => 0x01,
        DeviceType::Switch => 0x08,
        DeviceType::Ap => 0x10,
        _ => 0x40,
    };
    cdp_like_tlv(&mut p, 4, &caps.to_be_bytes());

    cdp_like_tlv(&mut p, 5, system_description(device, cfg).as_bytes());
    let platform = cfg
        .platform
        .clone()
        .unwrap_or_else(|| device.device_type.as_str().to_string());
    cdp_like_tlv(&mut p, 6, platform.as_bytes());

    let checksum = pnet::util::checksum(&p, 1);
    p[2..4].copy_from_slice(&checksum.to_be_bytes());
    p
}

/// Device name + first IPv4 from a CDP/FDP TLV list.
fn parse_cdp_like(payload: &[u8]) -> (Option<String>, Option<Ipv4Addr>) {
    let mut name = None;
    let mut ip = None;
    let mut pos = 4; // skip version/ttl/checksum
    while pos + 4 <= payload.len() {
        let tlv_type = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
        let len = u16::from_be_bytes([payload[pos + 2], payload[pos + 3]]) as usize;
        if len < 4 || pos + len > payload.len() {
            break;
        }
        let value = &payload[pos + 4..pos + len];
        match tlv_type {
            1 => name = Some(String::from_utf8_lossy(value).to_string()),
            2 if value.len() >= 13 => {
                // count(4) proto-entry(5) addr-len(2)=4 addr(4)
                ip = Some(Ipv4Addr::new(value[9], value[10], value[11], value[12]));
            }
            _ => {}
        }
        pos += len;
    }
    (name, ip)
}

macro_rules! cdp_like_handler {
    ($name:ident, $kind:expr, $oui:expr, $pid:expr, $multicast:expr, $build:ident) => {
        pub struct $name {
            advertiser: Advertiser,
        }

        impl $name {
            pub fn new() -> Self {
                Self { advertiser: Advertiser::new($kind, $build) }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ProtocolHandler for $name {
            fn kind(&self) -> ProtocolKind {
                $kind
            }

            fn claims(&self) -> Vec<Discriminator> {
                vec![Discriminator::LlcSnapOui($oui)]
            }

            fn can_handle(&self, frame: &Frame<'_>) -> bool {
                matches!(frame.l3, L3::Llc { oui: Some(oui), pid: Some(pid), .. }
                    if oui == $oui && pid == $pid)
            }

            fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
                if ctx.fleet.by_mac(frame.src_mac).is_some() {
                    return Vec::new();
                }
                let L3::Llc { payload, .. } = frame.l3 else { return Vec::new() };
                let (name, ip) = parse_cdp_like(payload);
                if let Some(ip) = ip {
                    ctx.neighbors.learn(ip.into(), frame.src_mac, name.as_deref());
                }
                Vec::new()
            }

            fn start(&self, ctx: StackContext) {
                self.advertiser.start(ctx);
            }

            fn stop(&self) {
                self.advertiser.stop();
            }
        }
    };
}

pub fn build_cdp(device: &Device, cfg: &DiscoveryConfig, mac: MacAddr) -> Option<Vec<u8>> {
    let body = build_cdp_like(device, cfg, 180);
    Some(build_llc(CDP_MULTICAST, mac, 0xaa, 0xaa, 0x03, Some((CDP_OUI, CDP_PID)), &body))
}

pub fn build_fdp(device: &Device, cfg: &DiscoveryConfig, mac: MacAddr) -> Option<Vec<u8>> {
    let body = build_cdp_like(device, cfg, 180);
    Some(build_llc(FDP_MULTICAST, mac, 0xaa, 0xaa, 0x03, Some((FDP_OUI, FDP_PID)), &body))
}

cdp_like_handler!(CdpHandler, ProtocolKind::Cdp, CDP_OUI, CDP_PID, CDP_MULTICAST, build_cdp);
cdp_like_handler!(FdpHandler, ProtocolKind::Fdp, FDP_OUI, FDP_PID, FDP_MULTICAST, build_fdp);

// =============================================================================
// EDP
// =============================================================================

pub fn build_edp(device: &Device, _cfg: &DiscoveryConfig, mac: MacAddr) -> Option<Vec<u8>> {
    // header: version, reserved, length, checksum, sequence, id, mac
    let mut p = vec![1u8, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    p.extend_from_slice(&[mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]);

    // display TLV: marker, type, length
    let name = device.name.as_bytes();
    p.push(0x99);
    p.push(1);
    p.extend_from_slice(&((name.len() + 4) as u16).to_be_bytes());
    p.extend_from_slice(name);

    // null TLV terminates
    p.extend_from_slice(&[0x99, 0, 0, 4]);

    let total = p.len() as u16;
    p[2..4].copy_from_slice(&total.to_be_bytes());
    let checksum = pnet::util::checksum(&p, 2);
    p[4..6].copy_from_slice(&checksum.to_be_bytes());

    Some(build_llc(EDP_MULTICAST, mac, 0xaa, 0xaa, 0x03, Some((EDP_OUI, EDP_PID)), &p))
}

pub struct EdpHandler {
    advertiser: Advertiser,
}

impl EdpHandler {
    pub fn new() -> Self {
        Self { advertiser: Advertiser::new(ProtocolKind::Edp, build_edp) }
    }
}

impl Default for EdpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for EdpHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Edp
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::LlcSnapOui(EDP_OUI)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        matches!(frame.l3, L3::Llc { oui: Some(oui), pid: Some(pid), .. }
            if oui == EDP_OUI && pid == EDP_PID)
    }

    fn handle(&self, frame: &Frame<'_>, _ctx: &StackContext) -> Vec<Vec<u8>> {
        // EDP advertisements carry no address we can key the cache by
        trace!(src = %frame.src_mac, "edp advertisement");
        Vec::new()
    }

    fn start(&self, ctx: StackContext) {
        self.advertiser.start(ctx);
    }

    fn stop(&self) {
        self.advertiser.stop();
    }
}
