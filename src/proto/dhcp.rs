//! DHCPv4 server: DISCOVER/REQUEST/INFORM over configured pools.

use pnet::util::MacAddr;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use tracing::trace;

use crate::config::DhcpConfig;
use crate::device::SimulatedDevice;
use crate::stack::StackContext;
use crate::types::ProtocolKind;

use super::frame::{Frame, L3, build_udp_ipv4};
use super::{Discriminator, ProtocolHandler};

const SERVER_PORT: u16 = 67;
const CLIENT_PORT: u16 = 68;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const MAGIC: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

const DHCP_DISCOVER: u8 = 1;
const DHCP_OFFER: u8 = 2;
const DHCP_REQUEST: u8 = 3;
const DHCP_ACK: u8 = 5;
const DHCP_INFORM: u8 = 8;

const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_HOSTNAME: u8 = 12;
const OPT_DOMAIN: u8 = 15;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MSG_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_NTP: u8 = 42;
const OPT_VENDOR: u8 = 43;
const OPT_TFTP_SERVER: u8 = 66;
const OPT_BOOT_FILE: u8 = 67;
const OPT_END: u8 = 255;

pub struct DhcpHandler;

impl DhcpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DhcpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for DhcpHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Dhcp
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::UdpPort(SERVER_PORT)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        frame.udp().is_some_and(|(_, _, p)| {
            p.len() >= 240 && p[0] == BOOTREQUEST && p[236..240] == MAGIC
        })
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let Some((_, _, payload)) = frame.udp() else { return Vec::new() };
        let Some(request) = BootpRequest::parse(payload) else {
            ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        };

        let Some(server) = pick_server(frame, ctx) else { return Vec::new() };
        let cfg = server.config();
        let Some(dhcp) = cfg.dhcp.as_ref().filter(|c| c.enabled) else {
            return Vec::new();
        };

        ctx.stats.dhcp_requests.fetch_add(1, Ordering::Relaxed);
        server.counters().dhcp_requests.fetch_add(1, Ordering::Relaxed);
        server.touch();

        if let Some(hostname) = &request.hostname {
            trace!(client = %request.chaddr, hostname, "dhcp client");
        }

        let server_ip = cfg.ipv4s().first().copied().unwrap_or(Ipv4Addr::UNSPECIFIED);
        let reply_type = match request.msg_type {
            DHCP_DISCOVER => DHCP_OFFER,
            DHCP_REQUEST | DHCP_INFORM => DHCP_ACK,
            _ => return Vec::new(),
        };

        let yiaddr = if request.msg_type == DHCP_INFORM {
            Ipv4Addr::UNSPECIFIED
        } else {
            request
                .requested_ip
                .filter(|ip| in_pool(dhcp, *ip))
                .unwrap_or_else(|| allocate(dhcp, request.chaddr))
        };

        let body = build_reply(&request, reply_type, yiaddr, server_ip, dhcp);

        // Honor the broadcast flag; unicast to the client otherwise
        let (dst_mac, dst_ip) = if request.broadcast || request.msg_type != DHCP_INFORM {
            if request.broadcast {
                (MacAddr::broadcast(), Ipv4Addr::BROADCAST)
            } else {
                (request.chaddr, yiaddr)
            }
        } else {
            (frame.src_mac, request.ciaddr)
        };

        match build_udp_ipv4(
            server.mac(),
            dst_mac,
            server_ip,
            dst_ip,
            SERVER_PORT,
            CLIENT_PORT,
            64,
            &body,
        ) {
            Some(out) => vec![out],
            None => Vec::new(),
        }
    }
}

/// Unicast requests go to the addressed device; broadcast requests go
/// to the first Up device serving DHCP.
fn pick_server(
    frame: &Frame<'_>,
    ctx: &StackContext,
) -> Option<std::sync::Arc<SimulatedDevice>> {
    if let L3::Ipv4 { dst, .. } = frame.l3 {
        if !dst.is_broadcast() {
            return ctx
                .fleet
                .by_ip(&dst.into())
                .filter(|d| d.is_up() && d.config().dhcp.as_ref().is_some_and(|c| c.enabled));
        }
    }
    ctx.fleet
        .all()
        .into_iter()
        .find(|d| d.is_up() && d.config().dhcp.as_ref().is_some_and(|c| c.enabled))
}

struct BootpRequest {
    xid: u32,
    broadcast: bool,
    ciaddr: Ipv4Addr,
    chaddr: MacAddr,
    chaddr_raw: [u8; 16],
    msg_type: u8,
    requested_ip: Option<Ipv4Addr>,
    hostname: Option<String>,
}

impl BootpRequest {
    fn parse(p: &[u8]) -> Option<BootpRequest> {
        if p.len() < 240 {
            return None;
        }
        let xid = u32::from_be_bytes([p[4], p[5], p[6], p[7]]);
        let broadcast = p[10] & 0x80 != 0;
        let ciaddr = Ipv4Addr::new(p[12], p[13], p[14], p[15]);
        let mut chaddr_raw = [0u8; 16];
        chaddr_raw.copy_from_slice(&p[28..44]);
        let chaddr = MacAddr(p[28], p[29], p[30], p[31], p[32], p[33]);

        let mut msg_type = 0;
        let mut requested_ip = None;
        let mut hostname = None;

        let mut pos = 240;
        while pos < p.len() {
            let code = p[pos];
            if code == 0 {
                pos += 1;
                continue;
            }
            if code == OPT_END {
                break;
            }
            let len = *p.get(pos + 1)? as usize;
            let data = p.get(pos + 2..pos + 2 + len)?;
            match code {
                OPT_MSG_TYPE if len == 1 => msg_type = data[0],
                OPT_REQUESTED_IP if len == 4 => {
                    requested_ip = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]));
                }
                OPT_HOSTNAME => hostname = Some(String::from_utf8_lossy(data).to_string()),
                _ => {}
            }
            pos += 2 + len;
        }

        (msg_type != 0).then_some(BootpRequest {
            xid,
            broadcast,
            ciaddr,
            chaddr,
            chaddr_raw,
            msg_type,
            requested_ip,
            hostname,
        })
    }
}

fn in_pool(cfg: &DhcpConfig, ip: Ipv4Addr) -> bool {
    let v = u32::from(ip);
    v >= u32::from(cfg.pool_start) && v <= u32::from(cfg.pool_end)
}

/// Deterministic lease: the client MAC hashes to a pool offset, so a
/// client always gets the same address without server-side lease state.
fn allocate(cfg: &DhcpConfig, chaddr: MacAddr) -> Ipv4Addr {
    let start = u32::from(cfg.pool_start);
    let end = u32::from(cfg.pool_end);
    let size = end.saturating_sub(start) + 1;

    let mut hash: u32 = 2166136261;
    for b in [chaddr.0, chaddr.1, chaddr.2, chaddr.3, chaddr.4, chaddr.5] {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    Ipv4Addr::from(start + (hash % size.max(1)))
}

fn build_reply(
    request: &BootpRequest,
    msg_type: u8,
    yiaddr: Ipv4Addr,
    server_ip: Ipv4Addr,
    cfg: &DhcpConfig,
) -> Vec<u8> {
    let mut p = vec![0u8; 240];
    p[0] = BOOTREPLY;
    p[1] = 1; // htype ethernet
    p[2] = 6; // hlen
    p[4..8].copy_from_slice(&request.xid.to_be_bytes());
    if request.broadcast {
        p[10] = 0x80;
    }
    p[12..16].copy_from_slice(&request.ciaddr.octets());
    p[16..20].copy_from_slice(&yiaddr.octets());
    p[20..24].copy_from_slice(&server_ip.octets());
    p[28..44].copy_from_slice(&request.chaddr_raw);
    p[236..240].copy_from_slice(&MAGIC);

    let mut opt = |code: u8, data: &[u8]| {
        p.push(code);
        p.push(data.len() as u8);
        p.extend_from_slice(data);
    };

    opt(OPT_MSG_TYPE, &[msg_type]);
    opt(OPT_SERVER_ID, &server_ip.octets());
    opt(OPT_LEASE_TIME, &cfg.lease_secs.to_be_bytes());
    opt(OPT_SUBNET_MASK, &cfg.subnet_mask.octets());
    if let Some(gateway) = cfg.gateway {
        opt(OPT_ROUTER, &gateway.octets());
    }
    if !cfg.dns_servers.is_empty() {
        let bytes: Vec<u8> = cfg.dns_servers.iter().flat_map(|ip| ip.octets()).collect();
        opt(OPT_DNS, &bytes);
    }
    if let Some(domain) = &cfg.domain {
        opt(OPT_DOMAIN, domain.as_bytes());
    }
    if !cfg.ntp_servers.is_empty() {
        let bytes: Vec<u8> = cfg.ntp_servers.iter().flat_map(|ip| ip.octets()).collect();
        opt(OPT_NTP, &bytes);
    }
    if let Some(tftp) = &cfg.tftp_server {
        opt(OPT_TFTP_SERVER, tftp.as_bytes());
    }
    if let Some(boot_file) = &cfg.boot_file {
        opt(OPT_BOOT_FILE, boot_file.as_bytes());
    }
    if let Some(vendor) = &cfg.vendor {
        opt(OPT_VENDOR, vendor.as_bytes());
    }
    p.push(OPT_END);
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;

    const YAML: &str = r#"
devices:
  - name: dhcp1
    mac: "aa:bb:cc:00:00:09"
    ip: 192.168.1.1
    dhcp:
      pool_start: 192.168.1.100
      pool_end: 192.168.1.199
      gateway: 192.168.1.1
      dns_servers: [192.168.1.1]
      domain: lab.local
      lease_time: 3600
"#;

    fn discover(chaddr: MacAddr) -> Vec<u8> {
        let mut p = vec![0u8; 240];
        p[0] = BOOTREQUEST;
        p[1] = 1;
        p[2] = 6;
        p[4..8].copy_from_slice(&0x31313131u32.to_be_bytes());
        p[10] = 0x80; // broadcast
        p[28..34].copy_from_slice(&[chaddr.0, chaddr.1, chaddr.2, chaddr.3, chaddr.4, chaddr.5]);
        p[236..240].copy_from_slice(&MAGIC);
        p.extend_from_slice(&[OPT_MSG_TYPE, 1, DHCP_DISCOVER, OPT_END]);
        p
    }

    fn send_discover(ctx: &crate::stack::StackContext, chaddr: MacAddr) -> Vec<Vec<u8>> {
        let handler = DhcpHandler::new();
        let frame_bytes = build_udp_ipv4(
            chaddr,
            MacAddr::broadcast(),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
            CLIENT_PORT,
            SERVER_PORT,
            64,
            &discover(chaddr),
        )
        .unwrap();
        let frame = Frame::parse(&frame_bytes).unwrap();
        assert!(handler.can_handle(&frame));
        handler.handle(&frame, ctx)
    }

    #[test]
    fn test_discover_offer() {
        let ctx = test_context(YAML);
        let chaddr: MacAddr = "02:00:00:00:00:77".parse().unwrap();
        let replies = send_discover(&ctx, chaddr);
        assert_eq!(replies.len(), 1);

        let reply = Frame::parse(&replies[0]).unwrap();
        let (sport, dport, body) = reply.udp().unwrap();
        assert_eq!((sport, dport), (SERVER_PORT, CLIENT_PORT));
        assert_eq!(body[0], BOOTREPLY);

        let offered = Ipv4Addr::new(body[16], body[17], body[18], body[19]);
        assert!(in_pool(
            &crate::config::Config::from_yaml(YAML).unwrap().devices[0]
                .dhcp
                .clone()
                .unwrap(),
            offered
        ));

        // Options carry type OFFER and our server id
        let opts = &body[240..];
        assert!(opts.windows(3).any(|w| w == [OPT_MSG_TYPE, 1, DHCP_OFFER]));
        assert!(opts.windows(6).any(|w| w == [OPT_SERVER_ID, 4, 192, 168, 1, 1]));
    }

    #[test]
    fn test_same_client_same_lease() {
        let ctx = test_context(YAML);
        let chaddr: MacAddr = "02:00:00:00:00:42".parse().unwrap();
        let a = send_discover(&ctx, chaddr);
        let b = send_discover(&ctx, chaddr);
        let ip = |frames: &[Vec<u8>]| {
            let f = Frame::parse(&frames[0]).unwrap();
            let (_, _, body) = f.udp().unwrap();
            Ipv4Addr::new(body[16], body[17], body[18], body[19])
        };
        assert_eq!(ip(&a), ip(&b));
    }

    #[test]
    fn test_non_bootp_ignored() {
        let ctx = test_context(YAML);
        let handler = DhcpHandler::new();
        let frame_bytes = build_udp_ipv4(
            "02:00:00:00:00:77".parse().unwrap(),
            MacAddr::broadcast(),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
            CLIENT_PORT,
            SERVER_PORT,
            64,
            b"not bootp",
        )
        .unwrap();
        let frame = Frame::parse(&frame_bytes).unwrap();
        assert!(!handler.can_handle(&frame));
        let _ = ctx;
    }
}
