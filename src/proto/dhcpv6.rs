//! DHCPv6 server: SOLICIT/REQUEST/INFORMATION-REQUEST.

use std::net::Ipv6Addr;
use std::sync::atomic::Ordering;

use crate::config::Dhcpv6Config;
use crate::stack::StackContext;
use crate::types::ProtocolKind;

use super::frame::{Frame, L3, build_udp_ipv6};
use super::{Discriminator, ProtocolHandler};

const SERVER_PORT: u16 = 547;
const CLIENT_PORT: u16 = 546;

const MSG_SOLICIT: u8 = 1;
const MSG_ADVERTISE: u8 = 2;
const MSG_REQUEST: u8 = 3;
const MSG_REPLY: u8 = 7;
const MSG_INFORMATION_REQUEST: u8 = 11;

const OPT_CLIENTID: u16 = 1;
const OPT_SERVERID: u16 = 2;
const OPT_IA_NA: u16 = 3;
const OPT_IAADDR: u16 = 5;
const OPT_DNS_SERVERS: u16 = 23;
const OPT_DOMAIN_LIST: u16 = 24;

pub struct Dhcpv6Handler;

impl Dhcpv6Handler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Dhcpv6Handler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for Dhcpv6Handler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Dhcpv6
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::UdpPort(SERVER_PORT)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        frame.udp().is_some_and(|(_, _, p)| {
            p.len() >= 4
                && matches!(p[0], MSG_SOLICIT | MSG_REQUEST | MSG_INFORMATION_REQUEST)
        })
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let Some((_, _, payload)) = frame.udp() else { return Vec::new() };
        let L3::Ipv6 { src, .. } = frame.l3 else { return Vec::new() };

        let Some(server) = ctx
            .fleet
            .all()
            .into_iter()
            .find(|d| d.is_up() && d.config().dhcpv6.as_ref().is_some_and(|c| c.enabled))
        else {
            return Vec::new();
        };
        let cfg = server.config();
        let Some(v6cfg) = cfg.dhcpv6.as_ref() else { return Vec::new() };
        let Some(server_ip) = cfg.ipv6s().first().copied() else { return Vec::new() };

        ctx.stats.dhcp_requests.fetch_add(1, Ordering::Relaxed);
        server.counters().dhcp_requests.fetch_add(1, Ordering::Relaxed);
        server.touch();

        let msg_type = payload[0];
        let txn_id = &payload[1..4];
        let Some(request) = parse_options(&payload[4..]) else {
            ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        };

        let reply_type = match msg_type {
            MSG_SOLICIT => MSG_ADVERTISE,
            MSG_REQUEST | MSG_INFORMATION_REQUEST => MSG_REPLY,
            _ => return Vec::new(),
        };

        let mut body = vec![reply_type];
        body.extend_from_slice(txn_id);

        // Echo the client identifier, present our own DUID-LL
        if let Some(client_id) = &request.client_id {
            push_option(&mut body, OPT_CLIENTID, client_id);
        }
        let mac = server.mac();
        let duid = [0, 3, 0, 1, mac.0, mac.1, mac.2, mac.3, mac.4, mac.5];
        push_option(&mut body, OPT_SERVERID, &duid);

        // Address assignment, except for stateless information requests
        if msg_type != MSG_INFORMATION_REQUEST {
            let leased = allocate(v6cfg, request.client_id.as_deref().unwrap_or(&[]));
            let mut ia = Vec::with_capacity(40);
            ia.extend_from_slice(&request.iaid.unwrap_or(1).to_be_bytes());
            ia.extend_from_slice(&(v6cfg.lease_secs / 2).to_be_bytes()); // t1
            ia.extend_from_slice(&(v6cfg.lease_secs * 4 / 5).to_be_bytes()); // t2
            let mut iaaddr = Vec::with_capacity(24);
            iaaddr.extend_from_slice(&leased.octets());
            iaaddr.extend_from_slice(&v6cfg.lease_secs.to_be_bytes()); // preferred
            iaaddr.extend_from_slice(&v6cfg.lease_secs.to_be_bytes()); // valid
            push_option(&mut ia, OPT_IAADDR, &iaaddr);
            push_option(&mut body, OPT_IA_NA, &ia);
        }

        if !v6cfg.dns_servers.is_empty() {
            let bytes: Vec<u8> = v6cfg.dns_servers.iter().flat_map(|ip| ip.octets()).collect();
            push_option(&mut body, OPT_DNS_SERVERS, &bytes);
        }
        if let Some(domain) = &v6cfg.domain {
            push_option(&mut body, OPT_DOMAIN_LIST, &super::dns::encode_name(domain));
        }

        match build_udp_ipv6(
            server.mac(),
            frame.src_mac,
            server_ip,
            src,
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

struct ParsedOptions {
    client_id: Option<Vec<u8>>,
    iaid: Option<u32>,
}

fn parse_options(mut p: &[u8]) -> Option<ParsedOptions> {
    let mut out = ParsedOptions { client_id: None, iaid: None };
    while p.len() >= 4 {
        let code = u16::from_be_bytes([p[0], p[1]]);
        let len = u16::from_be_bytes([p[2], p[3]]) as usize;
        let data = p.get(4..4 + len)?;
        match code {
            OPT_CLIENTID => out.client_id = Some(data.to_vec()),
            OPT_IA_NA if len >= 4 => {
                out.iaid = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            _ => {}
        }
        p = &p[4 + len..];
    }
    Some(out)
}

fn push_option(buf: &mut Vec<u8>, code: u16, data: &[u8]) {
    buf.extend_from_slice(&code.to_be_bytes());
    buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buf.extend_from_slice(data);
}

/// Deterministic lease from the client DUID, like the v4 pool.
fn allocate(cfg: &Dhcpv6Config, duid: &[u8]) -> Ipv6Addr {
    let start = u128::from(cfg.pool_start);
    let end = u128::from(cfg.pool_end);
    let size = end.saturating_sub(start) + 1;

    let mut hash: u64 = 14695981039346656037;
    for &b in duid {
        hash ^= b as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    Ipv6Addr::from(start + (hash as u128 % size.max(1)))
}
