//! Authoritative-only DNS over configured forward and reverse records.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::Ordering;
use tracing::trace;

use crate::config::DnsRecord;
use crate::stack::StackContext;
use crate::types::ProtocolKind;

use super::frame::{Frame, build_udp_ipv4, build_udp_ipv6};
use super::{Discriminator, ProtocolHandler};

const DNS_PORT: u16 = 53;

const TYPE_A: u16 = 1;
const TYPE_NS: u16 = 2;
const TYPE_CNAME: u16 = 5;
const TYPE_SOA: u16 = 6;
const TYPE_PTR: u16 = 12;
const TYPE_MX: u16 = 15;
const TYPE_TXT: u16 = 16;
const TYPE_AAAA: u16 = 28;
const TYPE_SRV: u16 = 33;

const RCODE_NXDOMAIN: u8 = 3;

fn type_code(rtype: &str) -> Option<u16> {
    match rtype.to_ascii_uppercase().as_str() {
        "A" => Some(TYPE_A),
        "NS" => Some(TYPE_NS),
        "CNAME" => Some(TYPE_CNAME),
        "SOA" => Some(TYPE_SOA),
        "PTR" => Some(TYPE_PTR),
        "MX" => Some(TYPE_MX),
        "TXT" => Some(TYPE_TXT),
        "AAAA" => Some(TYPE_AAAA),
        "SRV" => Some(TYPE_SRV),
        _ => None,
    }
}

pub struct DnsHandler;

impl DnsHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DnsHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for DnsHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Dns
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::UdpPort(DNS_PORT)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        // A query: QR bit clear, at least one question
        frame.udp().is_some_and(|(_, _, p)| {
            p.len() >= 12 && p[2] & 0x80 == 0 && u16::from_be_bytes([p[4], p[5]]) >= 1
        })
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let Some((src_port, _, payload)) = frame.udp() else { return Vec::new() };
        let (Some(dst_ip), Some(src_ip)) = (frame.dst_ip(), frame.src_ip()) else {
            return Vec::new();
        };

        let Some(device) = ctx.fleet.by_ip(&dst_ip) else { return Vec::new() };
        let cfg = device.config();
        let Some(dns_cfg) = cfg.dns.as_ref().filter(|c| c.enabled) else {
            return Vec::new();
        };
        if !device.is_up() {
            return Vec::new();
        }

        ctx.stats.dns_queries.fetch_add(1, Ordering::Relaxed);
        device.counters().dns_queries.fetch_add(1, Ordering::Relaxed);
        device.touch();

        let Some(query) = Query::parse(payload) else {
            ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        };
        trace!(device = %device.name(), name = %query.name, qtype = query.qtype, "dns query");

        let response = build_response(&query, &dns_cfg.records, payload);

        let reply = match (dst_ip, src_ip) {
            (IpAddr::V4(local), IpAddr::V4(remote)) => build_udp_ipv4(
                device.mac(),
                frame.src_mac,
                local,
                remote,
                DNS_PORT,
                src_port,
                64,
                &response,
            ),
            (IpAddr::V6(local), IpAddr::V6(remote)) => build_udp_ipv6(
                device.mac(),
                frame.src_mac,
                local,
                remote,
                DNS_PORT,
                src_port,
                64,
                &response,
            ),
            _ => None,
        };
        reply.into_iter().collect()
    }
}

struct Query {
    id: u16,
    rd: bool,
    name: String,
    qtype: u16,
    /// Raw question section, echoed into the response.
    question: Vec<u8>,
}

impl Query {
    fn parse(payload: &[u8]) -> Option<Query> {
        if payload.len() < 12 {
            return None;
        }
        let id = u16::from_be_bytes([payload[0], payload[1]]);
        let rd = payload[2] & 0x01 != 0;

        let (name, mut pos) = parse_name(payload, 12)?;
        if payload.len() < pos + 4 {
            return None;
        }
        let qtype = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
        pos += 4;

        Some(Query { id, rd, name, qtype, question: payload[12..pos].to_vec() })
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn matching<'a>(records: &'a [DnsRecord], name: &str, qtype: u16) -> Vec<&'a DnsRecord> {
    let name = normalize(name);
    let direct: Vec<&DnsRecord> = records
        .iter()
        .filter(|r| normalize(&r.name) == name && type_code(&r.rtype) == Some(qtype))
        .collect();
    if !direct.is_empty() {
        return direct;
    }
    // Fall back to a CNAME at the queried name
    records
        .iter()
        .filter(|r| normalize(&r.name) == name && type_code(&r.rtype) == Some(TYPE_CNAME))
        .collect()
}

fn build_response(query: &Query, records: &[DnsRecord], _raw: &[u8]) -> Vec<u8> {
    let answers: Vec<Vec<u8>> = matching(records, &query.name, query.qtype)
        .into_iter()
        .filter_map(|r| encode_answer(r))
        .collect();

    let rcode = if answers.is_empty()
        && !records.iter().any(|r| normalize(&r.name) == normalize(&query.name))
    {
        RCODE_NXDOMAIN
    } else {
        0
    };

    let mut out = Vec::with_capacity(12 + query.question.len() + 64);
    out.extend_from_slice(&query.id.to_be_bytes());
    // QR=1 AA=1, RD copied; RA=0
    out.push(0x84 | if query.rd { 0x01 } else { 0x00 });
    out.push(rcode);
    out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    out.extend_from_slice(&(answers.len() as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&query.question);
    for answer in answers {
        out.extend_from_slice(&answer);
    }
    out
}

/// One answer RR, name compressed to the question at offset 12.
fn encode_answer(record: &DnsRecord) -> Option<Vec<u8>> {
    let qtype = type_code(&record.rtype)?;
    let rdata = encode_rdata(record, qtype)?;

    let mut out = Vec::with_capacity(12 + rdata.len());
    out.extend_from_slice(&[0xc0, 0x0c]);
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // IN
    out.extend_from_slice(&record.ttl.to_be_bytes());
    out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    out.extend_from_slice(&rdata);
    Some(out)
}

fn encode_rdata(record: &DnsRecord, qtype: u16) -> Option<Vec<u8>> {
    match qtype {
        TYPE_A => Some(record.value.parse::<Ipv4Addr>().ok()?.octets().to_vec()),
        TYPE_AAAA => Some(record.value.parse::<Ipv6Addr>().ok()?.octets().to_vec()),
        TYPE_CNAME | TYPE_NS | TYPE_PTR => Some(encode_name(&record.value)),
        TYPE_MX => {
            let mut out = record.priority.unwrap_or(10).to_be_bytes().to_vec();
            out.extend(encode_name(&record.value));
            Some(out)
        }
        TYPE_TXT => {
            let text = record.value.as_bytes();
            let mut out = Vec::with_capacity(text.len() + 1);
            for chunk in text.chunks(255) {
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
            if out.is_empty() {
                out.push(0);
            }
            Some(out)
        }
        TYPE_SRV => {
            let mut out = record.priority.unwrap_or(0).to_be_bytes().to_vec();
            out.extend(record.weight.unwrap_or(0).to_be_bytes());
            out.extend(record.port.unwrap_or(0).to_be_bytes());
            out.extend(encode_name(&record.value));
            Some(out)
        }
        TYPE_SOA => {
            // value: "mname rname serial refresh retry expire minimum"
            let parts: Vec<&str> = record.value.split_whitespace().collect();
            if parts.len() < 7 {
                return None;
            }
            let mut out = encode_name(parts[0]);
            out.extend(encode_name(parts[1]));
            for part in &parts[2..7] {
                out.extend(part.parse::<u32>().ok()?.to_be_bytes());
            }
            Some(out)
        }
        _ => None,
    }
}

pub fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        let bytes = label.as_bytes();
        out.push(bytes.len().min(63) as u8);
        out.extend_from_slice(&bytes[..bytes.len().min(63)]);
    }
    out.push(0);
    out
}

/// Parse a possibly-compressed name starting at `pos`; returns the name
/// and the offset just past it.
pub fn parse_name(payload: &[u8], mut pos: usize) -> Option<(String, usize)> {
    let mut labels = Vec::new();
    let mut jumped = false;
    let mut end = pos;
    let mut hops = 0;

    loop {
        let len = *payload.get(pos)? as usize;
        if len == 0 {
            if !jumped {
                end = pos + 1;
            }
            break;
        }
        if len & 0xc0 == 0xc0 {
            let low = *payload.get(pos + 1)? as usize;
            if !jumped {
                end = pos + 2;
            }
            pos = ((len & 0x3f) << 8) | low;
            jumped = true;
            hops += 1;
            if hops > 8 {
                return None;
            }
            continue;
        }
        let label = payload.get(pos + 1..pos + 1 + len)?;
        labels.push(String::from_utf8_lossy(label).to_string());
        pos += 1 + len;
    }

    Some((labels.join("."), end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;

    const YAML: &str = r#"
devices:
  - name: ns1
    mac: "aa:bb:cc:00:00:05"
    ip: 10.0.0.5
    dns:
      records:
        - { name: www.example.com, type: A, value: 10.0.0.80 }
        - { name: www.example.com, type: AAAA, value: "2001:db8::80" }
        - { name: alias.example.com, type: CNAME, value: www.example.com }
        - { name: example.com, type: MX, value: mail.example.com, priority: 5 }
        - { name: 80.0.0.10.in-addr.arpa, type: PTR, value: www.example.com }
"#;

    fn query_bytes(name: &str, qtype: u16) -> Vec<u8> {
        let mut out = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        out.extend(encode_name(name));
        out.extend(qtype.to_be_bytes());
        out.extend(1u16.to_be_bytes());
        out
    }

    fn ask(ctx: &crate::stack::StackContext, name: &str, qtype: u16) -> Vec<u8> {
        let handler = DnsHandler::new();
        let frame_bytes = build_udp_ipv4(
            "02:00:00:00:00:99".parse().unwrap(),
            "aa:bb:cc:00:00:05".parse().unwrap(),
            "10.0.0.50".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
            55555,
            53,
            64,
            &query_bytes(name, qtype),
        )
        .unwrap();
        let frame = Frame::parse(&frame_bytes).unwrap();
        assert!(handler.can_handle(&frame));
        let mut replies = handler.handle(&frame, ctx);
        assert_eq!(replies.len(), 1);
        let reply = replies.remove(0);
        let parsed = Frame::parse(&reply).unwrap();
        let (_, _, payload) = parsed.udp().unwrap();
        payload.to_vec()
    }

    #[test]
    fn test_a_record() {
        let ctx = test_context(YAML);
        let response = ask(&ctx, "www.example.com", TYPE_A);

        assert_eq!(&response[0..2], &[0x12, 0x34]);
        assert_eq!(response[2] & 0x80, 0x80); // QR
        assert_eq!(response[2] & 0x04, 0x04); // AA
        assert_eq!(response[3] & 0x0f, 0); // NOERROR
        let ancount = u16::from_be_bytes([response[6], response[7]]);
        assert_eq!(ancount, 1);
        // rdata is the last 4 bytes for a single A answer
        assert_eq!(&response[response.len() - 4..], &[10, 0, 0, 80]);
    }

    #[test]
    fn test_nxdomain() {
        let ctx = test_context(YAML);
        let response = ask(&ctx, "missing.example.com", TYPE_A);
        assert_eq!(response[3] & 0x0f, RCODE_NXDOMAIN);
        assert_eq!(u16::from_be_bytes([response[6], response[7]]), 0);
    }

    #[test]
    fn test_cname_fallback() {
        let ctx = test_context(YAML);
        let response = ask(&ctx, "alias.example.com", TYPE_A);
        assert_eq!(response[3] & 0x0f, 0);
        assert_eq!(u16::from_be_bytes([response[6], response[7]]), 1);
    }

    #[test]
    fn test_ptr_record() {
        let ctx = test_context(YAML);
        let response = ask(&ctx, "80.0.0.10.in-addr.arpa", TYPE_PTR);
        assert_eq!(u16::from_be_bytes([response[6], response[7]]), 1);
        // rdata holds the encoded target name
        let target = encode_name("www.example.com");
        assert_eq!(&response[response.len() - target.len()..], &target[..]);
    }

    #[test]
    fn test_name_round_trip() {
        let encoded = encode_name("www.example.com");
        let (name, end) = parse_name(&encoded, 0).unwrap();
        assert_eq!(name, "www.example.com");
        assert_eq!(end, encoded.len());
    }
}
