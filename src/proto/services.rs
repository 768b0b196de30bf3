//! Banner-level service handlers: HTTP, FTP, and NetBIOS name service.
//!
//! The TCP side runs without a real state machine: sequence numbers are
//! derived from the peer, and the only per-connection state is a small
//! bounded set remembering which peers already got the FTP banner.

use pnet::util::MacAddr;
use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;

use crate::config::HttpConfig;
use crate::stack::StackContext;
use crate::types::ProtocolKind;

use super::frame::{ETHERTYPE_IPV4, Frame, L3, L4, build_tcp_ipv4, build_udp_ipv4};
use super::{Discriminator, ProtocolHandler};

const TCP_FIN: u8 = 0x01;
const TCP_SYN: u8 = 0x02;
const TCP_PSH: u8 = 0x08;
const TCP_ACK: u8 = 0x10;

const NETBIOS_PORT: u16 = 137;

/// Deterministic initial sequence number for a peer, so replies line up
/// without stored connection state.
fn isn(ip: Ipv4Addr, port: u16) -> u32 {
    let mut hash: u32 = 2166136261;
    for b in ip.octets().iter().chain(port.to_be_bytes().iter()) {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

struct TcpExchange {
    device_mac: MacAddr,
    peer_mac: MacAddr,
    local_ip: Ipv4Addr,
    peer_ip: Ipv4Addr,
    local_port: u16,
    peer_port: u16,
}

impl TcpExchange {
    fn reply(&self, flags: u8, seq: u32, ack: u32, payload: &[u8]) -> Option<Vec<u8>> {
        build_tcp_ipv4(
            self.device_mac,
            self.peer_mac,
            self.local_ip,
            self.peer_ip,
            self.local_port,
            self.peer_port,
            seq,
            ack,
            flags,
            64,
            payload,
        )
    }
}

fn tcp_parts<'f>(
    frame: &Frame<'f>,
    ctx: &StackContext,
) -> Option<(std::sync::Arc<crate::device::SimulatedDevice>, TcpExchange, u32, u32, u8, &'f [u8])> {
    let L3::Ipv4 { src, dst, .. } = frame.l3 else { return None };
    let L4::Tcp { src_port, dst_port, seq, ack, flags, payload } = frame.l4 else {
        return None;
    };
    let device = ctx.fleet.by_ip(&IpAddr::V4(dst))?;
    if !device.is_up() {
        return None;
    }
    let exchange = TcpExchange {
        device_mac: device.mac(),
        peer_mac: frame.src_mac,
        local_ip: dst,
        peer_ip: src,
        local_port: dst_port,
        peer_port: src_port,
    };
    Some((device, exchange, seq, ack, flags, payload))
}

// =============================================================================
// HTTP
// =============================================================================

pub struct HttpHandler;

impl HttpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for HttpHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Http
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::EtherType(ETHERTYPE_IPV4)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        matches!(frame.l4, L4::Tcp { .. })
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let Some((device, exchange, seq, ack, flags, payload)) = tcp_parts(frame, ctx) else {
            return Vec::new();
        };
        let cfg = device.config();
        let Some(http) = cfg.http.as_ref().filter(|c| c.enabled) else { return Vec::new() };
        if exchange.local_port != http.port {
            return Vec::new();
        }
        device.touch();

        if flags & TCP_SYN != 0 && flags & TCP_ACK == 0 {
            let our_isn = isn(exchange.peer_ip, exchange.peer_port);
            return exchange
                .reply(TCP_SYN | TCP_ACK, our_isn, seq.wrapping_add(1), &[])
                .into_iter()
                .collect();
        }

        if !payload.is_empty() {
            let response = http_response(http, payload);
            let reply_ack = seq.wrapping_add(payload.len() as u32);
            return exchange
                .reply(TCP_PSH | TCP_ACK | TCP_FIN, ack, reply_ack, &response)
                .into_iter()
                .collect();
        }

        if flags & TCP_FIN != 0 {
            return exchange
                .reply(TCP_ACK, ack, seq.wrapping_add(1), &[])
                .into_iter()
                .collect();
        }

        Vec::new()
    }
}

fn http_response(cfg: &HttpConfig, request: &[u8]) -> Vec<u8> {
    let request = String::from_utf8_lossy(request);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let endpoint = cfg.endpoints.iter().find(|e| e.path == path);
    let (status, body, content_type) = match endpoint {
        Some(e) => ("200 OK", e.body.clone(), e.content_type.clone()),
        None if path == "/" && cfg.endpoints.is_empty() => (
            "200 OK",
            "<html><body><h1>It works!</h1></body></html>".to_string(),
            "text/html".to_string(),
        ),
        None => ("404 Not Found", "Not Found".to_string(), "text/plain".to_string()),
    };

    format!(
        "HTTP/1.1 {status}\r\nServer: {}\r\nContent-Type: {content_type}\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        cfg.server_banner,
        body.len(),
    )
    .into_bytes()
}

// =============================================================================
// FTP
// =============================================================================

/// Bounded remember-set for peers that already received the banner.
struct BoundedPeerSet {
    set: HashSet<(Ipv4Addr, u16)>,
    order: VecDeque<(Ipv4Addr, u16)>,
}

impl BoundedPeerSet {
    const MAX: usize = 1024;

    fn new() -> Self {
        Self { set: HashSet::new(), order: VecDeque::new() }
    }

    fn insert(&mut self, key: (Ipv4Addr, u16)) -> bool {
        if !self.set.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.set.len() > Self::MAX {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }

    fn remove(&mut self, key: &(Ipv4Addr, u16)) {
        if self.set.remove(key) {
            self.order.retain(|k| k != key);
        }
    }
}

pub struct FtpHandler {
    greeted: Mutex<BoundedPeerSet>,
}

impl FtpHandler {
    pub fn new() -> Self {
        Self { greeted: Mutex::new(BoundedPeerSet::new()) }
    }
}

impl Default for FtpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for FtpHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Ftp
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::EtherType(ETHERTYPE_IPV4)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        matches!(frame.l4, L4::Tcp { .. })
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let Some((device, exchange, seq, ack, flags, payload)) = tcp_parts(frame, ctx) else {
            return Vec::new();
        };
        let cfg = device.config();
        let Some(ftp) = cfg.ftp.as_ref().filter(|c| c.enabled) else { return Vec::new() };
        if exchange.local_port != ftp.port {
            return Vec::new();
        }
        device.touch();

        let peer = (exchange.peer_ip, exchange.peer_port);

        if flags & TCP_SYN != 0 && flags & TCP_ACK == 0 {
            self.greeted.lock().unwrap().remove(&peer);
            let our_isn = isn(exchange.peer_ip, exchange.peer_port);
            return exchange
                .reply(TCP_SYN | TCP_ACK, our_isn, seq.wrapping_add(1), &[])
                .into_iter()
                .collect();
        }

        if flags & TCP_FIN != 0 {
            self.greeted.lock().unwrap().remove(&peer);
            return exchange
                .reply(TCP_ACK | TCP_FIN, ack, seq.wrapping_add(1), &[])
                .into_iter()
                .collect();
        }

        // Server speaks first: the handshake ACK triggers the banner
        if payload.is_empty() && flags & TCP_ACK != 0 {
            if self.greeted.lock().unwrap().insert(peer) {
                let banner = format!("{}\r\n", ftp.banner.trim_end());
                return exchange
                    .reply(TCP_PSH | TCP_ACK, ack, seq, banner.as_bytes())
                    .into_iter()
                    .collect();
            }
            return Vec::new();
        }

        if !payload.is_empty() {
            let response = ftp_response(payload);
            let reply_ack = seq.wrapping_add(payload.len() as u32);
            let fin = if response.starts_with(b"221") { TCP_FIN } else { 0 };
            return exchange
                .reply(TCP_PSH | TCP_ACK | fin, ack, reply_ack, &response)
                .into_iter()
                .collect();
        }

        Vec::new()
    }
}

fn ftp_response(command: &[u8]) -> Vec<u8> {
    let command = String::from_utf8_lossy(command);
    let verb = command.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
    let line = match verb.as_str() {
        "USER" => "331 Password required.",
        "PASS" => "230 Login successful.",
        "SYST" => "215 UNIX Type: L8",
        "PWD" => "257 \"/\" is the current directory.",
        "QUIT" => "221 Goodbye.",
        _ => "502 Command not implemented.",
    };
    format!("{line}\r\n").into_bytes()
}

// =============================================================================
// NetBIOS name service
// =============================================================================

pub struct NetbiosHandler;

impl NetbiosHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NetbiosHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for NetbiosHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Netbios
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::UdpPort(NETBIOS_PORT)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        // Name query: QR clear, one question
        frame.udp().is_some_and(|(_, _, p)| {
            p.len() >= 50 && p[2] & 0x80 == 0 && u16::from_be_bytes([p[4], p[5]]) == 1
        })
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let Some((src_port, _, payload)) = frame.udp() else { return Vec::new() };
        let L3::Ipv4 { src, .. } = frame.l3 else { return Vec::new() };

        let Some(queried) = decode_netbios_name(&payload[12..]) else {
            return Vec::new();
        };

        // Match against any Up device serving NetBIOS under that name
        let device = ctx.fleet.all().into_iter().find(|d| {
            if !d.is_up() {
                return false;
            }
            let cfg = d.config();
            let Some(nb) = cfg.netbios.as_ref().filter(|c| c.enabled) else { return false };
            let name = nb.name.clone().unwrap_or_else(|| cfg.name.to_ascii_uppercase());
            name.eq_ignore_ascii_case(&queried)
        });
        let Some(device) = device else { return Vec::new() };
        device.touch();
        let cfg = device.config();
        let Some(device_ip) = cfg.ipv4s().first().copied() else { return Vec::new() };

        // Positive name query response
        let mut response = Vec::with_capacity(62);
        response.extend_from_slice(&payload[0..2]); // transaction id
        response.extend_from_slice(&[0x85, 0x00]); // response, AA
        response.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0]);
        let name_len = 34; // encoded name + terminator
        response.extend_from_slice(&payload[12..12 + name_len]);
        response.extend_from_slice(&0x0020u16.to_be_bytes()); // NB
        response.extend_from_slice(&1u16.to_be_bytes()); // IN
        response.extend_from_slice(&300u32.to_be_bytes()); // ttl
        response.extend_from_slice(&6u16.to_be_bytes()); // rdlength
        response.extend_from_slice(&[0x00, 0x00]); // b-node, unique
        response.extend_from_slice(&device_ip.octets());

        match build_udp_ipv4(
            device.mac(),
            frame.src_mac,
            device_ip,
            src,
            NETBIOS_PORT,
            src_port,
            64,
            &response,
        ) {
            Some(out) => vec![out],
            None => Vec::new(),
        }
    }
}

/// First-level NetBIOS decoding: 32 nibble-encoded chars to a 15-char
/// name (the 16th byte is the suffix).
fn decode_netbios_name(question: &[u8]) -> Option<String> {
    if question.len() < 34 || question[0] != 0x20 {
        return None;
    }
    let encoded = &question[1..33];
    let mut bytes = Vec::with_capacity(16);
    for pair in encoded.chunks(2) {
        let hi = pair[0].checked_sub(b'A')?;
        let lo = pair[1].checked_sub(b'A')?;
        if hi > 15 || lo > 15 {
            return None;
        }
        bytes.push((hi << 4) | lo);
    }
    let name: String = bytes[..15].iter().map(|&b| b as char).collect();
    Some(name.trim_end().to_string())
}

/// First-level NetBIOS encoding of a name + suffix byte.
pub fn encode_netbios_name(name: &str, suffix: u8) -> Vec<u8> {
    let mut padded = [b' '; 16];
    for (i, b) in name.to_ascii_uppercase().bytes().take(15).enumerate() {
        padded[i] = b;
    }
    padded[15] = suffix;

    let mut out = Vec::with_capacity(34);
    out.push(0x20);
    for b in padded {
        out.push(b'A' + (b >> 4));
        out.push(b'A' + (b & 0x0f));
    }
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;

    const YAML: &str = r#"
devices:
  - name: web1
    mac: "aa:bb:cc:00:00:30"
    ip: 10.0.0.30
    http:
      port: 80
      server: "Apache/2.4"
      endpoints:
        - { path: /status, body: "ok", content_type: text/plain }
    ftp:
      banner: "220 web1 FTP"
    netbios: {}
"#;

    fn tcp_frame(dst_port: u16, seq: u32, ack: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        build_tcp_ipv4(
            "02:00:00:00:00:99".parse().unwrap(),
            "aa:bb:cc:00:00:30".parse().unwrap(),
            "10.0.0.50".parse().unwrap(),
            "10.0.0.30".parse().unwrap(),
            40000,
            dst_port,
            seq,
            ack,
            flags,
            64,
            payload,
        )
        .unwrap()
    }

    #[test]
    fn test_http_syn_ack_and_response() {
        let ctx = test_context(YAML);
        let handler = HttpHandler::new();

        // SYN
        let syn = tcp_frame(80, 1000, 0, TCP_SYN, &[]);
        let frame = Frame::parse(&syn).unwrap();
        let replies = handler.handle(&frame, &ctx);
        assert_eq!(replies.len(), 1);
        let synack = Frame::parse(&replies[0]).unwrap();
        let L4::Tcp { flags, ack, .. } = synack.l4 else { panic!("expected tcp") };
        assert_eq!(flags & (TCP_SYN | TCP_ACK), TCP_SYN | TCP_ACK);
        assert_eq!(ack, 1001);

        // GET /status
        let get = tcp_frame(80, 1001, 1, TCP_PSH | TCP_ACK, b"GET /status HTTP/1.1\r\n\r\n");
        let frame = Frame::parse(&get).unwrap();
        let replies = handler.handle(&frame, &ctx);
        assert_eq!(replies.len(), 1);
        let response = Frame::parse(&replies[0]).unwrap();
        let L4::Tcp { payload, flags, .. } = response.l4 else { panic!("expected tcp") };
        let text = String::from_utf8_lossy(payload);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("Server: Apache/2.4"));
        assert!(text.ends_with("ok"));
        assert_ne!(flags & TCP_FIN, 0);
    }

    #[test]
    fn test_http_unknown_path_404() {
        let ctx = test_context(YAML);
        let handler = HttpHandler::new();
        let get = tcp_frame(80, 1, 1, TCP_PSH | TCP_ACK, b"GET /nope HTTP/1.1\r\n\r\n");
        let frame = Frame::parse(&get).unwrap();
        let replies = handler.handle(&frame, &ctx);
        let response = Frame::parse(&replies[0]).unwrap();
        let L4::Tcp { payload, .. } = response.l4 else { panic!("expected tcp") };
        assert!(String::from_utf8_lossy(payload).starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn test_ftp_banner_once() {
        let ctx = test_context(YAML);
        let handler = FtpHandler::new();

        let syn = tcp_frame(21, 500, 0, TCP_SYN, &[]);
        handler.handle(&Frame::parse(&syn).unwrap(), &ctx);

        // Handshake ACK: banner
        let ack_frame = tcp_frame(21, 501, 42, TCP_ACK, &[]);
        let replies = handler.handle(&Frame::parse(&ack_frame).unwrap(), &ctx);
        assert_eq!(replies.len(), 1);
        let banner = Frame::parse(&replies[0]).unwrap();
        let L4::Tcp { payload, .. } = banner.l4 else { panic!("expected tcp") };
        assert!(String::from_utf8_lossy(payload).starts_with("220 web1 FTP"));

        // A second bare ACK does not repeat the banner
        let again = handler.handle(&Frame::parse(&ack_frame).unwrap(), &ctx);
        assert!(again.is_empty());

        // USER command
        let user = tcp_frame(21, 501, 60, TCP_PSH | TCP_ACK, b"USER anonymous\r\n");
        let replies = handler.handle(&Frame::parse(&user).unwrap(), &ctx);
        let response = Frame::parse(&replies[0]).unwrap();
        let L4::Tcp { payload, .. } = response.l4 else { panic!("expected tcp") };
        assert!(String::from_utf8_lossy(payload).starts_with("331"));
    }

    #[test]
    fn test_netbios_name_query() {
        let ctx = test_context(YAML);
        let handler = NetbiosHandler::new();

        let mut query = vec![0xbe, 0xef, 0x01, 0x10, 0, 1, 0, 0, 0, 0, 0, 0];
        query.extend(encode_netbios_name("WEB1", 0x00));
        query.extend(&0x0020u16.to_be_bytes());
        query.extend(&1u16.to_be_bytes());

        let frame_bytes = build_udp_ipv4(
            "02:00:00:00:00:99".parse().unwrap(),
            MacAddr::broadcast(),
            "10.0.0.50".parse().unwrap(),
            "10.0.0.255".parse().unwrap(),
            137,
            137,
            64,
            &query,
        )
        .unwrap();
        let frame = Frame::parse(&frame_bytes).unwrap();
        assert!(handler.can_handle(&frame));

        let replies = handler.handle(&frame, &ctx);
        assert_eq!(replies.len(), 1);
        let response = Frame::parse(&replies[0]).unwrap();
        let (_, _, body) = response.udp().unwrap();
        assert_eq!(&body[0..2], &[0xbe, 0xef]);
        // rdata ends with the device address
        assert_eq!(&body[body.len() - 4..], &[10, 0, 0, 30]);
    }

    #[test]
    fn test_name_codec_round_trip() {
        let encoded = encode_netbios_name("FILESRV", 0x20);
        let decoded = decode_netbios_name(&encoded).unwrap();
        assert_eq!(decoded, "FILESRV");
    }
}
