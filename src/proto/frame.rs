//! Frame parsing and L2/L3 construction shared by the handlers.
//!
//! Parsing computes slice offsets into the original frame once, so
//! handlers work with plain fields instead of chained packet views.
//! Building goes through pnet's mutable packet types.

use pnet::packet::MutablePacket;
use pnet::packet::ethernet::{EtherType, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::packet::tcp::{self, MutableTcpPacket};
use pnet::packet::udp::{self, MutableUdpPacket};
use pnet::util::MacAddr;
use std::net::{Ipv4Addr, Ipv6Addr};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;
pub const ETHERTYPE_LLDP: u16 = 0x88cc;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_ICMPV6: u8 = 58;

#[derive(Debug, Clone, Copy)]
pub enum L3<'a> {
    Arp(&'a [u8]),
    Ipv4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
        ttl: u8,
        payload: &'a [u8],
    },
    Ipv6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        next_header: u8,
        hop_limit: u8,
        payload: &'a [u8],
    },
    /// 802.3 LLC, with SNAP header when dsap/ssap are 0xaa.
    Llc {
        dsap: u8,
        ssap: u8,
        control: u8,
        oui: Option<[u8; 3]>,
        pid: Option<u16>,
        payload: &'a [u8],
    },
    Other,
}

#[derive(Debug, Clone, Copy)]
pub enum L4<'a> {
    Udp {
        src_port: u16,
        dst_port: u16,
        payload: &'a [u8],
    },
    Tcp {
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: u8,
        payload: &'a [u8],
    },
    Icmp(&'a [u8]),
    Icmpv6(&'a [u8]),
    None,
}

/// One parsed inbound frame.
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub dst_mac: MacAddr,
    pub src_mac: MacAddr,
    pub ethertype: u16,
    pub vlan: Option<u16>,
    pub l3: L3<'a>,
    pub l4: L4<'a>,
}

impl<'a> Frame<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Frame<'a>> {
        if data.len() < 14 {
            return None;
        }
        let dst_mac = mac_at(data, 0);
        let src_mac = mac_at(data, 6);
        let mut ethertype = u16::from_be_bytes([data[12], data[13]]);
        let mut offset = 14;
        let mut vlan = None;

        if ethertype == ETHERTYPE_VLAN {
            if data.len() < 18 {
                return None;
            }
            vlan = Some(u16::from_be_bytes([data[14], data[15]]) & 0x0fff);
            ethertype = u16::from_be_bytes([data[16], data[17]]);
            offset = 18;
        }

        let rest = &data[offset..];
        let (l3, l4) = if ethertype >= 0x0600 {
            parse_l3(ethertype, rest)
        } else {
            // 802.3 length field: LLC follows
            (parse_llc(rest), L4::None)
        };

        Some(Frame { data, dst_mac, src_mac, ethertype, vlan, l3, l4 })
    }

    pub fn src_ip(&self) -> Option<std::net::IpAddr> {
        match &self.l3 {
            L3::Ipv4 { src, .. } => Some((*src).into()),
            L3::Ipv6 { src, .. } => Some((*src).into()),
            _ => None,
        }
    }

    pub fn dst_ip(&self) -> Option<std::net::IpAddr> {
        match &self.l3 {
            L3::Ipv4 { dst, .. } => Some((*dst).into()),
            L3::Ipv6 { dst, .. } => Some((*dst).into()),
            _ => None,
        }
    }

    pub fn udp(&self) -> Option<(u16, u16, &'a [u8])> {
        match self.l4 {
            L4::Udp { src_port, dst_port, payload } => Some((src_port, dst_port, payload)),
            _ => None,
        }
    }

    pub fn udp_dst_port(&self) -> Option<u16> {
        match self.l4 {
            L4::Udp { dst_port, .. } => Some(dst_port),
            _ => None,
        }
    }

    pub fn tcp_dst_port(&self) -> Option<u16> {
        match self.l4 {
            L4::Tcp { dst_port, .. } => Some(dst_port),
            _ => None,
        }
    }

    pub fn is_multicast(&self) -> bool {
        self.dst_mac.0 & 0x01 != 0
    }

    pub fn snap_oui(&self) -> Option<[u8; 3]> {
        match self.l3 {
            L3::Llc { oui, .. } => oui,
            _ => None,
        }
    }
}

fn mac_at(data: &[u8], i: usize) -> MacAddr {
    MacAddr(data[i], data[i + 1], data[i + 2], data[i + 3], data[i + 4], data[i + 5])
}

fn parse_l3(ethertype: u16, rest: &[u8]) -> (L3<'_>, L4<'_>) {
    match ethertype {
        ETHERTYPE_ARP => (L3::Arp(rest), L4::None),
        ETHERTYPE_IPV4 => parse_ipv4(rest),
        ETHERTYPE_IPV6 => parse_ipv6(rest),
        _ => (L3::Other, L4::None),
    }
}

fn parse_ipv4(rest: &[u8]) -> (L3<'_>, L4<'_>) {
    if rest.len() < 20 || rest[0] >> 4 != 4 {
        return (L3::Other, L4::None);
    }
    let ihl = ((rest[0] & 0x0f) as usize) * 4;
    if ihl < 20 || rest.len() < ihl {
        return (L3::Other, L4::None);
    }
    let total = u16::from_be_bytes([rest[2], rest[3]]) as usize;
    let end = total.clamp(ihl, rest.len());
    let ttl = rest[8];
    let protocol = rest[9];
    let src = Ipv4Addr::new(rest[12], rest[13], rest[14], rest[15]);
    let dst = Ipv4Addr::new(rest[16], rest[17], rest[18], rest[19]);
    let payload = &rest[ihl..end];

    let l4 = parse_l4(protocol, payload);
    (L3::Ipv4 { src, dst, protocol, ttl, payload }, l4)
}

fn parse_ipv6(rest: &[u8]) -> (L3<'_>, L4<'_>) {
    if rest.len() < 40 || rest[0] >> 4 != 6 {
        return (L3::Other, L4::None);
    }
    let payload_len = u16::from_be_bytes([rest[4], rest[5]]) as usize;
    let next_header = rest[6];
    let hop_limit = rest[7];
    let mut src_bytes = [0u8; 16];
    let mut dst_bytes = [0u8; 16];
    src_bytes.copy_from_slice(&rest[8..24]);
    dst_bytes.copy_from_slice(&rest[24..40]);
    let end = (40 + payload_len).min(rest.len());
    let payload = &rest[40..end];

    let l4 = parse_l4(next_header, payload);
    (
        L3::Ipv6 {
            src: Ipv6Addr::from(src_bytes),
            dst: Ipv6Addr::from(dst_bytes),
            next_header,
            hop_limit,
            payload,
        },
        l4,
    )
}

fn parse_l4(protocol: u8, payload: &[u8]) -> L4<'_> {
    match protocol {
        PROTO_UDP if payload.len() >= 8 => {
            let src_port = u16::from_be_bytes([payload[0], payload[1]]);
            let dst_port = u16::from_be_bytes([payload[2], payload[3]]);
            let len = (u16::from_be_bytes([payload[4], payload[5]]) as usize)
                .clamp(8, payload.len());
            L4::Udp { src_port, dst_port, payload: &payload[8..len] }
        }
        PROTO_TCP if payload.len() >= 20 => {
            let src_port = u16::from_be_bytes([payload[0], payload[1]]);
            let dst_port = u16::from_be_bytes([payload[2], payload[3]]);
            let seq = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
            let ack = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
            let data_offset = ((payload[12] >> 4) as usize) * 4;
            if data_offset < 20 || payload.len() < data_offset {
                return L4::None;
            }
            let flags = payload[13];
            L4::Tcp { src_port, dst_port, seq, ack, flags, payload: &payload[data_offset..] }
        }
        PROTO_ICMP => L4::Icmp(payload),
        PROTO_ICMPV6 => L4::Icmpv6(payload),
        _ => L4::None,
    }
}

fn parse_llc(rest: &[u8]) -> L3<'_> {
    if rest.len() < 3 {
        return L3::Other;
    }
    let dsap = rest[0];
    let ssap = rest[1];
    let control = rest[2];
    if dsap == 0xaa && ssap == 0xaa && rest.len() >= 8 {
        let oui = [rest[3], rest[4], rest[5]];
        let pid = u16::from_be_bytes([rest[6], rest[7]]);
        L3::Llc { dsap, ssap, control, oui: Some(oui), pid: Some(pid), payload: &rest[8..] }
    } else {
        L3::Llc { dsap, ssap, control, oui: None, pid: None, payload: &rest[3..] }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

/// Ethernet + IPv4 + UDP frame with checksums.
pub fn build_udp_ipv4(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let udp_len = 8 + payload.len();
    let mut segment = vec![0u8; udp_len];
    {
        let mut udp = MutableUdpPacket::new(&mut segment)?;
        udp.set_source(src_port);
        udp.set_destination(dst_port);
        udp.set_length(udp_len as u16);
        udp.set_payload(payload);
        let checksum = udp::ipv4_checksum(&udp.to_immutable(), &src_ip, &dst_ip);
        udp.set_checksum(checksum);
    }
    build_ipv4(src_mac, dst_mac, src_ip, dst_ip, PROTO_UDP, ttl, &segment)
}

/// Ethernet + IPv6 + UDP frame with checksums.
pub fn build_udp_ipv6(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv6Addr,
    dst_ip: Ipv6Addr,
    src_port: u16,
    dst_port: u16,
    hop_limit: u8,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let udp_len = 8 + payload.len();
    let mut segment = vec![0u8; udp_len];
    {
        let mut udp = MutableUdpPacket::new(&mut segment)?;
        udp.set_source(src_port);
        udp.set_destination(dst_port);
        udp.set_length(udp_len as u16);
        udp.set_payload(payload);
        let checksum = udp::ipv6_checksum(&udp.to_immutable(), &src_ip, &dst_ip);
        udp.set_checksum(checksum);
    }
    build_ipv6(src_mac, dst_mac, src_ip, dst_ip, PROTO_UDP, hop_limit, &segment)
}

/// Ethernet + IPv4 frame around an arbitrary L4 segment.
pub fn build_ipv4(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: u8,
    ttl: u8,
    segment: &[u8],
) -> Option<Vec<u8>> {
    let ip_len = 20 + segment.len();
    let mut buf = vec![0u8; 14 + ip_len];
    {
        let mut eth = MutableEthernetPacket::new(&mut buf)?;
        eth.set_destination(dst_mac);
        eth.set_source(src_mac);
        eth.set_ethertype(EtherType::new(ETHERTYPE_IPV4));

        let mut ip = MutableIpv4Packet::new(eth.payload_mut())?;
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(ip_len as u16);
        ip.set_identification(rand::random());
        ip.set_ttl(ttl);
        ip.set_next_level_protocol(IpNextHeaderProtocol::new(protocol));
        ip.set_source(src_ip);
        ip.set_destination(dst_ip);
        ip.set_payload(segment);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }
    Some(buf)
}

/// Ethernet + IPv6 frame around an arbitrary L4 segment.
pub fn build_ipv6(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv6Addr,
    dst_ip: Ipv6Addr,
    next_header: u8,
    hop_limit: u8,
    segment: &[u8],
) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 14 + 40 + segment.len()];
    {
        let mut eth = MutableEthernetPacket::new(&mut buf)?;
        eth.set_destination(dst_mac);
        eth.set_source(src_mac);
        eth.set_ethertype(EtherType::new(ETHERTYPE_IPV6));

        let mut ip = MutableIpv6Packet::new(eth.payload_mut())?;
        ip.set_version(6);
        ip.set_payload_length(segment.len() as u16);
        ip.set_next_header(IpNextHeaderProtocol::new(next_header));
        ip.set_hop_limit(hop_limit);
        ip.set_source(src_ip);
        ip.set_destination(dst_ip);
        ip.set_payload(segment);
    }
    Some(buf)
}

/// Ethernet + IPv4 + TCP frame with checksums.
#[allow(clippy::too_many_arguments)]
pub fn build_tcp_ipv4(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    ttl: u8,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let tcp_len = 20 + payload.len();
    let mut segment = vec![0u8; tcp_len];
    {
        let mut tcp = MutableTcpPacket::new(&mut segment)?;
        tcp.set_source(src_port);
        tcp.set_destination(dst_port);
        tcp.set_sequence(seq);
        tcp.set_acknowledgement(ack);
        tcp.set_data_offset(5);
        tcp.set_flags(flags);
        tcp.set_window(65535);
        tcp.set_payload(payload);
        let checksum = tcp::ipv4_checksum(&tcp.to_immutable(), &src_ip, &dst_ip);
        tcp.set_checksum(checksum);
    }
    build_ipv4(src_mac, dst_mac, src_ip, dst_ip, PROTO_TCP, ttl, &segment)
}

/// 802.3 frame with LLC header (and SNAP when `snap` is set).
pub fn build_llc(
    dst_mac: MacAddr,
    src_mac: MacAddr,
    dsap: u8,
    ssap: u8,
    control: u8,
    snap: Option<([u8; 3], u16)>,
    payload: &[u8],
) -> Vec<u8> {
    let llc_len = 3 + if snap.is_some() { 5 } else { 0 } + payload.len();
    let mut buf = Vec::with_capacity(14 + llc_len);
    buf.extend_from_slice(&[dst_mac.0, dst_mac.1, dst_mac.2, dst_mac.3, dst_mac.4, dst_mac.5]);
    buf.extend_from_slice(&[src_mac.0, src_mac.1, src_mac.2, src_mac.3, src_mac.4, src_mac.5]);
    buf.extend_from_slice(&(llc_len as u16).to_be_bytes());
    buf.push(dsap);
    buf.push(ssap);
    buf.push(control);
    if let Some((oui, pid)) = snap {
        buf.extend_from_slice(&oui);
        buf.extend_from_slice(&pid.to_be_bytes());
    }
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_udp_ipv4_round_trip() {
        let src_mac: MacAddr = "aa:bb:cc:00:00:01".parse().unwrap();
        let dst_mac: MacAddr = "aa:bb:cc:00:00:02".parse().unwrap();
        let frame = build_udp_ipv4(
            src_mac,
            dst_mac,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            12345,
            161,
            64,
            b"payload",
        )
        .unwrap();

        let parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.ethertype, ETHERTYPE_IPV4);
        assert_eq!(parsed.src_mac, src_mac);
        let (sport, dport, payload) = parsed.udp().unwrap();
        assert_eq!(sport, 12345);
        assert_eq!(dport, 161);
        assert_eq!(payload, b"payload");
        match parsed.l3 {
            L3::Ipv4 { src, dst, ttl, .. } => {
                assert_eq!(src, Ipv4Addr::new(10, 0, 0, 1));
                assert_eq!(dst, Ipv4Addr::new(10, 0, 0, 2));
                assert_eq!(ttl, 64);
            }
            _ => panic!("expected ipv4"),
        }
    }

    #[test]
    fn test_parse_udp_ipv6() {
        let src_mac: MacAddr = "aa:bb:cc:00:00:01".parse().unwrap();
        let dst_mac: MacAddr = "33:33:00:00:00:01".parse().unwrap();
        let frame = build_udp_ipv6(
            src_mac,
            dst_mac,
            "2001:db8::1".parse().unwrap(),
            "2001:db8::2".parse().unwrap(),
            546,
            547,
            64,
            b"x",
        )
        .unwrap();

        let parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.ethertype, ETHERTYPE_IPV6);
        assert!(parsed.is_multicast());
        assert_eq!(parsed.udp_dst_port(), Some(547));
    }

    #[test]
    fn test_parse_llc_snap() {
        let dst: MacAddr = "01:00:0c:cc:cc:cc".parse().unwrap();
        let src: MacAddr = "aa:bb:cc:00:00:01".parse().unwrap();
        let frame = build_llc(dst, src, 0xaa, 0xaa, 0x03, Some(([0x00, 0x00, 0x0c], 0x2000)), b"cdp");

        let parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.snap_oui(), Some([0x00, 0x00, 0x0c]));
        match parsed.l3 {
            L3::Llc { pid, payload, .. } => {
                assert_eq!(pid, Some(0x2000));
                assert_eq!(payload, b"cdp");
            }
            _ => panic!("expected llc"),
        }
    }

    #[test]
    fn test_parse_vlan_tag() {
        let src_mac: MacAddr = "aa:bb:cc:00:00:01".parse().unwrap();
        let dst_mac: MacAddr = "aa:bb:cc:00:00:02".parse().unwrap();
        let inner = build_udp_ipv4(
            src_mac,
            dst_mac,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            1,
            2,
            64,
            b"",
        )
        .unwrap();

        // Splice a VLAN 100 tag in after the MACs
        let mut tagged = Vec::new();
        tagged.extend_from_slice(&inner[..12]);
        tagged.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        tagged.extend_from_slice(&100u16.to_be_bytes());
        tagged.extend_from_slice(&inner[12..]);

        let parsed = Frame::parse(&tagged).unwrap();
        assert_eq!(parsed.vlan, Some(100));
        assert_eq!(parsed.ethertype, ETHERTYPE_IPV4);
    }

    #[test]
    fn test_runt_frame_rejected() {
        assert!(Frame::parse(&[0u8; 10]).is_none());
    }
}
