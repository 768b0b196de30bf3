//! ICMPv4 and ICMPv6: echo replies for Up devices, plus NDP neighbor
//! advertisement so IPv6 hosts can resolve simulated addresses.

use pnet::packet::icmpv6::{self, Icmpv6Packet};
use pnet::util::MacAddr;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::atomic::Ordering;

use crate::stack::StackContext;
use crate::types::ProtocolKind;

use super::frame::{
    ETHERTYPE_IPV4, ETHERTYPE_IPV6, Frame, L3, L4, PROTO_ICMP, PROTO_ICMPV6, build_ipv4,
    build_ipv6,
};
use super::{Discriminator, ProtocolHandler};

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;

const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const ICMPV6_NEIGHBOR_SOLICIT: u8 = 135;
const ICMPV6_NEIGHBOR_ADVERT: u8 = 136;

// =============================================================================
// ICMPv4
// =============================================================================

pub struct IcmpHandler;

impl IcmpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IcmpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for IcmpHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Icmp
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::EtherType(ETHERTYPE_IPV4)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        matches!(frame.l4, L4::Icmp(payload) if payload.len() >= 8
            && payload[0] == ICMP_ECHO_REQUEST)
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let (L3::Ipv4 { src, dst, .. }, L4::Icmp(request)) = (&frame.l3, &frame.l4) else {
            return Vec::new();
        };
        ctx.stats.icmp_requests.fetch_add(1, Ordering::Relaxed);

        let Some(device) = ctx.fleet.by_ip(&IpAddr::V4(*dst)) else {
            return Vec::new();
        };
        let cfg = device.config();
        if !device.is_up() || !cfg.icmp_enabled() {
            return Vec::new();
        }
        device.touch();
        device.counters().icmp_requests.fetch_add(1, Ordering::Relaxed);

        // Echo reply mirrors the request body
        let mut reply = request.to_vec();
        reply[0] = ICMP_ECHO_REPLY;
        reply[2] = 0;
        reply[3] = 0;
        let checksum = pnet::util::checksum(&reply, 1);
        reply[2..4].copy_from_slice(&checksum.to_be_bytes());

        let Some(out) = build_ipv4(
            device.mac(),
            frame.src_mac,
            *dst,
            *src,
            PROTO_ICMP,
            cfg.icmp_ttl(),
            &reply,
        ) else {
            return Vec::new();
        };

        ctx.stats.icmp_replies.fetch_add(1, Ordering::Relaxed);
        device.counters().icmp_replies.fetch_add(1, Ordering::Relaxed);
        vec![out]
    }
}

// =============================================================================
// ICMPv6
// =============================================================================

pub struct Icmpv6Handler;

impl Icmpv6Handler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Icmpv6Handler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for Icmpv6Handler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Icmpv6
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::EtherType(ETHERTYPE_IPV6)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        matches!(frame.l4, L4::Icmpv6(payload) if payload.len() >= 8
            && matches!(payload[0], ICMPV6_ECHO_REQUEST | ICMPV6_NEIGHBOR_SOLICIT))
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let (L3::Ipv6 { src, dst, .. }, L4::Icmpv6(payload)) = (&frame.l3, &frame.l4) else {
            return Vec::new();
        };

        match payload[0] {
            ICMPV6_ECHO_REQUEST => self.echo(frame, ctx, *src, *dst, payload),
            ICMPV6_NEIGHBOR_SOLICIT => self.neighbor_advert(frame, ctx, *src, payload),
            _ => Vec::new(),
        }
    }
}

impl Icmpv6Handler {
    fn echo(
        &self,
        frame: &Frame<'_>,
        ctx: &StackContext,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        request: &[u8],
    ) -> Vec<Vec<u8>> {
        ctx.stats.icmp_requests.fetch_add(1, Ordering::Relaxed);

        let Some(device) = ctx.fleet.by_ip(&IpAddr::V6(dst)) else {
            return Vec::new();
        };
        let cfg = device.config();
        if !device.is_up() || !cfg.icmpv6_enabled() {
            return Vec::new();
        }
        device.touch();
        device.counters().icmp_requests.fetch_add(1, Ordering::Relaxed);

        let mut reply = request.to_vec();
        reply[0] = ICMPV6_ECHO_REPLY;
        fill_icmpv6_checksum(&mut reply, &dst, &src);

        let Some(out) = build_ipv6(
            device.mac(),
            frame.src_mac,
            dst,
            src,
            PROTO_ICMPV6,
            cfg.icmpv6_hop_limit(),
            &reply,
        ) else {
            return Vec::new();
        };

        ctx.stats.icmp_replies.fetch_add(1, Ordering::Relaxed);
        device.counters().icmp_replies.fetch_add(1, Ordering::Relaxed);
        vec![out]
    }

    fn neighbor_advert(
        &self,
        frame: &Frame<'_>,
        ctx: &StackContext,
        src: Ipv6Addr,
        payload: &[u8],
    ) -> Vec<Vec<u8>> {
        if payload.len() < 24 {
            return Vec::new();
        }
        let mut target_bytes = [0u8; 16];
        target_bytes.copy_from_slice(&payload[8..24]);
        let target = Ipv6Addr::from(target_bytes);

        // Source link-layer option teaches the cache
        if !src.is_unspecified() {
            ctx.neighbors.learn(IpAddr::V6(src), frame.src_mac, None);
        }

        let Some(device) = ctx.fleet.by_ip(&IpAddr::V6(target)) else {
            return Vec::new();
        };
        if !device.is_up() {
            return Vec::new();
        }
        device.touch();

        let mac = device.mac();
        // NA: flags solicited+override, target, target link-layer option
        let mut advert = vec![ICMPV6_NEIGHBOR_ADVERT, 0, 0, 0, 0x60, 0, 0, 0];
        advert.extend_from_slice(&target.octets());
        advert.extend_from_slice(&[2, 1, mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]);
        fill_icmpv6_checksum(&mut advert, &target, &src);

        // NDP uses hop limit 255 by definition
        match build_ipv6(mac, frame.src_mac, target, src, PROTO_ICMPV6, 255, &advert) {
            Some(out) => vec![out],
            None => Vec::new(),
        }
    }
}

fn fill_icmpv6_checksum(packet: &mut [u8], src: &Ipv6Addr, dst: &Ipv6Addr) {
    packet[2] = 0;
    packet[3] = 0;
    if let Some(view) = Icmpv6Packet::new(packet) {
        let checksum = icmpv6::checksum(&view, src, dst);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
}

/// ICMPv4 echo request, used by the traffic generator.
pub fn build_echo_request(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: std::net::Ipv4Addr,
    dst_ip: std::net::Ipv4Addr,
    ident: u16,
    seq: u16,
    ttl: u8,
) -> Option<Vec<u8>> {
    let mut icmp = vec![ICMP_ECHO_REQUEST, 0, 0, 0];
    icmp.extend_from_slice(&ident.to_be_bytes());
    icmp.extend_from_slice(&seq.to_be_bytes());
    icmp.extend_from_slice(b"niac-ping");
    let checksum = pnet::util::checksum(&icmp, 1);
    icmp[2..4].copy_from_slice(&checksum.to_be_bytes());
    build_ipv4(src_mac, dst_mac, src_ip, dst_ip, PROTO_ICMP, ttl, &icmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;

    const YAML: &str = r#"
devices:
  - name: rtr1
    mac: "aa:bb:cc:00:00:01"
    ips: ["10.0.0.1", "2001:db8::1"]
    icmp: { ttl: 128 }
"#;

    #[test]
    fn test_echo_reply_v4() {
        let ctx = test_context(YAML);
        let handler = IcmpHandler::new();

        let request = build_echo_request(
            "02:00:00:00:00:99".parse().unwrap(),
            "aa:bb:cc:00:00:01".parse().unwrap(),
            "10.0.0.50".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            7,
            1,
            64,
        )
        .unwrap();
        let frame = Frame::parse(&request).unwrap();
        assert!(handler.can_handle(&frame));

        let replies = handler.handle(&frame, &ctx);
        assert_eq!(replies.len(), 1);

        let reply = Frame::parse(&replies[0]).unwrap();
        match (&reply.l3, &reply.l4) {
            (L3::Ipv4 { src, dst, ttl, .. }, L4::Icmp(body)) => {
                assert_eq!(src.to_string(), "10.0.0.1");
                assert_eq!(dst.to_string(), "10.0.0.50");
                assert_eq!(*ttl, 128); // from config
                assert_eq!(body[0], ICMP_ECHO_REPLY);
                // ident/seq preserved
                assert_eq!(&body[4..8], &[0, 7, 0, 1]);
            }
            _ => panic!("expected icmp reply"),
        }
    }

    #[test]
    fn test_echo_other_ip_ignored() {
        let ctx = test_context(YAML);
        let handler = IcmpHandler::new();
        let request = build_echo_request(
            "02:00:00:00:00:99".parse().unwrap(),
            "aa:bb:cc:00:00:01".parse().unwrap(),
            "10.0.0.50".parse().unwrap(),
            "10.0.0.200".parse().unwrap(),
            7,
            1,
            64,
        )
        .unwrap();
        let frame = Frame::parse(&request).unwrap();
        assert!(handler.handle(&frame, &ctx).is_empty());
    }

    #[test]
    fn test_neighbor_solicit_advert() {
        let ctx = test_context(YAML);
        let handler = Icmpv6Handler::new();

        let src: Ipv6Addr = "2001:db8::99".parse().unwrap();
        let target: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let mut ns = vec![ICMPV6_NEIGHBOR_SOLICIT, 0, 0, 0, 0, 0, 0, 0];
        ns.extend_from_slice(&target.octets());
        fill_icmpv6_checksum(&mut ns, &src, &"ff02::1:ff00:1".parse().unwrap());

        let frame_bytes = build_ipv6(
            "02:00:00:00:00:99".parse().unwrap(),
            "33:33:ff:00:00:01".parse().unwrap(),
            src,
            "ff02::1:ff00:1".parse().unwrap(),
            PROTO_ICMPV6,
            255,
            &ns,
        )
        .unwrap();
        let frame = Frame::parse(&frame_bytes).unwrap();
        assert!(handler.can_handle(&frame));

        let replies = handler.handle(&frame, &ctx);
        assert_eq!(replies.len(), 1);
        let advert = Frame::parse(&replies[0]).unwrap();
        match &advert.l4 {
            L4::Icmpv6(body) => {
                assert_eq!(body[0], ICMPV6_NEIGHBOR_ADVERT);
                assert_eq!(&body[8..24], &target.octets());
            }
            _ => panic!("expected icmpv6"),
        }
        // Solicitor learned
        assert!(ctx.neighbors.lookup(&IpAddr::V6(src)).is_some());
    }
}
