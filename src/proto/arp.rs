//! ARP: answer requests for any simulated IP, learn from everything.

use pnet::packet::MutablePacket;
use pnet::packet::arp::{
    ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket,
};
use pnet::packet::ethernet::{EtherType, EtherTypes, MutableEthernetPacket};
use pnet::util::MacAddr;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;

use crate::stack::StackContext;
use crate::types::ProtocolKind;

use super::frame::{ETHERTYPE_ARP, Frame, L3};
use super::{Discriminator, ProtocolHandler};

pub struct ArpHandler;

impl ArpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for ArpHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Arp
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::EtherType(ETHERTYPE_ARP)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        matches!(frame.l3, L3::Arp(payload) if payload.len() >= 28)
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let L3::Arp(payload) = frame.l3 else { return Vec::new() };
        let Some(arp) = ArpPacket::new(payload) else { return Vec::new() };

        let sender_mac = arp.get_sender_hw_addr();
        let sender_ip = arp.get_sender_proto_addr();
        let target_ip = arp.get_target_proto_addr();

        // Gratuitous or not, a non-zero sender teaches the cache
        if !sender_ip.is_unspecified() {
            ctx.neighbors.learn(sender_ip.into(), sender_mac, None);
        }

        if arp.get_operation() != ArpOperations::Request {
            return Vec::new();
        }
        ctx.stats.arp_requests.fetch_add(1, Ordering::Relaxed);

        // Gratuitous request announces, it doesn't ask
        if sender_ip == target_ip {
            return Vec::new();
        }

        let Some(device) = ctx.fleet.by_ip(&target_ip.into()) else {
            return Vec::new();
        };
        if !device.is_up() {
            return Vec::new();
        }
        device.touch();
        device.counters().arp_requests.fetch_add(1, Ordering::Relaxed);

        match build_reply(device.mac(), target_ip, sender_mac, sender_ip) {
            Some(reply) => {
                ctx.stats.arp_replies.fetch_add(1, Ordering::Relaxed);
                device.counters().arp_replies.fetch_add(1, Ordering::Relaxed);
                vec![reply]
            }
            None => Vec::new(),
        }
    }
}

/// ARP reply frame: `sender` is the simulated device answering for
/// `sender_ip`, addressed to the original requester.
pub fn build_reply(
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 14 + 28];
    let mut eth = MutableEthernetPacket::new(&mut buf)?;
    eth.set_destination(target_mac);
    eth.set_source(sender_mac);
    eth.set_ethertype(EtherType::new(ETHERTYPE_ARP));

    let mut arp = MutableArpPacket::new(eth.payload_mut())?;
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Reply);
    arp.set_sender_hw_addr(sender_mac);
    arp.set_sender_proto_addr(sender_ip);
    arp.set_target_hw_addr(target_mac);
    arp.set_target_proto_addr(target_ip);
    Some(buf)
}

/// Gratuitous ARP announcement for one device address.
pub fn build_gratuitous(mac: MacAddr, ip: Ipv4Addr) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 14 + 28];
    let mut eth = MutableEthernetPacket::new(&mut buf)?;
    eth.set_destination(MacAddr::broadcast());
    eth.set_source(mac);
    eth.set_ethertype(EtherType::new(ETHERTYPE_ARP));

    let mut arp = MutableArpPacket::new(eth.payload_mut())?;
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Request);
    arp.set_sender_hw_addr(mac);
    arp.set_sender_proto_addr(ip);
    arp.set_target_hw_addr(MacAddr::zero());
    arp.set_target_proto_addr(ip);
    Some(buf)
}

/// ARP request, used by the traffic generator.
pub fn build_request(
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 14 + 28];
    let mut eth = MutableEthernetPacket::new(&mut buf)?;
    eth.set_destination(MacAddr::broadcast());
    eth.set_source(sender_mac);
    eth.set_ethertype(EtherType::new(ETHERTYPE_ARP));

    let mut arp = MutableArpPacket::new(eth.payload_mut())?;
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Request);
    arp.set_sender_hw_addr(sender_mac);
    arp.set_sender_proto_addr(sender_ip);
    arp.set_target_hw_addr(MacAddr::zero());
    arp.set_target_proto_addr(target_ip);
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;

    #[test]
    fn test_request_gets_reply() {
        let ctx = test_context(
            r#"
devices:
  - name: rtr1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
"#,
        );
        let handler = ArpHandler::new();

        let requester: MacAddr = "02:00:00:00:00:99".parse().unwrap();
        let request = build_request(requester, "10.0.0.50".parse().unwrap(), "10.0.0.1".parse().unwrap())
            .unwrap();
        let frame = Frame::parse(&request).unwrap();

        assert!(handler.can_handle(&frame));
        let replies = handler.handle(&frame, &ctx);
        assert_eq!(replies.len(), 1);

        let reply = Frame::parse(&replies[0]).unwrap();
        assert_eq!(reply.dst_mac, requester);
        let arp = match reply.l3 {
            L3::Arp(p) => ArpPacket::new(p).unwrap(),
            _ => panic!("expected arp"),
        };
        assert_eq!(arp.get_operation(), ArpOperations::Reply);
        assert_eq!(arp.get_sender_proto_addr(), "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(arp.get_sender_hw_addr(), "aa:bb:cc:00:00:01".parse::<MacAddr>().unwrap());

        // Requester was learned
        assert!(ctx.neighbors.lookup(&"10.0.0.50".parse().unwrap()).is_some());
    }

    #[test]
    fn test_unknown_ip_ignored() {
        let ctx = test_context(
            r#"
devices:
  - name: rtr1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
"#,
        );
        let handler = ArpHandler::new();
        let request = build_request(
            "02:00:00:00:00:99".parse().unwrap(),
            "10.0.0.50".parse().unwrap(),
            "10.0.0.77".parse().unwrap(),
        )
        .unwrap();
        let frame = Frame::parse(&request).unwrap();
        assert!(handler.handle(&frame, &ctx).is_empty());
    }

    #[tokio::test]
    async fn test_down_device_silent() {
        let ctx = test_context(
            r#"
devices:
  - name: rtr1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
"#,
        );
        ctx.fleet
            .by_name("rtr1")
            .unwrap()
            .set_state(crate::types::DeviceState::Down)
            .await;

        let handler = ArpHandler::new();
        let request = build_request(
            "02:00:00:00:00:99".parse().unwrap(),
            "10.0.0.50".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
        )
        .unwrap();
        let frame = Frame::parse(&request).unwrap();
        assert!(handler.handle(&frame, &ctx).is_empty());
    }

    #[test]
    fn test_gratuitous_learns_without_reply() {
        let ctx = test_context(
            r#"
devices:
  - name: rtr1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
"#,
        );
        let handler = ArpHandler::new();
        let garp = build_gratuitous("02:00:00:00:00:42".parse().unwrap(), "10.0.0.60".parse().unwrap())
            .unwrap();
        let frame = Frame::parse(&garp).unwrap();
        assert!(handler.handle(&frame, &ctx).is_empty());
        assert!(ctx.neighbors.lookup(&"10.0.0.60".parse().unwrap()).is_some());
    }
}
