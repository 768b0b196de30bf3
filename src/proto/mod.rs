//! Protocol handlers: classification discriminators, the handler trait,
//! and the registry the stack dispatches through.

pub mod arp;
pub mod dhcp;
pub mod dhcpv6;
pub mod discovery;
pub mod dns;
pub mod frame;
pub mod icmp;
pub mod services;
pub mod snmp_handler;
pub mod stp;

pub use frame::{Frame, L3, L4};

use crate::stack::StackContext;
use crate::types::ProtocolKind;
use std::sync::Arc;

/// What a handler claims on the wire. The classifier routes a frame to
/// every handler whose claim matches; `can_handle` resolves ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discriminator {
    EtherType(u16),
    UdpPort(u16),
    MulticastMac([u8; 6]),
    LlcSnapOui([u8; 3]),
}

impl Discriminator {
    pub fn matches(&self, frame: &Frame<'_>) -> bool {
        match self {
            Discriminator::EtherType(et) => frame.ethertype == *et,
            Discriminator::UdpPort(port) => frame.udp_dst_port() == Some(*port),
            Discriminator::MulticastMac(mac) => {
                let d = frame.dst_mac;
                [d.0, d.1, d.2, d.3, d.4, d.5] == *mac
            }
            Discriminator::LlcSnapOui(oui) => frame.snap_oui() == Some(*oui),
        }
    }
}

/// One wire protocol's behavior. Handlers are stateless across requests;
/// protocols with periodic advertisements own tickers spawned in
/// `start` and torn down in `stop`.
pub trait ProtocolHandler: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    fn claims(&self) -> Vec<Discriminator>;

    fn can_handle(&self, frame: &Frame<'_>) -> bool;

    /// Handle one inbound frame, returning any response frames.
    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>>;

    /// Called once when the stack starts; periodic tickers spawn here.
    fn start(&self, _ctx: StackContext) {}

    /// Called on stack shutdown. Idempotent.
    fn stop(&self) {}
}

/// Registry of handlers, routed by discriminator.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn ProtocolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Every protocol the simulator speaks. Per-device enablement is
    /// checked inside the handlers against the live config.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(arp::ArpHandler::new()));
        registry.register(Arc::new(icmp::IcmpHandler::new()));
        registry.register(Arc::new(icmp::Icmpv6Handler::new()));
        registry.register(Arc::new(dhcp::DhcpHandler::new()));
        registry.register(Arc::new(dhcpv6::Dhcpv6Handler::new()));
        registry.register(Arc::new(dns::DnsHandler::new()));
        registry.register(Arc::new(snmp_handler::SnmpHandler::new()));
        registry.register(Arc::new(discovery::LldpHandler::new()));
        registry.register(Arc::new(discovery::CdpHandler::new()));
        registry.register(Arc::new(discovery::EdpHandler::new()));
        registry.register(Arc::new(discovery::FdpHandler::new()));
        registry.register(Arc::new(stp::StpHandler::new()));
        registry.register(Arc::new(services::HttpHandler::new()));
        registry.register(Arc::new(services::FtpHandler::new()));
        registry.register(Arc::new(services::NetbiosHandler::new()));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ProtocolHandler>) {
        self.handlers.push(handler);
    }

    pub fn handlers(&self) -> &[Arc<dyn ProtocolHandler>] {
        &self.handlers
    }

    /// Route one frame: responses from every handler whose claim and
    /// `can_handle` both match, in registration order.
    pub fn dispatch(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for handler in &self.handlers {
            let claimed = handler.claims().iter().any(|d| d.matches(frame));
            if claimed && handler.can_handle(frame) {
                out.extend(handler.handle(frame, ctx));
            }
        }
        out
    }

    pub fn start_all(&self, ctx: &StackContext) {
        for handler in &self.handlers {
            handler.start(ctx.clone());
        }
    }

    pub fn stop_all(&self) {
        for handler in &self.handlers {
            handler.stop();
        }
    }
}
