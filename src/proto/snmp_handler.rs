//! Stack-side SNMP handler: UDP/161 in, agent-processed response out.

use std::net::IpAddr;
use std::sync::atomic::Ordering;
use tracing::trace;

use crate::snmp::{AgentReply, ber};
use crate::stack::StackContext;
use crate::types::ProtocolKind;

use super::frame::{Frame, build_udp_ipv4, build_udp_ipv6};
use super::{Discriminator, ProtocolHandler};

const SNMP_PORT: u16 = 161;

pub struct SnmpHandler;

impl SnmpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SnmpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for SnmpHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Snmp
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::UdpPort(SNMP_PORT)]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        frame.udp().is_some_and(|(_, _, payload)| !payload.is_empty())
    }

    fn handle(&self, frame: &Frame<'_>, ctx: &StackContext) -> Vec<Vec<u8>> {
        let Some((src_port, _, payload)) = frame.udp() else { return Vec::new() };
        let Some(dst_ip) = frame.dst_ip() else { return Vec::new() };
        let Some(src_ip) = frame.src_ip() else { return Vec::new() };

        let Some(device) = ctx.fleet.by_ip(&dst_ip) else { return Vec::new() };
        if !device.is_up() {
            return Vec::new();
        }
        let Some(agent) = device.agent() else { return Vec::new() };

        ctx.stats.snmp_queries.fetch_add(1, Ordering::Relaxed);
        device.counters().snmp_queries.fetch_add(1, Ordering::Relaxed);
        device.touch();

        let msg = match ber::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                trace!(device = %device.name(), "snmp decode failed: {e}");
                ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
                return Vec::new();
            }
        };

        match agent.handle(&msg) {
            AgentReply::Response(response) => {
                let Ok(bytes) = ber::encode(&response) else {
                    ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
                    return Vec::new();
                };
                let reply = match (dst_ip, src_ip) {
                    (IpAddr::V4(local), IpAddr::V4(remote)) => build_udp_ipv4(
                        device.mac(),
                        frame.src_mac,
                        local,
                        remote,
                        SNMP_PORT,
                        src_port,
                        64,
                        &bytes,
                    ),
                    (IpAddr::V6(local), IpAddr::V6(remote)) => build_udp_ipv6(
                        device.mac(),
                        frame.src_mac,
                        local,
                        remote,
                        SNMP_PORT,
                        src_port,
                        64,
                        &bytes,
                    ),
                    _ => None,
                };
                reply.into_iter().collect()
            }
            AgentReply::AuthFailure => {
                trace!(device = %device.name(), source = %src_ip, "snmp community mismatch");
                if let Some(traps) = device.traps() {
                    if tokio::runtime::Handle::try_current().is_ok() {
                        tokio::spawn(async move {
                            traps.auth_failure(src_ip).await;
                        });
                    }
                }
                Vec::new()
            }
            AgentReply::Ignored => Vec::new(),
        }
    }
}
