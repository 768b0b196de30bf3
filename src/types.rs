//! Shared primitives used across the simulator.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// NIAC version string reported by `/version` and the startup banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current unix time in seconds.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wire protocols the stack can answer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Arp,
    Icmp,
    Icmpv6,
    Dhcp,
    Dhcpv6,
    Dns,
    Snmp,
    Http,
    Ftp,
    Netbios,
    Lldp,
    Cdp,
    Edp,
    Fdp,
    Stp,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Arp => "arp",
            ProtocolKind::Icmp => "icmp",
            ProtocolKind::Icmpv6 => "icmpv6",
            ProtocolKind::Dhcp => "dhcp",
            ProtocolKind::Dhcpv6 => "dhcpv6",
            ProtocolKind::Dns => "dns",
            ProtocolKind::Snmp => "snmp",
            ProtocolKind::Http => "http",
            ProtocolKind::Ftp => "ftp",
            ProtocolKind::Netbios => "netbios",
            ProtocolKind::Lldp => "lldp",
            ProtocolKind::Cdp => "cdp",
            ProtocolKind::Edp => "edp",
            ProtocolKind::Fdp => "fdp",
            ProtocolKind::Stp => "stp",
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative state of a simulated device.
///
/// ```text
/// Up ──► Down ──► Starting ──► Up
/// Up ──► Stopping (terminal, device is being removed)
/// Up ◄──► Maintenance
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Up,
    Down,
    Starting,
    Stopping,
    Maintenance,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Up => "up",
            DeviceState::Down => "down",
            DeviceState::Starting => "starting",
            DeviceState::Stopping => "stopping",
            DeviceState::Maintenance => "maintenance",
        }
    }

    /// ifOperStatus value for this state (1 = up, 2 = down).
    pub fn oper_status(&self) -> i64 {
        match self {
            DeviceState::Up | DeviceState::Starting => 1,
            _ => 2,
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic packet counters, kept per stack and per device.
#[derive(Debug, Default)]
pub struct Counters {
    pub packets_sent: std::sync::atomic::AtomicU64,
    pub packets_received: std::sync::atomic::AtomicU64,
    pub arp_requests: std::sync::atomic::AtomicU64,
    pub arp_replies: std::sync::atomic::AtomicU64,
    pub icmp_requests: std::sync::atomic::AtomicU64,
    pub icmp_replies: std::sync::atomic::AtomicU64,
    pub dns_queries: std::sync::atomic::AtomicU64,
    pub dhcp_requests: std::sync::atomic::AtomicU64,
    pub snmp_queries: std::sync::atomic::AtomicU64,
    pub errors: std::sync::atomic::AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub arp_requests: u64,
    pub arp_replies: u64,
    pub icmp_requests: u64,
    pub icmp_replies: u64,
    pub dns_queries: u64,
    pub dhcp_requests: u64,
    pub snmp_queries: u64,
    pub errors: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        use std::sync::atomic::Ordering::Relaxed;
        CountersSnapshot {
            packets_sent: self.packets_sent.load(Relaxed),
            packets_received: self.packets_received.load(Relaxed),
            arp_requests: self.arp_requests.load(Relaxed),
            arp_replies: self.arp_replies.load(Relaxed),
            icmp_requests: self.icmp_requests.load(Relaxed),
            icmp_replies: self.icmp_replies.load(Relaxed),
            dns_queries: self.dns_queries.load(Relaxed),
            dhcp_requests: self.dhcp_requests.load(Relaxed),
            snmp_queries: self.snmp_queries.load(Relaxed),
            errors: self.errors.load(Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oper_status_mapping() {
        assert_eq!(DeviceState::Up.oper_status(), 1);
        assert_eq!(DeviceState::Down.oper_status(), 2);
        assert_eq!(DeviceState::Maintenance.oper_status(), 2);
    }
}
