//! Fleet configuration: YAML model, validation, and reload diffs.
//!
//! The schema is kept stable with existing config producers: every field
//! a producer writes today round-trips through these structs. Unknown
//! fields are ignored rather than rejected.

use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("device {0}: name must not be empty")]
    EmptyName(usize),
    #[error("duplicate device name: {0}")]
    DuplicateName(String),
    #[error("device {device}: invalid MAC address {mac}")]
    BadMac { device: String, mac: String },
    #[error("device {device}: invalid IP address {ip}")]
    BadIp { device: String, ip: String },
    #[error("device {0}: at least one IP address is required")]
    NoIp(String),
    #[error("IP {ip} assigned to both {first} and {second}")]
    DuplicateIp { ip: IpAddr, first: String, second: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Router,
    Switch,
    Ap,
    Server,
    Workstation,
    Firewall,
    #[default]
    Generic,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Router => "router",
            DeviceType::Switch => "switch",
            DeviceType::Ap => "ap",
            DeviceType::Server => "server",
            DeviceType::Workstation => "workstation",
            DeviceType::Firewall => "firewall",
            DeviceType::Generic => "generic",
        }
    }
}

// =============================================================================
// PER-PROTOCOL DEVICE CONFIG
// =============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpAgentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "SnmpAgentConfig::default_community")]
    pub community: String,
    #[serde(default)]
    pub walk_file: Option<String>,
}

impl SnmpAgentConfig {
    fn default_community() -> String {
        "public".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapProbeConfig {
    /// One of `high_cpu`, `high_memory`, `interface_errors`.
    pub kind: String,
    #[serde(default = "TrapProbeConfig::default_threshold")]
    pub threshold: u8,
    #[serde(default = "TrapProbeConfig::default_interval", alias = "interval")]
    pub interval_secs: u64,
}

impl TrapProbeConfig {
    fn default_threshold() -> u8 {
        80
    }
    fn default_interval() -> u64 {
        60
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `host[:port]`, default UDP port 162.
    #[serde(default)]
    pub receivers: Vec<String>,
    #[serde(default)]
    pub community: Option<String>,
    /// Send coldStart when the device starts.
    #[serde(default)]
    pub on_startup: bool,
    #[serde(default)]
    pub probes: Vec<TrapProbeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    #[serde(default = "DhcpConfig::default_mask")]
    pub subnet_mask: Ipv4Addr,
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "DhcpConfig::default_lease", alias = "lease_time")]
    pub lease_secs: u32,
    #[serde(default)]
    pub ntp_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub tftp_server: Option<String>,
    #[serde(default)]
    pub boot_file: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
}

impl DhcpConfig {
    fn default_mask() -> Ipv4Addr {
        Ipv4Addr::new(255, 255, 255, 0)
    }
    fn default_lease() -> u32 {
        86400
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dhcpv6Config {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub pool_start: Ipv6Addr,
    pub pool_end: Ipv6Addr,
    #[serde(default)]
    pub dns_servers: Vec<Ipv6Addr>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "DhcpConfig::default_lease", alias = "lease_time")]
    pub lease_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: String,
    pub value: String,
    #[serde(default = "DnsRecord::default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub priority: Option<u16>,
    #[serde(default)]
    pub weight: Option<u16>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl DnsRecord {
    fn default_ttl() -> u32 {
        300
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub records: Vec<DnsRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "DiscoveryConfig::default_interval", alias = "interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub port_description: Option<String>,
    #[serde(default)]
    pub system_description: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl DiscoveryConfig {
    fn default_interval() -> u64 {
        30
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "StpConfig::default_priority")]
    pub priority: u16,
    #[serde(default = "StpConfig::default_hello", alias = "hello_time")]
    pub hello_secs: u64,
}

impl StpConfig {
    fn default_priority() -> u16 {
        32768
    }
    fn default_hello() -> u64 {
        2
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEndpoint {
    pub path: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "HttpEndpoint::default_content_type")]
    pub content_type: String,
}

impl HttpEndpoint {
    fn default_content_type() -> String {
        "text/html".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "HttpConfig::default_port")]
    pub port: u16,
    #[serde(default = "HttpConfig::default_banner", alias = "server")]
    pub server_banner: String,
    #[serde(default)]
    pub endpoints: Vec<HttpEndpoint>,
}

impl HttpConfig {
    fn default_port() -> u16 {
        80
    }
    fn default_banner() -> String {
        "nginx".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "FtpConfig::default_port")]
    pub port: u16,
    #[serde(default = "FtpConfig::default_banner")]
    pub banner: String,
}

impl FtpConfig {
    fn default_port() -> u16 {
        21
    }
    fn default_banner() -> String {
        "220 FTP server ready".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetbiosConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// NetBIOS name; defaults to the device name uppercased.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcmpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "IcmpConfig::default_ttl")]
    pub ttl: u8,
}

impl IcmpConfig {
    fn default_ttl() -> u8 {
        64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Icmpv6Config {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "IcmpConfig::default_ttl")]
    pub hop_limit: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub gratuitous_arp: bool,
    #[serde(default)]
    pub ping_targets: Vec<IpAddr>,
    #[serde(default = "TrafficConfig::default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Background broadcast frames per minute; 0 disables.
    #[serde(default)]
    pub background_fpm: u32,
}

impl TrafficConfig {
    fn default_ping_interval() -> u64 {
        30
    }
}

// =============================================================================
// DEVICE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    #[serde(default)]
    pub ifindex: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub speed_mbps: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrunkPort {
    pub port: String,
    pub peer_device: String,
    #[serde(default)]
    pub peer_port: Option<String>,
    #[serde(default)]
    pub vlans: Vec<u16>,
    #[serde(default)]
    pub native_vlan: Option<u16>,
    #[serde(default = "TrunkPort::default_link_type")]
    pub link_type: String,
    #[serde(default)]
    pub speed: Option<String>,
    #[serde(default)]
    pub duplex: Option<String>,
}

impl TrunkPort {
    fn default_link_type() -> String {
        "trunk".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub mac: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(rename = "type", default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub trunk_ports: Vec<TrunkPort>,
    /// Free-form properties; seeds the MIB-II system group
    /// (sysDescr, sysObjectID, sysContact, sysName, sysLocation).
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub snmp_agent: Option<SnmpAgentConfig>,
    #[serde(default)]
    pub traps: Option<TrapConfig>,
    #[serde(default)]
    pub dhcp: Option<DhcpConfig>,
    #[serde(default)]
    pub dhcpv6: Option<Dhcpv6Config>,
    #[serde(default)]
    pub dns: Option<DnsConfig>,
    #[serde(default)]
    pub lldp: Option<DiscoveryConfig>,
    #[serde(default)]
    pub cdp: Option<DiscoveryConfig>,
    #[serde(default)]
    pub edp: Option<DiscoveryConfig>,
    #[serde(default)]
    pub fdp: Option<DiscoveryConfig>,
    #[serde(default)]
    pub stp: Option<StpConfig>,
    #[serde(default)]
    pub http: Option<HttpConfig>,
    #[serde(default)]
    pub ftp: Option<FtpConfig>,
    #[serde(default)]
    pub netbios: Option<NetbiosConfig>,
    #[serde(default)]
    pub icmp: Option<IcmpConfig>,
    #[serde(default)]
    pub icmpv6: Option<Icmpv6Config>,
    #[serde(default)]
    pub traffic: Option<TrafficConfig>,
}

impl Device {
    pub fn mac_addr(&self) -> Result<MacAddr, ConfigError> {
        self.mac.parse().map_err(|_| ConfigError::BadMac {
            device: self.name.clone(),
            mac: self.mac.clone(),
        })
    }

    /// All addresses, `ip` first, then `ips`, deduplicated in order.
    pub fn all_ips(&self) -> Vec<IpAddr> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for raw in self.ip.iter().chain(self.ips.iter()) {
            if let Ok(ip) = raw.parse::<IpAddr>() {
                if seen.insert(ip) {
                    out.push(ip);
                }
            }
        }
        out
    }

    pub fn ipv4s(&self) -> Vec<Ipv4Addr> {
        self.all_ips()
            .into_iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .collect()
    }

    pub fn ipv6s(&self) -> Vec<Ipv6Addr> {
        self.all_ips()
            .into_iter()
            .filter_map(|ip| match ip {
                IpAddr::V6(v6) => Some(v6),
                IpAddr::V4(_) => None,
            })
            .collect()
    }

    pub fn has_ip(&self, ip: &IpAddr) -> bool {
        self.all_ips().contains(ip)
    }

    pub fn property_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.properties.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Interface index for row `i` of the interface table: the
    /// configured ifindex, else position + 1.
    pub fn ifindex(&self, i: usize) -> u32 {
        self.interfaces
            .get(i)
            .and_then(|ifc| ifc.ifindex)
            .unwrap_or(i as u32 + 1)
    }

    pub fn protocols_enabled(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.snmp_agent.as_ref().is_some_and(|c| c.enabled) {
            out.push("snmp");
        }
        if self.dhcp.as_ref().is_some_and(|c| c.enabled) {
            out.push("dhcp");
        }
        if self.dhcpv6.as_ref().is_some_and(|c| c.enabled) {
            out.push("dhcpv6");
        }
        if self.dns.as_ref().is_some_and(|c| c.enabled) {
            out.push("dns");
        }
        if self.lldp.as_ref().is_some_and(|c| c.enabled) {
            out.push("lldp");
        }
        if self.cdp.as_ref().is_some_and(|c| c.enabled) {
            out.push("cdp");
        }
        if self.edp.as_ref().is_some_and(|c| c.enabled) {
            out.push("edp");
        }
        if self.fdp.as_ref().is_some_and(|c| c.enabled) {
            out.push("fdp");
        }
        if self.stp.as_ref().is_some_and(|c| c.enabled) {
            out.push("stp");
        }
        if self.http.as_ref().is_some_and(|c| c.enabled) {
            out.push("http");
        }
        if self.ftp.as_ref().is_some_and(|c| c.enabled) {
            out.push("ftp");
        }
        if self.netbios.as_ref().is_some_and(|c| c.enabled) {
            out.push("netbios");
        }
        if self.icmp.as_ref().map(|c| c.enabled).unwrap_or(true) {
            out.push("icmp");
        }
        out
    }

    /// ICMP echo is on unless explicitly disabled.
    pub fn icmp_enabled(&self) -> bool {
        self.icmp.as_ref().map(|c| c.enabled).unwrap_or(true)
    }

    pub fn icmp_ttl(&self) -> u8 {
        self.icmp.as_ref().map(|c| c.ttl).unwrap_or(64)
    }

    pub fn icmpv6_enabled(&self) -> bool {
        self.icmpv6.as_ref().map(|c| c.enabled).unwrap_or(true)
    }

    pub fn icmpv6_hop_limit(&self) -> u8 {
        self.icmpv6.as_ref().map(|c| c.hop_limit).unwrap_or(64)
    }
}

// =============================================================================
// TOP LEVEL
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalDiscovery {
    #[serde(default)]
    pub lldp: Option<DiscoveryConfig>,
    #[serde(default)]
    pub cdp: Option<DiscoveryConfig>,
    #[serde(default)]
    pub edp: Option<DiscoveryConfig>,
    #[serde(default)]
    pub fdp: Option<DiscoveryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_queue")]
    pub send_queue_capacity: usize,
    /// Outbound rate limit in packets per second; absent = unlimited.
    #[serde(default)]
    pub rate_pps: Option<u32>,
}

impl EngineConfig {
    fn default_queue() -> usize {
        1000
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { send_queue_capacity: Self::default_queue(), rate_pps: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Base directory for walk-file paths.
    #[serde(default)]
    pub include_path: Option<String>,
    #[serde(default)]
    pub capture_playbacks: Vec<String>,
    #[serde(default)]
    pub discovery_protocols: GlobalDiscovery,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Config, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut ips: HashMap<IpAddr, String> = HashMap::new();

        for (i, device) in self.devices.iter().enumerate() {
            if device.name.trim().is_empty() {
                return Err(ConfigError::EmptyName(i));
            }
            if !names.insert(device.name.clone()) {
                return Err(ConfigError::DuplicateName(device.name.clone()));
            }
            device.mac_addr()?;

            let mut any_ip = false;
            for raw in device.ip.iter().chain(device.ips.iter()) {
                let ip: IpAddr = raw.parse().map_err(|_| ConfigError::BadIp {
                    device: device.name.clone(),
                    ip: raw.clone(),
                })?;
                any_ip = true;
                if let Some(first) = ips.insert(ip, device.name.clone()) {
                    if first != device.name {
                        return Err(ConfigError::DuplicateIp {
                            ip,
                            first,
                            second: device.name.clone(),
                        });
                    }
                }
            }
            if !any_ip {
                return Err(ConfigError::NoIp(device.name.clone()));
            }
        }
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Resolve a walk-file path against `include_path`.
    pub fn resolve_walk(&self, walk: &str) -> PathBuf {
        let p = Path::new(walk);
        if p.is_absolute() {
            return p.to_path_buf();
        }
        match &self.include_path {
            Some(base) => Path::new(base).join(p),
            None => p.to_path_buf(),
        }
    }

    /// Effective discovery config for one protocol on one device:
    /// device-level overrides global.
    pub fn discovery_for<'a>(
        &'a self,
        device: &'a Device,
        kind: crate::types::ProtocolKind,
    ) -> Option<&'a DiscoveryConfig> {
        use crate::types::ProtocolKind;
        let (dev, global) = match kind {
            ProtocolKind::Lldp => (&device.lldp, &self.discovery_protocols.lldp),
            ProtocolKind::Cdp => (&device.cdp, &self.discovery_protocols.cdp),
            ProtocolKind::Edp => (&device.edp, &self.discovery_protocols.edp),
            ProtocolKind::Fdp => (&device.fdp, &self.discovery_protocols.fdp),
            _ => return None,
        };
        dev.as_ref().or(global.as_ref()).filter(|c| c.enabled)
    }
}

/// Name-set difference between two configs, for hot reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub retained: Vec<String>,
}

pub fn diff(old: &Config, new: &Config) -> FleetDiff {
    let old_names: HashSet<&str> = old.devices.iter().map(|d| d.name.as_str()).collect();
    let new_names: HashSet<&str> = new.devices.iter().map(|d| d.name.as_str()).collect();

    let mut added: Vec<String> = new_names.difference(&old_names).map(|s| s.to_string()).collect();
    let mut removed: Vec<String> =
        old_names.difference(&new_names).map(|s| s.to_string()).collect();
    let mut retained: Vec<String> =
        new_names.intersection(&old_names).map(|s| s.to_string()).collect();
    added.sort();
    removed.sort();
    retained.sort();

    FleetDiff { added, removed, retained }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
devices:
  - name: core1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
    type: router
"#;

    #[test]
    fn test_minimal_parse() {
        let cfg = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.devices.len(), 1);
        assert_eq!(cfg.devices[0].device_type, DeviceType::Router);
        assert_eq!(cfg.devices[0].all_ips(), vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let text = r#"
devices:
  - { name: a, mac: "aa:bb:cc:00:00:01", ip: 10.0.0.1 }
  - { name: a, mac: "aa:bb:cc:00:00:02", ip: 10.0.0.2 }
"#;
        assert!(matches!(Config::from_yaml(text), Err(ConfigError::DuplicateName(_))));
    }

    #[test]
    fn test_duplicate_ip_rejected() {
        let text = r#"
devices:
  - { name: a, mac: "aa:bb:cc:00:00:01", ip: 10.0.0.1 }
  - { name: b, mac: "aa:bb:cc:00:00:02", ip: 10.0.0.1 }
"#;
        assert!(matches!(Config::from_yaml(text), Err(ConfigError::DuplicateIp { .. })));
    }

    #[test]
    fn test_missing_ip_rejected() {
        let text = r#"
devices:
  - { name: a, mac: "aa:bb:cc:00:00:01" }
"#;
        assert!(matches!(Config::from_yaml(text), Err(ConfigError::NoIp(_))));
    }

    #[test]
    fn test_bad_mac_rejected() {
        let text = r#"
devices:
  - { name: a, mac: "zz:bb:cc:00:00:01", ip: 10.0.0.1 }
"#;
        assert!(matches!(Config::from_yaml(text), Err(ConfigError::BadMac { .. })));
    }

    #[test]
    fn test_diff() {
        let old = Config::from_yaml(MINIMAL).unwrap();
        let new = Config::from_yaml(
            r#"
devices:
  - { name: core2, mac: "aa:bb:cc:00:00:02", ip: 10.0.0.2 }
"#,
        )
        .unwrap();
        let d = diff(&old, &new);
        assert_eq!(d.added, vec!["core2"]);
        assert_eq!(d.removed, vec!["core1"]);
        assert!(d.retained.is_empty());
    }

    #[test]
    fn test_dual_stack_and_ips_list() {
        let text = r#"
devices:
  - name: srv1
    mac: "aa:bb:cc:00:00:03"
    ips: ["192.168.1.5", "2001:db8::5"]
    type: server
"#;
        let cfg = Config::from_yaml(text).unwrap();
        assert_eq!(cfg.devices[0].ipv4s().len(), 1);
        assert_eq!(cfg.devices[0].ipv6s().len(), 1);
    }

    #[test]
    fn test_walk_path_resolution() {
        let mut cfg = Config::default();
        cfg.include_path = Some("/opt/walks".into());
        assert_eq!(cfg.resolve_walk("rtr.walk"), PathBuf::from("/opt/walks/rtr.walk"));
        assert_eq!(cfg.resolve_walk("/abs/rtr.walk"), PathBuf::from("/abs/rtr.walk"));
    }
}
