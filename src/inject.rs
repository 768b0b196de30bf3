//! Error-injection state: (device IP, interface, kind) → magnitude.
//!
//! Protocol handlers consult this map at read time; the SNMP agent's
//! dynamic counter OIDs are the main consumer. A magnitude of zero is
//! equivalent to the entry being absent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

/// Closed set of injectable error conditions.
///
/// The API boundary accepts only the canonical labels below; unknown
/// labels are rejected there with a 400, never guessed from substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Fcs,
    InputErrors,
    OutputErrors,
    InputDiscards,
    OutputDiscards,
    HighUtilization,
    HighCpu,
    HighMemory,
    HighDisk,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::Fcs,
        ErrorKind::InputErrors,
        ErrorKind::OutputErrors,
        ErrorKind::InputDiscards,
        ErrorKind::OutputDiscards,
        ErrorKind::HighUtilization,
        ErrorKind::HighCpu,
        ErrorKind::HighMemory,
        ErrorKind::HighDisk,
    ];

    /// Canonical label used on the wire (API requests and responses).
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Fcs => "FCS Errors",
            ErrorKind::InputErrors => "Input Errors",
            ErrorKind::OutputErrors => "Output Errors",
            ErrorKind::InputDiscards => "Input Discards",
            ErrorKind::OutputDiscards => "Output Discards",
            ErrorKind::HighUtilization => "High Utilization",
            ErrorKind::HighCpu => "High CPU",
            ErrorKind::HighMemory => "High Memory",
            ErrorKind::HighDisk => "High Disk",
        }
    }

    pub fn parse(s: &str) -> Option<ErrorKind> {
        Self::ALL.iter().copied().find(|k| k.label() == s)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ErrorKind::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error type: {s}")))
    }
}

/// One active injection, as reported by `all_states`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorState {
    pub device_ip: IpAddr,
    pub interface: String,
    #[serde(rename = "error_type")]
    pub kind: ErrorKind,
    pub value: u8,
}

type Key = (IpAddr, String, ErrorKind);

/// Concurrent injection map shared between the control plane and the
/// protocol handlers. Writers are serialized; readers see a consistent
/// snapshot.
#[derive(Default)]
pub struct ErrorStateManager {
    states: RwLock<HashMap<Key, u8>>,
}

impl ErrorStateManager {
    pub fn new() -> Self {
        Self { states: RwLock::new(HashMap::new()) }
    }

    /// Set a magnitude in 0..=100. Zero removes the entry.
    pub fn set(&self, device_ip: IpAddr, interface: &str, kind: ErrorKind, value: u8) {
        let value = value.min(100);
        let mut states = self.states.write().unwrap();
        if value == 0 {
            states.remove(&(device_ip, interface.to_string(), kind));
        } else {
            states.insert((device_ip, interface.to_string(), kind), value);
        }
    }

    pub fn get(&self, device_ip: IpAddr, interface: &str, kind: ErrorKind) -> Option<u8> {
        self.states
            .read()
            .unwrap()
            .get(&(device_ip, interface.to_string(), kind))
            .copied()
    }

    /// Remove all injections for one (device, interface) pair.
    pub fn clear(&self, device_ip: IpAddr, interface: &str) {
        self.states
            .write()
            .unwrap()
            .retain(|(ip, ifname, _), _| *ip != device_ip || ifname != interface);
    }

    pub fn clear_all(&self) {
        self.states.write().unwrap().clear();
    }

    pub fn all_states(&self) -> Vec<ErrorState> {
        let mut out: Vec<ErrorState> = self
            .states
            .read()
            .unwrap()
            .iter()
            .map(|((ip, ifname, kind), value)| ErrorState {
                device_ip: *ip,
                interface: ifname.clone(),
                kind: *kind,
                value: *value,
            })
            .collect();
        out.sort_by(|a, b| {
            (a.device_ip, &a.interface, a.kind.label())
                .cmp(&(b.device_ip, &b.interface, b.kind.label()))
        });
        out
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_set_get_clear() {
        let mgr = ErrorStateManager::new();
        mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::Fcs, 50);
        assert_eq!(mgr.get(ip("10.0.0.1"), "eth0", ErrorKind::Fcs), Some(50));

        mgr.clear(ip("10.0.0.1"), "eth0");
        assert_eq!(mgr.get(ip("10.0.0.1"), "eth0", ErrorKind::Fcs), None);
    }

    #[test]
    fn test_zero_value_is_absence() {
        let mgr = ErrorStateManager::new();
        mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::HighCpu, 80);
        mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::HighCpu, 0);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_clear_scoped_to_interface() {
        let mgr = ErrorStateManager::new();
        mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::Fcs, 10);
        mgr.set(ip("10.0.0.1"), "eth1", ErrorKind::Fcs, 20);
        mgr.clear(ip("10.0.0.1"), "eth0");
        assert_eq!(mgr.get(ip("10.0.0.1"), "eth1", ErrorKind::Fcs), Some(20));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_value_clamped_to_100() {
        let mgr = ErrorStateManager::new();
        mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::HighDisk, 250);
        assert_eq!(mgr.get(ip("10.0.0.1"), "eth0", ErrorKind::HighDisk), Some(100));
    }

    #[test]
    fn test_unknown_label_rejected() {
        assert!(ErrorKind::parse("Weird Errors").is_none());
        assert_eq!(ErrorKind::parse("FCS Errors"), Some(ErrorKind::Fcs));
    }
}
