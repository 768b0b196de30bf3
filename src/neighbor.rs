//! Neighbor cache: L2/L3 peers learned from ARP, NDP and discovery frames.

use pnet::util::MacAddr;
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use crate::types::now;

/// Entries older than this are dropped on the next read or learn.
pub const NEIGHBOR_TTL_SECS: u64 = 300;

/// Cache size bound. Oldest entries are evicted past this.
pub const MAX_NEIGHBORS: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct NeighborRecord {
    pub ip: IpAddr,
    pub mac: String,
    /// Peer-advertised name (LLDP system name, CDP device id) when known.
    pub device_name: Option<String>,
    pub last_seen: u64,
}

/// IP-keyed neighbor directory with TTL expiry and a hard size bound.
#[derive(Default)]
pub struct NeighborCache {
    entries: RwLock<HashMap<IpAddr, NeighborRecord>>,
}

impl NeighborCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Learn or refresh a neighbor. A `None` name keeps any previously
    /// learned name.
    pub fn learn(&self, ip: IpAddr, mac: MacAddr, device_name: Option<&str>) {
        let mut entries = self.entries.write().unwrap();
        let ts = now();

        let name = device_name.map(|s| s.to_string()).or_else(|| {
            entries.get(&ip).and_then(|r| r.device_name.clone())
        });
        entries.insert(
            ip,
            NeighborRecord { ip, mac: mac.to_string(), device_name: name, last_seen: ts },
        );

        Self::expire_locked(&mut entries, ts);
        if entries.len() > MAX_NEIGHBORS {
            // Evict oldest past the bound
            let mut by_age: Vec<(IpAddr, u64)> =
                entries.iter().map(|(ip, r)| (*ip, r.last_seen)).collect();
            by_age.sort_by_key(|(_, seen)| *seen);
            for (ip, _) in by_age.iter().take(entries.len() - MAX_NEIGHBORS) {
                entries.remove(ip);
            }
        }
    }

    pub fn lookup(&self, ip: &IpAddr) -> Option<NeighborRecord> {
        let entries = self.entries.read().unwrap();
        entries
            .get(ip)
            .filter(|r| now().saturating_sub(r.last_seen) <= NEIGHBOR_TTL_SECS)
            .cloned()
    }

    /// Snapshot of live entries, sorted by IP for stable output.
    pub fn snapshot(&self) -> Vec<NeighborRecord> {
        let mut entries = self.entries.write().unwrap();
        Self::expire_locked(&mut entries, now());
        let mut out: Vec<NeighborRecord> = entries.values().cloned().collect();
        out.sort_by_key(|r| r.ip);
        out
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    fn expire_locked(entries: &mut HashMap<IpAddr, NeighborRecord>, ts: u64) {
        entries.retain(|_, r| ts.saturating_sub(r.last_seen) <= NEIGHBOR_TTL_SECS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_learn_and_lookup() {
        let cache = NeighborCache::new();
        let ip: IpAddr = "192.168.1.10".parse().unwrap();
        cache.learn(ip, mac("aa:bb:cc:dd:ee:ff"), Some("sw1"));

        let rec = cache.lookup(&ip).unwrap();
        assert_eq!(rec.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(rec.device_name.as_deref(), Some("sw1"));
    }

    #[test]
    fn test_relearn_keeps_name() {
        let cache = NeighborCache::new();
        let ip: IpAddr = "192.168.1.10".parse().unwrap();
        cache.learn(ip, mac("aa:bb:cc:dd:ee:ff"), Some("sw1"));
        cache.learn(ip, mac("aa:bb:cc:dd:ee:01"), None);

        let rec = cache.lookup(&ip).unwrap();
        assert_eq!(rec.mac, "aa:bb:cc:dd:ee:01");
        assert_eq!(rec.device_name.as_deref(), Some("sw1"));
    }

    #[test]
    fn test_snapshot_sorted() {
        let cache = NeighborCache::new();
        cache.learn("10.0.0.2".parse().unwrap(), mac("aa:bb:cc:00:00:02"), None);
        cache.learn("10.0.0.1".parse().unwrap(), mac("aa:bb:cc:00:00:01"), None);

        let snap = cache.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap[0].ip < snap[1].ip);
    }
}
