//! Error-injection state tests
//!
//! Run with: cargo test --test inject_test

use niac::inject::{ErrorKind, ErrorStateManager};
use std::net::IpAddr;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[test]
fn test_set_visible_in_all_states() {
    let mgr = ErrorStateManager::new();
    mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::Fcs, 50);

    let states = mgr.all_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].device_ip, ip("10.0.0.1"));
    assert_eq!(states[0].interface, "eth0");
    assert_eq!(states[0].kind, ErrorKind::Fcs);
    assert_eq!(states[0].value, 50);
}

#[test]
fn test_clear_removes_from_all_states() {
    let mgr = ErrorStateManager::new();
    mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::Fcs, 50);
    mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::HighCpu, 80);

    mgr.clear(ip("10.0.0.1"), "eth0");
    assert!(mgr.all_states().is_empty());
}

#[test]
fn test_clear_all_leaves_empty() {
    let mgr = ErrorStateManager::new();
    for (i, kind) in ErrorKind::ALL.iter().enumerate() {
        mgr.set(ip(&format!("10.0.0.{}", i + 1)), "eth0", *kind, 10);
    }
    assert_eq!(mgr.len(), ErrorKind::ALL.len());

    mgr.clear_all();
    assert!(mgr.all_states().is_empty());
}

#[test]
fn test_set_zero_equals_absence() {
    let mgr = ErrorStateManager::new();
    mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::OutputDiscards, 30);
    mgr.set(ip("10.0.0.1"), "eth0", ErrorKind::OutputDiscards, 0);
    assert_eq!(mgr.get(ip("10.0.0.1"), "eth0", ErrorKind::OutputDiscards), None);
    assert!(mgr.all_states().is_empty());
}

#[test]
fn test_labels_round_trip() {
    for kind in ErrorKind::ALL {
        assert_eq!(ErrorKind::parse(kind.label()), Some(kind));
    }
    assert_eq!(ErrorKind::parse("High CPU"), Some(ErrorKind::HighCpu));
    assert!(ErrorKind::parse("high cpu").is_none()); // labels are exact
}

#[test]
fn test_serde_uses_canonical_labels() {
    let json = serde_json::to_string(&ErrorKind::Fcs).unwrap();
    assert_eq!(json, "\"FCS Errors\"");

    let parsed: ErrorKind = serde_json::from_str("\"High Memory\"").unwrap();
    assert_eq!(parsed, ErrorKind::HighMemory);

    assert!(serde_json::from_str::<ErrorKind>("\"Made Up\"").is_err());
}

#[test]
fn test_concurrent_writers() {
    use std::sync::Arc;

    let mgr = Arc::new(ErrorStateManager::new());
    let mut handles = Vec::new();
    for t in 0..8 {
        let mgr = mgr.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..100 {
                mgr.set(ip(&format!("10.0.{t}.{}", i % 10 + 1)), "eth0", ErrorKind::InputErrors, 5);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    // 8 threads × 10 distinct IPs
    assert_eq!(mgr.len(), 80);
}
