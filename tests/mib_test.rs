//! MIB ordering and SNMP agent tests
//!
//! Run with: cargo test --test mib_test

use niac::config::{Config, SnmpAgentConfig};
use niac::inject::{ErrorKind, ErrorStateManager};
use niac::snmp::{
    AgentReply, Mib, OidValue, Pdu, PduType, SnmpAgent, SnmpMessage, VarBind, VarValue,
    VERSION_2C, oid_cmp,
};
use std::sync::Arc;

// =============================================================================
// MIB ORDERING
// =============================================================================

#[test]
fn test_getnext_chain_and_end_of_view() {
    let mib = Mib::new();
    mib.set("1.3.6.1.2.1.1.1.0", OidValue::string("Cisco IOS"));
    mib.set("1.3.6.1.2.1.1.5.0", OidValue::string("rtr1"));

    let (oid, value) = mib.get_next("1.3.6.1.2.1.1.1.0").unwrap();
    assert_eq!(oid, "1.3.6.1.2.1.1.5.0");
    assert_eq!(value, OidValue::string("rtr1"));

    assert!(mib.get_next("1.3.6.1.2.1.1.5.0").is_none());
}

#[test]
fn test_numeric_component_boundary() {
    // String order would put "10" before "2"
    assert_eq!(
        oid_cmp("1.3.6.1.2.1.1.10.0", "1.3.6.1.2.1.1.2.0"),
        std::cmp::Ordering::Greater
    );
}

#[test]
fn test_every_oid_has_getnext_predecessor() {
    // Invariant: walking successors visits exactly the sorted OIDs
    let mib = Mib::new();
    let oids = [
        "1.3.6.1.2.1.1.1.0",
        "1.3.6.1.2.1.1.2.0",
        "1.3.6.1.2.1.1.10.0",
        "1.3.6.1.2.1.2.2.1.14.1",
        "1.3.6.1.2.1.2.2.1.2.10",
    ];
    for oid in oids {
        mib.set(oid, OidValue::Integer(1));
    }

    let sorted = mib.all_oids();
    for pair in sorted.windows(2) {
        assert_ne!(oid_cmp(&pair[0], &pair[1]), std::cmp::Ordering::Greater);
        let (next, _) = mib.get_next(&pair[0]).unwrap();
        assert_eq!(next, pair[1]);
    }
}

#[test]
fn test_mutation_invalidates_sort() {
    let mib = Mib::new();
    mib.set("1.3.6.1.2.1.1.5.0", OidValue::Null);
    assert_eq!(mib.all_oids().len(), 1);

    mib.set("1.3.6.1.2.1.1.1.0", OidValue::Null);
    let oids = mib.all_oids();
    assert_eq!(oids[0], "1.3.6.1.2.1.1.1.0");

    mib.remove("1.3.6.1.2.1.1.1.0");
    assert_eq!(mib.all_oids(), vec!["1.3.6.1.2.1.1.5.0".to_string()]);
}

// =============================================================================
// AGENT
// =============================================================================

fn build_agent(yaml: &str) -> (SnmpAgent, Arc<ErrorStateManager>) {
    let config = Config::from_yaml(yaml).unwrap();
    let errors = Arc::new(ErrorStateManager::new());
    let agent_cfg = config.devices[0]
        .snmp_agent
        .clone()
        .unwrap_or(SnmpAgentConfig { enabled: true, community: "public".into(), walk_file: None });
    let agent = SnmpAgent::new(&config.devices[0], &agent_cfg, None, errors.clone());
    (agent, errors)
}

const DEVICE: &str = r#"
devices:
  - name: rtr1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
    type: router
    snmp_agent: { community: public }
"#;

#[test]
fn test_sysname_defaults_to_device_name() {
    let (agent, _) = build_agent(DEVICE);
    assert_eq!(agent.mib().get("1.3.6.1.2.1.1.5.0"), Some(OidValue::string("rtr1")));
}

#[test]
fn test_sysname_property_override() {
    let (agent, _) = build_agent(
        r#"
devices:
  - name: rtr1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
    snmp_agent: { community: public }
    properties: { sysName: backbone-1 }
"#,
    );
    assert_eq!(
        agent.mib().get("1.3.6.1.2.1.1.5.0"),
        Some(OidValue::string("backbone-1"))
    );
}

#[test]
fn test_sysuptime_is_dynamic_ticks() {
    let (agent, _) = build_agent(DEVICE);
    let first = agent.mib().get("1.3.6.1.2.1.1.3.0");
    assert!(matches!(first, Some(OidValue::TimeTicks(_))));

    std::thread::sleep(std::time::Duration::from_millis(30));
    let Some(OidValue::TimeTicks(a)) = first else { unreachable!() };
    let Some(OidValue::TimeTicks(b)) = agent.mib().get("1.3.6.1.2.1.1.3.0") else {
        panic!("sysUpTime vanished")
    };
    assert!(b > a, "uptime should advance: {a} -> {b}");
}

#[test]
fn test_getbulk_honors_max_repetitions() {
    let (agent, _) = build_agent(DEVICE);
    let msg = SnmpMessage {
        version: VERSION_2C,
        community: b"public".to_vec(),
        pdu: Pdu {
            pdu_type: PduType::GetBulk,
            request_id: 1,
            error_status: 0, // non-repeaters
            error_index: 3,  // max-repetitions
            bindings: vec![VarBind::null("1.3.6.1.2.1.1")],
        },
    };
    let AgentReply::Response(resp) = agent.handle(&msg) else { panic!("expected response") };
    assert_eq!(resp.pdu.bindings.len(), 3);
    assert!(resp.pdu.bindings.iter().all(|b| matches!(b.value, VarValue::Value(_))));
}

#[test]
fn test_error_injection_drives_counter_oid() {
    let (agent, errors) = build_agent(DEVICE);
    let ip = "10.0.0.1".parse().unwrap();

    let oid = "1.3.6.1.2.1.2.2.1.14.1"; // ifInErrors.1, default eth0
    assert_eq!(agent.mib().get(oid), Some(OidValue::Counter32(0)));

    errors.set(ip, "eth0", ErrorKind::Fcs, 50);
    let Some(OidValue::Counter32(value)) = agent.mib().get(oid) else {
        panic!("expected counter")
    };
    assert!(value >= 50);

    errors.clear(ip, "eth0");
    assert_eq!(agent.mib().get(oid), Some(OidValue::Counter32(0)));
}
