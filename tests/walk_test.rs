//! Walk-file parser tests
//!
//! Run with: cargo test --test walk_test

use niac::snmp::{Mib, OidValue};
use niac::snmp::walk;

// =============================================================================
// GRAMMAR
// =============================================================================

#[test]
fn test_comments_and_blanks_skipped_silently() {
    let entries = walk::parse("# header comment\n\n   \n# another\n");
    assert!(entries.is_empty());
}

#[test]
fn test_leading_dot_normalized() {
    let entries = walk::parse(".1.3.6.1.2.1.1.5.0 = STRING: \"rtr1\"\n");
    assert_eq!(entries[0].oid, "1.3.6.1.2.1.1.5.0");
}

#[test]
fn test_timeticks_both_forms() {
    let entries = walk::parse(
        "1.3.6.1.2.1.1.3.0 = Timeticks: (12345)\n\
         1.3.6.1.2.1.1.3.1 = Timeticks: 678\n\
         1.3.6.1.2.1.1.3.2 = Timeticks: (900) 0:00:09.00\n",
    );
    assert_eq!(entries[0].value, OidValue::TimeTicks(12345));
    assert_eq!(entries[1].value, OidValue::TimeTicks(678));
    assert_eq!(entries[2].value, OidValue::TimeTicks(900));
}

#[test]
fn test_hex_string_strips_spaces_and_prefix() {
    let entries = walk::parse("1.3.6.1 = Hex-STRING: 0xAB CD EF\n");
    assert_eq!(entries[0].value, OidValue::OctetString(vec![0xab, 0xcd, 0xef]));
}

#[test]
fn test_string_quotes_stripped() {
    let entries = walk::parse("1.3.6.1 = STRING: \"hello world\"\n");
    assert_eq!(entries[0].value, OidValue::string("hello world"));
}

#[test]
fn test_unknown_type_becomes_octet_string() {
    let entries = walk::parse("1.3.6.1 = FANCY: whatever\n");
    assert_eq!(entries[0].value, OidValue::string("whatever"));
}

#[test]
fn test_malformed_lines_do_not_abort() {
    let entries = walk::parse(
        "garbage line\n\
         1.3.6.1.2.1.1.7.0 = INTEGER: 72\n\
         also garbage = \n\
         1.3.6.1.2.1.1.5.0 = STRING: \"ok\"\n",
    );
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].value, OidValue::Integer(72));
    assert_eq!(entries[1].value, OidValue::string("ok"));
}

// =============================================================================
// ROUND TRIP
// =============================================================================

#[test]
fn test_parse_export_parse_is_stable() {
    let text = "\
1.3.6.1.2.1.1.1.0 = STRING: \"edge router\"
1.3.6.1.2.1.1.2.0 = OID: 1.3.6.1.4.1.9.1.1
1.3.6.1.2.1.1.3.0 = Timeticks: (424242)
1.3.6.1.2.1.1.7.0 = INTEGER: 72
1.3.6.1.2.1.2.2.1.10.1 = Counter32: 1000
1.3.6.1.2.1.2.2.1.5.1 = Gauge32: 100000000
1.3.6.1.2.1.31.1.1.1.6.1 = Counter64: 18446744073709551615
1.3.6.1.2.1.4.20.1.1 = IpAddress: 10.0.0.1
";
    let first = walk::parse(text);
    assert_eq!(first.len(), 8);

    let mib = Mib::new();
    walk::load_into(&mib, &first);
    let exported = walk::export(&mib);
    let second = walk::parse(&exported);

    // Same (oid, value) multiset; export is sorted so compare sorted
    let mut a = first.clone();
    a.sort_by(|x, y| niac::snmp::oid_cmp(&x.oid, &y.oid));
    assert_eq!(a, second);
}

#[test]
fn test_walk_overwrites_on_load() {
    let mib = Mib::new();
    mib.set("1.3.6.1.2.1.1.5.0", OidValue::string("seeded"));
    let entries = walk::parse("1.3.6.1.2.1.1.5.0 = STRING: \"from walk\"\n");
    walk::load_into(&mib, &entries);
    assert_eq!(mib.get("1.3.6.1.2.1.1.5.0"), Some(OidValue::string("from walk")));
}
