//! Walk-file parsing: `[.]OID = TYPE: VALUE` lines into typed MIB entries.
//!
//! The format matches what `snmpwalk -On` produces after light cleanup.
//! Malformed lines warn and are skipped; parsing never fails as a whole.

use std::net::Ipv4Addr;
use std::path::Path;
use tracing::warn;

use super::mib::Mib;
use super::value::{OidValue, normalize_oid, oid_components};

/// One parsed walk line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub oid: String,
    pub value: OidValue,
}

/// Parse walk-file text. Blank lines and `#` comments are skipped
/// silently; anything else that does not match the grammar warns.
pub fn parse(text: &str) -> Vec<WalkEntry> {
    let mut entries = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Some(entry) => entries.push(entry),
            None => warn!("walk line {} malformed, skipping: {}", lineno + 1, line),
        }
    }

    entries
}

/// Parse a walk file from disk.
pub fn parse_file(path: &Path) -> std::io::Result<Vec<WalkEntry>> {
    Ok(parse(&std::fs::read_to_string(path)?))
}

/// Load parsed entries into a MIB, overwriting existing OIDs.
pub fn load_into(mib: &Mib, entries: &[WalkEntry]) {
    for entry in entries {
        mib.set(&entry.oid, entry.value.clone());
    }
}

/// Export a MIB back to walk format. Dynamic entries export their
/// current value.
pub fn export(mib: &Mib) -> String {
    let mut out = String::new();
    for oid in mib.all_oids() {
        if let Some(value) = mib.get(&oid) {
            out.push_str(&format!("{} = {}: {}\n", oid, value.type_name(), value.render()));
        }
    }
    out
}

fn parse_line(line: &str) -> Option<WalkEntry> {
    let (oid_part, rest) = line.split_once('=')?;
    let oid = normalize_oid(oid_part.trim());
    oid_components(oid)?;

    let rest = rest.trim();
    let value = match rest.split_once(':') {
        Some((type_part, value_part)) => parse_value(type_part.trim(), value_part.trim())?,
        // `OID = ""` style lines from some walk dumps
        None => OidValue::OctetString(strip_quotes(rest).as_bytes().to_vec()),
    };

    Some(WalkEntry { oid: oid.to_string(), value })
}

fn parse_value(type_kw: &str, raw: &str) -> Option<OidValue> {
    match type_kw.to_ascii_uppercase().as_str() {
        "STRING" | "OCTET STRING" => {
            Some(OidValue::OctetString(strip_quotes(raw).as_bytes().to_vec()))
        }
        "INTEGER" | "INTEGER32" => Some(OidValue::Integer(parse_int(raw)?)),
        "GAUGE32" | "GAUGE" | "UNSIGNED32" => Some(OidValue::Gauge32(parse_int(raw)? as u32)),
        "COUNTER32" | "COUNTER" => Some(OidValue::Counter32(parse_int(raw)? as u32)),
        "COUNTER64" => Some(OidValue::Counter64(parse_u64(raw)?)),
        "TIMETICKS" => Some(OidValue::TimeTicks(parse_timeticks(raw)?)),
        "OID" | "OBJECT IDENTIFIER" => {
            let oid = normalize_oid(raw.trim());
            oid_components(oid)?;
            Some(OidValue::ObjectIdentifier(oid.to_string()))
        }
        "IPADDRESS" | "IP ADDRESS" | "NETWORK ADDRESS" => {
            raw.trim().parse::<Ipv4Addr>().ok().map(OidValue::IpAddress)
        }
        "NULL" => Some(OidValue::Null),
        "HEX-STRING" | "HEX STRING" => {
            let cleaned: String = raw
                .trim()
                .trim_start_matches("0x")
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            hex::decode(&cleaned).ok().map(OidValue::OctetString)
        }
        "OPAQUE" => {
            let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            hex::decode(&cleaned).ok().map(OidValue::Opaque)
        }
        // Unknown type keywords degrade to an octet string of the raw value
        _ => Some(OidValue::OctetString(strip_quotes(raw).as_bytes().to_vec())),
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    // Walk dumps sometimes annotate integers: `up(1)`, `1 seconds`
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    if let (Some(open), Some(close)) = (raw.find('('), raw.find(')')) {
        if open < close {
            return raw[open + 1..close].trim().parse::<i64>().ok();
        }
    }
    raw.split_whitespace().next()?.parse::<i64>().ok()
}

/// Counter64 exceeds i64 range, so it gets its own path.
fn parse_u64(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    raw.split_whitespace().next()?.parse::<u64>().ok()
}

/// Accepts `(12345)`, `12345`, and the verbose
/// `(12345) 0:02:03.45` net-snmp rendering.
fn parse_timeticks(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('(') {
        let close = rest.find(')')?;
        return rest[..close].trim().parse::<u32>().ok();
    }
    raw.split_whitespace().next()?.parse::<u32>().ok()
}

fn strip_quotes(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}
