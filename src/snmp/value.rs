//! Typed OID values and OID ordering helpers.

use std::cmp::Ordering;
use std::net::Ipv4Addr;

/// Tagged value over the ASN.1 primitive types an SNMPv1/v2c agent serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidValue {
    OctetString(Vec<u8>),
    Integer(i64),
    Gauge32(u32),
    Counter32(u32),
    Counter64(u64),
    TimeTicks(u32),
    ObjectIdentifier(String),
    IpAddress(Ipv4Addr),
    Null,
    Opaque(Vec<u8>),
}

impl OidValue {
    pub fn string(s: &str) -> Self {
        OidValue::OctetString(s.as_bytes().to_vec())
    }

    /// Walk-file type keyword for this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            OidValue::OctetString(_) => "STRING",
            OidValue::Integer(_) => "INTEGER",
            OidValue::Gauge32(_) => "Gauge32",
            OidValue::Counter32(_) => "Counter32",
            OidValue::Counter64(_) => "Counter64",
            OidValue::TimeTicks(_) => "Timeticks",
            OidValue::ObjectIdentifier(_) => "OID",
            OidValue::IpAddress(_) => "IpAddress",
            OidValue::Null => "NULL",
            OidValue::Opaque(_) => "Opaque",
        }
    }

    /// Human-readable rendering, used by the walk exporter and debug logs.
    pub fn render(&self) -> String {
        match self {
            OidValue::OctetString(b) => match std::str::from_utf8(b) {
                Ok(s) => format!("\"{s}\""),
                Err(_) => hex::encode(b),
            },
            OidValue::Integer(v) => v.to_string(),
            OidValue::Gauge32(v) => v.to_string(),
            OidValue::Counter32(v) => v.to_string(),
            OidValue::Counter64(v) => v.to_string(),
            OidValue::TimeTicks(v) => format!("({v})"),
            OidValue::ObjectIdentifier(s) => s.clone(),
            OidValue::IpAddress(a) => a.to_string(),
            OidValue::Null => String::new(),
            OidValue::Opaque(b) => hex::encode(b),
        }
    }
}

/// Produces a value on every read. Implementations must be cheap and
/// side-effect free: they run under the MIB read lock.
pub trait OidProducer: Send + Sync {
    fn produce(&self) -> OidValue;
}

impl<F> OidProducer for F
where
    F: Fn() -> OidValue + Send + Sync,
{
    fn produce(&self) -> OidValue {
        self()
    }
}

/// Strip the optional leading dot: `.1.3.6` and `1.3.6` are the same OID.
pub fn normalize_oid(oid: &str) -> &str {
    oid.strip_prefix('.').unwrap_or(oid)
}

/// Parse an OID string into numeric components. Returns `None` for
/// anything that is not a dotted sequence of non-negative integers.
pub fn oid_components(oid: &str) -> Option<Vec<u64>> {
    let oid = normalize_oid(oid);
    if oid.is_empty() {
        return Some(Vec::new());
    }
    oid.split('.').map(|part| part.parse::<u64>().ok()).collect()
}

/// Numeric-component ordering: `1.3.6.1.2.1.1.10.0` sorts after
/// `1.3.6.1.2.1.1.2.0`, unlike plain string order. OIDs that fail to
/// parse sort after all valid ones, by string, so the order is total.
pub fn oid_cmp(a: &str, b: &str) -> Ordering {
    match (oid_components(a), oid_components(b)) {
        (Some(ca), Some(cb)) => ca.cmp(&cb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_component_order() {
        // 10 > 2 numerically even though "1" < "2" as strings
        assert_eq!(oid_cmp("1.3.6.1.2.1.1.10.0", "1.3.6.1.2.1.1.2.0"), Ordering::Greater);
        assert_eq!(oid_cmp("1.3.6.1.2.1.1.2.0", "1.3.6.1.2.1.1.10.0"), Ordering::Less);
        assert_eq!(oid_cmp("1.3.6", "1.3.6"), Ordering::Equal);
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert_eq!(oid_cmp("1.3.6", "1.3.6.1"), Ordering::Less);
    }

    #[test]
    fn test_leading_dot_ignored() {
        assert_eq!(oid_cmp(".1.3.6.1", "1.3.6.1"), Ordering::Equal);
    }

    #[test]
    fn test_render_string_quoted() {
        assert_eq!(OidValue::string("rtr1").render(), "\"rtr1\"");
        assert_eq!(OidValue::TimeTicks(12345).render(), "(12345)");
    }
}
