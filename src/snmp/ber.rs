//! Minimal ASN.1 BER codec for SNMPv1/v2c messages.
//!
//! Covers exactly what the agent and trap sender need: definite-length
//! TLVs, the universal primitives, the SNMP application tags, and the
//! v2c exception values. Indefinite lengths and constructed strings are
//! rejected.

use std::net::Ipv4Addr;
use thiserror::Error;

use super::value::{OidValue, normalize_oid, oid_components};

#[derive(Debug, Error)]
pub enum BerError {
    #[error("truncated message")]
    Truncated,
    #[error("unsupported length encoding")]
    BadLength,
    #[error("unexpected tag {0:#04x}")]
    UnexpectedTag(u8),
    #[error("invalid OID encoding")]
    BadOid,
    #[error("integer out of range")]
    IntRange,
}

// Universal tags
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;

// SNMP application tags
const TAG_IPADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;

// v2c varbind exceptions (context class)
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

/// SNMP protocol versions on the wire.
pub const VERSION_1: i64 = 0;
pub const VERSION_2C: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduType {
    Get = 0xa0,
    GetNext = 0xa1,
    Response = 0xa2,
    Set = 0xa3,
    GetBulk = 0xa5,
    Inform = 0xa6,
    TrapV2 = 0xa7,
}

impl PduType {
    fn from_tag(tag: u8) -> Option<PduType> {
        match tag {
            0xa0 => Some(PduType::Get),
            0xa1 => Some(PduType::GetNext),
            0xa2 => Some(PduType::Response),
            0xa3 => Some(PduType::Set),
            0xa5 => Some(PduType::GetBulk),
            0xa6 => Some(PduType::Inform),
            0xa7 => Some(PduType::TrapV2),
            _ => None,
        }
    }
}

/// A varbind value: a concrete value or a v2c exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarValue {
    Value(OidValue),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: String,
    pub value: VarValue,
}

impl VarBind {
    pub fn new(oid: &str, value: OidValue) -> Self {
        Self { oid: normalize_oid(oid).to_string(), value: VarValue::Value(value) }
    }

    pub fn null(oid: &str) -> Self {
        Self::new(oid, OidValue::Null)
    }
}

/// An SNMP PDU. For GETBULK, `error_status` carries non-repeaters and
/// `error_index` carries max-repetitions, per RFC 3416's field reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i64,
    pub error_status: i64,
    pub error_index: i64,
    pub bindings: Vec<VarBind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpMessage {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

// =============================================================================
// DECODING
// =============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self) -> Result<u8, BerError> {
        let b = *self.buf.get(self.pos).ok_or(BerError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    /// Read one TLV, returning the tag and content slice.
    fn tlv(&mut self) -> Result<(u8, &'a [u8]), BerError> {
        let tag = self.byte()?;
        let first = self.byte()?;
        let len = if first & 0x80 == 0 {
            first as usize
        } else {
            let n = (first & 0x7f) as usize;
            if n == 0 || n > 4 {
                return Err(BerError::BadLength);
            }
            let mut len = 0usize;
            for _ in 0..n {
                len = (len << 8) | self.byte()? as usize;
            }
            len
        };
        let end = self.pos.checked_add(len).ok_or(BerError::Truncated)?;
        if end > self.buf.len() {
            return Err(BerError::Truncated);
        }
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    fn expect(&mut self, want: u8) -> Result<&'a [u8], BerError> {
        let (tag, content) = self.tlv()?;
        if tag != want {
            return Err(BerError::UnexpectedTag(tag));
        }
        Ok(content)
    }
}

fn decode_int(content: &[u8]) -> Result<i64, BerError> {
    if content.is_empty() || content.len() > 8 {
        return Err(BerError::IntRange);
    }
    let mut v: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in content {
        v = (v << 8) | b as i64;
    }
    Ok(v)
}

fn decode_uint(content: &[u8]) -> Result<u64, BerError> {
    if content.len() > 9 || (content.len() == 9 && content[0] != 0) {
        return Err(BerError::IntRange);
    }
    let mut v: u64 = 0;
    for &b in content {
        v = (v << 8) | b as u64;
    }
    Ok(v)
}

fn decode_oid(content: &[u8]) -> Result<String, BerError> {
    if content.is_empty() {
        return Err(BerError::BadOid);
    }
    let mut parts: Vec<u64> = Vec::new();
    let first = content[0] as u64;
    parts.push((first / 40).min(2));
    parts.push(first - 40 * (first / 40).min(2));

    let mut acc: u64 = 0;
    for &b in &content[1..] {
        acc = acc.checked_mul(128).ok_or(BerError::BadOid)? + (b & 0x7f) as u64;
        if b & 0x80 == 0 {
            parts.push(acc);
            acc = 0;
        }
    }
    Ok(parts.iter().map(|p| p.to_string()).collect::<Vec<_>>().join("."))
}

fn decode_value(tag: u8, content: &[u8]) -> Result<VarValue, BerError> {
    let value = match tag {
        TAG_INTEGER => OidValue::Integer(decode_int(content)?),
        TAG_OCTET_STRING => OidValue::OctetString(content.to_vec()),
        TAG_NULL => OidValue::Null,
        TAG_OID => OidValue::ObjectIdentifier(decode_oid(content)?),
        TAG_IPADDRESS => {
            if content.len() != 4 {
                return Err(BerError::Truncated);
            }
            OidValue::IpAddress(Ipv4Addr::new(content[0], content[1], content[2], content[3]))
        }
        TAG_COUNTER32 => OidValue::Counter32(decode_uint(content)? as u32),
        TAG_GAUGE32 => OidValue::Gauge32(decode_uint(content)? as u32),
        TAG_TIMETICKS => OidValue::TimeTicks(decode_uint(content)? as u32),
        TAG_OPAQUE => OidValue::Opaque(content.to_vec()),
        TAG_COUNTER64 => OidValue::Counter64(decode_uint(content)?),
        TAG_NO_SUCH_OBJECT => return Ok(VarValue::NoSuchObject),
        TAG_NO_SUCH_INSTANCE => return Ok(VarValue::NoSuchInstance),
        TAG_END_OF_MIB_VIEW => return Ok(VarValue::EndOfMibView),
        other => return Err(BerError::UnexpectedTag(other)),
    };
    Ok(VarValue::Value(value))
}

/// Decode a full SNMP message.
pub fn decode(bytes: &[u8]) -> Result<SnmpMessage, BerError> {
    let mut outer = Reader::new(bytes);
    let msg = outer.expect(TAG_SEQUENCE)?;
    let mut r = Reader::new(msg);

    let version = decode_int(r.expect(TAG_INTEGER)?)?;
    let community = r.expect(TAG_OCTET_STRING)?.to_vec();

    let (pdu_tag, pdu_content) = r.tlv()?;
    let pdu_type = PduType::from_tag(pdu_tag).ok_or(BerError::UnexpectedTag(pdu_tag))?;
    let mut p = Reader::new(pdu_content);

    let request_id = decode_int(p.expect(TAG_INTEGER)?)?;
    let error_status = decode_int(p.expect(TAG_INTEGER)?)?;
    let error_index = decode_int(p.expect(TAG_INTEGER)?)?;

    let mut bindings = Vec::new();
    let mut vbl = Reader::new(p.expect(TAG_SEQUENCE)?);
    while !vbl.done() {
        let mut vb = Reader::new(vbl.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(vb.expect(TAG_OID)?)?;
        let (vtag, vcontent) = vb.tlv()?;
        bindings.push(VarBind { oid, value: decode_value(vtag, vcontent)? });
    }

    Ok(SnmpMessage {
        version,
        community,
        pdu: Pdu { pdu_type, request_id, error_status, error_index, bindings },
    })
}

// =============================================================================
// ENCODING
// =============================================================================

fn tlv(tag: u8, content: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(&content);
    out
}

fn encode_int(v: i64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let cur = bytes[start];
        let next = bytes[start + 1];
        // Drop redundant sign bytes
        if (cur == 0x00 && next & 0x80 == 0) || (cur == 0xff && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    tlv(TAG_INTEGER, bytes[start..].to_vec())
}

fn encode_uint(tag: u8, v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    let mut content = bytes[skip..].to_vec();
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }
    tlv(tag, content)
}

fn encode_oid(oid: &str) -> Result<Vec<u8>, BerError> {
    let parts = oid_components(oid).ok_or(BerError::BadOid)?;
    if parts.len() < 2 || parts[0] > 2 || (parts[0] < 2 && parts[1] >= 40) {
        return Err(BerError::BadOid);
    }
    let mut content = vec![(parts[0] * 40 + parts[1]) as u8];
    for &part in &parts[2..] {
        let mut chunk = [0u8; 10];
        let mut n = 0;
        let mut v = part;
        loop {
            chunk[n] = (v & 0x7f) as u8;
            v >>= 7;
            n += 1;
            if v == 0 {
                break;
            }
        }
        for i in (0..n).rev() {
            content.push(if i == 0 { chunk[i] } else { chunk[i] | 0x80 });
        }
    }
    Ok(tlv(TAG_OID, content))
}

fn encode_value(value: &VarValue) -> Result<Vec<u8>, BerError> {
    Ok(match value {
        VarValue::Value(OidValue::Integer(v)) => encode_int(*v),
        VarValue::Value(OidValue::OctetString(b)) => tlv(TAG_OCTET_STRING, b.clone()),
        VarValue::Value(OidValue::Null) => tlv(TAG_NULL, Vec::new()),
        VarValue::Value(OidValue::ObjectIdentifier(oid)) => encode_oid(oid)?,
        VarValue::Value(OidValue::IpAddress(a)) => tlv(TAG_IPADDRESS, a.octets().to_vec()),
        VarValue::Value(OidValue::Counter32(v)) => encode_uint(TAG_COUNTER32, *v as u64),
        VarValue::Value(OidValue::Gauge32(v)) => encode_uint(TAG_GAUGE32, *v as u64),
        VarValue::Value(OidValue::TimeTicks(v)) => encode_uint(TAG_TIMETICKS, *v as u64),
        VarValue::Value(OidValue::Opaque(b)) => tlv(TAG_OPAQUE, b.clone()),
        VarValue::Value(OidValue::Counter64(v)) => encode_uint(TAG_COUNTER64, *v),
        VarValue::NoSuchObject => tlv(TAG_NO_SUCH_OBJECT, Vec::new()),
        VarValue::NoSuchInstance => tlv(TAG_NO_SUCH_INSTANCE, Vec::new()),
        VarValue::EndOfMibView => tlv(TAG_END_OF_MIB_VIEW, Vec::new()),
    })
}

/// Encode a full SNMP message.
pub fn encode(msg: &SnmpMessage) -> Result<Vec<u8>, BerError> {
    let mut vbl = Vec::new();
    for binding in &msg.pdu.bindings {
        let mut vb = encode_oid(&binding.oid)?;
        vb.extend(encode_value(&binding.value)?);
        vbl.extend(tlv(TAG_SEQUENCE, vb));
    }

    let mut pdu = encode_int(msg.pdu.request_id);
    pdu.extend(encode_int(msg.pdu.error_status));
    pdu.extend(encode_int(msg.pdu.error_index));
    pdu.extend(tlv(TAG_SEQUENCE, vbl));

    let mut body = encode_int(msg.version);
    body.extend(tlv(TAG_OCTET_STRING, msg.community.clone()));
    body.extend(tlv(msg.pdu.pdu_type as u8, pdu));

    Ok(tlv(TAG_SEQUENCE, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: &SnmpMessage) -> SnmpMessage {
        decode(&encode(msg).unwrap()).unwrap()
    }

    #[test]
    fn test_get_round_trip() {
        let msg = SnmpMessage {
            version: VERSION_2C,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type: PduType::Get,
                request_id: 0x3039,
                error_status: 0,
                error_index: 0,
                bindings: vec![VarBind::null("1.3.6.1.2.1.1.1.0")],
            },
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_value_types_round_trip() {
        let bindings = vec![
            VarBind::new("1.3.6.1.2.1.1.1.0", OidValue::string("edge router")),
            VarBind::new("1.3.6.1.2.1.1.3.0", OidValue::TimeTicks(123456)),
            VarBind::new("1.3.6.1.2.1.1.7.0", OidValue::Integer(72)),
            VarBind::new("1.3.6.1.2.1.2.2.1.14.1", OidValue::Counter32(u32::MAX)),
            VarBind::new("1.3.6.1.2.1.31.1.1.1.6.1", OidValue::Counter64(u64::MAX)),
            VarBind::new("1.3.6.1.2.1.4.20.1.1", OidValue::IpAddress("10.0.0.1".parse().unwrap())),
            VarBind::new("1.3.6.1.2.1.1.2.0", OidValue::ObjectIdentifier("1.3.6.1.4.1.9.1.1".into())),
            VarBind { oid: "1.3.6.1.9.9".into(), value: VarValue::EndOfMibView },
        ];
        let msg = SnmpMessage {
            version: VERSION_2C,
            community: b"private".to_vec(),
            pdu: Pdu {
                pdu_type: PduType::Response,
                request_id: 1,
                error_status: 0,
                error_index: 0,
                bindings,
            },
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_negative_integer() {
        let msg = SnmpMessage {
            version: VERSION_1,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type: PduType::Response,
                request_id: -1,
                error_status: 2,
                error_index: 1,
                bindings: vec![VarBind::new("1.3.6.1", OidValue::Integer(-300))],
            },
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_long_length_form() {
        let big = vec![0x41u8; 300];
        let msg = SnmpMessage {
            version: VERSION_2C,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type: PduType::Response,
                request_id: 7,
                error_status: 0,
                error_index: 0,
                bindings: vec![VarBind::new("1.3.6.1.2.1.1.1.0", OidValue::OctetString(big))],
            },
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = encode(&SnmpMessage {
            version: VERSION_2C,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type: PduType::Get,
                request_id: 1,
                error_status: 0,
                error_index: 0,
                bindings: vec![VarBind::null("1.3.6.1.2.1.1.1.0")],
            },
        })
        .unwrap();
        assert!(decode(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_large_subidentifier() {
        let msg = SnmpMessage {
            version: VERSION_2C,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type: PduType::Get,
                request_id: 1,
                error_status: 0,
                error_index: 0,
                bindings: vec![VarBind::null("1.3.6.1.4.1.99999.1.2")],
            },
        };
        assert_eq!(round_trip(&msg), msg);
    }
}
