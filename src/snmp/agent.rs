//! Per-device SNMP agent: a MIB seeded with the MIB-II system group,
//! optional walk-file contents, and error-injection-driven counters.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

use crate::config::{Device, SnmpAgentConfig};
use crate::inject::{ErrorKind, ErrorStateManager};

use super::ber::{Pdu, PduType, SnmpMessage, VarBind, VarValue, VERSION_1};
use super::mib::Mib;
use super::value::OidValue;
use super::walk::WalkEntry;

/// Upper bound on GETBULK repetitions, bounding response size.
const MAX_BULK_REPETITIONS: i64 = 100;

/// SNMP column/scalar each error kind drives. One row per kind; the
/// producer for an OID sums every kind mapped to it. Interface-table
/// columns get `.<ifindex>` appended; scalar rows are complete OIDs.
///
/// Columns: ifInDiscards .13, ifInErrors .14, ifOutDiscards .19,
/// ifOutErrors .20, ifInOctets .10 (utilization proxy). Scalars:
/// hrProcessorLoad and hrStorageUsed rows.
pub const ERROR_OID_TABLE: &[(ErrorKind, &str, ErrorOidStyle)] = &[
    (ErrorKind::Fcs, "1.3.6.1.2.1.2.2.1.14", ErrorOidStyle::InterfaceCounter),
    (ErrorKind::InputErrors, "1.3.6.1.2.1.2.2.1.14", ErrorOidStyle::InterfaceCounter),
    (ErrorKind::OutputErrors, "1.3.6.1.2.1.2.2.1.20", ErrorOidStyle::InterfaceCounter),
    (ErrorKind::InputDiscards, "1.3.6.1.2.1.2.2.1.13", ErrorOidStyle::InterfaceCounter),
    (ErrorKind::OutputDiscards, "1.3.6.1.2.1.2.2.1.19", ErrorOidStyle::InterfaceCounter),
    (ErrorKind::HighUtilization, "1.3.6.1.2.1.2.2.1.10", ErrorOidStyle::InterfaceCounter),
    (ErrorKind::HighCpu, "1.3.6.1.2.1.25.3.3.1.2.1", ErrorOidStyle::ScalarInteger),
    (ErrorKind::HighMemory, "1.3.6.1.2.1.25.2.3.1.6.1", ErrorOidStyle::ScalarInteger),
    (ErrorKind::HighDisk, "1.3.6.1.2.1.25.2.3.1.6.2", ErrorOidStyle::ScalarInteger),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOidStyle {
    /// Counter32 column indexed by ifIndex.
    InterfaceCounter,
    /// Device-wide Integer row.
    ScalarInteger,
}

/// Outcome of handling one inbound SNMP message.
#[derive(Debug)]
pub enum AgentReply {
    Response(SnmpMessage),
    /// Community mismatch; the caller emits the authenticationFailure trap.
    AuthFailure,
    /// Message types an agent does not answer (responses, traps).
    Ignored,
}

pub struct SnmpAgent {
    mib: Mib,
    community: String,
    started: Instant,
}

impl SnmpAgent {
    /// Build an agent for one device. `walk` entries, when present, load
    /// last and may overwrite seeded values.
    pub fn new(
        device: &Device,
        cfg: &SnmpAgentConfig,
        walk: Option<&[WalkEntry]>,
        errors: Arc<ErrorStateManager>,
    ) -> Self {
        let agent = Self {
            mib: Mib::new(),
            community: cfg.community.clone(),
            started: Instant::now(),
        };

        agent.seed_system_group(device);
        agent.seed_interfaces(device, errors);

        if let Some(entries) = walk {
            super::walk::load_into(&agent.mib, entries);
        }

        agent
    }

    pub fn mib(&self) -> &Mib {
        &self.mib
    }

    pub fn community(&self) -> &str {
        &self.community
    }

    /// sysUpTime in 10 ms ticks.
    pub fn uptime_ticks(&self) -> u32 {
        (self.started.elapsed().as_millis() / 10) as u32
    }

    fn seed_system_group(&self, device: &Device) {
        let default_descr = format!("{} {}", device.device_type.as_str(), device.name);
        self.mib.set(
            "1.3.6.1.2.1.1.1.0",
            OidValue::string(device.property_or("sysDescr", &default_descr)),
        );
        self.mib.set(
            "1.3.6.1.2.1.1.2.0",
            OidValue::ObjectIdentifier(
                device.property_or("sysObjectID", "1.3.6.1.4.1.9.1.1").to_string(),
            ),
        );

        let started = self.started;
        self.mib.set_dynamic(
            "1.3.6.1.2.1.1.3.0",
            Arc::new(move || OidValue::TimeTicks((started.elapsed().as_millis() / 10) as u32)),
        );

        self.mib.set(
            "1.3.6.1.2.1.1.4.0",
            OidValue::string(device.property_or("sysContact", "admin@example.com")),
        );
        self.mib.set(
            "1.3.6.1.2.1.1.5.0",
            OidValue::string(device.property_or("sysName", &device.name)),
        );
        self.mib.set(
            "1.3.6.1.2.1.1.6.0",
            OidValue::string(device.property_or("sysLocation", "Unknown")),
        );
        self.mib.set("1.3.6.1.2.1.1.7.0", OidValue::Integer(72));
    }

    fn seed_interfaces(&self, device: &Device, errors: Arc<ErrorStateManager>) {
        let device_ip = device.all_ips().first().copied();
        let interfaces = effective_interfaces(device);

        self.mib
            .set("1.3.6.1.2.1.2.1.0", OidValue::Integer(interfaces.len() as i64));

        for (ifindex, name, descr) in &interfaces {
            let base = "1.3.6.1.2.1.2.2.1";
            self.mib.set(&format!("{base}.1.{ifindex}"), OidValue::Integer(*ifindex as i64));
            self.mib.set(
                &format!("{base}.2.{ifindex}"),
                OidValue::string(descr.as_deref().unwrap_or(name)),
            );
            self.mib.set(&format!("{base}.7.{ifindex}"), OidValue::Integer(1));
            self.mib.set(&format!("{base}.8.{ifindex}"), OidValue::Integer(1));

            // Error-driven interface counters
            if let Some(ip) = device_ip {
                for prefix in interface_counter_prefixes() {
                    let kinds: Vec<ErrorKind> = ERROR_OID_TABLE
                        .iter()
                        .filter(|(_, p, style)| {
                            *style == ErrorOidStyle::InterfaceCounter && *p == prefix
                        })
                        .map(|(k, _, _)| *k)
                        .collect();
                    let oid = format!("{prefix}.{ifindex}");
                    let producer = InterfaceCounterProducer {
                        errors: errors.clone(),
                        ip,
                        interface: name.clone(),
                        kinds,
                    };
                    self.mib.set_dynamic(&oid, Arc::new(producer));
                }
            }
        }

        // Device-wide scalar rows (CPU / memory / disk)
        if let Some(ip) = device_ip {
            for (kind, oid, style) in ERROR_OID_TABLE {
                if *style == ErrorOidStyle::ScalarInteger {
                    let producer = ScalarProducer { errors: errors.clone(), ip, kind: *kind };
                    self.mib.set_dynamic(oid, Arc::new(producer));
                }
            }
        }
    }

    /// Handle one decoded message.
    ///
    /// The community check is a plain equality test and therefore
    /// timing-sensitive; SNMPv1/v2c communities are not secrets worth a
    /// constant-time comparison (the HTTP token check is the one that
    /// gets it).
    pub fn handle(&self, msg: &SnmpMessage) -> AgentReply {
        if msg.community != self.community.as_bytes() {
            return AgentReply::AuthFailure;
        }

        match msg.pdu.pdu_type {
            PduType::Get => AgentReply::Response(self.handle_get(msg)),
            PduType::GetNext => AgentReply::Response(self.handle_get_next(msg)),
            PduType::GetBulk => AgentReply::Response(self.handle_get_bulk(msg)),
            PduType::Set => AgentReply::Response(self.handle_set(msg)),
            _ => AgentReply::Ignored,
        }
    }

    fn handle_get(&self, msg: &SnmpMessage) -> SnmpMessage {
        let mut bindings = Vec::with_capacity(msg.pdu.bindings.len());
        let mut error_status = 0;
        let mut error_index = 0;

        for (i, binding) in msg.pdu.bindings.iter().enumerate() {
            match self.mib.get(&binding.oid) {
                Some(value) => {
                    bindings.push(VarBind { oid: binding.oid.clone(), value: VarValue::Value(value) })
                }
                None if msg.version == VERSION_1 => {
                    if error_status == 0 {
                        error_status = 2; // noSuchName
                        error_index = i as i64 + 1;
                    }
                    bindings.push(binding.clone());
                }
                None => bindings
                    .push(VarBind { oid: binding.oid.clone(), value: VarValue::NoSuchObject }),
            }
        }

        self.response(msg, bindings, error_status, error_index)
    }

    fn handle_get_next(&self, msg: &SnmpMessage) -> SnmpMessage {
        let mut bindings = Vec::with_capacity(msg.pdu.bindings.len());
        let mut error_status = 0;
        let mut error_index = 0;

        for (i, binding) in msg.pdu.bindings.iter().enumerate() {
            match self.mib.get_next(&binding.oid) {
                Some((oid, value)) => bindings.push(VarBind { oid, value: VarValue::Value(value) }),
                None if msg.version == VERSION_1 => {
                    if error_status == 0 {
                        error_status = 2;
                        error_index = i as i64 + 1;
                    }
                    bindings.push(binding.clone());
                }
                None => bindings
                    .push(VarBind { oid: binding.oid.clone(), value: VarValue::EndOfMibView }),
            }
        }

        self.response(msg, bindings, error_status, error_index)
    }

    fn handle_get_bulk(&self, msg: &SnmpMessage) -> SnmpMessage {
        let non_repeaters = msg.pdu.error_status.max(0) as usize;
        let max_repetitions = msg.pdu.error_index.clamp(0, MAX_BULK_REPETITIONS);

        let mut bindings = Vec::new();

        for binding in msg.pdu.bindings.iter().take(non_repeaters) {
            match self.mib.get_next(&binding.oid) {
                Some((oid, value)) => bindings.push(VarBind { oid, value: VarValue::Value(value) }),
                None => bindings
                    .push(VarBind { oid: binding.oid.clone(), value: VarValue::EndOfMibView }),
            }
        }

        for binding in msg.pdu.bindings.iter().skip(non_repeaters) {
            let mut cursor = binding.oid.clone();
            for _ in 0..max_repetitions {
                match self.mib.get_next(&cursor) {
                    Some((oid, value)) => {
                        cursor = oid.clone();
                        bindings.push(VarBind { oid, value: VarValue::Value(value) });
                    }
                    None => {
                        bindings.push(VarBind { oid: cursor.clone(), value: VarValue::EndOfMibView });
                        break;
                    }
                }
            }
        }

        self.response(msg, bindings, 0, 0)
    }

    /// No write ACL is in scope: SETs apply to any OID.
    fn handle_set(&self, msg: &SnmpMessage) -> SnmpMessage {
        for binding in &msg.pdu.bindings {
            if let VarValue::Value(value) = &binding.value {
                trace!(oid = %binding.oid, "snmp set");
                self.mib.set(&binding.oid, value.clone());
            }
        }
        self.response(msg, msg.pdu.bindings.clone(), 0, 0)
    }

    fn response(
        &self,
        request: &SnmpMessage,
        bindings: Vec<VarBind>,
        error_status: i64,
        error_index: i64,
    ) -> SnmpMessage {
        SnmpMessage {
            version: request.version,
            community: request.community.clone(),
            pdu: Pdu {
                pdu_type: PduType::Response,
                request_id: request.pdu.request_id,
                error_status,
                error_index,
                bindings,
            },
        }
    }
}

/// Interface rows for the MIB: configured interfaces, else a single
/// default `eth0` so counter injection always has a target.
pub fn effective_interfaces(device: &Device) -> Vec<(u32, String, Option<String>)> {
    if device.interfaces.is_empty() {
        return vec![(1, "eth0".to_string(), None)];
    }
    device
        .interfaces
        .iter()
        .enumerate()
        .map(|(i, ifc)| (device.ifindex(i), ifc.name.clone(), ifc.description.clone()))
        .collect()
}

fn interface_counter_prefixes() -> Vec<&'static str> {
    let mut prefixes: Vec<&'static str> = ERROR_OID_TABLE
        .iter()
        .filter(|(_, _, style)| *style == ErrorOidStyle::InterfaceCounter)
        .map(|(_, p, _)| *p)
        .collect();
    prefixes.sort();
    prefixes.dedup();
    prefixes
}

/// Sums the injected magnitudes of every kind mapped to one counter
/// column for one (device, interface).
struct InterfaceCounterProducer {
    errors: Arc<ErrorStateManager>,
    ip: IpAddr,
    interface: String,
    kinds: Vec<ErrorKind>,
}

impl super::value::OidProducer for InterfaceCounterProducer {
    fn produce(&self) -> OidValue {
        let total: u32 = self
            .kinds
            .iter()
            .filter_map(|kind| self.errors.get(self.ip, &self.interface, *kind))
            .map(|v| v as u32)
            .sum();
        OidValue::Counter32(total)
    }
}

/// Device-wide gauge row: the highest injected magnitude of one kind
/// across all interfaces of the device.
struct ScalarProducer {
    errors: Arc<ErrorStateManager>,
    ip: IpAddr,
    kind: ErrorKind,
}

impl super::value::OidProducer for ScalarProducer {
    fn produce(&self) -> OidValue {
        let max = self
            .errors
            .all_states()
            .into_iter()
            .filter(|s| s.device_ip == self.ip && s.kind == self.kind)
            .map(|s| s.value)
            .max()
            .unwrap_or(0);
        OidValue::Integer(max as i64)
    }
}
