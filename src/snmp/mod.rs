//! SNMP: MIB, BER codec, per-device agent, walk files, trap emission.

pub mod agent;
pub mod ber;
pub mod mib;
pub mod trap;
pub mod value;
pub mod walk;

pub use agent::{AgentReply, ERROR_OID_TABLE, SnmpAgent, effective_interfaces};
pub use ber::{BerError, Pdu, PduType, SnmpMessage, VarBind, VarValue, VERSION_1, VERSION_2C};
pub use mib::Mib;
pub use trap::{MetricSource, ProbeKind, RandomMetrics, TrapSender};
pub use value::{OidProducer, OidValue, normalize_oid, oid_cmp, oid_components};
pub use walk::WalkEntry;
