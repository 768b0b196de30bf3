//! Helpers shared by the unit tests.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::device::Fleet;
use crate::inject::ErrorStateManager;
use crate::neighbor::NeighborCache;
use crate::snmp::{MetricSource, ProbeKind};
use crate::stack::{OutboundHandle, StackContext};
use crate::types::Counters;

pub struct NullMetrics;

impl MetricSource for NullMetrics {
    fn sample(&self, _kind: ProbeKind) -> u8 {
        0
    }
}

/// Handler context over a fleet built from YAML, with a detached
/// outbound queue.
pub fn test_context(yaml: &str) -> StackContext {
    let config = Arc::new(Config::from_yaml(yaml).expect("test yaml"));
    let errors = Arc::new(ErrorStateManager::new());
    let fleet =
        Arc::new(Fleet::new(config, errors.clone(), Arc::new(NullMetrics)).expect("test fleet"));

    let (tx, rx) = mpsc::channel(1024);
    std::mem::forget(rx); // keep the channel open for ticker sends

    StackContext::new(
        fleet,
        Arc::new(NeighborCache::new()),
        errors,
        Arc::new(Counters::new()),
        OutboundHandle::new(tx),
    )
}

/// Like `test_context`, but hands back the outbound receiver so tests
/// can observe ticker traffic.
pub fn test_context_with_rx(yaml: &str) -> (StackContext, mpsc::Receiver<Vec<u8>>) {
    let config = Arc::new(Config::from_yaml(yaml).expect("test yaml"));
    let errors = Arc::new(ErrorStateManager::new());
    let fleet =
        Arc::new(Fleet::new(config, errors.clone(), Arc::new(NullMetrics)).expect("test fleet"));

    let (tx, rx) = mpsc::channel(1024);
    let ctx = StackContext::new(
        fleet,
        Arc::new(NeighborCache::new()),
        errors,
        Arc::new(Counters::new()),
        OutboundHandle::new(tx),
    );
    (ctx, rx)
}
