//! STP: periodic configuration BPDUs. No port state machine runs; the
//! point is to look like a bridge to an observing NMS.

use pnet::util::MacAddr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;

use crate::stack::StackContext;
use crate::types::ProtocolKind;

use super::frame::{Frame, L3, build_llc};
use super::{Discriminator, ProtocolHandler};

pub const STP_MULTICAST: MacAddr = MacAddr(0x01, 0x80, 0xc2, 0x00, 0x00, 0x00);
const LLC_SAP_STP: u8 = 0x42;

pub struct StpHandler {
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl StpHandler {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self { task: std::sync::Mutex::new(None), stop_tx }
    }
}

impl Default for StpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandler for StpHandler {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Stp
    }

    fn claims(&self) -> Vec<Discriminator> {
        vec![Discriminator::MulticastMac([0x01, 0x80, 0xc2, 0x00, 0x00, 0x00])]
    }

    fn can_handle(&self, frame: &Frame<'_>) -> bool {
        frame.dst_mac == STP_MULTICAST
            && matches!(frame.l3, L3::Llc { dsap, .. } if dsap == LLC_SAP_STP)
    }

    fn handle(&self, frame: &Frame<'_>, _ctx: &StackContext) -> Vec<Vec<u8>> {
        // Foreign BPDUs are observed, not acted on
        trace!(src = %frame.src_mac, "bpdu received");
        Vec::new()
    }

    fn start(&self, ctx: StackContext) {
        let mut guard = self.task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let mut stop_rx = self.stop_tx.subscribe();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut elapsed: u64 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        elapsed += 1;
                        for device in ctx.fleet.all() {
                            if !device.is_up() {
                                continue;
                            }
                            let cfg = device.config();
                            let Some(stp) = cfg.stp.as_ref().filter(|c| c.enabled) else {
                                continue;
                            };
                            if elapsed % stp.hello_secs.max(1) != 0 {
                                continue;
                            }
                            let frame = build_bpdu(device.mac(), stp.priority);
                            ctx.outbound.send(frame).await;
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
    }

    fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Configuration BPDU claiming ourselves as root.
pub fn build_bpdu(mac: MacAddr, priority: u16) -> Vec<u8> {
    let bridge_id = {
        let mut id = priority.to_be_bytes().to_vec();
        id.extend_from_slice(&[mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]);
        id
    };

    let mut p = Vec::with_capacity(35);
    p.extend_from_slice(&0u16.to_be_bytes()); // protocol id
    p.push(0); // version
    p.push(0); // type: configuration
    p.push(0); // flags
    p.extend_from_slice(&bridge_id); // root id (we claim root)
    p.extend_from_slice(&0u32.to_be_bytes()); // root path cost
    p.extend_from_slice(&bridge_id); // bridge id
    p.extend_from_slice(&0x8001u16.to_be_bytes()); // port id
    // times, 1/256 s units
    p.extend_from_slice(&0u16.to_be_bytes()); // message age
    p.extend_from_slice(&(20u16 * 256).to_be_bytes()); // max age
    p.extend_from_slice(&(2u16 * 256).to_be_bytes()); // hello time
    p.extend_from_slice(&(15u16 * 256).to_be_bytes()); // forward delay

    build_llc(STP_MULTICAST, mac, LLC_SAP_STP, LLC_SAP_STP, 0x03, None, &p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpdu_shape() {
        let mac: MacAddr = "aa:bb:cc:00:00:21".parse().unwrap();
        let frame_bytes = build_bpdu(mac, 4096);

        let frame = Frame::parse(&frame_bytes).unwrap();
        assert_eq!(frame.dst_mac, STP_MULTICAST);

        let handler = StpHandler::new();
        assert!(handler.can_handle(&frame));

        let L3::Llc { dsap, ssap, payload, .. } = frame.l3 else { panic!("expected llc") };
        assert_eq!((dsap, ssap), (LLC_SAP_STP, LLC_SAP_STP));
        // bridge priority appears in the root id
        assert_eq!(&payload[5..7], &4096u16.to_be_bytes());
        // hello time 2 s in 1/256 units
        assert_eq!(&payload[31..33], &(512u16).to_be_bytes());
    }
}
