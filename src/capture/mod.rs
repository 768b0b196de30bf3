//! Packet-plane I/O: live capture/inject, pcap replay, rate limiting.

pub mod engine;
pub mod rate_limit;
pub mod replay;

pub use engine::{CaptureEngine, CaptureError, CaptureStats, build_ethernet, list_interfaces};
pub use rate_limit::RateLimiter;
pub use replay::{ReplayError, ReplayManager, ReplayRequest, ReplayStatus};

/// Anything that can transmit a raw L2 frame. The capture engine is the
/// production sink; tests substitute collectors.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &[u8]);
}

impl FrameSink for CaptureEngine {
    fn send_frame(&self, frame: &[u8]) {
        if let Err(e) = self.send(frame) {
            tracing::trace!("replay inject failed: {e}");
        }
    }
}
