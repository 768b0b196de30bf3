//! Raw L2 capture/inject over libpcap.
//!
//! The pcap handle lives on a dedicated OS thread: libpcap reads block,
//! and the handle is not shareable. The thread polls with a short read
//! timeout, drains a command queue (send / filter / stats / close), and
//! pushes captured frames into a bounded channel the async side drains.

use pnet::packet::ethernet::{EtherType, MutableEthernetPacket};
use pnet::util::MacAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Default capture snap length; covers full Ethernet frames.
pub const DEFAULT_SNAPLEN: i32 = 1600;

/// pcap read timeout in milliseconds; bounds shutdown latency.
const READ_TIMEOUT_MS: i32 = 10;

/// Inbound frame channel depth between the reader thread and the stack.
const FRAME_CHANNEL_DEPTH: usize = 4096;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open {interface}: {reason}")]
    Open { interface: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
    #[error("invalid filter: {0}")]
    Filter(String),
    #[error("read timed out")]
    Timeout,
    #[error("capture closed")]
    Closed,
}

/// pcap-level counters.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CaptureStats {
    pub received: u64,
    pub dropped: u64,
    pub if_dropped: u64,
}

enum Command {
    Send(Vec<u8>),
    SetFilter(String, oneshot::Sender<Result<(), CaptureError>>),
    Stats(oneshot::Sender<Result<CaptureStats, CaptureError>>),
    Close,
}

pub struct CaptureEngine {
    interface: String,
    cmd_tx: std::sync::Mutex<std::sync::mpsc::Sender<Command>>,
    frames: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
    stop: Arc<AtomicBool>,
    thread: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Frames dropped because the inbound channel was full.
    overflow: Arc<AtomicU64>,
}

impl CaptureEngine {
    /// Open an interface with the default snaplen in promiscuous mode.
    pub fn open(interface: &str) -> Result<Self, CaptureError> {
        Self::open_with(interface, DEFAULT_SNAPLEN, true)
    }

    pub fn open_with(
        interface: &str,
        snaplen: i32,
        promiscuous: bool,
    ) -> Result<Self, CaptureError> {
        let cap = pcap::Capture::from_device(interface)
            .map_err(|e| CaptureError::Open {
                interface: interface.to_string(),
                reason: e.to_string(),
            })?
            .promisc(promiscuous)
            .snaplen(snaplen)
            .timeout(READ_TIMEOUT_MS)
            .immediate_mode(true)
            .open()
            .map_err(|e| CaptureError::Open {
                interface: interface.to_string(),
                reason: e.to_string(),
            })?;

        info!(interface, snaplen, promiscuous, "capture opened");

        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel::<Command>();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));
        let overflow = Arc::new(AtomicU64::new(0));

        let thread = {
            let stop = stop.clone();
            let overflow = overflow.clone();
            let interface = interface.to_string();
            std::thread::Builder::new()
                .name(format!("pcap-{interface}"))
                .spawn(move || reader_loop(cap, cmd_rx, frame_tx, stop, overflow))
                .map_err(|e| CaptureError::Open {
                    interface: interface.clone(),
                    reason: e.to_string(),
                })?
        };

        Ok(Self {
            interface: interface.to_string(),
            cmd_tx: std::sync::Mutex::new(cmd_tx),
            frames: AsyncMutex::new(frame_rx),
            stop,
            thread: std::sync::Mutex::new(Some(thread)),
            overflow,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn command(&self, cmd: Command) -> Result<(), CaptureError> {
        if self.stop.load(Ordering::Acquire) {
            return Err(CaptureError::Closed);
        }
        self.cmd_tx
            .lock()
            .unwrap()
            .send(cmd)
            .map_err(|_| CaptureError::Closed)
    }

    /// Transmit one raw L2 frame.
    pub fn send(&self, frame: &[u8]) -> Result<(), CaptureError> {
        self.command(Command::Send(frame.to_vec()))
    }

    /// Serialize and transmit an Ethernet frame.
    pub fn send_ethernet(
        &self,
        dst: MacAddr,
        src: MacAddr,
        ethertype: u16,
        payload: &[u8],
    ) -> Result<(), CaptureError> {
        let frame = build_ethernet(dst, src, ethertype, payload)
            .ok_or_else(|| CaptureError::Send("frame build failed".into()))?;
        self.send(&frame)
    }

    /// Next captured frame; `None` once the engine is closed.
    pub async fn next_frame(&self) -> Option<Vec<u8>> {
        self.frames.lock().await.recv().await
    }

    /// Read into a caller buffer. Frames longer than the buffer are
    /// truncated to fit (overflow copy). `Timeout` when nothing arrived
    /// within `timeout`.
    pub async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, CaptureError> {
        let mut rx = self.frames.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(frame)) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Ok(None) => Err(CaptureError::Closed),
            Err(_) => Err(CaptureError::Timeout),
        }
    }

    pub async fn set_filter(&self, expression: &str) -> Result<(), CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::SetFilter(expression.to_string(), tx))?;
        rx.await.map_err(|_| CaptureError::Closed)?
    }

    pub async fn stats(&self) -> Result<CaptureStats, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Stats(tx))?;
        rx.await.map_err(|_| CaptureError::Closed)?
    }

    /// Frames dropped on the inbound channel (stack fell behind).
    pub fn overflow_drops(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Close the handle and join the reader thread. Idempotent.
    pub fn close(&self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.cmd_tx.lock().unwrap().send(Command::Close);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        debug!(interface = %self.interface, "capture closed");
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(
    mut cap: pcap::Capture<pcap::Active>,
    cmd_rx: std::sync::mpsc::Receiver<Command>,
    frame_tx: mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    overflow: Arc<AtomicU64>,
) {
    loop {
        // Drain pending commands first so sends are not starved by capture
        loop {
            match cmd_rx.try_recv() {
                Ok(Command::Send(frame)) => {
                    if let Err(e) = cap.sendpacket(&frame[..]) {
                        warn!("inject failed: {e}");
                    }
                }
                Ok(Command::SetFilter(expr, reply)) => {
                    let result = cap
                        .filter(&expr, true)
                        .map_err(|e| CaptureError::Filter(e.to_string()));
                    let _ = reply.send(result);
                }
                Ok(Command::Stats(reply)) => {
                    let result = cap
                        .stats()
                        .map(|s| CaptureStats {
                            received: s.received as u64,
                            dropped: s.dropped as u64,
                            if_dropped: s.if_dropped as u64,
                        })
                        .map_err(|e| CaptureError::Send(e.to_string()));
                    let _ = reply.send(result);
                }
                Ok(Command::Close) => return,
                Err(std::sync::mpsc::TryRecvError::Empty) => break,
                Err(std::sync::mpsc::TryRecvError::Disconnected) => return,
            }
        }

        if stop.load(Ordering::Acquire) {
            return;
        }

        match cap.next_packet() {
            Ok(packet) => {
                if frame_tx.try_send(packet.data.to_vec()).is_err() {
                    overflow.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(pcap::Error::TimeoutExpired) => {}
            Err(e) => {
                warn!("capture read error: {e}");
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

/// Serialize an Ethernet frame. `None` only on pathological sizes.
pub fn build_ethernet(
    dst: MacAddr,
    src: MacAddr,
    ethertype: u16,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 14 + payload.len()];
    let mut eth = MutableEthernetPacket::new(&mut buf)?;
    eth.set_destination(dst);
    eth.set_source(src);
    eth.set_ethertype(EtherType::new(ethertype));
    eth.set_payload(payload);
    Some(buf)
}

/// Available capture interfaces on this host.
pub fn list_interfaces() -> Vec<String> {
    pcap::Device::list()
        .map(|devices| devices.into_iter().map(|d| d.name).collect())
        .unwrap_or_default()
}
