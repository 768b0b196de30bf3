//! The protocol stack: inbound classify/dispatch, the bounded outbound
//! queue, counters, and the shared handler context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::capture::{CaptureEngine, RateLimiter};
use crate::device::Fleet;
use crate::inject::ErrorStateManager;
use crate::neighbor::NeighborCache;
use crate::proto::{Frame, HandlerRegistry};
use crate::types::{Counters, CountersSnapshot};

/// Queue-depth ratio past which enqueue warns.
const QUEUE_WARN_RATIO: f64 = 0.8;

/// Outbound queue handle. Enqueue blocks when the queue is full, which
/// is the stack's backpressure; a warning fires crossing 80 % depth.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<Vec<u8>>,
    warned: Arc<AtomicBool>,
}

impl OutboundHandle {
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx, warned: Arc::new(AtomicBool::new(false)) }
    }

    pub async fn send(&self, frame: Vec<u8>) {
        let max = self.tx.max_capacity();
        let used = max - self.tx.capacity();
        if (used as f64) >= (max as f64) * QUEUE_WARN_RATIO {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!(depth = used, capacity = max, "send queue above 80% depth");
            }
        } else {
            self.warned.store(false, Ordering::Relaxed);
        }
        let _ = self.tx.send(frame).await;
    }

    pub fn try_send(&self, frame: Vec<u8>) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

/// Everything a protocol handler can reach: the fleet, the caches, the
/// error map, the stack counters, and the outbound queue.
#[derive(Clone)]
pub struct StackContext {
    pub fleet: Arc<Fleet>,
    pub neighbors: Arc<NeighborCache>,
    pub errors: Arc<ErrorStateManager>,
    pub stats: Arc<Counters>,
    pub outbound: OutboundHandle,
}

impl StackContext {
    pub fn new(
        fleet: Arc<Fleet>,
        neighbors: Arc<NeighborCache>,
        errors: Arc<ErrorStateManager>,
        stats: Arc<Counters>,
        outbound: OutboundHandle,
    ) -> Self {
        Self { fleet, neighbors, errors, stats, outbound }
    }
}

pub struct ProtocolStack {
    engine: Arc<CaptureEngine>,
    registry: Arc<HandlerRegistry>,
    ctx: StackContext,
    out_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    limiter: Option<Arc<RateLimiter>>,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ProtocolStack {
    pub fn new(
        engine: Arc<CaptureEngine>,
        fleet: Arc<Fleet>,
        errors: Arc<ErrorStateManager>,
    ) -> Self {
        let engine_cfg = fleet.config().engine.clone();
        let capacity = engine_cfg.send_queue_capacity.max(1);
        let (out_tx, out_rx) = mpsc::channel(capacity);

        let stats = Arc::new(Counters::new());
        let ctx = StackContext::new(
            fleet,
            Arc::new(NeighborCache::new()),
            errors,
            stats,
            OutboundHandle { tx: out_tx, warned: Arc::new(AtomicBool::new(false)) },
        );

        let (stop_tx, _) = watch::channel(false);
        Self {
            engine,
            registry: Arc::new(HandlerRegistry::with_defaults()),
            ctx,
            out_rx: Mutex::new(Some(out_rx)),
            limiter: engine_cfg.rate_pps.map(|pps| Arc::new(RateLimiter::new(pps))),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> StackContext {
        self.ctx.clone()
    }

    pub fn engine(&self) -> &Arc<CaptureEngine> {
        &self.engine
    }

    pub fn stats(&self) -> CountersSnapshot {
        self.ctx.stats.snapshot()
    }

    pub fn neighbors(&self) -> &Arc<NeighborCache> {
        &self.ctx.neighbors
    }

    pub fn error_manager(&self) -> &Arc<ErrorStateManager> {
        &self.ctx.errors
    }

    /// Enqueue one frame for transmission (blocks when the queue is full).
    pub async fn send(&self, frame: Vec<u8>) {
        self.ctx.outbound.send(frame).await;
    }

    /// Spawn the receive and send loops and start every handler.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        // Inbound: read → classify → dispatch → enqueue responses
        {
            let engine = self.engine.clone();
            let registry = self.registry.clone();
            let ctx = self.ctx.clone();
            let mut stop_rx = self.stop_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        frame = engine.next_frame() => frame,
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() { return; }
                            continue;
                        }
                    };
                    let Some(data) = frame else { return };
                    ctx.stats.packets_received.fetch_add(1, Ordering::Relaxed);

                    let Some(parsed) = Frame::parse(&data) else {
                        ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    };
                    let responses = registry.dispatch(&parsed, &ctx);
                    for response in responses {
                        ctx.outbound.send(response).await;
                    }
                }
            }));
        }

        // Outbound: single drain under the rate limiter
        {
            let engine = self.engine.clone();
            let stats = self.ctx.stats.clone();
            let limiter = self.limiter.clone();
            let Some(mut out_rx) = self.out_rx.lock().await.take() else {
                return;
            };
            let mut stop_rx = self.stop_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        frame = out_rx.recv() => frame,
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                // Drain what is already queued, then exit
                                while let Ok(frame) = out_rx.try_recv() {
                                    transmit(&engine, &stats, &limiter, frame).await;
                                }
                                return;
                            }
                            continue;
                        }
                    };
                    let Some(frame) = frame else { return };
                    transmit(&engine, &stats, &limiter, frame).await;
                }
            }));
        }

        self.registry.start_all(&self.ctx);
        info!("protocol stack started");
    }

    /// Graceful stop: handlers first, then both loops (the send loop
    /// drains its queue).
    pub async fn stop(&self) {
        self.registry.stop_all();
        if let Some(limiter) = &self.limiter {
            limiter.stop();
        }
        let _ = self.stop_tx.send(true);

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        debug!("protocol stack stopped");
    }
}

async fn transmit(
    engine: &CaptureEngine,
    stats: &Counters,
    limiter: &Option<Arc<RateLimiter>>,
    frame: Vec<u8>,
) {
    if let Some(limiter) = limiter {
        limiter.acquire().await;
    }
    match engine.send(&frame) {
        Ok(()) => {
            stats.packets_sent.fetch_add(1, Ordering::Relaxed);
            trace!(len = frame.len(), "frame sent");
        }
        Err(e) => {
            stats.errors.fetch_add(1, Ordering::Relaxed);
            trace!("send failed: {e}");
        }
    }
}
