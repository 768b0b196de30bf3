//! Token bucket over the outbound packet path.
//!
//! The bucket holds one token per allowed packet and starts full. A
//! producer task inserts one token every 1/rate seconds, dropping the
//! token when the bucket is full. `acquire` blocks on an empty bucket,
//! which is what backpressures the stack's send loop.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, interval};

pub struct RateLimiter {
    tokens: Mutex<mpsc::Receiver<()>>,
    producer: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopped: AtomicBool,
    rate_pps: u32,
}

impl RateLimiter {
    /// `rate_pps` packets per second; burst capacity equals the rate.
    pub fn new(rate_pps: u32) -> Self {
        let capacity = rate_pps.max(1) as usize;
        let (tx, rx) = mpsc::channel(capacity);

        // Pre-fill so a fresh limiter allows an initial burst
        for _ in 0..capacity {
            if tx.try_send(()).is_err() {
                break;
            }
        }

        let tick = Duration::from_secs_f64(1.0 / rate_pps.max(1) as f64);
        let producer = tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match tx.try_send(()) {
                    Ok(()) => {}
                    // Bucket full: drop the token
                    Err(mpsc::error::TrySendError::Full(())) => {}
                    Err(mpsc::error::TrySendError::Closed(())) => return,
                }
            }
        });

        Self {
            tokens: Mutex::new(rx),
            producer: std::sync::Mutex::new(Some(producer)),
            stopped: AtomicBool::new(false),
            rate_pps: rate_pps.max(1),
        }
    }

    pub fn rate_pps(&self) -> u32 {
        self.rate_pps
    }

    /// Wait for a token. Returns immediately once stopped.
    pub async fn acquire(&self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let mut rx = self.tokens.lock().await;
        let _ = rx.recv().await;
    }

    /// Terminate the producer. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.producer.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_initial_burst_available() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        // Whole burst without waiting for refills
        assert!(start.elapsed() < Duration::from_millis(500));
        limiter.stop();
    }

    #[tokio::test]
    async fn test_rate_bound_under_load() {
        // 50 pps over ~0.4 s of demand: at most burst(50) + 0.4*50 + slack
        let limiter = RateLimiter::new(50);
        let start = Instant::now();
        let mut dispatched = 0u32;
        while start.elapsed() < Duration::from_millis(400) {
            tokio::select! {
                _ = limiter.acquire() => dispatched += 1,
                _ = tokio::time::sleep(Duration::from_millis(450)) => break,
            }
        }
        assert!(dispatched <= 50 + 20 + 5, "dispatched {dispatched}");
        limiter.stop();
    }

    #[tokio::test]
    async fn test_stop_idempotent_and_unblocks() {
        let limiter = std::sync::Arc::new(RateLimiter::new(1));
        limiter.acquire().await; // drain the single token

        limiter.stop();
        limiter.stop();

        // acquire after stop must not hang forever
        tokio::time::timeout(Duration::from_secs(2), limiter.acquire())
            .await
            .expect("acquire should return after stop");
    }
}
