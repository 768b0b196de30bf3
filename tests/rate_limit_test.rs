//! Rate limiter tests
//!
//! Run with: cargo test --test rate_limit_test

use niac::capture::RateLimiter;
use std::time::{Duration, Instant};

// =============================================================================
// TOKEN BUCKET
// =============================================================================

#[tokio::test]
async fn test_prefilled_burst() {
    let limiter = RateLimiter::new(20);
    let start = Instant::now();
    for _ in 0..20 {
        limiter.acquire().await;
    }
    assert!(start.elapsed() < Duration::from_millis(500));
    limiter.stop();
}

#[tokio::test]
async fn test_never_exceeds_rate_plus_burst() {
    // Demand far above 40 pps for ~0.5 s: dispatched <= burst + rate*t + slack
    let limiter = RateLimiter::new(40);
    let start = Instant::now();
    let mut dispatched = 0u32;

    while start.elapsed() < Duration::from_millis(500) {
        tokio::select! {
            _ = limiter.acquire() => dispatched += 1,
            _ = tokio::time::sleep(Duration::from_millis(550)) => break,
        }
    }

    let budget = 40 + 20 + 5;
    assert!(dispatched <= budget, "dispatched {dispatched} > {budget}");
    limiter.stop();
}

#[tokio::test]
async fn test_refill_after_drain() {
    let limiter = RateLimiter::new(50);
    for _ in 0..50 {
        limiter.acquire().await;
    }
    // Empty now; the next acquire must wait for the producer
    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_millis(5));
    limiter.stop();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let limiter = RateLimiter::new(5);
    limiter.stop();
    limiter.stop();
    limiter.stop();
}

#[tokio::test]
async fn test_acquire_returns_after_stop() {
    let limiter = std::sync::Arc::new(RateLimiter::new(1));
    limiter.acquire().await; // drain

    let waiter = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            limiter.acquire().await;
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    limiter.stop();

    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("acquire should unblock after stop")
        .unwrap();
}
