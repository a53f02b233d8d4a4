//! Per-Config request admission: token bucket plus connection cap
//!
//! Every worker pool that talks to the same backend shares one
//! [`RequestGate`]. Callers never coordinate with each other; the gate
//! serializes access internally.

use std::time::Duration;

use o2_common::{Error, Result};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

use crate::config::RateLimit;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at `refill_per_sec`
#[derive(Debug)]
pub struct TokenBucket {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl TokenBucket {
    /// Bucket that starts full with `burst` tokens
    pub fn new(limit: RateLimit) -> Self {
        let capacity = f64::from(limit.burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: f64::from(limit.requests_per_second.max(1)),
        }
    }

    /// Take one token if available, otherwise return how long until one is
    async fn take(&self) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut bucket = self.bucket.lock().await;
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (1.0 - bucket.tokens) / self.refill_per_sec,
            ))
        }
    }

    /// Take one token without waiting
    pub async fn try_acquire(&self) -> bool {
        self.take().await.is_ok()
    }

    /// Wait for one token
    pub async fn acquire(&self) {
        while let Err(wait) = self.take().await {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Rate limiter and connection cap for one Config
#[derive(Debug)]
pub struct RequestGate {
    bucket: TokenBucket,
    connections: Semaphore,
}

impl RequestGate {
    /// Gate allowing `limit` requests/s and `max_connections` in flight
    pub fn new(limit: RateLimit, max_connections: u32) -> Self {
        Self {
            bucket: TokenBucket::new(limit),
            connections: Semaphore::new(max_connections.max(1) as usize),
        }
    }

    /// Wait for a rate token and a connection slot
    ///
    /// The slot is held until the returned permit is dropped. Fails once the
    /// gate is closed.
    pub async fn admit(&self) -> Result<SemaphorePermit<'_>> {
        let permit = self.connections.acquire().await.map_err(|_| {
            Error::remote_transient("admit", "backend client was disposed", None)
        })?;
        self.bucket.acquire().await;
        Ok(permit)
    }

    /// Reject all current and future waiters
    pub fn close(&self) {
        self.connections.close();
    }

    /// Connection slots currently free
    pub fn available_connections(&self) -> usize {
        self.connections.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(rps: u32, burst: u32) -> RateLimit {
        RateLimit {
            requests_per_second: rps,
            burst,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_throttle() {
        let bucket = TokenBucket::new(limit(2, 3));
        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        assert!(!bucket.try_acquire().await);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.try_acquire().await);
        assert!(!bucket.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(limit(10, 1));
        bucket.acquire().await;

        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_burst() {
        let bucket = TokenBucket::new(limit(100, 2));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        assert!(!bucket.try_acquire().await);
    }

    #[tokio::test]
    async fn test_gate_caps_connections() {
        let gate = RequestGate::new(limit(100, 100), 2);
        let a = gate.admit().await.unwrap();
        let _b = gate.admit().await.unwrap();
        assert_eq!(gate.available_connections(), 0);
        drop(a);
        assert_eq!(gate.available_connections(), 1);
    }

    #[tokio::test]
    async fn test_closed_gate_rejects_callers() {
        let gate = RequestGate::new(limit(100, 100), 1);
        gate.close();
        let err = gate.admit().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
