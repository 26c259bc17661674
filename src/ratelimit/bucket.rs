//! Token bucket with continuous refill.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{HotpathError, Result};

/// Capacity and refill rate of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum number of tokens held
    pub capacity: f64,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl BucketConfig {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }

    /// Reject parameters that would make waits undefined.
    pub fn validate(&self) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity < 0.0 {
            return Err(HotpathError::Config(format!(
                "capacity must be a finite number >= 0, got {}",
                self.capacity
            )));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(HotpathError::Config(format!(
                "refill_rate must be a finite number > 0, got {}",
                self.refill_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    /// Add tokens for the time since the last refill, capped at `capacity`.
    ///
    /// A clock that has not advanced leaves the state untouched.
    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        self.tokens = (self.tokens + elapsed.as_secs_f64() * refill_rate).min(capacity);
        self.last_refill = now;
    }
}

/// Admission control for one rate-limited resource.
///
/// `consume` delays, it never rejects. Its fairness is soft: the balance is
/// checked before waiting and the deduction after waiting is not re-checked,
/// so concurrent waiters on one bucket can each wait only for their own
/// deficit and together admit more than `capacity` over a short window. The
/// post-wait deduction is clamped at zero. This shapes a single caller's
/// stream of requests; it is not a strict capacity bound under contention.
#[derive(Debug)]
pub struct TokenBucket {
    name: String,
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket. `config` is assumed valid.
    pub fn new(name: impl Into<String>, config: BucketConfig) -> Self {
        Self {
            name: name.into(),
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn config(&self) -> BucketConfig {
        BucketConfig::new(self.capacity, self.refill_rate)
    }

    /// Tokens available right now.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(self.capacity, self.refill_rate, Instant::now());
        state.tokens
    }

    /// Take `n` tokens, waiting for the shortfall to refill if needed.
    ///
    /// Returns immediately when `n` tokens are available or `n` is not
    /// positive. The wait cannot be cancelled; see
    /// [`consume_or_cancel`](Self::consume_or_cancel).
    pub async fn consume(&self, n: f64) {
        if let Some(wait) = self.take_or_wait_time(n) {
            self.log_wait(n, wait);
            tokio::time::sleep(wait).await;
            self.settle(n);
        }
    }

    /// `consume(1.0)`.
    pub async fn acquire(&self) {
        self.consume(1.0).await
    }

    /// Like [`consume`](Self::consume), but gives up when `cancel` resolves
    /// first. A cancelled call deducts nothing.
    pub async fn consume_or_cancel<F>(&self, n: f64, cancel: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Some(wait) = self.take_or_wait_time(n) else {
            return Ok(());
        };
        self.log_wait(n, wait);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                self.settle(n);
                Ok(())
            }
            _ = cancel => {
                debug!(bucket = %self.name, tokens = n, "Token wait cancelled");
                Err(HotpathError::Cancelled(format!(
                    "consume({}) on bucket {}",
                    n, self.name
                )))
            }
        }
    }

    /// Take `n` tokens only if they are available now.
    pub fn try_consume(&self, n: f64) -> bool {
        if !(n > 0.0) {
            return true;
        }
        let mut state = self.state.lock();
        state.refill(self.capacity, self.refill_rate, Instant::now());
        if n <= state.tokens {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Deduct `n` if available and return `None`, otherwise return how long
    /// the shortfall takes to refill.
    fn take_or_wait_time(&self, n: f64) -> Option<Duration> {
        if !(n > 0.0) {
            return None;
        }

        let mut state = self.state.lock();
        state.refill(self.capacity, self.refill_rate, Instant::now());

        if n <= state.tokens {
            state.tokens -= n;
            trace!(bucket = %self.name, tokens = n, remaining = state.tokens, "Tokens consumed");
            return None;
        }

        let deficit = n - state.tokens;
        let wait = Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX);
        Some(wait)
    }

    /// Post-wait deduction: refill, subtract, clamp. Deliberately unchecked.
    fn settle(&self, n: f64) {
        let mut state = self.state.lock();
        state.refill(self.capacity, self.refill_rate, Instant::now());
        state.tokens = (state.tokens - n).max(0.0);
    }

    fn log_wait(&self, n: f64, wait: Duration) {
        debug!(
            bucket = %self.name,
            tokens = n,
            wait_ms = wait.as_millis() as u64,
            "Waiting for tokens"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_config_validation() {
        assert!(BucketConfig::new(10.0, 5.0).validate().is_ok());
        assert!(BucketConfig::new(0.0, 1.0).validate().is_ok());
        assert!(BucketConfig::new(-1.0, 1.0).validate().is_err());
        assert!(BucketConfig::new(10.0, 0.0).validate().is_err());
        assert!(BucketConfig::new(f64::NAN, 1.0).validate().is_err());
        assert!(BucketConfig::new(10.0, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_refill_ignores_clock_that_did_not_advance() {
        let start = Instant::now();
        let mut state = BucketState {
            tokens: 2.0,
            last_refill: start + Duration::from_secs(5),
        };

        state.refill(10.0, 1.0, start);

        assert_eq!(state.tokens, 2.0);
        assert_eq!(state.last_refill, start + Duration::from_secs(5));
    }

    #[test]
    fn test_refill_is_capped() {
        let start = Instant::now();
        let mut state = BucketState {
            tokens: 0.0,
            last_refill: start,
        };

        for secs in [1u64, 3, 10, 3600] {
            state.refill(4.0, 2.0, start + Duration::from_secs(secs));
            assert!(state.tokens <= 4.0);
        }
        assert_eq!(state.tokens, 4.0);
    }

    #[test]
    fn test_refill_is_continuous() {
        let start = Instant::now();
        let mut state = BucketState {
            tokens: 0.0,
            last_refill: start,
        };

        state.refill(10.0, 4.0, start + Duration::from_millis(250));

        assert!((state.tokens - 1.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_within_balance_does_not_wait() {
        let bucket = TokenBucket::new("coingecko", BucketConfig::new(10.0, 5.0));
        let start = Instant::now();

        bucket.consume(4.0).await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!((bucket.available() - 6.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_waits_for_deficit() {
        let bucket = TokenBucket::new("coingecko", BucketConfig::new(10.0, 5.0));
        let start = Instant::now();

        bucket.consume(15.0).await;

        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(bucket.available(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_paces_sequential_calls() {
        let bucket = TokenBucket::new("binance", BucketConfig::new(2.0, 2.0));
        let start = Instant::now();

        for _ in 0..6 {
            bucket.acquire().await;
        }

        // Two from the initial balance, four more at two per second.
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_are_not_serialized() {
        let bucket = Arc::new(TokenBucket::new("shared", BucketConfig::new(10.0, 10.0)));
        bucket.consume(10.0).await;
        let start = Instant::now();

        futures::future::join_all((0..2).map(|_| {
            let bucket = Arc::clone(&bucket);
            async move { bucket.consume(10.0).await }
        }))
        .await;

        // Each waiter only waited for its own deficit.
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(bucket.available(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_available_refills_up_to_capacity() {
        let bucket = TokenBucket::new("b", BucketConfig::new(3.0, 1.0));
        bucket.consume(3.0).await;
        assert_eq!(bucket.available(), 0.0);

        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(bucket.available(), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_positive_consume_is_noop() {
        let bucket = TokenBucket::new("b", BucketConfig::new(1.0, 1.0));
        bucket.consume(0.0).await;
        bucket.consume(-3.0).await;
        bucket.consume(f64::NAN).await;
        assert_eq!(bucket.available(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_consume() {
        let bucket = TokenBucket::new("b", BucketConfig::new(2.0, 1.0));
        assert!(bucket.try_consume(2.0));
        assert!(!bucket.try_consume(1.0));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.try_consume(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_or_cancel_cancelled_deducts_nothing() {
        let bucket = TokenBucket::new("b", BucketConfig::new(5.0, 1.0));
        bucket.consume(5.0).await;

        let cancel = tokio::time::sleep(Duration::from_secs(1));
        let result = bucket.consume_or_cancel(4.0, cancel).await;

        assert!(matches!(result, Err(HotpathError::Cancelled(_))));
        assert!((bucket.available() - 1.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_or_cancel_completes_before_cancel() {
        let bucket = TokenBucket::new("b", BucketConfig::new(5.0, 5.0));
        bucket.consume(5.0).await;

        let cancel = std::future::pending::<()>();
        let result = bucket.consume_or_cancel(5.0, cancel).await;

        assert!(result.is_ok());
        assert_eq!(bucket.available(), 0.0);
    }

    #[test]
    fn test_zero_capacity_bucket_never_holds_tokens() {
        let bucket = TokenBucket::new("closed", BucketConfig::new(0.0, 1.0));
        assert!(!bucket.try_consume(1.0));
        assert_eq!(bucket.available(), 0.0);
    }
}
