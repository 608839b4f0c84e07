// Control plane: admission control and per-pair leases
//
// Global concurrency and rate limiting in front of the router, and the lease
// that keeps at most one order in flight per trading pair.
//
// Numan Thabit 2025 Nov

use crate::errors::PipelineError;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone)]
pub struct AdmissionControl {
    max_inflight: Arc<Semaphore>,
    // Sliding 1s window; None disables rate limiting
    limiter: Option<Arc<Mutex<RateLimiter>>>,
}

struct RateLimiter {
    rate_per_sec: u32,
    timestamps: VecDeque<Instant>,
    window: Duration,
}

impl RateLimiter {
    /// Time until a slot frees up, or None if one was taken.
    fn try_take(&mut self, now: Instant) -> Option<Duration> {
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        if (self.timestamps.len() as u32) < self.rate_per_sec {
            self.timestamps.push_back(now);
            return None;
        }
        self.timestamps
            .front()
            .map(|front| self.window.saturating_sub(now.duration_since(*front)))
    }
}

impl AdmissionControl {
    pub fn new(max_inflight: usize, rate_per_sec: Option<u32>) -> Self {
        let limiter = rate_per_sec.filter(|r| *r > 0).map(|rate_per_sec| {
            Arc::new(Mutex::new(RateLimiter {
                rate_per_sec,
                timestamps: VecDeque::with_capacity(rate_per_sec.min(1024) as usize),
                window: Duration::from_secs(1),
            }))
        });
        Self {
            max_inflight: Arc::new(Semaphore::new(max_inflight.max(1))),
            limiter,
        }
    }

    /// No global limits beyond what the per-pair lease already imposes.
    pub fn unbounded() -> Self {
        Self::new(Semaphore::MAX_PERMITS, None)
    }

    /// Acquire an admission permit respecting max inflight and rate limit.
    pub async fn acquire(&self) -> Result<AdmissionPermit, PipelineError> {
        if let Some(limiter) = &self.limiter {
            loop {
                let wait = limiter.lock().await.try_take(Instant::now());
                match wait {
                    None => break,
                    Some(wait) => {
                        debug!(wait_ms = wait.as_millis() as u64, "rate limited");
                        tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                    }
                }
            }
        }
        let permit = self
            .max_inflight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Shutdown)?;
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Refuse all further admissions.
    pub fn close(&self) {
        self.max_inflight.close();
    }

    pub fn available(&self) -> usize {
        self.max_inflight.available_permits()
    }
}

pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// One lease per trading pair; held for the whole life of an order.
#[derive(Clone, Default)]
pub struct PairLeases {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

pub struct PairLease {
    pair: String,
    _guard: OwnedMutexGuard<()>,
}

impl PairLease {
    pub fn pair(&self) -> &str {
        &self.pair
    }
}

impl PairLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `pair` without waiting.
    pub async fn try_acquire(&self, pair: &str) -> Result<PairLease, PipelineError> {
        let slot = {
            let mut inner = self.inner.lock().await;
            inner.entry(pair.to_string()).or_default().clone()
        };
        let guard = slot
            .try_lock_owned()
            .map_err(|_| PipelineError::PairBusy(pair.to_string()))?;
        Ok(PairLease {
            pair: pair.to_string(),
            _guard: guard,
        })
    }

    /// Pairs with an order currently in flight.
    pub async fn in_flight(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut pairs: Vec<String> = inner
            .iter()
            .filter(|(_, slot)| slot.try_lock().is_err())
            .map(|(pair, _)| pair.clone())
            .collect();
        pairs.sort();
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_lease_for_same_pair_is_busy() {
        let leases = PairLeases::new();
        let lease = leases.try_acquire("SOL-USDC").await.unwrap();
        assert_eq!(lease.pair(), "SOL-USDC");
        assert!(matches!(
            leases.try_acquire("SOL-USDC").await,
            Err(PipelineError::PairBusy(pair)) if pair == "SOL-USDC"
        ));
        // Other pairs are independent.
        let _other = leases.try_acquire("ETH-USDC").await.unwrap();
        assert_eq!(leases.in_flight().await, vec!["ETH-USDC", "SOL-USDC"]);

        drop(lease);
        assert!(leases.try_acquire("SOL-USDC").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_spreads_admissions_over_the_window() {
        let admission = AdmissionControl::new(8, Some(2));
        let start = Instant::now();
        for _ in 0..3 {
            drop(admission.acquire().await.unwrap());
        }
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn unset_rate_never_waits() {
        let admission = AdmissionControl::new(8, None);
        let start = Instant::now();
        for _ in 0..500 {
            drop(admission.acquire().await.unwrap());
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn inflight_cap_and_close() {
        let admission = AdmissionControl::new(1, None);
        let permit = admission.acquire().await.unwrap();
        assert_eq!(admission.available(), 0);
        drop(permit);
        assert_eq!(admission.available(), 1);

        admission.close();
        assert!(matches!(
            admission.acquire().await,
            Err(PipelineError::Shutdown)
        ));
    }
}
