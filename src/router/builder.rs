// Transaction builder
// This file turns a sized order into an unsigned, fee-configured payload:
// quote a route, reject stale or slipped prices, anchor to a recent blockhash,
// price the tip, and stamp a validity window
//
// Numan Thabit 2025 Nov

use crate::config::{BuilderConfig, TipStrategy};
use crate::errors::{BuildError, ExecError};
use crate::transport::BlockhashSource;
use crate::types::{FeeParams, Order, TransactionPayload};
use crate::venues::{Quote, QuoteRequest, RouteQuoter};
use backoff::{future::retry, ExponentialBackoff};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct TransactionBuilder {
    quoter: Arc<dyn RouteQuoter>,
    blockhash: Arc<dyn BlockhashSource>,
    config: BuilderConfig,
}

impl TransactionBuilder {
    pub fn new(
        quoter: Arc<dyn RouteQuoter>,
        blockhash: Arc<dyn BlockhashSource>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            quoter,
            blockhash,
            config,
        }
    }

    /// Build a payload for `order`. Staleness and slippage are never retried;
    /// the next signal gets a fresh quote.
    #[tracing::instrument(skip_all, fields(order_id = %order.id, pair = %order.pair))]
    pub async fn build(&self, order: &Order) -> Result<TransactionPayload, BuildError> {
        let quote = self
            .fetch_quote(&QuoteRequest::from(order))
            .await?
            .ok_or_else(|| BuildError::NoRoute {
                pair: order.pair.clone(),
            })?;

        let age = Utc::now() - quote.quoted_at;
        let max_age = self.config.max_quote_age();
        if age.to_std().is_ok_and(|age| age > max_age) {
            return Err(BuildError::StalePrice {
                age_ms: age.num_milliseconds(),
                max_age_ms: max_age.as_millis() as i64,
            });
        }

        let deviation = deviation_bps(order.reference_price, quote.quoted_price);
        if deviation > order.max_slippage_bps as f64 {
            return Err(BuildError::SlippageExceeded {
                deviation_bps: deviation,
                max_slippage_bps: order.max_slippage_bps,
            });
        }

        let recent_blockhash = self
            .blockhash
            .recent_blockhash()
            .await
            .map_err(|e| BuildError::QuoteUnavailable(format!("blockhash: {e}")))?;

        let fees = FeeParams {
            priority_fee: self.config.priority_fee,
            tip: tip_for(&self.config.tip, order.size, self.config.native_units_per_base),
        };
        let built_at = Instant::now();
        debug!(
            quoted_price = quote.quoted_price,
            deviation_bps = deviation,
            tip = fees.tip,
            "payload built"
        );

        Ok(TransactionPayload {
            id: Uuid::new_v4(),
            order_id: order.id,
            pair: order.pair.clone(),
            direction: order.direction,
            size: order.size,
            quoted_price: quote.quoted_price,
            instructions: quote.route,
            recent_blockhash,
            fees,
            built_at,
            expires_at: built_at + self.config.validity_window(),
        })
    }

    /// Quote with bounded retries on transport errors only.
    async fn fetch_quote(&self, req: &QuoteRequest) -> Result<Option<Quote>, BuildError> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(250),
            max_elapsed_time: Some(Duration::from_millis(
                self.config.quote_retry_max_elapsed_ms,
            )),
            multiplier: 2.0,
            ..Default::default()
        };

        retry(backoff, || async {
            self.quoter.quote(req).await.map_err(|e| match e {
                ExecError::Transport(_) => {
                    warn!(error = %e, "quote failed, retrying");
                    backoff::Error::transient(e)
                }
                other => backoff::Error::permanent(other),
            })
        })
        .await
        .map_err(|e| BuildError::QuoteUnavailable(e.to_string()))
    }
}

/// Absolute deviation of `quoted` from `reference`, in basis points.
pub fn deviation_bps(reference: f64, quoted: f64) -> f64 {
    if reference <= 0.0 {
        return f64::INFINITY;
    }
    (quoted - reference).abs() / reference * 10_000.0
}

/// Relay tip in native units for an order of `size` base units.
pub fn tip_for(strategy: &TipStrategy, size: f64, native_units_per_base: f64) -> u64 {
    match *strategy {
        TipStrategy::Flat { tip } => tip,
        TipStrategy::Proportional {
            tip_bps,
            min_tip,
            max_tip,
        } => {
            let raw = size * native_units_per_base * tip_bps as f64 / 10_000.0;
            (raw.max(0.0) as u64).clamp(min_tip, max_tip)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Regime};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedQuoter {
        quote: Option<Quote>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RouteQuoter for FixedQuoter {
        async fn quote(&self, _req: &QuoteRequest) -> Result<Option<Quote>, ExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.quote.clone())
        }
    }

    /// Fails with transport errors `failures` times, then answers.
    struct FlakyQuoter {
        failures: Mutex<usize>,
        quote: Quote,
    }

    #[async_trait]
    impl RouteQuoter for FlakyQuoter {
        async fn quote(&self, _req: &QuoteRequest) -> Result<Option<Quote>, ExecError> {
            let mut left = self.failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(ExecError::Transport("connection reset".into()));
            }
            Ok(Some(self.quote.clone()))
        }
    }

    struct Blockhashes(AtomicUsize);

    #[async_trait]
    impl BlockhashSource for Blockhashes {
        async fn recent_blockhash(&self) -> Result<String, ExecError> {
            Ok(format!("bh-{}", self.0.fetch_add(1, Ordering::SeqCst)))
        }
    }

    fn order(reference_price: f64, size: f64) -> Order {
        Order {
            id: Uuid::new_v4(),
            pair: "SOL-USDC".into(),
            direction: Direction::Buy,
            size,
            reference_price,
            max_slippage_bps: 100,
            min_confidence_at_creation: 0.6,
            confidence: 0.9,
            regime: Regime::Ranging,
            created_at: Utc::now(),
        }
    }

    fn quote(price: f64) -> Quote {
        Quote {
            route: vec![9, 9, 9],
            quoted_price: price,
            quoted_at: Utc::now(),
        }
    }

    fn builder(quoter: Arc<dyn RouteQuoter>) -> TransactionBuilder {
        TransactionBuilder::new(
            quoter,
            Arc::new(Blockhashes(AtomicUsize::new(0))),
            BuilderConfig::default(),
        )
    }

    fn fixed(q: Option<Quote>) -> Arc<FixedQuoter> {
        Arc::new(FixedQuoter {
            quote: q,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn builds_payload_within_validity_window() {
        let b = builder(fixed(Some(quote(150.5))));
        let o = order(150.0, 5.5);
        let p = b.build(&o).await.unwrap();
        assert_eq!(p.order_id, o.id);
        assert_eq!(p.instructions, vec![9, 9, 9]);
        assert_eq!(p.quoted_price, 150.5);
        assert_eq!(p.fees.priority_fee, 10_000);
        assert_eq!(p.expires_at - p.built_at, Duration::from_millis(20_000));
        assert!(!p.is_expired(Instant::now()));
    }

    #[tokio::test]
    async fn no_route_is_rejected() {
        let b = builder(fixed(None));
        assert_eq!(
            b.build(&order(150.0, 1.0)).await,
            Err(BuildError::NoRoute {
                pair: "SOL-USDC".into()
            })
        );
    }

    #[tokio::test]
    async fn stale_quote_is_rejected() {
        let mut q = quote(150.0);
        q.quoted_at = Utc::now() - chrono::Duration::seconds(5);
        let b = builder(fixed(Some(q)));
        match b.build(&order(150.0, 1.0)).await {
            Err(BuildError::StalePrice { age_ms, max_age_ms }) => {
                assert!(age_ms >= 5_000);
                assert_eq!(max_age_ms, 2_000);
            }
            other => panic!("expected stale price, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slippage_boundary() {
        // 1% of 150 is exactly the 100bps budget
        let b = builder(fixed(Some(quote(151.5))));
        assert!(b.build(&order(150.0, 1.0)).await.is_ok());

        let b = builder(fixed(Some(quote(152.0))));
        assert!(matches!(
            b.build(&order(150.0, 1.0)).await,
            Err(BuildError::SlippageExceeded {
                max_slippage_bps: 100,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn rebuild_differs_only_in_identity_and_timing() {
        let q = quote(150.2);
        let b = builder(fixed(Some(q)));
        let o = order(150.0, 3.0);
        let first = b.build(&o).await.unwrap();
        let mut second = b.build(&o).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_ne!(first.recent_blockhash, second.recent_blockhash);

        second.id = first.id;
        second.recent_blockhash = first.recent_blockhash.clone();
        second.built_at = first.built_at;
        second.expires_at = first.expires_at;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let quoter = Arc::new(FlakyQuoter {
            failures: Mutex::new(2),
            quote: quote(150.0),
        });
        let b = builder(quoter);
        assert!(b.build(&order(150.0, 1.0)).await.is_ok());
    }

    #[tokio::test]
    async fn persistent_transport_failure_is_quote_unavailable() {
        let quoter = Arc::new(FlakyQuoter {
            failures: Mutex::new(usize::MAX),
            quote: quote(150.0),
        });
        let mut cfg = BuilderConfig::default();
        cfg.quote_retry_max_elapsed_ms = 120;
        let b = TransactionBuilder::new(quoter, Arc::new(Blockhashes(AtomicUsize::new(0))), cfg);
        assert!(matches!(
            b.build(&order(150.0, 1.0)).await,
            Err(BuildError::QuoteUnavailable(_))
        ));
    }

    #[test]
    fn proportional_tip_is_clamped() {
        let strategy = TipStrategy::Proportional {
            tip_bps: 5,
            min_tip: 1_000,
            max_tip: 1_000_000,
        };
        // 2 SOL * 1e9 * 5 / 10_000 = 1_000_000
        assert_eq!(tip_for(&strategy, 2.0, 1e9), 1_000_000);
        assert_eq!(tip_for(&strategy, 0.5, 1e9), 250_000);
        assert_eq!(tip_for(&strategy, 1e-9, 1e9), 1_000);
        assert_eq!(tip_for(&strategy, 500.0, 1e9), 1_000_000);
        assert_eq!(tip_for(&TipStrategy::Flat { tip: 42 }, 500.0, 1e9), 42);
    }
}
