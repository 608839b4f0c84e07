// Error types and error handling module
// This file defines the error taxonomy of the execution pipeline: sizing,
// building, per-provider attempts and order-level abandonment
//
// Numan Thabit 2025 Nov

use std::fmt;
use thiserror::Error;

/// Rejections from the position sizer. The signal is dropped, never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("confidence {confidence} outside [0, 1]")]
    InvalidConfidence { confidence: f64 },
    #[error("confidence {confidence:.3} below minimum {min_confidence:.3}")]
    LowConfidence { confidence: f64, min_confidence: f64 },
    #[error("expected fee {expected_fee:.6} exceeds expected profit {expected_profit:.6}")]
    BelowFeeThreshold {
        expected_fee: f64,
        expected_profit: f64,
    },
    #[error("insufficient balance {balance:.6} for size {required:.6}")]
    InsufficientBalance { balance: f64, required: f64 },
}

/// Failures while turning an order into a transaction payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("no route for {pair}")]
    NoRoute { pair: String },
    #[error("quote is {age_ms}ms old (max {max_age_ms}ms)")]
    StalePrice { age_ms: i64, max_age_ms: i64 },
    #[error("quoted price deviates {deviation_bps:.1}bps (max {max_slippage_bps}bps)")]
    SlippageExceeded {
        deviation_bps: f64,
        max_slippage_bps: u32,
    },
    #[error("quote unavailable: {0}")]
    QuoteUnavailable(String),
}

/// Outcome of a single provider attempt that did not confirm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("provider timed out")]
    ProviderTimeout,
    #[error("provider rejected transaction: {0}")]
    ProviderRejected(String),
    #[error("network failure: {0}")]
    NetworkFailure(String),
}

/// A failed attempt tagged with the provider it was made against.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AttemptFailure {
    pub provider: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: AttemptError,
}

fn serialize_display<S: serde::Serializer>(err: &AttemptError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Wrapper that renders an attempt chain as `p1: err; p2: err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureChain(pub Vec<AttemptFailure>);

impl fmt::Display for FailureChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no attempts");
        }
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Order-level failures. The order is abandoned; the next signal starts fresh.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("payload expired after [{0}]")]
    PayloadExpired(FailureChain),
    #[error("order already in flight for {0}")]
    PairBusy(String),
    #[error("all providers exhausted: [{0}]")]
    ProvidersExhausted(FailureChain),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("dry run: payload signed but not submitted")]
    DryRun,
    #[error("pipeline shutting down")]
    Shutdown,
}

impl PipelineError {
    /// Attempt failures accumulated before abandonment, if any.
    pub fn failures(&self) -> &[AttemptFailure] {
        match self {
            PipelineError::PayloadExpired(chain) | PipelineError::ProvidersExhausted(chain) => {
                &chain.0
            }
            _ => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Sizing(#[from] SizingError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("signing error: {0}")]
    Signing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_chain_lists_every_provider() {
        let chain = FailureChain(vec![
            AttemptFailure {
                provider: "relay".into(),
                error: AttemptError::ProviderTimeout,
            },
            AttemptFailure {
                provider: "rpc-a".into(),
                error: AttemptError::ProviderRejected("blockhash not found".into()),
            },
        ]);
        let rendered = PipelineError::ProvidersExhausted(chain).to_string();
        assert!(rendered.contains("relay: provider timed out"));
        assert!(rendered.contains("rpc-a: provider rejected transaction: blockhash not found"));
    }

    #[test]
    fn failures_empty_for_busy_pair() {
        assert!(PipelineError::PairBusy("SOL-USDC".into()).failures().is_empty());
    }
}
