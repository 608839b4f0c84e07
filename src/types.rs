// Core data model for the signal-to-execution pipeline
// Signals come from the strategy side, orders from the sizer, payloads from the
// builder, attempts from the router
//
// Numan Thabit 2025 Nov

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => f.write_str("BUY"),
            Direction::Sell => f.write_str("SELL"),
        }
    }
}

/// Market regime reported alongside a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    /// Any regime label this build does not recognise.
    #[serde(other)]
    Unknown,
}

impl Regime {
    /// Regimes that must carry an explicit multiplier.
    pub const KNOWN: [Regime; 4] = [
        Regime::TrendingUp,
        Regime::TrendingDown,
        Regime::Ranging,
        Regime::Volatile,
    ];
}

/// Directional recommendation emitted by a strategy. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub pair: String,
    pub direction: Direction,
    pub reference_price: f64,
    pub confidence: f64,
    pub regime: Regime,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Concrete sized trade derived from a signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub pair: String,
    pub direction: Direction,
    /// Base-asset units.
    pub size: f64,
    pub reference_price: f64,
    pub max_slippage_bps: u32,
    pub min_confidence_at_creation: f64,
    pub confidence: f64,
    pub regime: Regime,
    pub created_at: DateTime<Utc>,
}

/// Terminal status; an order is pending for as long as its pair lease is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Executed,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeParams {
    /// Per-compute-unit priority fee in native micro units.
    pub priority_fee: u64,
    /// Relay tip in native units.
    pub tip: u64,
}

/// Unsigned, fee-configured transaction ready for signing.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPayload {
    pub id: Uuid,
    pub order_id: Uuid,
    pub pair: String,
    pub direction: Direction,
    pub size: f64,
    pub quoted_price: f64,
    /// Opaque route/instruction bytes from the route collaborator.
    pub instructions: Vec<u8>,
    pub recent_blockhash: String,
    pub fees: FeeParams,
    pub built_at: Instant,
    pub expires_at: Instant,
}

impl TransactionPayload {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Canonical bytes covered by the signature.
    pub fn message_bytes(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(self.instructions.len() + 96);
        msg.extend_from_slice(self.order_id.as_bytes());
        msg.extend_from_slice(self.recent_blockhash.as_bytes());
        msg.extend_from_slice(&self.fees.priority_fee.to_le_bytes());
        msg.extend_from_slice(&self.fees.tip.to_le_bytes());
        msg.extend_from_slice(&self.instructions);
        msg
    }
}

/// Payload plus the signature that seals it. The payload can no longer change.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub payload: Arc<TransactionPayload>,
    /// Hex signature, also the transaction identifier providers report back.
    pub signature: String,
    /// Wire bytes handed to providers.
    pub wire: Vec<u8>,
}

impl SignedPayload {
    pub fn expires_at(&self) -> Instant {
        self.payload.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Pending,
    Confirmed,
    Failed,
    TimedOut,
}

/// One submission of an order's payload through one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionAttempt {
    pub order_id: Uuid,
    pub provider_id: String,
    pub submitted_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub signature: Option<String>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ExecutionAttempt {
    pub fn pending(order_id: Uuid, provider_id: &str) -> Self {
        Self {
            order_id,
            provider_id: provider_id.to_string(),
            submitted_at: Utc::now(),
            status: AttemptStatus::Pending,
            signature: None,
            latency_ms: 0,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != AttemptStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_regime_deserializes_to_catch_all() {
        let raw = r#"{"pair":"SOL-USDC","direction":"BUY","reference_price":150.0,
            "confidence":0.9,"regime":"SIDEWAYS_CHOP"}"#;
        let signal: Signal = serde_json::from_str(raw).unwrap();
        assert_eq!(signal.regime, Regime::Unknown);
        assert_eq!(signal.direction, Direction::Buy);
    }

    #[test]
    fn known_regime_labels_round_trip() {
        let signal: Signal = serde_json::from_str(
            r#"{"pair":"SOL-USDC","direction":"SELL","reference_price":1.0,
                "confidence":0.5,"regime":"TRENDING_DOWN","timestamp":"2025-11-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(signal.regime, Regime::TrendingDown);
        assert_eq!(signal.direction, Direction::Sell);
    }
}
