// Position sizing module
// Converts a signal plus a balance snapshot and the risk configuration into a
// concrete order size. Pure: no I/O, no clocks beyond stamping the order.
//
// Numan Thabit 2025 Nov

use crate::config::{ConfidenceScaling, RiskConfig};
use crate::errors::SizingError;
use crate::types::{Order, Regime, Signal};
use chrono::Utc;
use uuid::Uuid;

/// Sizer bound to one risk configuration.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    risk: RiskConfig,
}

impl PositionSizer {
    /// `risk` is expected to have passed `RiskConfig::validate`.
    pub fn new(risk: RiskConfig) -> Self {
        Self { risk }
    }

    /// Size a signal against a single balance snapshot.
    pub fn size(&self, signal: &Signal, wallet_balance: f64) -> Result<Order, SizingError> {
        size(signal, wallet_balance, &self.risk)
    }
}

/// Unscaled allocation: `balance × base_allocation_fraction`.
pub fn base_size(wallet_balance: f64, risk: &RiskConfig) -> f64 {
    wallet_balance * risk.base_allocation_fraction
}

/// Multiplier for a confidence value at or above `min_confidence`.
pub fn confidence_multiplier(confidence: f64, risk: &RiskConfig) -> f64 {
    match &risk.confidence_scaling {
        ConfidenceScaling::Linear { floor } => {
            let span = 1.0 - risk.min_confidence;
            if span <= f64::EPSILON {
                return 1.0;
            }
            let t = ((confidence - risk.min_confidence) / span).clamp(0.0, 1.0);
            floor + (1.0 - floor) * t
        }
        ConfidenceScaling::Stepped { steps } => steps
            .iter()
            .rev()
            .find(|step| confidence >= step.threshold)
            .or_else(|| steps.first())
            .map(|step| step.multiplier)
            .unwrap_or(1.0),
    }
}

pub fn regime_multiplier(regime: Regime, risk: &RiskConfig) -> f64 {
    risk.regime_multipliers.multiplier(regime)
}

/// Round down to a whole number of lots.
fn quantize_to_lot(size: f64, lot_size: Option<f64>) -> f64 {
    match lot_size {
        Some(lot) if lot > 0.0 => (size / lot).floor() * lot,
        _ => size,
    }
}

pub fn size(
    signal: &Signal,
    wallet_balance: f64,
    risk: &RiskConfig,
) -> Result<Order, SizingError> {
    if !(0.0..=1.0).contains(&signal.confidence) {
        return Err(SizingError::InvalidConfidence {
            confidence: signal.confidence,
        });
    }
    if signal.confidence < risk.min_confidence {
        return Err(SizingError::LowConfidence {
            confidence: signal.confidence,
            min_confidence: risk.min_confidence,
        });
    }
    if !wallet_balance.is_finite() || wallet_balance <= 0.0 {
        return Err(SizingError::InsufficientBalance {
            balance: wallet_balance,
            required: risk.min_trade_size,
        });
    }

    let raw = base_size(wallet_balance, risk)
        * confidence_multiplier(signal.confidence, risk)
        * regime_multiplier(signal.regime, risk);
    let clamped = raw.max(risk.min_trade_size).min(risk.max_trade_size);
    let sized = quantize_to_lot(clamped, risk.lot_size);

    let ceiling = wallet_balance * risk.max_allocation_fraction;
    if sized <= 0.0 || sized > ceiling {
        return Err(SizingError::InsufficientBalance {
            balance: wallet_balance,
            required: sized,
        });
    }

    let expected_profit =
        sized * signal.reference_price * f64::from(risk.profit_target_bps) / 10_000.0;
    if risk.expected_fee_quote >= expected_profit {
        return Err(SizingError::BelowFeeThreshold {
            expected_fee: risk.expected_fee_quote,
            expected_profit,
        });
    }

    Ok(Order {
        id: Uuid::new_v4(),
        pair: signal.pair.clone(),
        direction: signal.direction,
        size: sized,
        reference_price: signal.reference_price,
        max_slippage_bps: risk.max_slippage_bps,
        min_confidence_at_creation: risk.min_confidence,
        confidence: signal.confidence,
        regime: signal.regime,
        created_at: Utc::now(),
    })
}
