// Configuration management module
// This file handles loading and parsing of configuration settings
// from an optional config file layered under environment variables
//
// Numan Thabit 2025 Nov

use crate::types::Regime;
use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// JSON-RPC endpoint used for blockhash and balance reads
    pub rpc_endpoint: Url,
    /// Quote/route API base, e.g. https://quote-api.jup.ag/v6
    pub quote_endpoint: Url,
    /// Address of the trading wallet
    pub wallet_address: String,
    /// Hex-encoded 32-byte Ed25519 private key (do not use in prod; replace with HSM)
    pub secret_key_hex: String,
    /// Address the HTTP API binds to
    #[serde(default = "default_api_addr")]
    pub api_addr: String,
    /// Sign but never submit
    #[serde(default)]
    pub dry_run: bool,
    /// Concurrency control across all pairs
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Submissions per second across all pairs; unset disables rate limiting
    pub rate_per_sec: Option<u32>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Relay/RPC providers in fallback order hints (priority decides)
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

fn default_api_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_inflight() -> usize {
    16
}

impl AppConfig {
    /// File named by `ULTRA_EXEC_CONFIG` (default `config/exec`, optional), then env with `__` nesting.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("ULTRA_EXEC_CONFIG").unwrap_or_else(|_| "config/exec".to_string());
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        let app: Self = cfg.try_deserialize()?;
        app.validate().context("validate configuration")?;
        Ok(app)
    }

    /// Fail fast on anything that would otherwise surface mid-trade.
    pub fn validate(&self) -> Result<()> {
        self.risk.validate().context("risk")?;
        self.builder.validate().context("builder")?;
        ensure!(self.router.attempt_timeout_ms > 0, "router.attempt_timeout_ms must be > 0");
        self.health.validate().context("health")?;
        ensure!(self.pipeline.queue_capacity > 0, "pipeline.queue_capacity must be > 0");
        ensure!(self.max_inflight > 0, "max_inflight must be > 0");
        ensure!(!self.providers.is_empty(), "at least one provider must be configured");
        let mut seen = HashSet::new();
        for provider in &self.providers {
            ensure!(!provider.id.is_empty(), "provider id must not be empty");
            if !seen.insert(provider.id.as_str()) {
                bail!("duplicate provider id: {}", provider.id);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of wallet balance a full-confidence signal may use
    pub base_allocation_fraction: f64,
    /// Hard ceiling on the fraction of balance one order may take
    pub max_allocation_fraction: f64,
    pub min_confidence: f64,
    pub confidence_scaling: ConfidenceScaling,
    pub regime_multipliers: RegimeTable,
    pub min_trade_size: f64,
    pub max_trade_size: f64,
    /// Round sizes down to this lot (base units)
    pub lot_size: Option<f64>,
    pub max_slippage_bps: u32,
    /// Profit target used for the fee-threshold check
    pub profit_target_bps: u32,
    /// Expected all-in fee per trade, quote units
    pub expected_fee_quote: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_allocation_fraction: 0.5,
            max_allocation_fraction: 0.9,
            min_confidence: 0.6,
            confidence_scaling: ConfidenceScaling::Stepped {
                steps: vec![
                    ConfidenceStep {
                        threshold: 0.6,
                        multiplier: 0.6,
                    },
                    ConfidenceStep {
                        threshold: 0.7,
                        multiplier: 0.8,
                    },
                    ConfidenceStep {
                        threshold: 0.8,
                        multiplier: 1.0,
                    },
                ],
            },
            regime_multipliers: RegimeTable::default(),
            min_trade_size: 0.01,
            max_trade_size: 100.0,
            lot_size: None,
            max_slippage_bps: 100,
            profit_target_bps: 50,
            expected_fee_quote: 0.01,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| v.is_finite() && v > 0.0 && v <= 1.0;
        ensure!(
            in_unit(self.base_allocation_fraction),
            "base_allocation_fraction must be in (0, 1]"
        );
        ensure!(
            in_unit(self.max_allocation_fraction),
            "max_allocation_fraction must be in (0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&self.min_confidence),
            "min_confidence must be in [0, 1]"
        );
        ensure!(
            self.min_trade_size > 0.0 && self.min_trade_size <= self.max_trade_size,
            "min_trade_size must be positive and <= max_trade_size"
        );
        if let Some(lot) = self.lot_size {
            ensure!(lot.is_finite() && lot > 0.0, "lot_size must be positive");
        }
        ensure!(self.expected_fee_quote >= 0.0, "expected_fee_quote must be >= 0");
        self.confidence_scaling.validate()?;
        self.regime_multipliers.validate()?;
        Ok(())
    }
}

/// Monotonic mapping from confidence to a size multiplier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConfidenceScaling {
    /// `floor` at min_confidence rising linearly to 1.0 at confidence 1.0.
    Linear { floor: f64 },
    /// Highest threshold not above the confidence wins.
    Stepped { steps: Vec<ConfidenceStep> },
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ConfidenceStep {
    pub threshold: f64,
    pub multiplier: f64,
}

impl ConfidenceScaling {
    pub fn validate(&self) -> Result<()> {
        match self {
            ConfidenceScaling::Linear { floor } => {
                ensure!(
                    floor.is_finite() && *floor >= 0.0 && *floor <= 1.0,
                    "linear floor must be in [0, 1]"
                );
            }
            ConfidenceScaling::Stepped { steps } => {
                ensure!(!steps.is_empty(), "stepped confidence table is empty");
                for pair in steps.windows(2) {
                    ensure!(
                        pair[1].threshold > pair[0].threshold,
                        "confidence thresholds must be strictly increasing"
                    );
                    ensure!(
                        pair[1].multiplier >= pair[0].multiplier,
                        "confidence multipliers must be non-decreasing"
                    );
                }
                ensure!(
                    steps.iter().all(|s| s.multiplier.is_finite() && s.multiplier >= 0.0),
                    "confidence multipliers must be finite and >= 0"
                );
            }
        }
        Ok(())
    }
}

/// Regime → multiplier table. Every known regime must be mapped explicitly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegimeTable {
    pub trending_up: Option<f64>,
    pub trending_down: Option<f64>,
    pub ranging: Option<f64>,
    pub volatile: Option<f64>,
    /// Used for regimes this build does not recognise; must be <= 1.0
    #[serde(default = "default_regime_fallback")]
    pub fallback: f64,
}

fn default_regime_fallback() -> f64 {
    0.5
}

impl Default for RegimeTable {
    fn default() -> Self {
        Self {
            trending_up: Some(1.1),
            trending_down: Some(1.1),
            ranging: Some(0.8),
            volatile: Some(1.3),
            fallback: default_regime_fallback(),
        }
    }
}

impl RegimeTable {
    fn slot(&self, regime: Regime) -> Option<f64> {
        match regime {
            Regime::TrendingUp => self.trending_up,
            Regime::TrendingDown => self.trending_down,
            Regime::Ranging => self.ranging,
            Regime::Volatile => self.volatile,
            Regime::Unknown => Some(self.fallback),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for regime in Regime::KNOWN {
            match self.slot(regime) {
                Some(m) => ensure!(
                    m.is_finite() && m > 0.0,
                    "multiplier for {regime:?} must be positive"
                ),
                None => bail!("regime {regime:?} has no multiplier"),
            }
        }
        ensure!(
            self.fallback > 0.0 && self.fallback <= 1.0,
            "regime fallback must be in (0, 1]"
        );
        Ok(())
    }

    /// Multiplier for a regime; unmapped regimes get the conservative fallback.
    pub fn multiplier(&self, regime: Regime) -> f64 {
        self.slot(regime).unwrap_or(self.fallback)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Quotes older than this are rejected as stale
    pub max_quote_age_ms: u64,
    /// How long a built payload stays submittable
    pub validity_window_ms: u64,
    pub priority_fee: u64,
    pub tip: TipStrategy,
    /// Native smallest units per base unit (1e9 for lamports)
    pub native_units_per_base: f64,
    /// Total time spent retrying a flaky quote endpoint
    pub quote_retry_max_elapsed_ms: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_quote_age_ms: 2_000,
            validity_window_ms: 20_000,
            priority_fee: 10_000,
            tip: TipStrategy::Proportional {
                tip_bps: 5,
                min_tip: 1_000,
                max_tip: 1_000_000,
            },
            native_units_per_base: 1e9,
            quote_retry_max_elapsed_ms: 1_000,
        }
    }
}

impl BuilderConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.validity_window_ms > 0, "validity_window_ms must be > 0");
        ensure!(self.max_quote_age_ms > 0, "max_quote_age_ms must be > 0");
        ensure!(
            self.native_units_per_base.is_finite() && self.native_units_per_base > 0.0,
            "native_units_per_base must be positive"
        );
        if let TipStrategy::Proportional { min_tip, max_tip, .. } = self.tip {
            ensure!(min_tip <= max_tip, "min_tip must be <= max_tip");
        }
        Ok(())
    }

    pub fn max_quote_age(&self) -> Duration {
        Duration::from_millis(self.max_quote_age_ms)
    }

    pub fn validity_window(&self) -> Duration {
        Duration::from_millis(self.validity_window_ms)
    }
}

/// How the relay tip funding MEV protection is priced.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TipStrategy {
    Flat { tip: u64 },
    Proportional { tip_bps: u32, min_tip: u64, max_tip: u64 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Per-attempt budget before TIMED_OUT
    pub attempt_timeout_ms: u64,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 3_000,
            poll_initial_ms: 100,
            poll_max_ms: 1_000,
        }
    }
}

impl RouterConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    pub window_size: usize,
    pub min_samples: usize,
    /// Window failure rate strictly above this opens the circuit
    pub failure_rate_threshold: f64,
    pub cooldown_ms: u64,
    /// EWMA smoothing factor for latency (typically 0.1-0.3)
    pub latency_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_size: 20,
            min_samples: 10,
            failure_rate_threshold: 0.5,
            cooldown_ms: 30_000,
            latency_alpha: 0.2,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.failure_threshold > 0, "failure_threshold must be > 0");
        ensure!(self.window_size > 0, "window_size must be > 0");
        ensure!(
            self.min_samples <= self.window_size,
            "min_samples must be <= window_size"
        );
        ensure!(
            (0.0..1.0).contains(&self.failure_rate_threshold),
            "failure_rate_threshold must be in [0, 1)"
        );
        ensure!(
            self.latency_alpha > 0.0 && self.latency_alpha <= 1.0,
            "latency_alpha must be in (0, 1]"
        );
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// What happens to a signal that arrives while its pair's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Evict the oldest queued signal; the newest wins.
    DropOldest,
    /// Reject the incoming signal; queued signals keep their place.
    DropNewest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Signals buffered per pair behind the in-flight order
    pub queue_capacity: usize,
    pub queue_policy: QueuePolicy,
    /// Events retained for the API history endpoint
    pub event_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            queue_policy: QueuePolicy::DropOldest,
            event_history: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Bundle-based MEV-protected relay (sendBundle)
    BundleRelay,
    /// Plain broadcast RPC (sendTransaction)
    Rpc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub endpoint: Url,
    /// Lower is tried first among healthy providers
    #[serde(default)]
    pub priority: u32,
    /// Optional bearer token / auth header value
    pub auth_token: Option<String>,
}
