// Provider health tracking with circuit breakers
// Rolling success/failure statistics per relay/RPC provider, a circuit breaker
// with cool-down and single-trial recovery, and the ranking used for fallback
//
// Numan Thabit 2025 Nov

use crate::config::HealthConfig;
use crate::errors::AttemptError;
use crate::events::{EventBus, ExecutionEvent};
use crate::metrics::HEALTH_TRANSITIONS;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Healthy,
    /// Cooled-down breaker allowed a single trial attempt.
    Degraded,
    CircuitOpen,
}

impl HealthState {
    fn label(self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::CircuitOpen => "circuit_open",
        }
    }
}

/// Resolution of one attempt as seen by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success { latency_ms: f64 },
    Failure(AttemptError),
}

/// How an attempt slot was obtained from `acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Regular,
    /// The single trial of a cooled-down breaker.
    Trial,
}

/// Operator-facing view of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub priority: u32,
    pub consecutive_failures: u32,
    /// Success fraction over the sliding window (1.0 when empty)
    pub success_rate_window: f64,
    pub window_samples: usize,
    pub state: HealthState,
    #[serde(skip)]
    pub circuit_opened_at: Option<Instant>,
    /// Milliseconds since the breaker opened, if open
    pub circuit_open_for_ms: Option<u64>,
    pub latency_ewma_ms: Option<f64>,
    pub total_successes: u64,
    pub total_failures: u64,
}

#[derive(Debug, Clone)]
struct ProviderStats {
    priority: u32,
    state: HealthState,
    consecutive_failures: u32,
    window: VecDeque<bool>, // true=failure, false=success
    circuit_opened_at: Option<Instant>,
    trial_in_flight: bool,
    latency_ewma_ms: Option<f64>,
    total_successes: u64,
    total_failures: u64,
}

impl ProviderStats {
    fn new(priority: u32, window_size: usize) -> Self {
        Self {
            priority,
            state: HealthState::Healthy,
            consecutive_failures: 0,
            window: VecDeque::with_capacity(window_size),
            circuit_opened_at: None,
            trial_in_flight: false,
            latency_ewma_ms: None,
            total_successes: 0,
            total_failures: 0,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().filter(|f| **f).count() as f64 / self.window.len() as f64
    }

    fn update_ewma(&mut self, observed_ms: f64, alpha: f64) {
        self.latency_ewma_ms = Some(match self.latency_ewma_ms {
            None => observed_ms,
            Some(prev) => alpha * observed_ms + (1.0 - alpha) * prev,
        });
    }

    fn view(&self, id: &str, now: Instant) -> ProviderHealth {
        ProviderHealth {
            provider_id: id.to_string(),
            priority: self.priority,
            consecutive_failures: self.consecutive_failures,
            success_rate_window: 1.0 - self.failure_rate(),
            window_samples: self.window.len(),
            state: self.state,
            circuit_opened_at: self.circuit_opened_at,
            circuit_open_for_ms: match (self.state, self.circuit_opened_at) {
                (HealthState::CircuitOpen, Some(at)) => {
                    Some(now.saturating_duration_since(at).as_millis() as u64)
                }
                _ => None,
            },
            latency_ewma_ms: self.latency_ewma_ms,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
        }
    }
}

struct Transition {
    provider: String,
    from: HealthState,
    to: HealthState,
    consecutive_failures: u32,
}

/// Process-wide provider health. Reads (ranking) run concurrently; writes are serialized.
#[derive(Clone)]
pub struct ProviderHealthTracker {
    inner: Arc<RwLock<HashMap<String, ProviderStats>>>,
    config: HealthConfig,
    events: Option<EventBus>,
}

impl ProviderHealthTracker {
    /// `providers` yields `(provider_id, priority)`; lower priority is preferred.
    pub fn new<I, S>(config: HealthConfig, providers: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let window = config.window_size;
        let inner = providers
            .into_iter()
            .map(|(id, priority)| (id.into(), ProviderStats::new(priority, window)))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(inner)),
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn cooled(&self, stats: &ProviderStats, now: Instant) -> bool {
        stats
            .circuit_opened_at
            .map(|at| now.saturating_duration_since(at) >= self.config.cooldown())
            .unwrap_or(true)
    }

    fn available(&self, stats: &ProviderStats, now: Instant) -> bool {
        match stats.state {
            HealthState::Healthy => true,
            HealthState::Degraded => !stats.trial_in_flight,
            HealthState::CircuitOpen => !stats.trial_in_flight && self.cooled(stats, now),
        }
    }

    /// Whether an attempt may be routed to `provider_id` right now.
    pub async fn is_available(&self, provider_id: &str, now: Instant) -> bool {
        let inner = self.inner.read().await;
        inner
            .get(provider_id)
            .map(|stats| self.available(stats, now))
            .unwrap_or(false)
    }

    /// Claim an attempt slot. A cooled-down breaker re-enters as DEGRADED with
    /// exactly one trial in flight; `None` if the provider may not be used.
    /// The returned claim must be handed back to `record`.
    pub async fn acquire(&self, provider_id: &str, now: Instant) -> Option<Claim> {
        let (claim, transition) = {
            let mut inner = self.inner.write().await;
            let stats = inner.get_mut(provider_id)?;
            if !self.available(stats, now) {
                return None;
            }
            match stats.state {
                HealthState::Healthy => (Claim::Regular, None),
                HealthState::Degraded => {
                    stats.trial_in_flight = true;
                    (Claim::Trial, None)
                }
                HealthState::CircuitOpen => {
                    stats.trial_in_flight = true;
                    stats.state = HealthState::Degraded;
                    let t = Transition {
                        provider: provider_id.to_string(),
                        from: HealthState::CircuitOpen,
                        to: HealthState::Degraded,
                        consecutive_failures: stats.consecutive_failures,
                    };
                    (Claim::Trial, Some(t))
                }
            }
        };
        if let Some(t) = transition {
            info!(provider = %t.provider, "circuit cooled down; allowing trial attempt");
            self.emit(t).await;
        }
        Some(claim)
    }

    /// Fold an attempt outcome into the provider's statistics.
    ///
    /// Only the trial claim can close or re-open a DEGRADED breaker; late
    /// outcomes of attempts claimed before the circuit opened just update counters.
    pub async fn record(
        &self,
        provider_id: &str,
        claim: Claim,
        outcome: &AttemptOutcome,
        now: Instant,
    ) {
        let transition = {
            let mut inner = self.inner.write().await;
            let Some(stats) = inner.get_mut(provider_id) else {
                warn!(provider = %provider_id, "recorded outcome for unregistered provider");
                return;
            };
            let trial = claim == Claim::Trial;
            if trial {
                stats.trial_in_flight = false;
            }
            let failure = matches!(outcome, AttemptOutcome::Failure(_));
            if stats.window.len() == self.config.window_size {
                stats.window.pop_front();
            }
            stats.window.push_back(failure);

            let before = stats.state;
            match outcome {
                AttemptOutcome::Success { latency_ms } => {
                    stats.consecutive_failures = 0;
                    stats.total_successes += 1;
                    stats.update_ewma(*latency_ms, self.config.latency_alpha);
                    if trial && stats.state == HealthState::Degraded {
                        stats.state = HealthState::Healthy;
                        stats.circuit_opened_at = None;
                        stats.window.clear();
                    }
                }
                AttemptOutcome::Failure(err) => {
                    stats.consecutive_failures += 1;
                    stats.total_failures += 1;
                    let rate = stats.failure_rate();
                    let samples = stats.window.len();
                    let trip = match stats.state {
                        HealthState::Degraded => trial,
                        HealthState::Healthy => {
                            stats.consecutive_failures >= self.config.failure_threshold
                                || (samples >= self.config.min_samples
                                    && rate > self.config.failure_rate_threshold)
                        }
                        HealthState::CircuitOpen => false,
                    };
                    debug!(
                        provider = %provider_id,
                        error = %err,
                        consecutive = stats.consecutive_failures,
                        rate = rate,
                        samples = samples,
                        "provider failure recorded"
                    );
                    if trip {
                        stats.state = HealthState::CircuitOpen;
                        stats.circuit_opened_at = Some(now);
                    }
                }
            }
            (before != stats.state).then(|| Transition {
                provider: provider_id.to_string(),
                from: before,
                to: stats.state,
                consecutive_failures: stats.consecutive_failures,
            })
        };

        if let Some(t) = transition {
            match t.to {
                HealthState::CircuitOpen => warn!(
                    provider = %t.provider,
                    consecutive_failures = t.consecutive_failures,
                    "circuit opened"
                ),
                _ => info!(provider = %t.provider, state = ?t.to, "provider recovered"),
            }
            self.emit(t).await;
        }
    }

    async fn emit(&self, t: Transition) {
        HEALTH_TRANSITIONS
            .with_label_values(&[t.provider.as_str(), t.to.label()])
            .inc();
        if let Some(bus) = &self.events {
            bus.publish(ExecutionEvent::HealthTransition {
                provider: t.provider,
                from: t.from,
                to: t.to,
                consecutive_failures: t.consecutive_failures,
                at: Utc::now(),
            })
            .await;
        }
    }

    /// Routable providers: HEALTHY by priority (then latency), then DEGRADED
    /// trial candidates. Open circuits are excluded entirely.
    pub async fn rank(&self, now: Instant) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<_> = inner
            .iter()
            .filter(|(_, stats)| self.available(stats, now))
            .map(|(id, stats)| {
                let tier = u8::from(stats.state != HealthState::Healthy);
                let latency = stats.latency_ewma_ms.unwrap_or(f64::INFINITY);
                (tier, stats.priority, latency, id)
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.3.cmp(b.3))
        });
        candidates.into_iter().map(|(.., id)| id.clone()).collect()
    }

    pub async fn health(&self, provider_id: &str, now: Instant) -> Option<ProviderHealth> {
        let inner = self.inner.read().await;
        inner.get(provider_id).map(|s| s.view(provider_id, now))
    }

    /// All providers, ordered by priority then id.
    pub async fn snapshot(&self, now: Instant) -> Vec<ProviderHealth> {
        let inner = self.inner.read().await;
        let mut all: Vec<_> = inner.iter().map(|(id, s)| s.view(id, now)).collect();
        all.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.provider_id.cmp(&b.provider_id))
        });
        all
    }
}
