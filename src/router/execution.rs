// Execution router - submits a signed payload through the provider network
// This file implements the health-aware fallback state machine: rank providers,
// attempt one at a time under a deadline, classify the result, fall back
//
// Numan Thabit 2025 Nov

use crate::config::RouterConfig;
use crate::errors::{AttemptError, AttemptFailure, FailureChain, PipelineError};
use crate::events::{EventBus, ExecutionEvent};
use crate::metrics::{ATTEMPTS, ATTEMPT_LATENCY};
use crate::router::health::{AttemptOutcome, Claim, ProviderHealthTracker};
use crate::transport::{SubmissionStatus, TxProvider};
use crate::types::{AttemptStatus, ExecutionAttempt, SignedPayload};
use backoff::{future::retry, ExponentialBackoff};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Routing statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub total_routes: u64,
    pub confirmed_routes: u64,
    pub abandoned_routes: u64,
    pub total_attempts: u64,
    pub failed_attempts: u64,
    pub avg_confirm_latency_ms: Option<f64>,
    pub success_rate: f64,
}

/// Every attempt made for one payload plus the terminal result.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub attempts: Vec<ExecutionAttempt>,
    /// The confirmed attempt, or why the order was abandoned.
    pub result: Result<ExecutionAttempt, PipelineError>,
}

#[derive(Debug)]
enum RouteState {
    Select,
    Attempt(String),
    Resolve {
        claim: Claim,
        attempt: ExecutionAttempt,
        error: Option<AttemptError>,
    },
    Done(ExecutionAttempt),
    Abandoned(PipelineError),
}

/// Routes payloads through providers strictly one at a time.
///
/// Fallback is sequential: an order never has more than one pending attempt,
/// so a payload cannot land twice. Racing the same payload across several
/// providers would cut tail latency and could be added as a separate mode.
pub struct ExecutionRouter {
    providers: HashMap<String, Arc<dyn TxProvider>>,
    tracker: ProviderHealthTracker,
    config: RouterConfig,
    events: Option<EventBus>,
    total_routes: AtomicU64,
    confirmed_routes: AtomicU64,
    abandoned_routes: AtomicU64,
    total_attempts: AtomicU64,
    failed_attempts: AtomicU64,
    total_confirm_latency_ms: AtomicU64,
}

impl ExecutionRouter {
    pub fn new(
        providers: impl IntoIterator<Item = Arc<dyn TxProvider>>,
        tracker: ProviderHealthTracker,
        config: RouterConfig,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.id().to_string(), p))
            .collect();
        Self {
            providers,
            tracker,
            config,
            events: None,
            total_routes: AtomicU64::new(0),
            confirmed_routes: AtomicU64::new(0),
            abandoned_routes: AtomicU64::new(0),
            total_attempts: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            total_confirm_latency_ms: AtomicU64::new(0),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn tracker(&self) -> &ProviderHealthTracker {
        &self.tracker
    }

    /// Get routing statistics
    pub fn stats(&self) -> RouterStats {
        let total = self.total_routes.load(Ordering::Relaxed);
        let confirmed = self.confirmed_routes.load(Ordering::Relaxed);
        let latency = self.total_confirm_latency_ms.load(Ordering::Relaxed) as f64;
        RouterStats {
            total_routes: total,
            confirmed_routes: confirmed,
            abandoned_routes: self.abandoned_routes.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            avg_confirm_latency_ms: (confirmed > 0).then(|| latency / confirmed as f64),
            success_rate: if total > 0 {
                confirmed as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Submit `signed` until one provider confirms it, the payload expires, or
    /// no available provider is left to try.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, pair = %signed.payload.pair))]
    pub async fn submit(&self, order_id: Uuid, signed: &SignedPayload) -> RouteOutcome {
        self.total_routes.fetch_add(1, Ordering::Relaxed);
        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts: Vec<ExecutionAttempt> = Vec::new();
        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut state = RouteState::Select;

        loop {
            state = match state {
                RouteState::Select => {
                    let now = Instant::now();
                    if signed.payload.is_expired(now) {
                        RouteState::Abandoned(PipelineError::PayloadExpired(FailureChain(
                            failures.clone(),
                        )))
                    } else {
                        let next = self.tracker.rank(now).await.into_iter().find(|id| {
                            !tried.contains(id) && self.providers.contains_key(id)
                        });
                        match next {
                            Some(provider) => RouteState::Attempt(provider),
                            None => RouteState::Abandoned(PipelineError::ProvidersExhausted(
                                FailureChain(failures.clone()),
                            )),
                        }
                    }
                }
                RouteState::Attempt(provider_id) => {
                    tried.insert(provider_id.clone());
                    // Losing a trial slot to a concurrent order just means picking again.
                    match self.tracker.acquire(&provider_id, Instant::now()).await {
                        None => {
                            debug!(provider = %provider_id, "provider no longer available");
                            RouteState::Select
                        }
                        Some(claim) => {
                            let (attempt, error) =
                                self.attempt(order_id, &provider_id, signed).await;
                            RouteState::Resolve {
                                claim,
                                attempt,
                                error,
                            }
                        }
                    }
                }
                RouteState::Resolve {
                    claim,
                    attempt,
                    error,
                } => {
                    self.resolve(claim, &attempt, error.as_ref()).await;
                    attempts.push(attempt.clone());
                    match error {
                        None => RouteState::Done(attempt),
                        Some(error) => {
                            warn!(
                                provider = %attempt.provider_id,
                                error = %error,
                                "attempt failed; falling back"
                            );
                            failures.push(AttemptFailure {
                                provider: attempt.provider_id.clone(),
                                error,
                            });
                            RouteState::Select
                        }
                    }
                }
                RouteState::Done(attempt) => {
                    self.confirmed_routes.fetch_add(1, Ordering::Relaxed);
                    self.total_confirm_latency_ms
                        .fetch_add(attempt.latency_ms, Ordering::Relaxed);
                    info!(
                        provider = %attempt.provider_id,
                        latency_ms = attempt.latency_ms,
                        attempts = attempts.len(),
                        "payload confirmed"
                    );
                    return RouteOutcome {
                        attempts,
                        result: Ok(attempt),
                    };
                }
                RouteState::Abandoned(error) => {
                    self.abandoned_routes.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %error, attempts = attempts.len(), "payload abandoned");
                    return RouteOutcome {
                        attempts,
                        result: Err(error),
                    };
                }
            };
        }
    }

    /// One provider attempt, bounded by the attempt timeout and the payload expiry.
    async fn attempt(
        &self,
        order_id: Uuid,
        provider_id: &str,
        signed: &SignedPayload,
    ) -> (ExecutionAttempt, Option<AttemptError>) {
        let mut attempt = ExecutionAttempt::pending(order_id, provider_id);
        attempt.signature = Some(signed.signature.clone());
        let Some(provider) = self.providers.get(provider_id) else {
            let error = AttemptError::NetworkFailure("unknown provider".into());
            attempt.status = AttemptStatus::Failed;
            attempt.error = Some(error.to_string());
            return (attempt, Some(error));
        };

        let started = Instant::now();
        let budget = self
            .config
            .attempt_timeout()
            .min(signed.expires_at().saturating_duration_since(started));
        debug!(provider = %provider_id, budget_ms = budget.as_millis() as u64, "submitting");

        let result = tokio::time::timeout(budget, self.submit_and_confirm(provider, signed)).await;
        attempt.latency_ms = started.elapsed().as_millis() as u64;
        let error = match result {
            Ok(Ok(())) => {
                attempt.status = AttemptStatus::Confirmed;
                None
            }
            Ok(Err(e)) => {
                attempt.status = AttemptStatus::Failed;
                Some(e)
            }
            Err(_) => {
                attempt.status = AttemptStatus::TimedOut;
                Some(AttemptError::ProviderTimeout)
            }
        };
        attempt.error = error.as_ref().map(ToString::to_string);
        (attempt, error)
    }

    /// Submit, then poll status with backoff until it lands or is refused.
    /// Never returns on its own while the status stays pending.
    async fn submit_and_confirm(
        &self,
        provider: &Arc<dyn TxProvider>,
        signed: &SignedPayload,
    ) -> Result<(), AttemptError> {
        let receipt = provider.submit(signed).await?;
        debug!(provider = %provider.id(), handle = %receipt.handle, "submission accepted");

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.poll_initial_ms),
            max_interval: Duration::from_millis(self.config.poll_max_ms),
            max_elapsed_time: None,
            multiplier: 1.5,
            ..Default::default()
        };
        retry(backoff, || async {
            match provider.status(&receipt).await {
                Ok(SubmissionStatus::Confirmed) => Ok(()),
                Ok(SubmissionStatus::Failed(reason)) => Err(backoff::Error::permanent(
                    AttemptError::ProviderRejected(reason),
                )),
                Ok(SubmissionStatus::Pending) => {
                    Err(backoff::Error::transient(AttemptError::ProviderTimeout))
                }
                Err(AttemptError::ProviderRejected(reason)) => Err(backoff::Error::permanent(
                    AttemptError::ProviderRejected(reason),
                )),
                Err(e) => {
                    debug!(provider = %provider.id(), error = %e, "status poll failed");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
    }

    async fn resolve(
        &self,
        claim: Claim,
        attempt: &ExecutionAttempt,
        error: Option<&AttemptError>,
    ) {
        let now = Instant::now();
        let outcome = match error {
            None => AttemptOutcome::Success {
                latency_ms: attempt.latency_ms as f64,
            },
            Some(e) => AttemptOutcome::Failure(e.clone()),
        };
        self.tracker
            .record(&attempt.provider_id, claim, &outcome, now)
            .await;

        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        if error.is_some() {
            self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        }
        ATTEMPTS
            .with_label_values(&[attempt.provider_id.as_str(), status_label(attempt.status)])
            .inc();
        ATTEMPT_LATENCY
            .with_label_values(&[attempt.provider_id.as_str()])
            .observe(attempt.latency_ms as f64 / 1000.0);
        if let Some(bus) = &self.events {
            bus.publish(ExecutionEvent::Attempt(attempt.clone())).await;
        }
    }
}

fn status_label(status: AttemptStatus) -> &'static str {
    match status {
        AttemptStatus::Pending => "pending",
        AttemptStatus::Confirmed => "confirmed",
        AttemptStatus::Failed => "failed",
        AttemptStatus::TimedOut => "timed_out",
    }
}
