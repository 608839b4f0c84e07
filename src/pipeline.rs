// Execution pipeline
// Orchestrates Signal -> Order -> Payload -> Submission -> Outcome, one order
// at a time per trading pair, with pairs running in parallel
//
// Numan Thabit 2025 Nov

use crate::config::{PipelineConfig, QueuePolicy};
use crate::control::{AdmissionControl, PairLeases};
use crate::errors::{ExecError, FailureChain, PipelineError};
use crate::events::{EventBus, ExecutionEvent};
use crate::metrics::OUTCOMES;
use crate::router::builder::TransactionBuilder;
use crate::router::execution::{ExecutionRouter, RouterStats};
use crate::router::health::ProviderHealthTracker;
use crate::signing::TransactionSigner;
use crate::sizing::PositionSizer;
use crate::transport::BalanceSource;
use crate::types::{Direction, ExecutionAttempt, Order, OrderStatus, Signal};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Terminal result of one signal.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// A provider confirmed the payload.
    Executed {
        order: Order,
        attempt: ExecutionAttempt,
        attempts: Vec<ExecutionAttempt>,
    },
    /// An order existed and was given up on.
    Abandoned {
        order: Order,
        error: PipelineError,
        attempts: Vec<ExecutionAttempt>,
    },
    /// Dropped before anything was signed. `order` is set when sizing succeeded.
    Rejected {
        signal: Signal,
        order: Option<Order>,
        error: Arc<ExecError>,
    },
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineOutcome::Executed { .. } => "executed",
            PipelineOutcome::Abandoned { .. } => "abandoned",
            PipelineOutcome::Rejected { .. } => "rejected",
        }
    }

    pub fn order(&self) -> Option<&Order> {
        match self {
            PipelineOutcome::Executed { order, .. } | PipelineOutcome::Abandoned { order, .. } => {
                Some(order)
            }
            PipelineOutcome::Rejected { order, .. } => order.as_ref(),
        }
    }

    /// Terminal order status; `None` when no order ever reached the router.
    pub fn order_status(&self) -> Option<OrderStatus> {
        match self {
            PipelineOutcome::Executed { .. } => Some(OrderStatus::Executed),
            PipelineOutcome::Abandoned { .. } => Some(OrderStatus::Abandoned),
            PipelineOutcome::Rejected { .. } => None,
        }
    }

    pub fn attempts(&self) -> &[ExecutionAttempt] {
        match self {
            PipelineOutcome::Executed { attempts, .. }
            | PipelineOutcome::Abandoned { attempts, .. } => attempts,
            PipelineOutcome::Rejected { .. } => &[],
        }
    }

    fn pair_and_direction(&self) -> (&str, Direction) {
        match self {
            PipelineOutcome::Executed { order, .. } | PipelineOutcome::Abandoned { order, .. } => {
                (order.pair.as_str(), order.direction)
            }
            PipelineOutcome::Rejected { signal, .. } => (signal.pair.as_str(), signal.direction),
        }
    }

    fn error_text(&self) -> Option<String> {
        match self {
            PipelineOutcome::Executed { .. } => None,
            PipelineOutcome::Abandoned { error, .. } => Some(error.to_string()),
            PipelineOutcome::Rejected { error, .. } => Some(error.to_string()),
        }
    }
}

/// Strategy-side collaborator that reweights strategies from realized outcomes.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn on_outcome(&self, outcome: &PipelineOutcome);
}

/// What `dispatch` did with a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Queued behind its pair's in-flight order; `displaced` was evicted to make room.
    Queued { displaced: Option<Signal> },
    /// Queue full and the policy keeps the older signals.
    Dropped(Signal),
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub signals_received: u64,
    pub executed: u64,
    pub abandoned: u64,
    pub rejected: u64,
    /// Signals discarded by the per-pair queue policy
    pub dropped: u64,
    pub in_flight_pairs: Vec<String>,
    pub queued: HashMap<String, usize>,
    pub router: RouterStats,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    executed: AtomicU64,
    abandoned: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
}

struct PairWorker {
    queue: Mutex<VecDeque<Signal>>,
    notify: Notify,
}

pub struct ExecutionPipeline {
    sizer: PositionSizer,
    builder: TransactionBuilder,
    signer: Arc<dyn TransactionSigner>,
    router: ExecutionRouter,
    balance: Arc<dyn BalanceSource>,
    leases: PairLeases,
    admission: AdmissionControl,
    events: EventBus,
    sink: Option<Arc<dyn OutcomeSink>>,
    config: PipelineConfig,
    dry_run: bool,
    counters: Counters,
    workers: Mutex<HashMap<String, Arc<PairWorker>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl ExecutionPipeline {
    pub fn new(
        sizer: PositionSizer,
        builder: TransactionBuilder,
        signer: Arc<dyn TransactionSigner>,
        router: ExecutionRouter,
        balance: Arc<dyn BalanceSource>,
        config: PipelineConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sizer,
            builder,
            signer,
            router,
            balance,
            leases: PairLeases::new(),
            admission: AdmissionControl::unbounded(),
            events: EventBus::new(config.event_history),
            sink: None,
            config,
            dry_run: false,
            counters: Counters::default(),
            workers: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    pub fn with_admission(mut self, admission: AdmissionControl) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sign but never submit.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn tracker(&self) -> &ProviderHealthTracker {
        self.router.tracker()
    }

    /// Run one signal to a terminal outcome on the caller's task.
    #[tracing::instrument(skip_all, fields(pair = %signal.pair, direction = %signal.direction))]
    pub async fn execute_signal(&self, signal: Signal) -> PipelineOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let outcome = self.run(signal).await;
        self.record(&outcome).await;
        outcome
    }

    async fn run(&self, signal: Signal) -> PipelineOutcome {
        let _lease = match self.leases.try_acquire(&signal.pair).await {
            Ok(lease) => lease,
            Err(e) => return rejected(signal, None, e.into()),
        };

        let balance = match self.balance.balance(&signal.pair).await {
            Ok(balance) => balance,
            Err(e) => return rejected(signal, None, e),
        };

        let order = match self.sizer.size(&signal, balance) {
            Ok(order) => order,
            Err(e) => return rejected(signal, None, e.into()),
        };
        debug!(order_id = %order.id, size = order.size, balance, "order sized");

        let payload = match self.builder.build(&order).await {
            Ok(payload) => payload,
            Err(e) => return rejected(signal, Some(order), e.into()),
        };

        let signed = match self.signer.sign(payload).await {
            Ok(signed) => signed,
            Err(e) => return abandoned(order, PipelineError::Signing(e.to_string())),
        };

        if self.dry_run {
            info!(order_id = %order.id, signature = %signed.signature, "dry run; not submitting");
            return abandoned(order, PipelineError::DryRun);
        }

        let _permit = match self.admission.acquire().await {
            Ok(permit) => permit,
            Err(e) => return abandoned(order, e),
        };

        // Expired while signing or waiting for admission: discard, never submit.
        if signed.payload.is_expired(Instant::now()) {
            return abandoned(order, PipelineError::PayloadExpired(FailureChain(Vec::new())));
        }

        let routed = self.router.submit(order.id, &signed).await;
        match routed.result {
            Ok(attempt) => PipelineOutcome::Executed {
                order,
                attempt,
                attempts: routed.attempts,
            },
            Err(error) => PipelineOutcome::Abandoned {
                order,
                error,
                attempts: routed.attempts,
            },
        }
    }

    async fn record(&self, outcome: &PipelineOutcome) {
        let (pair, direction) = outcome.pair_and_direction();
        let counter = match outcome {
            PipelineOutcome::Executed { order, attempt, .. } => {
                info!(
                    order_id = %order.id,
                    provider = %attempt.provider_id,
                    signature = attempt.signature.as_deref().unwrap_or_default(),
                    latency_ms = attempt.latency_ms,
                    "order executed"
                );
                &self.counters.executed
            }
            PipelineOutcome::Abandoned { order, error, .. } => {
                warn!(order_id = %order.id, error = %error, "order abandoned");
                &self.counters.abandoned
            }
            PipelineOutcome::Rejected { signal, error, .. } => {
                info!(
                    pair = %signal.pair,
                    direction = %signal.direction,
                    confidence = signal.confidence,
                    regime = ?signal.regime,
                    reference_price = signal.reference_price,
                    error = %error,
                    "signal rejected"
                );
                &self.counters.rejected
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        OUTCOMES.with_label_values(&[pair, outcome.label()]).inc();

        let signature = match outcome {
            PipelineOutcome::Executed { attempt, .. } => attempt.signature.clone(),
            _ => None,
        };
        self.events
            .publish(ExecutionEvent::Outcome {
                pair: pair.to_string(),
                direction,
                order_id: outcome.order().map(|o| o.id),
                outcome: outcome.label(),
                signature,
                error: outcome.error_text(),
                at: Utc::now(),
            })
            .await;

        if let Some(sink) = &self.sink {
            sink.on_outcome(outcome).await;
        }
    }

    /// Queue `signal` on its pair's worker, spawning the worker on first use.
    pub async fn dispatch(self: &Arc<Self>, signal: Signal) -> Result<Dispatch, PipelineError> {
        if *self.shutdown.borrow() {
            return Err(PipelineError::Shutdown);
        }
        let worker = {
            let mut workers = self.workers.lock().await;
            match workers.get(&signal.pair) {
                Some(worker) => Arc::clone(worker),
                None => {
                    let worker = Arc::new(PairWorker {
                        queue: Mutex::new(VecDeque::with_capacity(self.config.queue_capacity)),
                        notify: Notify::new(),
                    });
                    let handle = tokio::spawn(
                        Arc::clone(self).run_worker(signal.pair.clone(), Arc::clone(&worker)),
                    );
                    self.handles.lock().await.push(handle);
                    workers.insert(signal.pair.clone(), Arc::clone(&worker));
                    worker
                }
            }
        };

        let dispatch = {
            let mut queue = worker.queue.lock().await;
            // Checked under the queue lock so a drain on shutdown cannot miss it.
            if *self.shutdown.borrow() {
                return Err(PipelineError::Shutdown);
            }
            if queue.len() < self.config.queue_capacity {
                queue.push_back(signal);
                Dispatch::Queued { displaced: None }
            } else {
                match self.config.queue_policy {
                    QueuePolicy::DropOldest => {
                        let displaced = queue.pop_front();
                        queue.push_back(signal);
                        Dispatch::Queued { displaced }
                    }
                    QueuePolicy::DropNewest => Dispatch::Dropped(signal),
                }
            }
        };

        match &dispatch {
            Dispatch::Queued { displaced: Some(old) } | Dispatch::Dropped(old) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                OUTCOMES.with_label_values(&[old.pair.as_str(), "dropped"]).inc();
                debug!(pair = %old.pair, policy = ?self.config.queue_policy, "signal dropped by queue policy");
            }
            Dispatch::Queued { displaced: None } => {}
        }
        worker.notify.notify_one();
        Ok(dispatch)
    }

    async fn run_worker(self: Arc<Self>, pair: String, worker: Arc<PairWorker>) {
        let mut shutdown = self.shutdown.subscribe();
        debug!(pair = %pair, "pair worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = worker.queue.lock().await.pop_front();
            match next {
                Some(signal) => {
                    self.execute_signal(signal).await;
                }
                None => {
                    tokio::select! {
                        _ = worker.notify.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        debug!(pair = %pair, "pair worker stopped");
    }

    /// Stop accepting signals, reject whatever is still queued, and wait for
    /// every worker to finish its current order.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.admission.close();

        let workers: Vec<Arc<PairWorker>> = self.workers.lock().await.values().cloned().collect();
        for worker in workers {
            let drained: Vec<Signal> = worker.queue.lock().await.drain(..).collect();
            for signal in drained {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                let outcome = rejected(signal, None, PipelineError::Shutdown.into());
                self.record(&outcome).await;
            }
        }

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "pair worker ended abnormally");
            }
        }
        info!("pipeline stopped");
    }

    pub async fn stats(&self) -> PipelineStats {
        let mut queued = HashMap::new();
        {
            let workers = self.workers.lock().await;
            for (pair, worker) in workers.iter() {
                queued.insert(pair.clone(), worker.queue.lock().await.len());
            }
        }
        PipelineStats {
            signals_received: self.counters.received.load(Ordering::Relaxed),
            executed: self.counters.executed.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            in_flight_pairs: self.leases.in_flight().await,
            queued,
            router: self.router.stats(),
        }
    }
}

fn rejected(signal: Signal, order: Option<Order>, error: ExecError) -> PipelineOutcome {
    PipelineOutcome::Rejected {
        signal,
        order,
        error: Arc::new(error),
    }
}

fn abandoned(order: Order, error: PipelineError) -> PipelineOutcome {
    PipelineOutcome::Abandoned {
        order,
        error,
        attempts: Vec::new(),
    }
}
