// Shared in-process collaborators for integration tests
//
// Numan Thabit 2025 Nov

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ultra_exec::config::{
    BuilderConfig, HealthConfig, PipelineConfig, RiskConfig, RouterConfig,
};
use ultra_exec::control::AdmissionControl;
use ultra_exec::errors::{AttemptError, ExecError};
use ultra_exec::events::EventBus;
use ultra_exec::pipeline::ExecutionPipeline;
use ultra_exec::router::{ExecutionRouter, ProviderHealthTracker, TransactionBuilder};
use ultra_exec::signing::Ed25519Signer;
use ultra_exec::sizing::PositionSizer;
use ultra_exec::transport::{
    BlockhashSource, StaticBalance, SubmissionStatus, SubmitReceipt, TxProvider,
};
use ultra_exec::types::{Direction, Regime, SignedPayload, Signal};
use ultra_exec::venues::{Quote, QuoteRequest, RouteQuoter};

pub const SECRET_KEY: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

pub fn signal(pair: &str, confidence: f64, regime: Regime) -> Signal {
    Signal {
        pair: pair.to_string(),
        direction: Direction::Buy,
        reference_price: 150.0,
        confidence,
        regime,
        timestamp: Utc::now(),
    }
}

/// Quotes a fixed price with a fresh timestamp.
pub struct MockQuoter {
    price: Mutex<Option<f64>>,
    pub calls: AtomicUsize,
}

impl MockQuoter {
    pub fn new(price: Option<f64>) -> Arc<Self> {
        Arc::new(Self {
            price: Mutex::new(price),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_price(&self, price: Option<f64>) {
        *self.price.lock().unwrap() = price;
    }
}

#[async_trait]
impl RouteQuoter for MockQuoter {
    async fn quote(&self, _req: &QuoteRequest) -> Result<Option<Quote>, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let price = *self.price.lock().unwrap();
        Ok(price.map(|quoted_price| Quote {
            route: b"route".to_vec(),
            quoted_price,
            quoted_at: Utc::now(),
        }))
    }
}

pub struct MockBlockhash(AtomicUsize);

#[async_trait]
impl BlockhashSource for MockBlockhash {
    async fn recent_blockhash(&self) -> Result<String, ExecError> {
        Ok(format!("blockhash-{}", self.0.fetch_add(1, Ordering::SeqCst)))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    Confirm,
    /// Accept, then report confirmed once `Duration` has passed.
    ConfirmAfter(Duration),
    Reject,
    NetworkDown,
    /// Accept and stay pending forever.
    Hang,
}

pub struct MockProvider {
    id: String,
    behaviour: Mutex<Behaviour>,
    pub submits: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockProvider {
    pub fn new(id: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behaviour: Mutex::new(behaviour),
            submits: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    fn behaviour(&self) -> Behaviour {
        *self.behaviour.lock().unwrap()
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit(&self, signed: &SignedPayload) -> Result<SubmitReceipt, AttemptError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        match self.behaviour() {
            Behaviour::Reject => {
                return Err(AttemptError::ProviderRejected(format!("{} says no", self.id)))
            }
            Behaviour::NetworkDown => {
                return Err(AttemptError::NetworkFailure(format!("{} unreachable", self.id)))
            }
            Behaviour::ConfirmAfter(delay) => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            Behaviour::Confirm | Behaviour::Hang => {}
        }
        Ok(SubmitReceipt {
            signature: signed.signature.clone(),
            handle: signed.signature.clone(),
        })
    }

    async fn status(&self, _receipt: &SubmitReceipt) -> Result<SubmissionStatus, AttemptError> {
        Ok(match self.behaviour() {
            Behaviour::Hang => SubmissionStatus::Pending,
            _ => SubmissionStatus::Confirmed,
        })
    }
}

pub struct Harness {
    pub pipeline: Arc<ExecutionPipeline>,
    pub quoter: Arc<MockQuoter>,
    pub providers: Vec<Arc<MockProvider>>,
    pub events: EventBus,
}

pub struct Settings {
    pub balance: f64,
    pub risk: RiskConfig,
    pub builder: BuilderConfig,
    pub router: RouterConfig,
    pub health: HealthConfig,
    pub pipeline: PipelineConfig,
    pub admission: Option<AdmissionControl>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            balance: 10.0,
            risk: RiskConfig::default(),
            builder: BuilderConfig::default(),
            router: RouterConfig {
                attempt_timeout_ms: 2_000,
                poll_initial_ms: 10,
                poll_max_ms: 50,
            },
            health: HealthConfig::default(),
            pipeline: PipelineConfig::default(),
            admission: None,
        }
    }
}

/// Providers get priority in the order given.
pub fn harness(providers: Vec<Arc<MockProvider>>, settings: Settings) -> Harness {
    let events = EventBus::new(settings.pipeline.event_history);
    let tracker = ProviderHealthTracker::new(
        settings.health,
        providers
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id().to_string(), i as u32)),
    )
    .with_events(events.clone());
    let router = ExecutionRouter::new(
        providers
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn TxProvider>)
            .collect::<Vec<_>>(),
        tracker,
        settings.router,
    )
    .with_events(events.clone());

    let quoter = MockQuoter::new(Some(150.0));
    let builder = TransactionBuilder::new(
        quoter.clone(),
        Arc::new(MockBlockhash(AtomicUsize::new(0))),
        settings.builder,
    );
    let signer = Ed25519Signer::new(SECRET_KEY).unwrap();

    let mut pipeline = ExecutionPipeline::new(
        PositionSizer::new(settings.risk),
        builder,
        Arc::new(signer),
        router,
        Arc::new(StaticBalance(settings.balance)),
        settings.pipeline,
    )
    .with_events(events.clone());
    if let Some(admission) = settings.admission {
        pipeline = pipeline.with_admission(admission);
    }

    Harness {
        pipeline: Arc::new(pipeline),
        quoter,
        providers,
        events,
    }
}
