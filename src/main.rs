use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use ultra_exec::config::AppConfig;
use ultra_exec::control::AdmissionControl;
use ultra_exec::events::EventBus;
use ultra_exec::pipeline::{Dispatch, ExecutionPipeline};
use ultra_exec::router::{
    create_api_router, ExecutionRouter, ProviderHealthTracker, TransactionBuilder,
};
use ultra_exec::signing::Ed25519Signer;
use ultra_exec::sizing::PositionSizer;
use ultra_exec::transport::jsonrpc::{JsonRpc, RpcBalance};
use ultra_exec::transport::{build_provider, TxProvider};
use ultra_exec::types::Signal;
use ultra_exec::venues::HttpQuoter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal execution service error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let mut config = AppConfig::load().context("load configuration")?;

    let events = EventBus::new(config.pipeline.event_history);
    let tracker = ProviderHealthTracker::new(
        config.health.clone(),
        config.providers.iter().map(|p| (p.id.clone(), p.priority)),
    )
    .with_events(events.clone());
    let providers: Vec<Arc<dyn TxProvider>> =
        config.providers.iter().map(build_provider).collect();
    let router = ExecutionRouter::new(providers, tracker, config.router.clone())
        .with_events(events.clone());

    let rpc = JsonRpc::new(config.rpc_endpoint.to_string());
    let builder = TransactionBuilder::new(
        Arc::new(HttpQuoter::new(config.quote_endpoint.to_string())),
        Arc::new(rpc.clone()),
        config.builder.clone(),
    );
    // The signer owns the only copy of the key from here on.
    let signer = Ed25519Signer::new(std::mem::take(&mut config.secret_key_hex))
        .context("load signing key")?;
    let public_key = signer.public_key_hex();
    let balance = RpcBalance::new(
        rpc.clone(),
        config.wallet_address.clone(),
        config.builder.native_units_per_base,
    );

    let pipeline = ExecutionPipeline::new(
        PositionSizer::new(config.risk.clone()),
        builder,
        Arc::new(signer),
        router,
        Arc::new(balance),
        config.pipeline.clone(),
    )
    .with_admission(AdmissionControl::new(config.max_inflight, config.rate_per_sec))
    .with_events(events)
    .with_dry_run(config.dry_run);

    let app = App {
        config: Arc::new(config),
        rpc,
        public_key,
        pipeline: Arc::new(pipeline),
    };

    app.run().await
}

struct App {
    config: Arc<AppConfig>,
    rpc: JsonRpc,
    public_key: String,
    pipeline: Arc<ExecutionPipeline>,
}

impl App {
    async fn run(self) -> Result<()> {
        info!(
            wallet = %self.config.wallet_address,
            public_key = %self.public_key,
            rpc = %self.rpc.endpoint(),
            quoter = %self.config.quote_endpoint,
            providers = self.config.providers.len(),
            dry_run = self.config.dry_run,
            "execution service online"
        );
        for provider in &self.config.providers {
            info!(
                provider = %provider.id,
                kind = ?provider.kind,
                priority = provider.priority,
                "provider registered"
            );
        }

        // Start HTTP API server
        let api_addr: SocketAddr = self
            .config
            .api_addr
            .parse()
            .with_context(|| format!("parse API address {}", self.config.api_addr))?;
        let listener = tokio::net::TcpListener::bind(&api_addr)
            .await
            .with_context(|| format!("bind API server address {api_addr}"))?;
        let api_router = create_api_router(self.pipeline.clone());
        info!(address = %api_addr, "HTTP API server starting");
        let _api_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, api_router).await {
                warn!(error = %e, "API server error");
            }
        });

        // Strategy signals as JSON lines on stdin
        let _stdin_handle = tokio::spawn(read_signals(self.pipeline.clone()));

        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.pipeline.stats().await;
                    info!(
                        received = stats.signals_received,
                        executed = stats.executed,
                        abandoned = stats.abandoned,
                        rejected = stats.rejected,
                        dropped = stats.dropped,
                        in_flight = ?stats.in_flight_pairs,
                        success_rate = stats.router.success_rate,
                        avg_confirm_ms = ?stats.router.avg_confirm_latency_ms,
                        "execution heartbeat"
                    );

                    for health in self.pipeline.tracker().snapshot(Instant::now()).await {
                        debug!(
                            provider = %health.provider_id,
                            state = ?health.state,
                            consecutive_failures = health.consecutive_failures,
                            success_rate = health.success_rate_window,
                            ewma_ms = ?health.latency_ewma_ms,
                            "provider telemetry"
                        );
                    }
                }
                res = tokio::signal::ctrl_c() => {
                    if let Err(err) = res {
                        warn!(error = %err, "ctrl_c listener error");
                    }
                    info!("Shutdown signal received, draining pipeline");
                    self.pipeline.shutdown().await;
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn read_signals(pipeline: Arc<ExecutionPipeline>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("signal input closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read signal input");
                return;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let signal: Signal = match serde_json::from_str(line) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "malformed signal line");
                continue;
            }
        };
        match pipeline.dispatch(signal).await {
            Ok(Dispatch::Queued { .. }) => {}
            Ok(Dispatch::Dropped(signal)) => {
                warn!(pair = %signal.pair, "signal dropped; pair queue full");
            }
            Err(e) => {
                warn!(error = %e, "pipeline no longer accepting signals");
                return;
            }
        }
    }
}

fn init_tracing() -> Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
