// Transport layer: the uniform provider capability interface
// Every relay or RPC broadcaster is reached through `TxProvider`, so the router
// never branches on whether a provider speaks bundles or plain broadcast
//
// Numan Thabit 2025 Nov

pub mod jsonrpc;
pub mod relay;

use crate::config::{ProviderConfig, ProviderKind};
use crate::errors::{AttemptError, ExecError};
use crate::types::SignedPayload;
use async_trait::async_trait;
use std::sync::Arc;

/// Acknowledgement returned when a provider accepts a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Transaction signature of the submitted payload
    pub signature: String,
    /// Provider-side handle used for status polling (bundle id or signature)
    pub handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Confirmed,
    Failed(String),
}

#[async_trait]
pub trait TxProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Hand a signed payload to the provider.
    async fn submit(&self, signed: &SignedPayload) -> Result<SubmitReceipt, AttemptError>;

    /// Poll the landing status of an earlier submission.
    async fn status(&self, receipt: &SubmitReceipt) -> Result<SubmissionStatus, AttemptError>;
}

/// Source of the recent blockhash / nonce a payload is anchored to.
#[async_trait]
pub trait BlockhashSource: Send + Sync {
    async fn recent_blockhash(&self) -> Result<String, ExecError>;
}

/// Wallet balance in base units, read once per order.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self, pair: &str) -> Result<f64, ExecError>;
}

/// Fixed balance, for dry runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticBalance(pub f64);

#[async_trait]
impl BalanceSource for StaticBalance {
    async fn balance(&self, _pair: &str) -> Result<f64, ExecError> {
        Ok(self.0)
    }
}

/// Map transport-level failures onto the attempt taxonomy.
pub(crate) fn classify(err: ExecError) -> AttemptError {
    match err {
        ExecError::Provider(reason) => AttemptError::ProviderRejected(reason),
        other => AttemptError::NetworkFailure(other.to_string()),
    }
}

/// Build the adapter for one configured provider.
pub fn build_provider(cfg: &ProviderConfig) -> Arc<dyn TxProvider> {
    let rpc = jsonrpc::JsonRpc::new(cfg.endpoint.to_string()).with_auth(cfg.auth_token.clone());
    match cfg.kind {
        ProviderKind::BundleRelay => Arc::new(relay::BundleRelay::new(cfg.id.clone(), rpc)),
        ProviderKind::Rpc => Arc::new(jsonrpc::RpcBroadcaster::new(cfg.id.clone(), rpc)),
    }
}
