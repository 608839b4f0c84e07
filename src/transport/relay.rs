// Bundle relay transport
// MEV-protected submission through a bundle relay (sendBundle /
// getInflightBundleStatuses). The signed payload already carries the tip.
//
// Numan Thabit 2025 Nov

use super::jsonrpc::{JsonRpc, RpcValue};
use super::{classify, SubmissionStatus, SubmitReceipt, TxProvider};
use crate::errors::AttemptError;
use crate::types::SignedPayload;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::Deserialize;
use serde_json::json;

pub struct BundleRelay {
    id: String,
    rpc: JsonRpc,
}

#[derive(Debug, Deserialize)]
struct BundleStatus {
    status: String,
}

impl BundleRelay {
    pub fn new(id: impl Into<String>, rpc: JsonRpc) -> Self {
        Self { id: id.into(), rpc }
    }
}

#[async_trait]
impl TxProvider for BundleRelay {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit(&self, signed: &SignedPayload) -> Result<SubmitReceipt, AttemptError> {
        let bundle_id: String = self
            .rpc
            .call(
                "sendBundle",
                json!([[B64.encode(&signed.wire)], { "encoding": "base64" }]),
            )
            .await
            .map_err(classify)?;
        Ok(SubmitReceipt {
            signature: signed.signature.clone(),
            handle: bundle_id,
        })
    }

    async fn status(&self, receipt: &SubmitReceipt) -> Result<SubmissionStatus, AttemptError> {
        let resp: RpcValue<Vec<BundleStatus>> = self
            .rpc
            .call("getInflightBundleStatuses", json!([[receipt.handle]]))
            .await
            .map_err(classify)?;
        Ok(match resp.value.first().map(|s| s.status.as_str()) {
            Some("Landed") => SubmissionStatus::Confirmed,
            Some("Failed") => SubmissionStatus::Failed("bundle failed".to_string()),
            Some("Invalid") => SubmissionStatus::Failed("bundle invalid or expired".to_string()),
            _ => SubmissionStatus::Pending,
        })
    }
}
