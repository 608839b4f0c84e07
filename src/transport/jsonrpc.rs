// JSON-RPC transport layer implementation
// This file implements the JSON-RPC client used for plain transaction
// broadcast, signature status polling, blockhash and balance reads
//
// Numan Thabit 2025 Nov

use super::{classify, BalanceSource, BlockhashSource, SubmissionStatus, SubmitReceipt, TxProvider};
use crate::errors::{AttemptError, ExecError};
use crate::metrics::{REQ_ERRORS, REQ_LATENCY};
use crate::types::SignedPayload;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct JsonRpc {
    http: Client,
    url: String,
    auth: Option<String>,
}

impl JsonRpc {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            auth: None,
        }
    }

    pub fn with_auth(mut self, token: Option<String>) -> Self {
        self.auth = token;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    /// Single JSON-RPC 2.0 call; `error` objects map to `ExecError::Provider`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, ExecError> {
        let _timer = REQ_LATENCY
            .with_label_values(&["jsonrpc", method])
            .start_timer();
        let result = self.call_inner(method, params).await;
        if result.is_err() {
            REQ_ERRORS.with_label_values(&["jsonrpc", method]).inc();
        }
        result
    }

    async fn call_inner<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ExecError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut req = self.http.post(&self.url).json(&payload);
        if let Some(token) = &self.auth {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ExecError::Transport(format!("jsonrpc send: {e}")))?;
        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ExecError::Transport(format!("http {status}")));
        }
        if !status.is_success() {
            return Err(ExecError::Provider(format!("http {status}")));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ExecError::Transport(format!("json parse: {e}")))?;
        if let Some(err) = body.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return Err(ExecError::Provider(message));
        }
        serde_json::from_value(body["result"].clone())
            .map_err(|e| ExecError::Provider(format!("decode result: {e}")))
    }

    pub async fn send_transaction(&self, wire: &[u8]) -> Result<String, ExecError> {
        self.call(
            "sendTransaction",
            json!([
                B64.encode(wire),
                { "encoding": "base64", "skipPreflight": true, "maxRetries": 0 }
            ]),
        )
        .await
    }

    pub async fn signature_status(&self, signature: &str) -> Result<SubmissionStatus, ExecError> {
        let resp: RpcValue<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": false }]),
            )
            .await?;
        Ok(match resp.value.into_iter().next().flatten() {
            None => SubmissionStatus::Pending,
            Some(status) if status.err.as_ref().is_some_and(|e| !e.is_null()) => {
                SubmissionStatus::Failed(status.err.unwrap_or_default().to_string())
            }
            Some(status) => match status.confirmation_status.as_deref() {
                Some("confirmed") | Some("finalized") => SubmissionStatus::Confirmed,
                _ => SubmissionStatus::Pending,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcValue<T> {
    pub value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub confirmation_status: Option<String>,
    pub err: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BlockhashValue {
    blockhash: String,
}

#[async_trait]
impl BlockhashSource for JsonRpc {
    async fn recent_blockhash(&self) -> Result<String, ExecError> {
        let resp: RpcValue<BlockhashValue> = self
            .call("getLatestBlockhash", json!([{ "commitment": "confirmed" }]))
            .await?;
        Ok(resp.value.blockhash)
    }
}

/// Native balance of one wallet, converted to base units.
#[derive(Debug, Clone)]
pub struct RpcBalance {
    rpc: JsonRpc,
    address: String,
    native_units_per_base: f64,
}

impl RpcBalance {
    pub fn new(rpc: JsonRpc, address: impl Into<String>, native_units_per_base: f64) -> Self {
        Self {
            rpc,
            address: address.into(),
            native_units_per_base,
        }
    }
}

#[async_trait]
impl BalanceSource for RpcBalance {
    async fn balance(&self, _pair: &str) -> Result<f64, ExecError> {
        let resp: RpcValue<u64> = self
            .rpc
            .call("getBalance", json!([self.address, { "commitment": "confirmed" }]))
            .await?;
        Ok(resp.value as f64 / self.native_units_per_base)
    }
}

/// Plain broadcast RPC provider.
pub struct RpcBroadcaster {
    id: String,
    rpc: JsonRpc,
}

impl RpcBroadcaster {
    pub fn new(id: impl Into<String>, rpc: JsonRpc) -> Self {
        Self { id: id.into(), rpc }
    }
}

#[async_trait]
impl TxProvider for RpcBroadcaster {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit(&self, signed: &SignedPayload) -> Result<SubmitReceipt, AttemptError> {
        let handle = self
            .rpc
            .send_transaction(&signed.wire)
            .await
            .map_err(classify)?;
        Ok(SubmitReceipt {
            signature: signed.signature.clone(),
            handle,
        })
    }

    async fn status(&self, receipt: &SubmitReceipt) -> Result<SubmissionStatus, AttemptError> {
        self.rpc
            .signature_status(&receipt.handle)
            .await
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn rpc_error_object_is_provider_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32002,"message":"Blockhash not found"}}"#)
            .create_async()
            .await;
        let rpc = JsonRpc::new(server.url());
        let err = rpc.send_transaction(b"tx").await.unwrap_err();
        assert_eq!(
            classify(err),
            AttemptError::ProviderRejected("Blockhash not found".into())
        );
    }

    #[tokio::test]
    async fn server_error_is_network_failure() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(503)
            .create_async()
            .await;
        let rpc = JsonRpc::new(server.url());
        let err = rpc.send_transaction(b"tx").await.unwrap_err();
        assert!(matches!(classify(err), AttemptError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn reads_blockhash_and_statuses() {
        let mut server = mockito::Server::new_async().await;
        let _bh = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "getLatestBlockhash"})))
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":1},"value":{"blockhash":"9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin","lastValidBlockHeight":10}}}"#)
            .create_async()
            .await;
        let _st = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "getSignatureStatuses"})))
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":1},"value":[{"slot":1,"confirmations":null,"err":null,"confirmationStatus":"confirmed"}]}}"#)
            .create_async()
            .await;
        let rpc = JsonRpc::new(server.url());
        assert_eq!(
            rpc.recent_blockhash().await.unwrap(),
            "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"
        );
        assert_eq!(
            rpc.signature_status("sig").await.unwrap(),
            SubmissionStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn landed_with_error_is_failed() {
        let mut server = mockito::Server::new_async().await;
        let _st = server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":1},"value":[{"slot":1,"err":{"InstructionError":[0,"Custom"]},"confirmationStatus":"confirmed"}]}}"#)
            .create_async()
            .await;
        let rpc = JsonRpc::new(server.url());
        assert!(matches!(
            rpc.signature_status("sig").await.unwrap(),
            SubmissionStatus::Failed(_)
        ));
    }

    #[tokio::test]
    async fn balance_converts_native_units() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":1},"value":2500000000}}"#)
            .create_async()
            .await;
        let balance = RpcBalance::new(JsonRpc::new(server.url()), "wallet", 1e9);
        assert_eq!(balance.balance("SOL-USDC").await.unwrap(), 2.5);
    }
}
