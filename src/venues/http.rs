// HTTP quote adapter
// Speaks an aggregator style `GET {base}/quote` JSON API and returns the
// serialized route as opaque bytes
//
// Numan Thabit 2025 Nov

use super::adapter::{Quote, QuoteRequest, RouteQuoter};
use crate::errors::ExecError;
use crate::metrics::{REQ_ERRORS, REQ_LATENCY};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpQuoter {
    http: Client,
    base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    /// base64 route bytes; null when the aggregator found nothing
    route: Option<String>,
    price: f64,
    quoted_at_ms: i64,
}

impl HttpQuoter {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, req: &QuoteRequest) -> Result<Option<Quote>, ExecError> {
        let url = format!("{}/quote", self.base);
        let amount = req.size.to_string();
        let slippage = req.max_slippage_bps.to_string();
        let side = req.direction.to_string();
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("pair", req.pair.as_str()),
                ("side", side.as_str()),
                ("amount", amount.as_str()),
                ("slippageBps", slippage.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ExecError::Transport(format!("quote send: {e}")))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExecError::Transport(format!("quote http {status}")));
        }
        if !status.is_success() {
            return Err(ExecError::Provider(format!("quote http {status}")));
        }
        let body: QuoteResponse = resp
            .json()
            .await
            .map_err(|e| ExecError::Transport(format!("quote parse: {e}")))?;

        let Some(route) = body.route else {
            debug!(pair = %req.pair, "aggregator returned no route");
            return Ok(None);
        };
        let route = B64
            .decode(route)
            .map_err(|e| ExecError::Provider(format!("route decode: {e}")))?;
        let quoted_at = Utc
            .timestamp_millis_opt(body.quoted_at_ms)
            .single()
            .ok_or_else(|| ExecError::Provider(format!("bad quotedAtMs {}", body.quoted_at_ms)))?;
        Ok(Some(Quote {
            route,
            quoted_price: body.price,
            quoted_at,
        }))
    }
}

#[async_trait]
impl RouteQuoter for HttpQuoter {
    async fn quote(&self, req: &QuoteRequest) -> Result<Option<Quote>, ExecError> {
        let _timer = REQ_LATENCY.with_label_values(&["quoter", "quote"]).start_timer();
        let result = self.fetch(req).await;
        if result.is_err() {
            REQ_ERRORS.with_label_values(&["quoter", "quote"]).inc();
        }
        result
    }
}
