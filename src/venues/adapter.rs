// Venue adapter module
// This file defines the quoting interface the transaction builder uses to
// discover a route and an executable price for an order
//
// Numan Thabit 2025 Nov

use crate::errors::ExecError;
use crate::types::{Direction, Order};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub pair: String,
    pub direction: Direction,
    pub size: f64,
    pub max_slippage_bps: u32,
}

impl From<&Order> for QuoteRequest {
    fn from(order: &Order) -> Self {
        Self {
            pair: order.pair.clone(),
            direction: order.direction,
            size: order.size,
            max_slippage_bps: order.max_slippage_bps,
        }
    }
}

/// Executable route for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    /// Opaque route/instruction bytes, copied into the payload unchanged.
    pub route: Vec<u8>,
    pub quoted_price: f64,
    pub quoted_at: DateTime<Utc>,
}

#[async_trait]
pub trait RouteQuoter: Send + Sync {
    /// `Ok(None)` means no route exists for this pair/size right now.
    /// `Err(ExecError::Transport)` is retryable; anything else is not.
    async fn quote(&self, req: &QuoteRequest) -> Result<Option<Quote>, ExecError>;
}
