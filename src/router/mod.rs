// Router module - build, route and expose the execution plane
// This file ties together the transaction builder, provider health tracking,
// the fallback router and its HTTP API
//
// Numan Thabit 2025 Nov

pub mod builder;
pub mod execution;
pub mod health;

#[allow(clippy::module_inception)]
pub mod router;

pub use builder::TransactionBuilder;
pub use execution::{ExecutionRouter, RouteOutcome, RouterStats};
pub use health::{AttemptOutcome, Claim, HealthState, ProviderHealth, ProviderHealthTracker};
pub use router::create_api_router;
