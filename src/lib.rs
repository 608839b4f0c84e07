// Library root module for ultra-exec
// This file defines the public API and module structure for the signal-to-execution
// pipeline: sizing, building, signing and health-aware multi-provider routing
//
// Numan Thabit 2025 Nov

pub mod config;
pub mod control;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod pipeline;
pub mod router;
pub mod signing;
pub mod sizing;
pub mod transport;
pub mod types;
pub mod venues;

pub use errors::{ExecError, PipelineError};
pub use pipeline::{Dispatch, ExecutionPipeline, PipelineOutcome};
pub use types::{Direction, Order, Regime, Signal};
