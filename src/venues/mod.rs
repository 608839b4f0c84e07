// Venue layer: route and price discovery
//
// Numan Thabit 2025 Nov

pub mod adapter;
pub mod http;

pub use adapter::{Quote, QuoteRequest, RouteQuoter};
pub use http::HttpQuoter;
