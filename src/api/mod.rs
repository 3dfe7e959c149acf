//! HTTP API Module
//!
//! Ingest and export of leaderboard nodes, the plain-text leaderboard page,
//! health and metrics endpoints, and realtime test sessions.

mod metrics;
pub mod routes;
pub mod session;

pub use metrics::Metrics;
pub use routes::{run_api_server, ApiState};
