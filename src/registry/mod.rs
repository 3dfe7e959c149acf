//! Node Registry Module
//!
//! Keeps the ranked leaderboard of reported nodes in memory.
//! Nodes are keyed by link, ranked by freshness and speed, and capped in count.

pub mod ranking;
mod store;

pub use ranking::{Ranker, RankingPolicy};
pub use store::{NodeRegistry, DEFAULT_CAPACITY};

/// Why a candidate node was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("link must not be empty")]
    EmptyLink,

    #[error("avgSpeed must be positive")]
    NonPositiveAvgSpeed,

    #[error("maxSpeed must be positive")]
    NonPositiveMaxSpeed,

    #[error("ping {0}ms out of range")]
    PingOutOfRange(u32),
}

/// What an accepted upsert did to the leaderboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New link, now on the leaderboard
    Inserted,

    /// Existing link, replaced in place
    Replaced,

    /// Valid, but ranked below the capacity cut
    Dropped,
}

/// Result of a registry query
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RegistryStats {
    /// Nodes on the leaderboard
    pub total_nodes: usize,

    /// Nodes refreshed within the freshness window
    pub fresh_nodes: usize,

    /// Nodes older than the freshness window
    pub stale_nodes: usize,

    /// Fastest average speed on the board (bytes/s)
    pub best_avg_speed: u64,

    /// Mean ping across the board
    pub average_ping_ms: f64,
}
