//! Leaderboard Ranking
//!
//! Two policies are supported:
//!
//! - `freshness-then-speed`: nodes refreshed within the freshness window rank
//!   ahead of stale ones; each group is ordered by average speed, fastest first.
//! - `speed-only`: average speed, fastest first, regardless of age.
//!
//! Both are expressed as a sort key so the resulting order is a proper total
//! preorder. Sorting is stable, so ties keep their previous relative order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use crate::types::RankedNode;

/// Default freshness window (15 minutes)
pub const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 15 * 60;

/// Largest window `chrono::Duration` can hold
pub const MAX_FRESHNESS_WINDOW_SECS: u64 = (i64::MAX / 1000) as u64;

/// How the registry orders its nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankingPolicy {
    #[default]
    FreshnessThenSpeed,
    SpeedOnly,
}

/// Ranking policy bound to a freshness window
#[derive(Debug, Clone, Copy)]
pub struct Ranker {
    policy: RankingPolicy,
    window: chrono::Duration,
}

impl Ranker {
    /// Windows too large to represent saturate, so nothing ever goes stale
    pub fn new(policy: RankingPolicy, freshness_window_secs: u64) -> Self {
        let window = i64::try_from(freshness_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        Self { policy, window }
    }

    pub fn policy(&self) -> RankingPolicy {
        self.policy
    }

    pub fn is_stale(&self, node: &RankedNode, now: DateTime<Utc>) -> bool {
        node.is_stale(now, self.window)
    }

    /// Sort key; ascending order is rank order
    pub fn key(&self, node: &RankedNode, now: DateTime<Utc>) -> (bool, Reverse<u64>) {
        let stale = match self.policy {
            RankingPolicy::FreshnessThenSpeed => self.is_stale(node, now),
            RankingPolicy::SpeedOnly => false,
        };
        (stale, Reverse(node.record.avg_speed))
    }

    /// Sort `nodes` into rank order as of `now`
    pub fn sort(&self, nodes: &mut [RankedNode], now: DateTime<Utc>) {
        nodes.sort_by_key(|n| self.key(n, now));
    }
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new(RankingPolicy::default(), DEFAULT_FRESHNESS_WINDOW_SECS)
    }
}
