//! Node Registry Storage
//!
//! In-memory, capacity-bounded leaderboard keyed by link. Nothing is persisted:
//! the registry is rebuilt from client reports after a restart.
//!
//! Every operation takes the same exclusive lock for its whole duration and
//! performs no I/O while holding it. Readers always observe a fully re-ranked
//! and truncated collection.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::ranking::Ranker;
use super::{RegistryStats, UpsertOutcome, ValidationError};
use crate::types::{NodeRecord, RankedNode, MAX_PING_MS};

/// Default number of nodes kept on the leaderboard
pub const DEFAULT_CAPACITY: usize = 30;

/// Bounded, deduplicated, ranked collection of nodes
pub struct NodeRegistry {
    /// Ranked nodes, always sorted and never longer than `capacity`
    nodes: Mutex<Vec<RankedNode>>,

    /// Maximum nodes to keep
    capacity: usize,

    /// Ordering applied after each upsert
    ranker: Ranker,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new(capacity: usize, ranker: Ranker) -> Self {
        Self {
            nodes: Mutex::new(Vec::with_capacity(capacity + 1)),
            capacity,
            ranker,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    /// Insert or replace a node, stamping it with the current time
    pub async fn upsert(&self, candidate: NodeRecord) -> Result<UpsertOutcome, ValidationError> {
        self.upsert_at(candidate, Utc::now()).await
    }

    /// Insert or replace a node as of `now`
    ///
    /// An invalid candidate leaves the registry untouched. A valid one replaces
    /// the stored node with the same link in its slot (or is appended), then the
    /// whole collection is re-ranked and cut back to capacity.
    pub async fn upsert_at(
        &self,
        candidate: NodeRecord,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, ValidationError> {
        validate(&candidate)?;

        let link = candidate.link.clone();
        let mut nodes = self.nodes.lock().await;

        let replaced = match nodes.iter_mut().find(|n| n.record.link == link) {
            Some(existing) => {
                *existing = RankedNode::new(candidate, now);
                true
            }
            None => {
                nodes.push(RankedNode::new(candidate, now));
                false
            }
        };

        self.ranker.sort(&mut nodes, now);
        nodes.truncate(self.capacity);

        let outcome = if !nodes.iter().any(|n| n.record.link == link) {
            UpsertOutcome::Dropped
        } else if replaced {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        };

        debug!("Upsert {} -> {:?} ({} nodes)", link, outcome, nodes.len());
        Ok(outcome)
    }

    /// Copy of the ranked nodes
    pub async fn snapshot(&self) -> Vec<RankedNode> {
        self.nodes.lock().await.clone()
    }

    /// Links in rank order
    pub async fn export(&self) -> Vec<String> {
        self.nodes
            .lock()
            .await
            .iter()
            .map(|n| n.record.link.clone())
            .collect()
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let now = Utc::now();
        let nodes = self.nodes.lock().await;

        let stale_nodes = nodes.iter().filter(|n| self.ranker.is_stale(n, now)).count();

        let best_avg_speed = nodes.iter().map(|n| n.record.avg_speed).max().unwrap_or(0);

        let average_ping_ms = if nodes.is_empty() {
            0.0
        } else {
            nodes.iter().map(|n| n.record.ping as f64).sum::<f64>() / nodes.len() as f64
        };

        RegistryStats {
            total_nodes: nodes.len(),
            fresh_nodes: nodes.len() - stale_nodes,
            stale_nodes,
            best_avg_speed,
            average_ping_ms,
        }
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Ranker::default())
    }
}

/// Check a candidate in the fixed order: link, avg speed, max speed, ping
fn validate(node: &NodeRecord) -> Result<(), ValidationError> {
    if node.link.is_empty() {
        return Err(ValidationError::EmptyLink);
    }
    if node.avg_speed == 0 {
        return Err(ValidationError::NonPositiveAvgSpeed);
    }
    if node.max_speed == 0 {
        return Err(ValidationError::NonPositiveMaxSpeed);
    }
    if node.ping >= MAX_PING_MS {
        return Err(ValidationError::PingOutOfRange(node.ping));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ranking::{RankingPolicy, DEFAULT_FRESHNESS_WINDOW_SECS};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn create_test_node(id: usize, avg_speed: u64) -> NodeRecord {
        NodeRecord {
            name: format!("node-{}", id),
            link: format!("trojan://pass@10.0.0.{}:443#node-{}", id, id),
            protocol: "trojan".to_string(),
            ping: 100 + id as u32,
            avg_speed,
            max_speed: avg_speed * 2,
        }
    }

    fn links(nodes: &[RankedNode]) -> Vec<String> {
        nodes.iter().map(|n| n.record.link.clone()).collect()
    }

    #[tokio::test]
    async fn test_registry_empty() {
        let registry = NodeRegistry::default();
        assert!(registry.export().await.is_empty());
        assert_eq!(registry.capacity(), 30);
    }

    #[tokio::test]
    async fn test_replace_same_link() {
        let registry = NodeRegistry::default();
        registry.upsert(create_test_node(1, 100)).await.unwrap();
        registry.upsert(create_test_node(2, 50)).await.unwrap();

        let mut update = create_test_node(1, 10);
        update.name = "renamed".to_string();
        let outcome = registry.upsert(update).await.unwrap();

        assert_eq!(outcome, UpsertOutcome::Replaced);
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);

        let stored: Vec<_> = snapshot
            .iter()
            .filter(|n| n.record.link == create_test_node(1, 0).link)
            .collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record.avg_speed, 10);
        assert_eq!(stored[0].record.name, "renamed");
    }

    #[tokio::test]
    async fn test_replace_refreshes_added_at() {
        let registry = NodeRegistry::default();
        let earlier = Utc::now() - chrono::Duration::minutes(30);
        let later = Utc::now();

        registry.upsert_at(create_test_node(1, 100), earlier).await.unwrap();
        registry.upsert_at(create_test_node(1, 100), later).await.unwrap();

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].added_at, later);
    }

    #[tokio::test]
    async fn test_capacity_keeps_top_nodes() {
        let registry = NodeRegistry::default();
        for i in 0..45 {
            registry.upsert(create_test_node(i, (i as u64 + 1) * 10)).await.unwrap();
        }

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 30);

        // Speeds 160..=450 survive, fastest first
        let speeds: Vec<u64> = snapshot.iter().map(|n| n.record.avg_speed).collect();
        let expected: Vec<u64> = (15..45).rev().map(|i| (i as u64 + 1) * 10).collect();
        assert_eq!(speeds, expected);
    }

    #[tokio::test]
    async fn test_slow_node_dropped_when_full() {
        let registry = NodeRegistry::new(3, Ranker::default());
        for i in 0..3 {
            registry.upsert(create_test_node(i, 100)).await.unwrap();
        }

        let outcome = registry.upsert(create_test_node(9, 1)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Dropped);
        assert_eq!(registry.snapshot().await.len(), 3);
        assert!(!registry.export().await.contains(&create_test_node(9, 1).link));
    }

    #[tokio::test]
    async fn test_rejects_empty_link() {
        let registry = NodeRegistry::default();
        registry.upsert(create_test_node(1, 100)).await.unwrap();
        let before = registry.snapshot().await;

        let mut node = create_test_node(2, 100);
        node.link.clear();
        assert_eq!(registry.upsert(node).await, Err(ValidationError::EmptyLink));
        assert_eq!(registry.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_rejects_zero_avg_speed() {
        let registry = NodeRegistry::default();
        registry.upsert(create_test_node(1, 100)).await.unwrap();
        let before = registry.snapshot().await;

        let mut node = create_test_node(2, 100);
        node.avg_speed = 0;
        assert_eq!(registry.upsert(node).await, Err(ValidationError::NonPositiveAvgSpeed));
        assert_eq!(registry.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_rejects_zero_max_speed() {
        let registry = NodeRegistry::default();
        registry.upsert(create_test_node(1, 100)).await.unwrap();
        let before = registry.snapshot().await;

        let mut node = create_test_node(2, 100);
        node.max_speed = 0;
        assert_eq!(registry.upsert(node).await, Err(ValidationError::NonPositiveMaxSpeed));
        assert_eq!(registry.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_rejects_ping_at_limit() {
        let registry = NodeRegistry::default();
        registry.upsert(create_test_node(1, 100)).await.unwrap();
        let before = registry.snapshot().await;

        let mut node = create_test_node(2, 100);
        node.ping = 10_000;
        assert_eq!(registry.upsert(node).await, Err(ValidationError::PingOutOfRange(10_000)));
        assert_eq!(registry.snapshot().await, before);

        let mut node = create_test_node(3, 100);
        node.ping = 9_999;
        assert!(registry.upsert(node).await.is_ok());
    }

    #[tokio::test]
    async fn test_validation_order() {
        let registry = NodeRegistry::default();
        let node = NodeRecord {
            ping: 50_000,
            ..Default::default()
        };
        assert_eq!(registry.upsert(node).await, Err(ValidationError::EmptyLink));
    }

    #[tokio::test]
    async fn test_fresh_node_outranks_stale() {
        let registry = NodeRegistry::default();
        let now = Utc::now();

        let stale = create_test_node(1, 1000);
        let fresh = create_test_node(2, 10);
        registry
            .upsert_at(stale.clone(), now - chrono::Duration::minutes(20))
            .await
            .unwrap();
        registry.upsert_at(fresh.clone(), now).await.unwrap();

        assert_eq!(registry.export().await, vec![fresh.link, stale.link]);
    }

    #[tokio::test]
    async fn test_speed_only_policy() {
        let ranker = Ranker::new(RankingPolicy::SpeedOnly, DEFAULT_FRESHNESS_WINDOW_SECS);
        let registry = NodeRegistry::new(DEFAULT_CAPACITY, ranker);
        let now = Utc::now();

        let stale = create_test_node(1, 1000);
        let fresh = create_test_node(2, 10);
        registry
            .upsert_at(stale.clone(), now - chrono::Duration::minutes(20))
            .await
            .unwrap();
        registry.upsert_at(fresh.clone(), now).await.unwrap();

        assert_eq!(registry.export().await, vec![stale.link, fresh.link]);
    }

    #[tokio::test]
    async fn test_export_matches_snapshot_order() {
        let registry = NodeRegistry::default();
        for (i, speed) in [30, 90, 10, 60].into_iter().enumerate() {
            registry.upsert(create_test_node(i, speed)).await.unwrap();
        }

        assert_eq!(registry.export().await, links(&registry.snapshot().await));
    }

    #[tokio::test]
    async fn test_concurrent_distinct_upserts() {
        let registry = Arc::new(NodeRegistry::default());

        let handles: Vec<_> = (0..DEFAULT_CAPACITY)
            .map(|i| {
                let registry = registry.clone();
                let node = create_test_node(i, 100 + i as u64);
                tokio::spawn(async move { registry.upsert(node).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let exported = registry.export().await;
        assert_eq!(exported.len(), DEFAULT_CAPACITY);

        let unique: HashSet<_> = exported.iter().collect();
        assert_eq!(unique.len(), DEFAULT_CAPACITY);
        for i in 0..DEFAULT_CAPACITY {
            assert!(unique.contains(&create_test_node(i, 0).link));
        }
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = NodeRegistry::default();
        let now = Utc::now();
        registry.upsert_at(create_test_node(1, 500), now).await.unwrap();
        registry
            .upsert_at(create_test_node(2, 900), now - chrono::Duration::hours(1))
            .await
            .unwrap();

        let stats = registry.stats().await;
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.fresh_nodes, 1);
        assert_eq!(stats.stale_nodes, 1);
        assert_eq!(stats.best_avg_speed, 900);
        assert!((stats.average_ping_ms - 101.5).abs() < f64::EPSILON);
    }
}
