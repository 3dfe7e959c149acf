//! Core types shared by the registry, the HTTP surface and the reporting client
//!
//! `NodeRecord` is the wire unit: clients POST it, the relay encodes it, probers
//! produce it. The registry wraps it in `RankedNode` to attach the server-side
//! timestamp, so `added_at` can never come from a client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exclusive upper bound for an acceptable ping (milliseconds)
pub const MAX_PING_MS: u32 = 10_000;

/// One measured proxy endpoint as reported by a test client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeRecord {
    /// Display label, not part of identity
    #[serde(alias = "Name")]
    pub name: String,

    /// Canonical endpoint URI (identity key)
    #[serde(alias = "Link")]
    pub link: String,

    /// Protocol tag, opaque to the registry
    #[serde(alias = "Protocol")]
    pub protocol: String,

    /// Round-trip time in milliseconds
    #[serde(alias = "Ping")]
    pub ping: u32,

    /// Average throughput in bytes/second
    #[serde(alias = "AvgSpeed")]
    pub avg_speed: u64,

    /// Peak throughput in bytes/second
    #[serde(alias = "MaxSpeed")]
    pub max_speed: u64,
}

/// A stored record plus the time of its most recent successful upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedNode {
    #[serde(flatten)]
    pub record: NodeRecord,
    pub added_at: DateTime<Utc>,
}

impl RankedNode {
    pub fn new(record: NodeRecord, added_at: DateTime<Utc>) -> Self {
        Self { record, added_at }
    }

    /// Whether this node was last refreshed more than `window` before `now`
    pub fn is_stale(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.added_at) > window
    }
}

const KB: u64 = 1 << 10;
const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;
const TB: u64 = 1 << 40;

/// Render a byte count the way the leaderboard shows speeds ("1.5 MB", "512 B")
pub fn human_bytes(bytes: u64) -> String {
    let (unit, scale) = match bytes {
        b if b > TB => ("TB", TB),
        b if b > GB => ("GB", GB),
        b if b > MB => ("MB", MB),
        b if b > KB => ("KB", KB),
        b => return format!("{} B", b),
    };
    format!("{:.1} {}", bytes as f64 / scale as f64, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_camel_case() {
        let json = r#"{"name":"hk-01","link":"trojan://a@b:443","protocol":"trojan","ping":120,"avgSpeed":2048,"maxSpeed":4096}"#;
        let node: NodeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(node.link, "trojan://a@b:443");
        assert_eq!(node.avg_speed, 2048);
        assert_eq!(node.max_speed, 4096);
    }

    #[test]
    fn test_decode_pascal_case_aliases() {
        let json = r#"{"Name":"jp","Link":"ss://x@y:1","Protocol":"ss","Ping":9,"AvgSpeed":1,"MaxSpeed":2,"AddedAt":"ignored"}"#;
        let node: NodeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(node.name, "jp");
        assert_eq!(node.ping, 9);
        assert_eq!(node.max_speed, 2);
    }

    #[test]
    fn test_negative_ping_fails_to_decode() {
        let json = r#"{"link":"ss://x@y:1","ping":-1,"avgSpeed":1,"maxSpeed":1}"#;
        assert!(serde_json::from_str::<NodeRecord>(json).is_err());
    }

    #[test]
    fn test_encode_uses_camel_case() {
        let node = NodeRecord {
            avg_speed: 5,
            ..Default::default()
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["avgSpeed"], 5);
        assert!(json.get("addedAt").is_none());
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1024), "1024 B");
        assert_eq!(human_bytes(1536), "1.5 KB");
        assert_eq!(human_bytes(3 * MB), "3.0 MB");
        assert_eq!(human_bytes(5 * GB + GB / 2), "5.5 GB");
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let window = chrono::Duration::minutes(15);
        let fresh = RankedNode::new(NodeRecord::default(), now - chrono::Duration::minutes(5));
        let stale = RankedNode::new(NodeRecord::default(), now - chrono::Duration::minutes(20));
        assert!(!fresh.is_stale(now, window));
        assert!(stale.is_stale(now, window));
    }
}
