//! Metrics Collection
//!
//! Collects and exposes metrics for monitoring the leaderboard server.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for the leaderboard server
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Total ingest POSTs received
    pub reports_received: AtomicU64,

    /// Reports accepted by the registry
    pub reports_accepted: AtomicU64,

    /// Reports refused by validation
    pub reports_rejected: AtomicU64,

    /// Reports whose body was not a node record
    pub decode_failures: AtomicU64,

    /// Subscription exports served
    pub exports_served: AtomicU64,

    /// Leaderboard page views
    pub leaderboard_views: AtomicU64,

    /// Realtime sessions opened
    pub sessions_opened: AtomicU64,

    /// Test passes started from realtime sessions
    pub session_passes: AtomicU64,

    /// Nodes currently on the leaderboard
    pub board_nodes: AtomicU64,

    /// Nodes within the freshness window
    pub fresh_nodes: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_reports_received(&self) {
        self.reports_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reports_accepted(&self) {
        self.reports_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reports_rejected(&self) {
        self.reports_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decode_failures(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_exports_served(&self) {
        self.exports_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_leaderboard_views(&self) {
        self.leaderboard_views.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_session_passes(&self) {
        self.session_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Update leaderboard gauges
    pub fn set_board(&self, total: u64, fresh: u64) {
        self.board_nodes.store(total, Ordering::Relaxed);
        self.fresh_nodes.store(fresh, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        let series = [
            ("uptime_seconds", "gauge", "Server uptime in seconds", self.uptime_secs()),
            ("reports_total", "counter", "Total reports received", load(&self.reports_received)),
            ("reports_accepted", "counter", "Reports accepted", load(&self.reports_accepted)),
            ("reports_rejected", "counter", "Invalid reports", load(&self.reports_rejected)),
            ("decode_failures", "counter", "Undecodable reports", load(&self.decode_failures)),
            ("exports_served", "counter", "Exports served", load(&self.exports_served)),
            ("leaderboard_views", "counter", "Leaderboard views", load(&self.leaderboard_views)),
            ("sessions_opened", "counter", "Realtime sessions opened", load(&self.sessions_opened)),
            ("session_passes", "counter", "Session test passes", load(&self.session_passes)),
            ("board_nodes", "gauge", "Nodes on the leaderboard", load(&self.board_nodes)),
            ("fresh_nodes", "gauge", "Nodes within the freshness window", load(&self.fresh_nodes)),
        ];

        for (name, kind, help, value) in series {
            let _ = write!(
                output,
                "# HELP nodeboard_{name} {help}\n\
                 # TYPE nodeboard_{name} {kind}\n\
                 nodeboard_{name} {value}\n\n"
            );
        }

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "reports": {
                "received": load(&self.reports_received),
                "accepted": load(&self.reports_accepted),
                "rejected": load(&self.reports_rejected),
                "decode_failures": load(&self.decode_failures),
            },
            "exports_served": load(&self.exports_served),
            "leaderboard_views": load(&self.leaderboard_views),
            "sessions": {
                "opened": load(&self.sessions_opened),
                "passes": load(&self.session_passes),
            },
            "board": {
                "nodes": load(&self.board_nodes),
                "fresh": load(&self.fresh_nodes),
            },
        })
    }
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
