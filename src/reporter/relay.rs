//! Report relay
//!
//! Drains the report queue for the lifetime of the client and POSTs each
//! record to the remote ingest endpoint. A failed delivery is logged and the
//! record dropped; the relay always moves on to the next one.

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{info, warn};

use super::queue::ReportReceiver;
use crate::types::NodeRecord;

/// A single delivery that did not land
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unexpected response: {0}")]
    UnexpectedStatus(StatusCode),
}

/// Counters for a relay run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: u64,
    pub suppressed: u64,
    pub failed: u64,
}

/// Forwards queued records to a registry's ingest endpoint
pub struct Relay {
    client: reqwest::Client,
    url: String,
    suppressed_names: Vec<String>,
}

impl Relay {
    pub fn new(
        url: impl Into<String>,
        suppressed_names: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
            suppressed_names,
        })
    }

    /// Whether a record with this display name must not be reported
    pub fn is_suppressed(&self, name: &str) -> bool {
        self.suppressed_names
            .iter()
            .any(|pattern| !pattern.is_empty() && name.contains(pattern.as_str()))
    }

    /// POST one record; only 201 counts as delivered
    pub async fn deliver(&self, record: &NodeRecord) -> Result<(), RelayError> {
        let body = serde_json::to_vec(record)?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(RelayError::UnexpectedStatus(response.status()));
        }

        Ok(())
    }

    /// Relay until every sender is gone and the queue is drained
    pub async fn run(self, mut queue: ReportReceiver) -> RelayStats {
        let mut stats = RelayStats::default();
        info!("📡 Relaying results to {}", self.url);

        while let Some(record) = queue.recv().await {
            info!(
                "{} {} {} ({} queued)",
                record.name,
                record.avg_speed,
                record.max_speed,
                queue.len()
            );

            if self.is_suppressed(&record.name) {
                stats.suppressed += 1;
                continue;
            }

            match self.deliver(&record).await {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    warn!("Relay of {} failed: {}", record.link, e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            "📡 Relay stopped: {} delivered, {} suppressed, {} failed",
            stats.delivered, stats.suppressed, stats.failed
        );
        stats
    }
}
