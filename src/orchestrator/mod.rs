//! Test Orchestrator Module
//!
//! Runs one test pass: resolve the source into links, shuffle them, probe each
//! one with bounded concurrency and a per-candidate timeout, and hand every
//! outcome to a `ResultSink` as soon as it completes.
//!
//! ## Flow
//!
//! ```text
//! source ──► resolve_source ──► shuffle ──► run_links
//!                                              │
//!                      buffer_unordered(concurrency)
//!                                              │
//!                              ResultSink::on_result (per candidate)
//! ```
//!
//! Cancellation is checked between completions; in-flight probes are dropped,
//! which kills any external probe command.

pub mod options;
pub mod prober;
pub mod source;

pub use options::{SortMethod, TestOptions};
pub use prober::{CommandProber, DialProber, ProbeError, Prober};
pub use source::SourceError;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::types::{human_bytes, NodeRecord};

/// A failed test pass
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("test source unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("no links found in test source")]
    NoLinks,

    #[error("test pass cancelled")]
    Cancelled,

    #[error("test pass panicked: {0}")]
    Panicked(String),

    #[error("test pass aborted")]
    Aborted,
}

/// Receives each candidate's outcome as it completes
#[async_trait]
pub trait ResultSink: Send {
    /// Return `false` to stop the pass early
    async fn on_result(
        &mut self,
        index: usize,
        link: &str,
        outcome: &Result<NodeRecord, ProbeError>,
    ) -> bool;
}

/// Totals for a finished pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Performs test passes
#[async_trait]
pub trait TestOrchestrator: Send + Sync {
    /// Turn a subscription link or file path into candidate links
    async fn resolve_source(&self, source: &str) -> Result<Vec<String>, PassError>;

    /// Probe `links` in order of completion, reporting each to `sink`
    async fn run_links(
        &self,
        links: Vec<String>,
        options: &TestOptions,
        sink: &mut dyn ResultSink,
        cancel: &CancellationToken,
    ) -> Result<PassSummary, PassError>;

    /// One complete pass over `source`
    async fn run_pass(
        &self,
        source: &str,
        options: TestOptions,
        sink: &mut dyn ResultSink,
        cancel: &CancellationToken,
    ) -> Result<PassSummary, PassError> {
        let mut links = self.resolve_source(source).await?;
        if links.is_empty() {
            return Err(PassError::NoLinks);
        }
        links.shuffle(&mut rand::thread_rng());

        info!("🚀 Testing {} links (concurrency {})", links.len(), options.concurrency);
        self.run_links(links, &options, sink, cancel).await
    }
}

/// The default orchestrator: a prober fanned out over the candidate links
pub struct ProfileOrchestrator {
    prober: Arc<dyn Prober>,
    http: reqwest::Client,
}

impl ProfileOrchestrator {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self {
            prober,
            http: reqwest::Client::new(),
        }
    }

    /// External command prober if one is configured, TCP dial otherwise
    pub fn from_probe_command(command: &[String]) -> Self {
        match CommandProber::from_command(command) {
            Some(prober) => {
                info!("🔬 Probing with external command {:?}", command);
                Self::new(Arc::new(prober))
            }
            None => {
                warn!("No probe command configured, measuring connect latency only");
                Self::new(Arc::new(DialProber))
            }
        }
    }

    async fn probe_one(&self, link: &str, options: &TestOptions) -> Result<NodeRecord, ProbeError> {
        let timeout = options.timeout();
        match tokio::time::timeout(timeout, self.prober.probe(link, options)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl TestOrchestrator for ProfileOrchestrator {
    async fn resolve_source(&self, source: &str) -> Result<Vec<String>, PassError> {
        let content = source::fetch_source(&self.http, source).await?;
        Ok(source::parse_links(&content))
    }

    async fn run_links(
        &self,
        links: Vec<String>,
        options: &TestOptions,
        sink: &mut dyn ResultSink,
        cancel: &CancellationToken,
    ) -> Result<PassSummary, PassError> {
        let mut summary = PassSummary {
            total: links.len(),
            ..Default::default()
        };
        let mut measured = Vec::new();

        let mut results = stream::iter(links.into_iter().enumerate())
            .map(|(index, link)| async move {
                let outcome = self.probe_one(&link, options).await;
                (index, link, outcome)
            })
            .buffer_unordered(options.concurrency.max(1));

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(PassError::Cancelled),
                next = results.next() => next,
            };
            let Some((index, link, outcome)) = next else {
                break;
            };

            match &outcome {
                Ok(record) => {
                    summary.succeeded += 1;
                    measured.push(record.clone());
                }
                Err(_) => summary.failed += 1,
            }

            if !sink.on_result(index, &link, &outcome).await {
                warn!("Result sink closed, stopping pass early");
                break;
            }
        }

        if options.generate_pic {
            log_summary(&mut measured, options, &summary);
        }

        Ok(summary)
    }
}

/// Text stand-in for the result picture
fn log_summary(measured: &mut [NodeRecord], options: &TestOptions, summary: &PassSummary) {
    match options.sort() {
        SortMethod::Speed => measured.sort_by(|a, b| b.avg_speed.cmp(&a.avg_speed)),
        SortMethod::Ping => measured.sort_by_key(|n| n.ping),
        SortMethod::None => {}
    }

    info!(
        "📊 {} pass: {}/{} ok, {} failed",
        options.group_name, summary.succeeded, summary.total, summary.failed
    );
    for (i, node) in measured.iter().enumerate() {
        info!(
            "   {:>3}. {} [{}] ping:{}ms avg:{} max:{}",
            i + 1,
            node.name,
            node.protocol,
            node.ping,
            human_bytes(node.avg_speed),
            human_bytes(node.max_speed)
        );
    }
}
