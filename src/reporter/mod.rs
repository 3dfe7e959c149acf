//! Client Reporting Module
//!
//! Client mode runs test passes forever and streams every measured node to a
//! remote leaderboard:
//!
//! ```text
//! ReportingLoop ──pass──► ReportSender ══queue══► Relay ──POST──► /nodes/<token>
//! ```
//!
//! Each pass runs in its own task. A pass that fails or panics is logged and
//! the loop carries on with the next one after the usual interval.

pub mod queue;
pub mod relay;

pub use queue::{report_queue, ReportSender};
pub use relay::Relay;

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::LeaderboardConfig;
use crate::orchestrator::{PassError, PassSummary, TestOptions, TestOrchestrator};

/// Periodic test passes feeding the report queue
pub struct ReportingLoop {
    orchestrator: Arc<dyn TestOrchestrator>,
    source: String,
    options_file: Option<PathBuf>,
    interval: Duration,
    sender: ReportSender,
}

impl ReportingLoop {
    pub fn new(
        orchestrator: Arc<dyn TestOrchestrator>,
        source: impl Into<String>,
        options_file: Option<PathBuf>,
        interval: Duration,
        sender: ReportSender,
    ) -> Self {
        Self {
            orchestrator,
            source: source.into(),
            options_file,
            interval,
            sender,
        }
    }

    /// One isolated pass. Options are re-read every time so edits apply
    /// without a restart.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<PassSummary, PassError> {
        let orchestrator = self.orchestrator.clone();
        let source = self.source.clone();
        let options = TestOptions::for_command_line(self.options_file.as_deref());
        let mut sink = self.sender.clone();
        let cancel = cancel.child_token();

        let handle = tokio::spawn(async move {
            orchestrator
                .run_pass(&source, options, &mut sink, &cancel)
                .await
        });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(PassError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(PassError::Aborted),
        }
    }

    /// Run passes until `cancel` fires
    pub async fn run(&self, cancel: &CancellationToken) {
        let mut pass = 0u64;

        loop {
            pass += 1;
            match self.run_once(cancel).await {
                Ok(summary) => info!(
                    "✅ Pass {} done: {}/{} nodes measured",
                    pass, summary.succeeded, summary.total
                ),
                Err(PassError::Cancelled) => break,
                Err(e) => error!("Pass {} failed: {}", pass, e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Reporting loop stopped after {} passes", pass);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Client mode entry point: relay plus reporting loop, until `cancel` fires
pub async fn run_client(
    config: &LeaderboardConfig,
    orchestrator: Arc<dyn TestOrchestrator>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let source = config.require_test_source()?.to_string();

    let (sender, receiver) = report_queue(config.queue_capacity);
    let relay = Relay::new(
        config.report_url.clone(),
        config.suppressed_names.clone(),
        Duration::from_secs(config.relay_timeout_secs),
    )?;
    let relay_task = tokio::spawn(relay.run(receiver));

    info!("🧪 Testing {} every {}s", source, config.pass_interval_secs);

    let reporting = ReportingLoop::new(
        orchestrator,
        source,
        config.options_file.clone(),
        Duration::from_secs(config.pass_interval_secs),
        sender,
    );
    reporting.run(&cancel).await;

    // Last sender gone: the relay drains what is queued and stops
    drop(reporting);
    relay_task.await?;

    Ok(())
}
