//! Bounded report queue
//!
//! Sits between a test pass (producer) and the relay (single consumer). When
//! the queue is full, `send` waits for the relay to catch up, so a slow relay
//! throttles the pass instead of records being dropped or buffered without
//! limit.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::orchestrator::{ProbeError, ResultSink};
use crate::types::NodeRecord;

/// Default number of unconsumed records before producers block
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// The relay has gone away
#[derive(Debug, thiserror::Error)]
#[error("report queue closed")]
pub struct QueueClosed(pub NodeRecord);

/// Create a report queue holding at most `capacity` records
pub fn report_queue(capacity: usize) -> (ReportSender, ReportReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ReportSender { tx }, ReportReceiver { rx })
}

/// Producer half; cheap to clone, one per pass
#[derive(Clone)]
pub struct ReportSender {
    tx: mpsc::Sender<NodeRecord>,
}

impl ReportSender {
    /// Enqueue a record, waiting while the queue is full
    pub async fn send(&self, record: NodeRecord) -> Result<(), QueueClosed> {
        self.tx.send(record).await.map_err(|e| QueueClosed(e.0))
    }
}

/// Consumer half, owned by the relay
pub struct ReportReceiver {
    rx: mpsc::Receiver<NodeRecord>,
}

impl ReportReceiver {
    /// Next record; `None` once every sender is dropped and the queue is drained
    pub async fn recv(&mut self) -> Option<NodeRecord> {
        self.rx.recv().await
    }

    /// Records waiting to be relayed
    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

#[async_trait]
impl ResultSink for ReportSender {
    async fn on_result(
        &mut self,
        _index: usize,
        link: &str,
        outcome: &Result<NodeRecord, ProbeError>,
    ) -> bool {
        match outcome {
            Ok(record) => self.send(record.clone()).await.is_ok(),
            Err(e) => {
                debug!("Skipping {}: {}", link, e);
                true
            }
        }
    }
}
