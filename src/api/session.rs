//! Realtime test sessions
//!
//! A client opens a websocket on `/test` and sends test requests as JSON text
//! messages. Each request starts a pass whose results stream back as JSON
//! frames while the pass runs. Several passes may run at once in one session.
//!
//! ```text
//! client ──request──► session loop ──spawn──► pass ──Frame──► writer ──► client
//! ```
//!
//! Closing the socket cancels every running pass of that session.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::routes::ApiState;
use super::Metrics;
use crate::orchestrator::{source, PassError, ProbeError, ResultSink, TestOptions, TestOrchestrator};
use crate::types::NodeRecord;

/// Outgoing frames buffered per session before passes wait on the socket
const FRAME_BUFFER: usize = 256;

/// One test request sent by the client
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestRequest {
    /// Links to test directly
    pub links: Vec<String>,

    /// Subscription URL, or subscription content pasted inline
    pub subscription: Option<String>,

    /// Options for this pass; defaults when absent
    pub options: Option<TestOptions>,
}

impl TestRequest {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    fn is_remote_subscription(&self) -> Option<&str> {
        self.subscription
            .as_deref()
            .map(str::trim)
            .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
    }

    /// Candidate links; remote subscriptions are fetched, local paths are never read
    async fn resolve(&self, orchestrator: &dyn TestOrchestrator) -> Result<Vec<String>, PassError> {
        let mut links: Vec<String> = self
            .links
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        if let Some(url) = self.is_remote_subscription() {
            links.extend(orchestrator.resolve_source(url).await?);
        } else if let Some(content) = &self.subscription {
            links.extend(source::parse_links(content));
        }

        Ok(links)
    }
}

/// Server-to-client message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Started {
        pass: u64,
        total: usize,
    },
    Result {
        pass: u64,
        index: usize,
        node: NodeRecord,
    },
    Failed {
        pass: u64,
        index: usize,
        link: String,
        error: String,
    },
    Finished {
        pass: u64,
        total: usize,
        ok: usize,
    },
    Error {
        message: String,
    },
}

/// GET /test - Upgrade to a realtime session
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> Response {
    let Some(orchestrator) = state.orchestrator.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let metrics = state.metrics.clone();

    ws.on_upgrade(move |socket| run_session(socket, orchestrator, metrics))
}

/// Drive one session until the client goes away
pub async fn run_session(
    socket: WebSocket,
    orchestrator: Arc<dyn TestOrchestrator>,
    metrics: Arc<Metrics>,
) {
    metrics.inc_sessions_opened();
    info!("🔌 Test session opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frames_tx, mut frames_rx) = mpsc::channel::<Frame>(FRAME_BUFFER);

    // Single writer; passes only ever touch the channel
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let cancel = CancellationToken::new();
    let mut passes = JoinSet::new();
    let mut next_pass = 0u64;

    loop {
        tokio::select! {
            Some(joined) = passes.join_next(), if !passes.is_empty() => {
                if let Err(e) = joined {
                    warn!("Session pass ended abnormally: {}", e);
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match TestRequest::parse(&text) {
                    Ok(request) => {
                        next_pass += 1;
                        metrics.inc_session_passes();
                        passes.spawn(run_request(
                            next_pass,
                            request,
                            orchestrator.clone(),
                            frames_tx.clone(),
                            cancel.clone(),
                        ));
                    }
                    Err(e) => {
                        let _ = frames_tx
                            .send(Frame::Error { message: format!("invalid request: {}", e) })
                            .await;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Session read error: {}", e);
                    break;
                }
            }
        }
    }

    cancel.cancel();
    while passes.join_next().await.is_some() {}
    drop(frames_tx);
    let _ = writer.await;

    info!("🔌 Test session closed after {} passes", next_pass);
}

/// Run one request to completion, streaming frames as results arrive
async fn run_request(
    pass: u64,
    request: TestRequest,
    orchestrator: Arc<dyn TestOrchestrator>,
    frames: mpsc::Sender<Frame>,
    cancel: CancellationToken,
) {
    let links = match request.resolve(orchestrator.as_ref()).await {
        Ok(links) if !links.is_empty() => links,
        Ok(_) => {
            let _ = frames
                .send(Frame::Error { message: PassError::NoLinks.to_string() })
                .await;
            return;
        }
        Err(e) => {
            let _ = frames.send(Frame::Error { message: e.to_string() }).await;
            return;
        }
    };

    let options = request.options.unwrap_or_default().normalized();
    let total = links.len();
    if frames.send(Frame::Started { pass, total }).await.is_err() {
        return;
    }

    let mut sink = FrameSink {
        pass,
        frames: frames.clone(),
    };

    match orchestrator.run_links(links, &options, &mut sink, &cancel).await {
        Ok(summary) => {
            let _ = frames
                .send(Frame::Finished {
                    pass,
                    total: summary.total,
                    ok: summary.succeeded,
                })
                .await;
        }
        Err(PassError::Cancelled) => debug!("Session pass {} cancelled", pass),
        Err(e) => {
            let _ = frames.send(Frame::Error { message: e.to_string() }).await;
        }
    }
}

/// Turns pass outcomes into frames
struct FrameSink {
    pass: u64,
    frames: mpsc::Sender<Frame>,
}

#[async_trait]
impl ResultSink for FrameSink {
    async fn on_result(
        &mut self,
        index: usize,
        link: &str,
        outcome: &Result<NodeRecord, ProbeError>,
    ) -> bool {
        let frame = match outcome {
            Ok(node) => Frame::Result {
                pass: self.pass,
                index,
                node: node.clone(),
            },
            Err(e) => Frame::Failed {
                pass: self.pass,
                index,
                link: link.to_string(),
                error: e.to_string(),
            },
        };
        self.frames.send(frame).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::router;
    use crate::config::LeaderboardConfig;
    use crate::orchestrator::tests::FakeProber;
    use crate::orchestrator::ProfileOrchestrator;
    use tokio_tungstenite::tungstenite::Message as ClientMessage;

    #[test]
    fn test_parse_request() {
        let request = TestRequest::parse(
            r#"{"links":["ss://a@h:1"," "],"options":{"concurrency":4,"timeout":3}}"#,
        )
        .unwrap();

        assert_eq!(request.links.len(), 2);
        assert!(request.subscription.is_none());
        let options = request.options.unwrap().normalized();
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.timeout, 8);

        assert!(TestRequest::parse("not json").is_err());
    }

    #[test]
    fn test_remote_subscription_detection() {
        let remote = TestRequest {
            subscription: Some(" https://example.com/sub ".to_string()),
            ..Default::default()
        };
        assert_eq!(remote.is_remote_subscription(), Some("https://example.com/sub"));

        let inline = TestRequest {
            subscription: Some("/etc/passwd".to_string()),
            ..Default::default()
        };
        assert!(inline.is_remote_subscription().is_none());
    }

    #[tokio::test]
    async fn test_inline_subscription_is_parsed_not_read() {
        let orchestrator = ProfileOrchestrator::new(Arc::new(FakeProber::new()));
        let request = TestRequest {
            links: vec!["trojan://a@h:1".to_string()],
            subscription: Some("ss://b@h:2\nvmess://c\n".to_string()),
            options: None,
        };

        let links = request.resolve(&orchestrator).await.unwrap();
        assert_eq!(links, vec!["trojan://a@h:1", "ss://b@h:2", "vmess://c"]);
    }

    #[test]
    fn test_frame_wire_format() {
        let started = serde_json::to_value(Frame::Started { pass: 1, total: 3 }).unwrap();
        assert_eq!(started, serde_json::json!({"type": "started", "pass": 1, "total": 3}));

        let failed = serde_json::to_value(Frame::Failed {
            pass: 2,
            index: 0,
            link: "ss://x".to_string(),
            error: "timeout".to_string(),
        })
        .unwrap();
        assert_eq!(failed["type"], "failed");
        assert_eq!(failed["link"], "ss://x");

        let result = serde_json::to_value(Frame::Result {
            pass: 1,
            index: 4,
            node: NodeRecord {
                name: "hk".to_string(),
                link: "ss://hk".to_string(),
                avg_speed: 5,
                max_speed: 6,
                ..Default::default()
            },
        })
        .unwrap();
        assert_eq!(result["type"], "result");
        assert_eq!(result["node"]["avgSpeed"], 5);
    }

    async fn spawn_session_server() -> String {
        let orchestrator: Arc<dyn TestOrchestrator> =
            Arc::new(ProfileOrchestrator::new(Arc::new(FakeProber::new())));
        let state = Arc::new(ApiState::new(
            Arc::new(LeaderboardConfig::default()),
            Some(orchestrator),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        format!("ws://{}/test", addr)
    }

    #[tokio::test]
    async fn test_session_streams_results() {
        let url = spawn_session_server().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let request = serde_json::json!({
            "links": ["ss://a@h:1", "ss://bad@h:2", "ss://c@h:3"],
            "options": {"concurrency": 2},
        });
        ws.send(ClientMessage::Text(request.to_string())).await.unwrap();

        let mut frames = Vec::new();
        while let Some(msg) = ws.next().await {
            let ClientMessage::Text(text) = msg.unwrap() else {
                continue;
            };
            let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
            let done = frame["type"] == "finished";
            frames.push(frame);
            if done {
                break;
            }
        }

        assert_eq!(frames[0]["type"], "started");
        assert_eq!(frames[0]["total"], 3);

        let results = frames.iter().filter(|f| f["type"] == "result").count();
        let failed: Vec<_> = frames.iter().filter(|f| f["type"] == "failed").collect();
        assert_eq!(results, 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["link"], "ss://bad@h:2");

        let finished = frames.last().unwrap();
        assert_eq!(finished["total"], 3);
        assert_eq!(finished["ok"], 2);

        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_reports_bad_requests() {
        let url = spawn_session_server().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        ws.send(ClientMessage::Text("{oops".to_string())).await.unwrap();
        ws.send(ClientMessage::Text(r#"{"links":[]}"#.to_string())).await.unwrap();

        for _ in 0..2 {
            let msg = ws.next().await.unwrap().unwrap();
            let frame: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            assert_eq!(frame["type"], "error");
        }
    }
}
