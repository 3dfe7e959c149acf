//! API Routes
//!
//! - `GET /` plain-text leaderboard, reloaded by the browser every second
//! - `GET /nodes/<token>` base64 subscription of the ranked links
//! - `POST /nodes/<token>` ingest one node record
//! - `GET /health`, `GET /metrics`, `GET /metrics/json`
//! - `GET /test` realtime test session (websocket)

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use std::fmt::Write;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use super::session;
use crate::api::Metrics;
use crate::config::LeaderboardConfig;
use crate::orchestrator::TestOrchestrator;
use crate::registry::{NodeRegistry, Ranker};
use crate::types::{human_bytes, NodeRecord, RankedNode};

/// Shared API state
pub struct ApiState {
    pub config: Arc<LeaderboardConfig>,
    pub registry: Arc<NodeRegistry>,
    pub metrics: Arc<Metrics>,
    pub orchestrator: Option<Arc<dyn TestOrchestrator>>,
}

impl ApiState {
    /// Build the state with an empty registry sized from `config`
    pub fn new(
        config: Arc<LeaderboardConfig>,
        orchestrator: Option<Arc<dyn TestOrchestrator>>,
    ) -> Self {
        let ranker = Ranker::new(config.ranking, config.freshness_window_secs);
        let registry = Arc::new(NodeRegistry::new(config.max_nodes, ranker));

        Self {
            config,
            registry,
            metrics: Arc::new(Metrics::new()),
            orchestrator,
        }
    }
}

/// Build the application router
pub fn router(state: Arc<ApiState>) -> Router {
    let mut app = Router::new()
        // Leaderboard
        .route("/", get(get_leaderboard).head(method_not_allowed))

        // Ingest / export
        .route(
            &state.config.nodes_path(),
            get(export_nodes).post(ingest_node),
        )

        // Health & metrics
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json));

    if state.config.enable_sessions && state.orchestrator.is_some() {
        app = app.route("/test", get(session::upgrade));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the HTTP API server
pub async fn run_api_server(state: Arc<ApiState>) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.listen_port));
    info!("🏁 Leaderboard listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// GET / - Ranked nodes, one per line
async fn get_leaderboard(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.metrics.inc_leaderboard_views();
    let nodes = state.registry.snapshot().await;

    (
        StatusCode::OK,
        [
            (header::REFRESH, "1;url=/"),
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
        ],
        render_leaderboard(&nodes),
    )
}

/// HEAD / - Only GET is served on the leaderboard
async fn method_not_allowed() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

/// GET /nodes/<token> - Subscription feed of the ranked links
async fn export_nodes(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.metrics.inc_exports_served();
    let links = state.registry.export().await;

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        encode_subscription(&links),
    )
}

/// POST /nodes/<token> - Report one measured node
async fn ingest_node(State(state): State<Arc<ApiState>>, body: Bytes) -> Response {
    state.metrics.inc_reports_received();

    let node: NodeRecord = match serde_json::from_slice(&body) {
        Ok(node) => node,
        Err(e) => {
            state.metrics.inc_decode_failures();
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let link = node.link.clone();
    match state.registry.upsert(node).await {
        Ok(outcome) => {
            state.metrics.inc_reports_accepted();
            debug!("📥 {} {:?}", link, outcome);
            StatusCode::CREATED.into_response()
        }
        Err(e) => {
            state.metrics.inc_reports_rejected();
            debug!("Rejected report for {:?}: {}", link, e);
            (StatusCode::BAD_REQUEST, "input error").into_response()
        }
    }
}

/// GET /health - Status and leaderboard summary
async fn health_check(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let stats = state.registry.stats().await;

    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics.uptime_secs(),
        "ranking": state.registry.ranker().policy(),
        "capacity": state.registry.capacity(),
        "board": stats,
    }))
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    refresh_board_gauges(&state).await;

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    refresh_board_gauges(&state).await;
    Json(state.metrics.to_json())
}

async fn refresh_board_gauges(state: &ApiState) {
    let stats = state.registry.stats().await;
    state
        .metrics
        .set_board(stats.total_nodes as u64, stats.fresh_nodes as u64);
}

/// One line per node: position, name, ping and readable speeds
pub fn render_leaderboard(nodes: &[RankedNode]) -> String {
    let mut out = String::new();
    for (i, node) in nodes.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}:{} ping:{} avg-speed:{}, max-speed:{}",
            i + 1,
            node.record.name,
            node.record.ping,
            human_bytes(node.record.avg_speed),
            human_bytes(node.record.max_speed)
        );
    }
    out
}

/// URL-safe base64 of the newline-terminated links, plus a trailing newline
pub fn encode_subscription(links: &[String]) -> String {
    let mut plain = String::new();
    for link in links {
        plain.push_str(link);
        plain.push('\n');
    }
    format!("{}\n", URL_SAFE.encode(plain))
}
