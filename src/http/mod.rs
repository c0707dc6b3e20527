//! HTTP-to-stdio bridge.
//!
//! A thin axum surface over the protocol engine: each endpoint converts
//! one HTTP request into one wire message, forwards it to the supervised
//! worker, and maps the correlated reply back onto a status code. The
//! bridge owns the worker lifecycle; tool semantics live entirely in the
//! worker process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::{BackoffPolicy, Engine, EngineConfig};
use crate::error::Result;
use crate::protocol::{codes, WireMessage};
use crate::{SERVER_NAME, VERSION};

/// How long a graceful shutdown may drain before the process is forced out.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared bridge state.
pub struct AppState {
    engine: Engine,
    environment: String,
    started: Instant,
}

impl AppState {
    pub fn new(engine: Engine, environment: String) -> Self {
        Self {
            engine,
            environment,
            started: Instant::now(),
        }
    }
}

/// Bind the bridge and serve until SIGINT/SIGTERM.
pub async fn start_server(config: &Config) -> Result<()> {
    let worker_cmd = config.resolve_worker_cmd()?;
    let engine = Engine::spawn(EngineConfig {
        worker_cmd,
        backoff: BackoffPolicy::default(),
        invoke_timeout: config.invoke_timeout,
    });
    let state = Arc::new(AppState::new(engine, config.environment.clone()));

    let app = router(state.clone());
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        port = config.port,
        environment = %config.environment,
        "http bridge listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.engine.shutdown().await;
    info!("http bridge stopped");
    Ok(())
}

/// The bridge router. Split out of `start_server` so tests can drive it
/// without binding a socket.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(api_map))
        .route("/health", get(health))
        .route("/mcp/init", post(mcp_init))
        .route("/mcp/list_tools", post(mcp_list_tools))
        .route("/mcp/invoke_tool", post(mcp_invoke_tool))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn api_map() -> Json<Value> {
    Json(json!({
        "name": SERVER_NAME,
        "version": VERSION,
        "endpoints": {
            "GET /health": "liveness and uptime",
            "POST /mcp/init": "re-initialize the worker",
            "POST /mcp/list_tools": "the tool catalog",
            "POST /mcp/invoke_tool": "invoke one tool: {\"tool\": name, \"params\": {...}}"
        }
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": VERSION,
        "environment": state.environment,
        "engine": state.engine.state().await,
        "uptime": state.started.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Fire-and-forget re-init; answers `ready` immediately, matching the
/// advisory nature of the wire message.
async fn mcp_init(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.engine.init().await;
    Json(json!({"type": "ready"}))
}

async fn mcp_list_tools(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.list_tools().await {
        Ok(reply) => wire_response(reply),
        Err(e) => {
            error!("list_tools failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.code(), &e.to_string())
        }
    }
}

async fn mcp_invoke_tool(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let tool = match body.get("tool").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                codes::MISSING_PARAMETER,
                "the request body must name a tool",
            )
        }
    };
    let params = body.get("params").cloned().unwrap_or(Value::Null);

    match state.engine.invoke_tool(tool, params).await {
        Ok(reply) => wire_response(reply),
        Err(e) => {
            error!("invoke_tool failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.code(), &e.to_string())
        }
    }
}

/// Map a correlated wire reply onto an HTTP response.
fn wire_response(reply: WireMessage) -> Response {
    match reply {
        WireMessage::Tools { tools, .. } => (StatusCode::OK, Json(json!({"tools": tools}))).into_response(),
        // The tool's own result value is the body, unwrapped: the bridge
        // adds status codes, not envelopes.
        WireMessage::ToolResult { result, .. } => (StatusCode::OK, Json(result)).into_response(),
        WireMessage::ToolError { error, .. } => {
            let status = status_for_code(error.code.as_deref());
            (status, Json(json!({"error": error}))).into_response()
        }
        other => {
            warn!(?other, "unexpected reply kind from engine");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "unexpected reply from worker",
            )
        }
    }
}

fn status_for_code(code: Option<&str>) -> StatusCode {
    match code {
        Some(codes::TIMEOUT) => StatusCode::GATEWAY_TIMEOUT,
        Some(codes::WORKER_TERMINATED) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(codes::NOT_FOUND) | Some(codes::TOOL_NOT_FOUND) => StatusCode::NOT_FOUND,
        Some(codes::MISSING_PARAMETER) | Some("INVALID_PARAMETER") => StatusCode::BAD_REQUEST,
        Some(codes::STORE_ERROR) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"message": message, "code": code}})),
    )
        .into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install SIGINT handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {}", e),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received; draining");

    // If the drain stalls (a wedged connection, a worker that will not
    // die), leave anyway.
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        warn!("graceful shutdown exceeded {:?}; forcing exit", SHUTDOWN_GRACE);
        std::process::exit(1);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn bridge(invoke_timeout: Duration) -> Router {
        // An unresponsive worker: requests that reach the engine time out.
        let engine = Engine::spawn(EngineConfig {
            worker_cmd: vec!["sh".into(), "-c".into(), "sleep 60".into()],
            backoff: BackoffPolicy::default(),
            invoke_timeout,
        });
        router(Arc::new(AppState::new(engine, "test".to_string())))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_environment() {
        let app = bridge(Duration::from_secs(1));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["environment"], "test");
        assert_eq!(body["version"], VERSION);
        assert!(body["uptime"].is_u64());
    }

    #[tokio::test]
    async fn test_api_map_lists_endpoints() {
        let app = bridge(Duration::from_secs(1));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["name"], SERVER_NAME);
        assert!(body["endpoints"].get("POST /mcp/invoke_tool").is_some());
    }

    #[tokio::test]
    async fn test_invoke_without_tool_is_bad_request() {
        let app = bridge(Duration::from_secs(1));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp/invoke_tool")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"params": {"query": "sql"}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "MISSING_PARAMETER");
    }

    #[tokio::test]
    async fn test_invoke_timeout_maps_to_gateway_timeout() {
        let app = bridge(Duration::from_millis(100));
        // Let the supervisor attach the worker pipe before the request.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp/invoke_tool")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"tool": "get-webdna-stats"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "TIMEOUT");
    }

    #[tokio::test]
    async fn test_init_answers_ready() {
        let app = bridge(Duration::from_secs(1));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp/init")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["type"], "ready");
    }

    #[tokio::test]
    async fn test_invoke_result_body_is_the_tool_value() {
        let reply = WireMessage::ToolResult {
            id: "r1".to_string(),
            result: json!({"categories": []}),
        };
        let response = wire_response(reply);

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, json!({"categories": []}));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for_code(Some(codes::TIMEOUT)),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for_code(Some(codes::WORKER_TERMINATED)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for_code(Some(codes::NOT_FOUND)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for_code(Some(codes::STORE_ERROR)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for_code(None), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
