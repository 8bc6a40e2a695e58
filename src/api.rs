//! REST API for the investment orchestrator
//!
//! Thin transport over [`Orchestrator`]; every decision (admission,
//! validation, retries) happens there.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{ErrorKind, OrchestrationError};
use crate::models::{HealthStatus, InvestmentRequest, OrchestrationResponse};
use crate::orchestrator::Orchestrator;

pub const SERVICE_NAME: &str = "Investment Assistant API";

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub intent: String,
    pub confidence: f32,
    pub request_id: Option<String>,
    pub response_time: f64,
    pub degraded: bool,

    // Intent-specific fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_tolerance: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_allocation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_symbol: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Value>,
}

const NO_RESPONSE: &str = "No response generated";

impl ChatResponse {
    fn from_outcome(outcome: OrchestrationResponse, elapsed: f64) -> Self {
        match outcome {
            OrchestrationResponse::Completed(ctx) => {
                let extra = |key: &str| ctx.get(key).filter(|v| !v.is_null()).cloned();
                Self {
                    response: ctx
                        .output()
                        .map(|o| o.summary().to_string())
                        .unwrap_or_else(|| NO_RESPONSE.to_string()),
                    intent: ctx.header.intent.to_string(),
                    confidence: ctx.header.confidence,
                    request_id: ctx.header.request_id.clone(),
                    response_time: ctx.header.response_time.unwrap_or(elapsed),
                    degraded: false,
                    risk_tolerance: extra("risk_tolerance"),
                    recommended_allocation: extra("recommended_allocation"),
                    stock_symbol: extra("stock_symbol"),
                    recommendation: extra("recommendation"),
                }
            }
            OrchestrationResponse::Fallback(fallback) => Self {
                response: fallback.response,
                intent: fallback.intent.to_string(),
                confidence: fallback.confidence,
                request_id: None,
                response_time: elapsed,
                degraded: fallback.degraded,
                risk_tolerance: None,
                recommended_allocation: None,
                stock_symbol: None,
                recommendation: None,
            },
        }
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn status_for(err: &OrchestrationError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Endpoints
/// =============================

async fn chat(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(user_id = ?req.user_id, length = req.message.len(), "Received chat request");
    let started = Instant::now();

    let request = InvestmentRequest {
        message: req.message,
        conversation_history: req.conversation_history,
        user_id: req.user_id,
        prior_context: Default::default(),
    };

    match state.orchestrator.invoke(request).await {
        Ok(outcome) => {
            let body = ChatResponse::from_outcome(outcome, started.elapsed().as_secs_f64());
            (StatusCode::OK, Json(ApiResponse::success(body)))
        }
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!(error = %e, "Chat request failed");
                (status, Json(ApiResponse::error("Internal server error".into())))
            } else {
                (status, Json(ApiResponse::error(e.to_string())))
            }
        }
    }
}

async fn health(State(state): State<ApiState>) -> Json<HealthStatus> {
    Json(state.orchestrator.health_status())
}

async fn metrics(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    if state.orchestrator.config().is_production() {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Access denied".into())),
        );
    }
    (
        StatusCode::OK,
        Json(ApiResponse::success(state.orchestrator.metrics_report())),
    )
}

async fn root() -> Json<Value> {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/", get(root))
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    serve(listener, orchestrator, ctrl_c()).await?;
    Ok(())
}

/// Serve until `shutdown` resolves, then drain in-flight requests
pub async fn serve<F>(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, create_router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API Server stopped");
    Ok(())
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            // no signal handler; keep serving
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::llm::CannedGenerator;
    use crate::stages::StaticQuoteProvider;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn orchestrator(config: OrchestratorConfig, quotes: StaticQuoteProvider) -> Arc<Orchestrator> {
        let generator = Arc::new(
            CannedGenerator::new("THESIS: Strong.\nRECOMMENDATION: BUY\nCONFIDENCE: 80%")
                .with_rule("router", "market_research|0.9"),
        );
        Arc::new(Orchestrator::with_generator(config, generator, Arc::new(quotes)).unwrap())
    }

    fn app(config: OrchestratorConfig) -> Router {
        create_router(orchestrator(config, StaticQuoteProvider::with_sample_data()))
    }

    fn chat_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_market_research() {
        let response = app(OrchestratorConfig::default())
            .oneshot(chat_request(serde_json::json!({"message": "How is AAPL doing?"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["intent"], "market_research");
        assert_eq!(body["data"]["stock_symbol"], "AAPL");
        assert_eq!(body["data"]["recommendation"], "BUY");
        assert_eq!(body["data"]["degraded"], false);
        assert!(body["data"]["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_response_time_follows_runtime_clock() {
        // no quotes: market research fails, one constant-backoff retry, then fallback
        let config = OrchestratorConfig {
            max_retries: 1,
            retry_base_delay: std::time::Duration::from_secs(2),
            ..Default::default()
        };
        let app = create_router(orchestrator(config, StaticQuoteProvider::new()));

        let response = app
            .oneshot(chat_request(serde_json::json!({"message": "How is AAPL doing?"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["degraded"], true);
        let response_time = body["data"]["response_time"].as_f64().unwrap();
        assert!((2.0..2.1).contains(&response_time), "response_time = {}", response_time);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown_signal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(serve(
            listener,
            orchestrator(OrchestratorConfig::default(), StaticQuoteProvider::with_sample_data()),
            async {
                let _ = stopped.await;
            },
        ));

        let health = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);

        stop.send(()).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_chat_validation_is_422() {
        let response = app(OrchestratorConfig::default())
            .oneshot(chat_request(serde_json::json!({"message": "   "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_chat_rate_limited_is_429() {
        let app = app(OrchestratorConfig {
            max_requests_per_minute: 1,
            ..Default::default()
        });
        let body = serde_json::json!({"message": "How is AAPL doing?", "user_id": "u1"});

        let first = app.clone().oneshot(chat_request(body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(chat_request(body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let app = app(OrchestratorConfig::default());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["requests_processed"], 0);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn test_metrics_hidden_in_production() {
        let request = || Request::builder().uri("/metrics").body(Body::empty()).unwrap();

        let dev = app(OrchestratorConfig::default()).oneshot(request()).await.unwrap();
        assert_eq!(dev.status(), StatusCode::OK);
        let body = json_body(dev).await;
        assert_eq!(body["data"]["rate_limit_enabled"], true);

        let prod = app(OrchestratorConfig {
            environment: "production".into(),
            ..Default::default()
        })
        .oneshot(request())
        .await
        .unwrap();
        assert_eq!(prod.status(), StatusCode::FORBIDDEN);
    }
}
