//! HTTP API for health checks, price aggregation, and intent execution

use crate::config::ApiConfig;
use crate::error::{FailureKind, OrchestratorError, ServiceError, ServiceResult};
use crate::pricing::{BatchedRetryingFetcher, PriceSource};
use crate::state::SessionRegistry;
use crate::tx::{Intent, Step};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub fetcher: Arc<BatchedRetryingFetcher<dyn PriceSource>>,
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        fetcher: Arc<BatchedRetryingFetcher<dyn PriceSource>>,
        allowed_origins: Vec<String>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            allowed_origins: Arc::new(allowed_origins),
        }
    }

    fn origin_allowed(&self, headers: &HeaderMap) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|origin| self.allowed_origins.iter().any(|o| o == origin))
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = if state.allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<HeaderValue> = state
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/price", get(get_price))
        .route("/execute", post(execute_intent))
        .route("/execute/:account", get(get_session))
        .route("/execute/:account/reset", post(reset_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> ServiceResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServiceError::Bind {
            addr: addr.clone(),
            message: e.to_string(),
        })?;
    axum::serve(listener, app)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Price endpoint. `asset` keeps the legacy single-value shape, `assets`
/// takes a comma-separated list.
async fn get_price(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PriceQuery>,
) -> Response {
    if !state.origin_allowed(&headers) {
        warn!(origin = ?headers.get(header::ORIGIN), "Price request from disallowed origin");
        return error_response(StatusCode::FORBIDDEN, "Origin not allowed");
    }

    let keys: Vec<String> = query
        .assets
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect();

    if !keys.is_empty() {
        let report = state.fetcher.fetch_all(&keys).await;
        if report.all_failed() {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch prices");
        }
        let prices: BTreeMap<String, PriceResponse> = report
            .values
            .into_iter()
            .map(|(key, price)| (key, PriceResponse { price }))
            .collect();
        return (StatusCode::OK, Json(prices)).into_response();
    }

    match query.asset.as_deref().map(str::trim) {
        Some(asset) if !asset.is_empty() => match state.fetcher.fetch_one(asset).await {
            Ok(price) => (StatusCode::OK, Json(PriceResponse { price })).into_response(),
            Err(e) => {
                warn!(%asset, error = %e, "Price fetch failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch price")
            }
        },
        _ => error_response(StatusCode::BAD_REQUEST, "Missing asset or assets parameter"),
    }
}

/// Run an intent on the account's orchestrator
async fn execute_intent(State(state): State<AppState>, Json(intent): Json<Intent>) -> Response {
    if intent.account.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing account");
    }

    let orchestrator = state.registry.get_or_create(&intent.account);
    let outcome = orchestrator.execute(&intent).await;
    drop(orchestrator);
    state.registry.touch(&intent.account);

    match outcome {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            let status = match e.kind {
                FailureKind::Busy => StatusCode::CONFLICT,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (status, Json(ExecutionErrorResponse::from(&e))).into_response()
        }
    }
}

async fn get_session(State(state): State<AppState>, Path(account): Path<String>) -> Response {
    match state.registry.get(&account) {
        Some(orchestrator) => Json(orchestrator.snapshot().await).into_response(),
        None => Json(IdleSession { step: Step::Idle }).into_response(),
    }
}

async fn reset_session(State(state): State<AppState>, Path(account): Path<String>) -> Response {
    state.registry.reset(&account).await;
    Json(IdleSession { step: Step::Idle }).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

// Request and response types

#[derive(Debug, Deserialize)]
struct PriceQuery {
    asset: Option<String>,
    assets: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct PriceResponse {
    price: Option<f64>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct IdleSession {
    step: Step,
}

#[derive(Serialize)]
struct ExecutionErrorResponse {
    step: Step,
    kind: &'static str,
    message: String,
}

impl From<&OrchestratorError> for ExecutionErrorResponse {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            step: err.step,
            kind: err.kind.as_str(),
            message: err.message.clone(),
        }
    }
}
