//! REST API handlers for the Coordinator server
//!
//! Two groups of routes share one router:
//! - the worker protocol under `/api/internal/exam-clients`, answered with
//!   plain `{success, message}` bodies that the worker client parses directly
//! - operator routes under `/api/deliveries` plus health and metrics, wrapped
//!   in [`ApiResponse`]

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::delivery::store::ParticipantResult;
use crate::delivery::{Delivery, DeliveryAction, DeliveryError};
use crate::metrics;
use crate::models::{ClientEvent, ExportBundle};

use super::client::CLIENT_API_PREFIX;
use super::live::LiveProgressView;
use super::registry::{AckResponse, RegisterRequest, RegisteredWorker, RegistryStats, StatusReport};
use super::server::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Worker list response
#[derive(Debug, Serialize)]
pub struct WorkersResponse {
    pub workers: Vec<RegisteredWorker>,
    pub stats: RegistryStats,
}

/// Delivery control request
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
}

/// Stored results of a finished delivery
#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub delivery_id: i64,
    pub results: Vec<ParticipantResult>,
}

fn delivery_error(e: DeliveryError) -> Response {
    let status = match &e {
        DeliveryError::NotFound(_) => StatusCode::NOT_FOUND,
        DeliveryError::InvalidAction(_) => StatusCode::BAD_REQUEST,
        e if e.is_conflict() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "Delivery store operation failed");
    }
    (status, Json(ErrorResponse::new(e.to_string()))).into_response()
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let clients = Router::new()
        .route("/", get(list_workers))
        .route("/register", post(register_worker))
        .route("/event", post(receive_event))
        .route("/{client_id}", axum::routing::delete(unregister_worker))
        .route("/{client_id}/status", post(report_status))
        .route("/{client_id}/assignments", get(poll_assignment))
        .route("/{client_id}/final-results", post(receive_final_results));

    Router::new()
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .nest(CLIENT_API_PREFIX, clients)
        .route("/api/deliveries/{id}", get(get_delivery))
        .route("/api/deliveries/{id}/control", post(control_delivery))
        .route("/api/deliveries/{id}/results", get(get_results))
        .route("/api/deliveries/{id}/live-progress", get(get_live_progress))
        .with_state(state)
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

async fn metrics_handler() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Worker Protocol Handlers
// ============================================================================

async fn register_worker(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> impl IntoResponse {
    Json(state.registry.register(request).await)
}

async fn list_workers(State(state): State<AppState>) -> impl IntoResponse {
    let workers = state.registry.list_workers().await;
    let stats = state.registry.stats().await;
    Json(ApiResponse::success(WorkersResponse { workers, stats }))
}

async fn report_status(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(report): Json<StatusReport>,
) -> Response {
    match state.registry.report_status(&client_id, report).await {
        Ok(()) => Json(AckResponse::ok("Status updated")).into_response(),
        Err(e) => {
            tracing::warn!(client_id = %client_id, "Status report from unknown client");
            (StatusCode::NOT_FOUND, Json(AckResponse::failed(e.to_string()))).into_response()
        }
    }
}

async fn poll_assignment(State(state): State<AppState>, Path(client_id): Path<String>) -> Response {
    match state.registry.poll(&client_id).await {
        Ok(Some(assignment)) => Json(assignment).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(AckResponse::failed(e.to_string()))).into_response(),
    }
}

async fn unregister_worker(State(state): State<AppState>, Path(client_id): Path<String>) -> impl IntoResponse {
    state.registry.unregister(&client_id).await;
    Json(AckResponse::ok("Client unregistered"))
}

async fn receive_event(State(state): State<AppState>, Json(event): Json<ClientEvent>) -> Response {
    match state.events.ingest(event) {
        Ok(_) => Json(AckResponse::ok("Event received")).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to record delivery event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AckResponse::failed(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn receive_final_results(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(bundle): Json<ExportBundle>,
) -> Response {
    let delivery_id = bundle.delivery_id;

    match state.store.record_final_results(&client_id, &bundle) {
        Ok(summary) => {
            metrics::record_final_results(true);
            Json(AckResponse::ok(format!(
                "Final results received for delivery {} ({} participants, {} answers)",
                delivery_id, summary.participants, summary.answers
            )))
            .into_response()
        }
        Err(e) => {
            metrics::record_final_results(false);
            tracing::error!(delivery_id, client_id = %client_id, error = %e, "Final results rejected");
            let status = match e {
                DeliveryError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(AckResponse::failed(e.to_string()))).into_response()
        }
    }
}

// ============================================================================
// Delivery Handlers
// ============================================================================

async fn get_delivery(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get(id) {
        Ok(Some(delivery)) => Json(ApiResponse::success(delivery)).into_response(),
        Ok(None) => delivery_error(DeliveryError::NotFound(id)),
        Err(e) => delivery_error(e),
    }
}

async fn control_delivery(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ControlRequest>,
) -> Response {
    let action = match DeliveryAction::from_control(&request.action) {
        Ok(action) => action,
        Err(e) => return delivery_error(e),
    };

    match state.store.apply(id, action) {
        Ok(delivery) => {
            tracing::info!(delivery_id = id, action = %action, status = %delivery.status, "Delivery control applied");
            Json(ApiResponse::<Delivery>::success(delivery)).into_response()
        }
        Err(e) => {
            if e.is_conflict() {
                tracing::info!(delivery_id = id, action = %action, reason = %e, "Delivery control refused");
            }
            delivery_error(e)
        }
    }
}

async fn get_results(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get(id) {
        Ok(Some(_)) => {}
        Ok(None) => return delivery_error(DeliveryError::NotFound(id)),
        Err(e) => return delivery_error(e),
    }

    match state.store.final_results(id) {
        Ok(results) => Json(ApiResponse::success(ResultsResponse {
            delivery_id: id,
            results,
        }))
        .into_response(),
        Err(e) => delivery_error(e),
    }
}

/// Progress straight from the worker running the delivery, or from the
/// central store when no running endpoint answers
async fn get_live_progress(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let delivery = match state.store.get(id) {
        Ok(Some(delivery)) => delivery,
        Ok(None) => return delivery_error(DeliveryError::NotFound(id)),
        Err(e) => return delivery_error(e),
    };

    if let Some(location) = state.registry.locate_delivery(id).await {
        match state.live.fetch(id, &delivery.name, &location).await {
            Ok(view) => return Json(ApiResponse::success(view)).into_response(),
            Err(e) => {
                tracing::warn!(
                    delivery_id = id,
                    client_id = %location.client_id,
                    endpoint = %location.base_url(),
                    error = %e,
                    "Delivery endpoint unreachable, serving stored progress"
                );
            }
        }
    }

    match state.store.final_results(id) {
        Ok(results) => Json(ApiResponse::success(LiveProgressView::from_results(
            id,
            delivery.name,
            &results,
        )))
        .into_response(),
        Err(e) => delivery_error(e),
    }
}

// ============================================================================
// Tests
// ============================================================================
