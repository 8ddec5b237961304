//! Per-delivery HTTP endpoint
//!
//! One short-lived axum server per running delivery, backed by that
//! delivery's [`DeliveryDatabase`].
//!
//! Participant-facing:
//! - `POST /exam/start`, `GET /exam/question/{id}`, `POST /exam/answer`
//! - `GET /exam/progress/{participant_id}`, `POST /exam/complete`
//!
//! Machine-facing:
//! - `GET /api/progress`, `GET /api/participants`, `GET /api/delivery-stats`, `GET /health`

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::models::EventType;

use super::events::EventPublisher;
use super::store::{DeliveryDatabase, DeliveryStats, ExamStoreError};

// ============================================================================
// State
// ============================================================================

/// Shared state for one delivery endpoint
#[derive(Clone)]
pub struct EndpointState {
    pub delivery_id: i64,
    pub store: Arc<DeliveryDatabase>,
    pub events: EventPublisher,
    questions: Arc<HashMap<i64, Value>>,
    /// Signalled when every participant has completed
    pub completion: Arc<Notify>,
    pub started_at: DateTime<Utc>,
}

impl EndpointState {
    pub fn new(delivery_id: i64, store: Arc<DeliveryDatabase>, events: EventPublisher, questions: Vec<Value>) -> Self {
        let questions = questions
            .into_iter()
            .filter_map(|q| q.get("id").and_then(Value::as_i64).map(|id| (id, q)))
            .collect();

        Self {
            delivery_id,
            store,
            events,
            questions: Arc::new(questions),
            completion: Arc::new(Notify::new()),
            started_at: Utc::now(),
        }
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
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

#[derive(Debug, Deserialize)]
pub struct StartExamRequest {
    pub participant_id: i64,
    /// Defaults to the size of the question catalogue
    pub total_questions: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub attempt_id: i64,
    pub question_id: i64,
    pub answer: String,
    #[serde(default)]
    pub score: i64,
}

#[derive(Debug, Deserialize)]
pub struct CompleteExamRequest {
    pub attempt_id: i64,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: DeliveryStats,
    completion_rate: f64,
}

fn store_error(e: ExamStoreError) -> Response {
    let status = match &e {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        e if e.is_conflict() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "Exam store operation failed");
    }
    (status, Json(ErrorResponse::new(e.to_string()))).into_response()
}

// ============================================================================
// Routes
// ============================================================================

/// Create the delivery endpoint router
pub fn create_router(state: EndpointState) -> Router {
    Router::new()
        .route("/exam/start", post(start_exam))
        .route("/exam/question/{id}", get(get_question))
        .route("/exam/answer", post(submit_answer))
        .route("/exam/progress/{participant_id}", get(get_progress))
        .route("/exam/complete", post(complete_exam))
        .route("/api/progress", get(live_progress))
        .route("/api/participants", get(list_participants))
        .route("/api/delivery-stats", get(delivery_stats))
        .route("/health", get(health))
        .with_state(state)
}

async fn start_exam(State(state): State<EndpointState>, Json(req): Json<StartExamRequest>) -> Response {
    let total = req
        .total_questions
        .unwrap_or(state.question_count() as i64);

    match state.store.start_attempt(req.participant_id, total) {
        Ok(attempt_id) => {
            state.events.publish(
                EventType::ParticipantStarted,
                json!({"participant_id": req.participant_id, "attempt_id": attempt_id}),
            );
            tracing::info!(
                delivery_id = state.delivery_id,
                participant_id = req.participant_id,
                attempt_id,
                "Participant started exam"
            );
            Json(ApiResponse::success(json!({"attempt_id": attempt_id}))).into_response()
        }
        Err(e) => store_error(e),
    }
}

async fn get_question(State(state): State<EndpointState>, Path(id): Path<i64>) -> Response {
    match state.questions.get(&id) {
        Some(question) => Json(ApiResponse::success(question.clone())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("Question not found: {id}"))),
        )
            .into_response(),
    }
}

async fn submit_answer(State(state): State<EndpointState>, Json(req): Json<SubmitAnswerRequest>) -> Response {
    match state
        .store
        .submit_answer(req.attempt_id, req.question_id, &req.answer, req.score)
    {
        Ok(progress) => {
            state.events.publish(
                EventType::AnswerSubmitted,
                json!({
                    "participant_id": progress.participant_id,
                    "attempt_id": req.attempt_id,
                    "question_id": req.question_id,
                    "score": req.score,
                    "questions_answered": progress.questions_answered,
                    "current_score": progress.current_score,
                }),
            );
            Json(ApiResponse::success(progress)).into_response()
        }
        Err(e) => store_error(e),
    }
}

async fn get_progress(State(state): State<EndpointState>, Path(participant_id): Path<i64>) -> Response {
    match state.store.progress_for_participant(participant_id) {
        Ok(Some(progress)) => Json(ApiResponse::success(progress)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!(
                "No progress for participant {participant_id}"
            ))),
        )
            .into_response(),
        Err(e) => store_error(e),
    }
}

async fn complete_exam(State(state): State<EndpointState>, Json(req): Json<CompleteExamRequest>) -> Response {
    let participant_id = match state.store.complete_attempt(req.attempt_id) {
        Ok(id) => id,
        Err(e) => return store_error(e),
    };

    state.events.publish(
        EventType::ParticipantCompleted,
        json!({"participant_id": participant_id, "attempt_id": req.attempt_id}),
    );

    match state.store.stats() {
        Ok(stats) if stats.all_completed() => {
            tracing::info!(delivery_id = state.delivery_id, "All participants completed");
            state.completion.notify_one();
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to read stats after completion"),
    }

    Json(ApiResponse::success(json!({
        "participant_id": participant_id,
        "attempt_id": req.attempt_id,
    })))
    .into_response()
}

async fn live_progress(State(state): State<EndpointState>) -> Response {
    match state.store.live_progress() {
        Ok(rows) => Json(ApiResponse::success(rows)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn list_participants(State(state): State<EndpointState>) -> Response {
    match state.store.participants() {
        Ok(participants) => Json(ApiResponse::success(participants)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn delivery_stats(State(state): State<EndpointState>) -> Response {
    match state.store.stats() {
        Ok(stats) => {
            let completion_rate = stats.completion_rate();
            Json(ApiResponse::success(StatsResponse {
                stats,
                completion_rate,
            }))
            .into_response()
        }
        Err(e) => store_error(e),
    }
}

async fn health(State(state): State<EndpointState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "delivery_id": state.delivery_id,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds().max(0),
    }))
}

// ============================================================================
// Endpoint Server
// ============================================================================

/// A running delivery endpoint
pub struct DeliveryEndpoint {
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl DeliveryEndpoint {
    /// Serve `state` on an already bound listener
    pub fn start(listener: TcpListener, state: EndpointState, request_logging: bool) -> std::io::Result<Self> {
        let port = listener.local_addr()?.port();
        let delivery_id = state.delivery_id;

        let mut router = create_router(state);
        if request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(delivery_id, port, "Delivery endpoint listening");
        Ok(Self {
            port,
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting requests and wait for in-flight ones to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(port = self.port, error = %e, "Delivery endpoint exited with error"),
            Err(e) => tracing::warn!(port = self.port, error = %e, "Delivery endpoint task failed"),
        }
        tracing::info!(port = self.port, "Delivery endpoint stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================
