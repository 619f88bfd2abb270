use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use shared::http::RemoteCallError;
use shared::middleware::with_observability;
use shared::types::{AggregateResult, ErrorBody};

use crate::client::GradeClient;

pub const SERVICE_NAME: &str = "Service A (Client)";

#[derive(Clone)]
pub struct AppState {
    pub grades: Arc<GradeClient>,
}

impl AppState {
    pub fn new(grades: GradeClient) -> Self {
        Self {
            grades: Arc::new(grades),
        }
    }
}

/// Any failed remote call reaches the client as a 500; the body names the
/// failure kind.
pub struct ApiError(RemoteCallError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::new(self.0.kind(), self.0.to_string())),
        )
            .into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/api/client/grades/average/:course_name", get(average_grade))
        .route("/api/client/health", get(health_check))
        .route("/api/client/health/service-b", get(service_b_health))
        .with_state(state);

    with_observability(routes)
}

async fn average_grade(
    State(state): State<AppState>,
    Path(course_name): Path<String>,
) -> Result<Json<AggregateResult>, ApiError> {
    tracing::info!(course = %course_name, "Client requested average grade");

    state
        .grades
        .fetch_average_grade(&course_name)
        .await
        .map(Json)
        .map_err(ApiError)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "UP",
        "service": SERVICE_NAME,
    }))
}

async fn service_b_health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.grades.check_health().await {
        Ok(body) => (
            StatusCode::OK,
            Json(json!({
                "status": "UP",
                "service-b": body,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "DOWN",
                "error": e.to_string(),
            })),
        ),
    }
}
