use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use shared::middleware::with_observability;
use shared::types::{AggregateResult, ErrorBody};

use crate::repository::GradeStore;
use crate::service::{GradeError, GradeService};

pub const HEALTH_MESSAGE: &str = "Service B is running";

#[derive(Clone)]
pub struct AppState {
    pub grades: GradeService,
}

impl AppState {
    pub fn new(store: Arc<dyn GradeStore>) -> Self {
        Self {
            grades: GradeService::new(store),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/api/grades/average/:course_name", get(average_grade))
        .route("/api/grades/health", get(health_check))
        .with_state(state);

    with_observability(routes)
}

async fn average_grade(
    State(state): State<AppState>,
    Path(course_name): Path<String>,
) -> Result<Json<AggregateResult>, GradeError> {
    tracing::info!(course = %course_name, "Received request for average grade");
    let result = state.grades.average_grade_for_course(&course_name).await?;
    Ok(Json(result))
}

async fn health_check() -> &'static str {
    HEALTH_MESSAGE
}

impl IntoResponse for GradeError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            GradeError::CourseNotFound(_) => (StatusCode::NOT_FOUND, "course_not_found"),
            GradeError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            GradeError::Inconsistent { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "inconsistent_aggregate"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Failed to calculate average grade");
        } else {
            tracing::warn!(error = %self, "Average grade request rejected");
        }

        (status, Json(ErrorBody::new(kind, self.to_string()))).into_response()
    }
}
