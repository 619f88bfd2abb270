use std::sync::Arc;
use std::time::Instant;

use shared::types::{AggregateResult, ContractViolation, StudentSummary, TOP_STUDENTS_LIMIT};
use thiserror::Error;
use tracing::{debug, info};

use crate::repository::{GradeStore, StoreError, StudentGradeStats};

#[derive(Error, Debug)]
pub enum GradeError {
    #[error("course not found: {0}")]
    CourseNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("inconsistent aggregate for {course}: {reason}")]
    Inconsistent { course: String, reason: String },
}

/// Computes course aggregates on top of a [`GradeStore`].
#[derive(Clone)]
pub struct GradeService {
    store: Arc<dyn GradeStore>,
}

impl GradeService {
    pub fn new(store: Arc<dyn GradeStore>) -> Self {
        Self { store }
    }

    pub async fn average_grade_for_course(
        &self,
        course_name: &str,
    ) -> Result<AggregateResult, GradeError> {
        let started = Instant::now();
        info!(course = %course_name, "Starting grade calculation");

        let snapshot = self
            .store
            .course_snapshot(course_name, TOP_STUDENTS_LIMIT)
            .await?
            .ok_or_else(|| GradeError::CourseNotFound(course_name.to_string()))?;
        debug!(
            course = %course_name,
            students = snapshot.total_students,
            grades = snapshot.total_grades,
            "Loaded course snapshot"
        );

        let inconsistent = |reason: String| GradeError::Inconsistent {
            course: course_name.to_string(),
            reason,
        };

        let total_students = count(snapshot.total_students).map_err(&inconsistent)?;
        let total_grades = count(snapshot.total_grades).map_err(&inconsistent)?;
        let top_students = snapshot
            .top_students
            .into_iter()
            .map(summarize)
            .collect::<Result<Vec<_>, _>>()
            .map_err(&inconsistent)?;

        let processing_time_ms = started.elapsed().as_millis() as u64;
        let result = AggregateResult::new(
            snapshot.course_name,
            snapshot.average_grade.unwrap_or(0.0),
            total_students,
            total_grades,
            top_students,
            processing_time_ms,
        )
        .map_err(|violation: ContractViolation| inconsistent(violation.to_string()))?;

        info!(
            course = %course_name,
            processing_time_ms,
            "Grade calculation completed"
        );
        Ok(result)
    }
}

fn count(value: i64) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("count {value} out of range"))
}

fn summarize(stats: StudentGradeStats) -> Result<StudentSummary, String> {
    Ok(StudentSummary {
        student_id: stats.student_id,
        student_name: stats.student_name,
        average_grade: stats.average_grade,
        grade_count: count(stats.grade_count)?,
    })
}
