//! Grade storage: the `GradeStore` seam and its Postgres implementation.
//!
//! A store answers one question per request, "what does course X look like
//! right now", and must answer it from a single consistent snapshot.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown course id {0}")]
    UnknownCourse(i64),
    #[error("unknown student id {0}")]
    UnknownStudent(i64),
    #[error("grade {0} is not a finite number")]
    InvalidGrade(f64),
    #[error("duplicate {0}")]
    Duplicate(String),
}

/// Per-student aggregate for one course.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StudentGradeStats {
    pub student_id: i64,
    pub student_name: String,
    pub average_grade: f64,
    pub grade_count: i64,
}

/// Everything needed to answer an average-grade query, read at one point in
/// time.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseSnapshot {
    pub course_name: String,
    /// Best students first, at most the requested limit.
    pub top_students: Vec<StudentGradeStats>,
    /// `None` when the course has no grades.
    pub average_grade: Option<f64>,
    pub total_grades: i64,
    pub total_students: i64,
}

#[async_trait]
pub trait GradeStore: Send + Sync {
    /// Returns `Ok(None)` when no course is named `course_name`.
    async fn course_snapshot(
        &self,
        course_name: &str,
        top_limit: usize,
    ) -> Result<Option<CourseSnapshot>, StoreError>;
}

#[derive(Debug, FromRow)]
struct CourseTotals {
    average_grade: Option<f64>,
    total_grades: i64,
    total_students: i64,
}

const FIND_COURSE: &str = "SELECT id FROM courses WHERE name = $1";

const STUDENT_STATS: &str = "\
    SELECT s.id AS student_id, s.name AS student_name, \
           AVG(g.grade) AS average_grade, COUNT(*) AS grade_count \
    FROM grades g \
    JOIN students s ON s.id = g.student_id \
    WHERE g.course_id = $1 \
    GROUP BY s.id, s.name \
    ORDER BY average_grade DESC, s.id \
    LIMIT $2";

const COURSE_TOTALS: &str = "\
    SELECT AVG(grade) AS average_grade, \
           COUNT(*) AS total_grades, \
           COUNT(DISTINCT student_id) AS total_students \
    FROM grades \
    WHERE course_id = $1";

pub struct PgGradeStore {
    pool: PgPool,
}

impl PgGradeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradeStore for PgGradeStore {
    async fn course_snapshot(
        &self,
        course_name: &str,
        top_limit: usize,
    ) -> Result<Option<CourseSnapshot>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let course_id: Option<i64> = sqlx::query_scalar(FIND_COURSE)
            .bind(course_name)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(course_id) = course_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        let top_students: Vec<StudentGradeStats> = sqlx::query_as(STUDENT_STATS)
            .bind(course_id)
            .bind(i64::try_from(top_limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *tx)
            .await?;

        let totals: CourseTotals = sqlx::query_as(COURSE_TOTALS)
            .bind(course_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(CourseSnapshot {
            course_name: course_name.to_string(),
            top_students,
            average_grade: totals.average_grade,
            total_grades: totals.total_grades,
            total_students: totals.total_students,
        }))
    }
}
