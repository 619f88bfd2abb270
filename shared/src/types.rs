//! Wire contract shared by the gateway and the grades service.
//!
//! `AggregateResult` is only built through [`AggregateResult::new`] (or
//! deserialized and then checked with [`AggregateResult::validate_for`]), so a
//! value in hand always satisfies the leaderboard invariants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of entries in `topStudents`.
pub const TOP_STUDENTS_LIMIT: usize = 10;

pub type StudentId = i64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractViolation {
    #[error("course name is empty")]
    EmptyCourseName,
    #[error("expected course {expected:?}, got {actual:?}")]
    CourseMismatch { expected: String, actual: String },
    #[error("{students} students cannot hold only {grades} grades")]
    StudentsExceedGrades { students: u32, grades: u32 },
    #[error("top students list has {0} entries")]
    TooManyTopStudents(usize),
    #[error("top students not sorted by average at index {0}")]
    TopStudentsUnsorted(usize),
    #[error("average grade is not a finite number")]
    NonFiniteAverage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student_id: StudentId,
    pub student_name: String,
    pub average_grade: f64,
    pub grade_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    course_name: String,
    average_grade: f64,
    total_students: u32,
    total_grades: u32,
    top_students: Vec<StudentSummary>,
    processing_time_ms: u64,
}

impl AggregateResult {
    /// Builds a result from raw aggregation output.
    ///
    /// `top_students` is stable-sorted by descending average and truncated to
    /// [`TOP_STUDENTS_LIMIT`] before the invariants are checked.
    pub fn new(
        course_name: impl Into<String>,
        average_grade: f64,
        total_students: u32,
        total_grades: u32,
        mut top_students: Vec<StudentSummary>,
        processing_time_ms: u64,
    ) -> Result<Self, ContractViolation> {
        top_students.sort_by(|a, b| b.average_grade.total_cmp(&a.average_grade));
        top_students.truncate(TOP_STUDENTS_LIMIT);

        let result = Self {
            course_name: course_name.into(),
            average_grade,
            total_students,
            total_grades,
            top_students,
            processing_time_ms,
        };
        result.validate()?;
        Ok(result)
    }

    pub fn course_name(&self) -> &str {
        &self.course_name
    }

    pub fn average_grade(&self) -> f64 {
        self.average_grade
    }

    pub fn total_students(&self) -> u32 {
        self.total_students
    }

    pub fn total_grades(&self) -> u32 {
        self.total_grades
    }

    pub fn top_students(&self) -> &[StudentSummary] {
        &self.top_students
    }

    pub fn processing_time_ms(&self) -> u64 {
        self.processing_time_ms
    }

    /// Checks the invariants that hold for any well-formed result.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        if self.course_name.is_empty() {
            return Err(ContractViolation::EmptyCourseName);
        }
        if !self.average_grade.is_finite()
            || self.top_students.iter().any(|s| !s.average_grade.is_finite())
        {
            return Err(ContractViolation::NonFiniteAverage);
        }
        if self.total_students > self.total_grades {
            return Err(ContractViolation::StudentsExceedGrades {
                students: self.total_students,
                grades: self.total_grades,
            });
        }
        if self.top_students.len() > TOP_STUDENTS_LIMIT {
            return Err(ContractViolation::TooManyTopStudents(self.top_students.len()));
        }
        if let Some(index) = self
            .top_students
            .windows(2)
            .position(|pair| pair[0].average_grade < pair[1].average_grade)
        {
            return Err(ContractViolation::TopStudentsUnsorted(index + 1));
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), and also requires the result to
    /// describe `course_name`.
    pub fn validate_for(&self, course_name: &str) -> Result<(), ContractViolation> {
        self.validate()?;
        if self.course_name != course_name {
            return Err(ContractViolation::CourseMismatch {
                expected: course_name.to_string(),
                actual: self.course_name.clone(),
            });
        }
        Ok(())
    }
}

/// JSON error body returned by both services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

impl ErrorBody {
    pub fn new(kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: kind.into(),
        }
    }
}
