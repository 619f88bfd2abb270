//! In-process `GradeStore`, used by tests and local runs without Postgres.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::repository::{CourseSnapshot, GradeStore, StoreError, StudentGradeStats};

#[derive(Debug, Clone)]
struct Student {
    name: String,
    email: String,
}

#[derive(Debug, Clone, Copy)]
struct Grade {
    student_id: i64,
    course_id: i64,
    grade: f64,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    courses: HashMap<i64, String>,
    students: HashMap<i64, Student>,
    grades: Vec<Grade>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct InMemoryGradeStore {
    tables: RwLock<Tables>,
}

impl InMemoryGradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_course(&self, name: &str) -> Result<i64, StoreError> {
        let mut tables = self.tables.write();
        if tables.courses.values().any(|existing| existing == name) {
            return Err(StoreError::Duplicate(format!("course {name}")));
        }
        let id = tables.allocate_id();
        tables.courses.insert(id, name.to_string());
        Ok(id)
    }

    pub fn add_student(&self, name: &str, email: &str) -> Result<i64, StoreError> {
        let mut tables = self.tables.write();
        if tables.students.values().any(|s| s.email == email) {
            return Err(StoreError::Duplicate(format!("student email {email}")));
        }
        let id = tables.allocate_id();
        tables.students.insert(
            id,
            Student {
                name: name.to_string(),
                email: email.to_string(),
            },
        );
        Ok(id)
    }

    pub fn add_grade(&self, student_id: i64, course_id: i64, grade: f64) -> Result<(), StoreError> {
        if !grade.is_finite() {
            return Err(StoreError::InvalidGrade(grade));
        }
        let mut tables = self.tables.write();
        if !tables.students.contains_key(&student_id) {
            return Err(StoreError::UnknownStudent(student_id));
        }
        if !tables.courses.contains_key(&course_id) {
            return Err(StoreError::UnknownCourse(course_id));
        }
        tables.grades.push(Grade {
            student_id,
            course_id,
            grade,
        });
        Ok(())
    }
}

#[async_trait]
impl GradeStore for InMemoryGradeStore {
    async fn course_snapshot(
        &self,
        course_name: &str,
        top_limit: usize,
    ) -> Result<Option<CourseSnapshot>, StoreError> {
        // One read guard for the whole computation keeps it a single snapshot.
        let tables = self.tables.read();

        let Some(course_id) = tables
            .courses
            .iter()
            .find(|(_, name)| name.as_str() == course_name)
            .map(|(id, _)| *id)
        else {
            return Ok(None);
        };

        let mut per_student: HashMap<i64, (f64, i64)> = HashMap::new();
        let mut sum = 0.0;
        let mut total_grades = 0i64;
        for grade in tables.grades.iter().filter(|g| g.course_id == course_id) {
            let entry = per_student.entry(grade.student_id).or_insert((0.0, 0));
            entry.0 += grade.grade;
            entry.1 += 1;
            sum += grade.grade;
            total_grades += 1;
        }

        let mut top_students: Vec<StudentGradeStats> = per_student
            .iter()
            .map(|(&student_id, &(student_sum, count))| StudentGradeStats {
                student_id,
                student_name: tables
                    .students
                    .get(&student_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                average_grade: student_sum / count as f64,
                grade_count: count,
            })
            .collect();
        top_students.sort_by(|a, b| {
            b.average_grade
                .total_cmp(&a.average_grade)
                .then(a.student_id.cmp(&b.student_id))
        });
        top_students.truncate(top_limit);

        Ok(Some(CourseSnapshot {
            course_name: course_name.to_string(),
            top_students,
            average_grade: (total_grades > 0).then(|| sum / total_grades as f64),
            total_grades,
            total_students: per_student.len() as i64,
        }))
    }
}
