use std::collections::HashMap;

use crate::model::course::{Course, CourseError, Lesson};
use crate::model::ids::{CourseId, LessonId};

/// 1-based position of a lesson inside its course ("Lesson 2 of 5").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LessonPosition {
    pub number: usize,
    pub of: usize,
}

/// Immutable set of courses available for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    courses: Vec<Course>,
    index: HashMap<CourseId, usize>,
}

impl Catalog {
    /// Builds a catalog, preserving the given course order.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::DuplicateCourse` if two courses share an id.
    pub fn new(courses: Vec<Course>) -> Result<Self, CourseError> {
        let mut index = HashMap::with_capacity(courses.len());
        for (pos, course) in courses.iter().enumerate() {
            if index.insert(course.id().clone(), pos).is_some() {
                return Err(CourseError::DuplicateCourse(course.id().clone()));
            }
        }
        Ok(Self { courses, index })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.courses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    #[must_use]
    pub fn course(&self, course_id: &CourseId) -> Option<&Course> {
        self.index.get(course_id).map(|&pos| &self.courses[pos])
    }

    /// `None` if the course is unknown or the lesson is not one of its lessons.
    #[must_use]
    pub fn lesson(&self, course_id: &CourseId, lesson_id: &LessonId) -> Option<&Lesson> {
        self.course(course_id)?.lesson(lesson_id)
    }

    #[must_use]
    pub fn next_lesson(&self, course_id: &CourseId, lesson_id: &LessonId) -> Option<&Lesson> {
        self.course(course_id)?.next_lesson(lesson_id)
    }

    #[must_use]
    pub fn previous_lesson(&self, course_id: &CourseId, lesson_id: &LessonId) -> Option<&Lesson> {
        self.course(course_id)?.previous_lesson(lesson_id)
    }

    #[must_use]
    pub fn lesson_position(
        &self,
        course_id: &CourseId,
        lesson_id: &LessonId,
    ) -> Option<LessonPosition> {
        let course = self.course(course_id)?;
        let idx = course.lesson_index(lesson_id)?;
        Some(LessonPosition {
            number: idx + 1,
            of: course.lesson_count(),
        })
    }

    /// Lesson count of a course; `0` for unknown courses.
    #[must_use]
    pub fn lesson_count(&self, course_id: &CourseId) -> usize {
        self.course(course_id).map_or(0, Course::lesson_count)
    }

    #[must_use]
    pub fn total_lessons(&self) -> usize {
        self.courses.iter().map(Course::lesson_count).sum()
    }
}
