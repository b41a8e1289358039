use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::ids::{CourseId, LessonId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("lesson {0} appears more than once in course")]
    DuplicateLesson(LessonId),

    #[error("course {0} appears more than once in catalog")]
    DuplicateCourse(CourseId),

    #[error("unknown lesson type: {0}")]
    UnknownLessonKind(String),
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// Renderer category of a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonKind {
    Video,
    Audio,
    Text,
}

impl LessonKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LessonKind::Video => "video",
            LessonKind::Audio => "audio",
            LessonKind::Text => "text",
        }
    }

    /// Video and audio lessons point at a playable media resource.
    #[must_use]
    pub fn is_media(self) -> bool {
        matches!(self, LessonKind::Video | LessonKind::Audio)
    }
}

impl fmt::Display for LessonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LessonKind {
    type Err = CourseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(LessonKind::Video),
            "audio" => Ok(LessonKind::Audio),
            "text" => Ok(LessonKind::Text),
            other => Err(CourseError::UnknownLessonKind(other.to_owned())),
        }
    }
}

/// A single lesson inside a course. Owned by its course and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lesson {
    id: LessonId,
    title: String,
    kind: LessonKind,
    duration_label: String,
    description: Option<String>,
    content: Option<String>,
}

impl Lesson {
    /// Creates a new lesson.
    ///
    /// `duration_label` is an opaque display string ("15 min") and is stored as given.
    /// A blank title is displayed as the lesson id.
    #[must_use]
    pub fn new(
        id: LessonId,
        title: impl Into<String>,
        kind: LessonKind,
        duration_label: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let title = match title.trim() {
            "" => id.as_str().to_owned(),
            trimmed => trimmed.to_owned(),
        };
        Self {
            id,
            title,
            kind,
            duration_label: duration_label.into(),
            description: None,
            content: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = normalize_optional(description);
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: Option<String>) -> Self {
        self.content = normalize_optional(content);
        self
    }

    // Accessors
    #[must_use]
    pub fn id(&self) -> &LessonId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn kind(&self) -> LessonKind {
        self.kind
    }

    #[must_use]
    pub fn duration_label(&self) -> &str {
        &self.duration_label
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Parsed media location for video and audio lessons.
    ///
    /// Returns `None` for text lessons or when the content is not a valid URL.
    #[must_use]
    pub fn media_url(&self) -> Option<Url> {
        if !self.kind.is_media() {
            return None;
        }
        self.content.as_deref().and_then(|c| Url::parse(c.trim()).ok())
    }
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

/// Optional display metadata shown on course cards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseMeta {
    pub thumbnail: Option<String>,
    pub duration_label: Option<String>,
    pub level: Option<String>,
}

/// A course with its lessons in display order.
///
/// Lesson order defines next/previous navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    id: CourseId,
    title: String,
    description: String,
    meta: CourseMeta,
    lessons: Vec<Lesson>,
}

impl Course {
    /// Creates a new Course. Title and description are display strings and
    /// may be blank.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::DuplicateLesson` if two lessons share an id.
    pub fn new(
        id: CourseId,
        title: impl Into<String>,
        description: impl Into<String>,
        lessons: Vec<Lesson>,
    ) -> Result<Self, CourseError> {
        let mut seen = HashSet::with_capacity(lessons.len());
        for lesson in &lessons {
            if !seen.insert(lesson.id()) {
                return Err(CourseError::DuplicateLesson(lesson.id().clone()));
            }
        }

        Ok(Self {
            id,
            title: title.into().trim().to_owned(),
            description: description.into().trim().to_owned(),
            meta: CourseMeta::default(),
            lessons,
        })
    }

    #[must_use]
    pub fn with_meta(mut self, meta: CourseMeta) -> Self {
        self.meta = CourseMeta {
            thumbnail: normalize_optional(meta.thumbnail),
            duration_label: normalize_optional(meta.duration_label),
            level: normalize_optional(meta.level),
        };
        self
    }

    // Accessors
    #[must_use]
    pub fn id(&self) -> &CourseId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn meta(&self) -> &CourseMeta {
        &self.meta
    }

    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    #[must_use]
    pub fn lesson_count(&self) -> usize {
        self.lessons.len()
    }

    #[must_use]
    pub fn lesson(&self, lesson_id: &LessonId) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id() == lesson_id)
    }

    #[must_use]
    pub fn lesson_index(&self, lesson_id: &LessonId) -> Option<usize> {
        self.lessons.iter().position(|l| l.id() == lesson_id)
    }

    #[must_use]
    pub fn contains_lesson(&self, lesson_id: &LessonId) -> bool {
        self.lesson_index(lesson_id).is_some()
    }

    /// Lesson immediately after `lesson_id`, or `None` if it is last or unknown.
    #[must_use]
    pub fn next_lesson(&self, lesson_id: &LessonId) -> Option<&Lesson> {
        let idx = self.lesson_index(lesson_id)?;
        self.lessons.get(idx + 1)
    }

    /// Lesson immediately before `lesson_id`, or `None` if it is first or unknown.
    #[must_use]
    pub fn previous_lesson(&self, lesson_id: &LessonId) -> Option<&Lesson> {
        let idx = self.lesson_index(lesson_id)?;
        idx.checked_sub(1).and_then(|prev| self.lessons.get(prev))
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
