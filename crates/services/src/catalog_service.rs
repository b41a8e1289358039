use std::collections::HashSet;
use std::sync::Arc;

use mentor_core::model::{Catalog, Course, CourseId, Lesson, LessonId, LessonPosition};
use storage::repository::{CatalogSource, CourseRecord};
use tokio::sync::OnceCell;

use crate::error::CatalogError;

/// Loads the course catalog once per session and answers lookups against it.
pub struct CatalogStore {
    source: Arc<dyn CatalogSource>,
    loaded: OnceCell<Arc<Catalog>>,
}

impl CatalogStore {
    #[must_use]
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self {
            source,
            loaded: OnceCell::new(),
        }
    }

    /// Fetches the catalog on first call; later calls return the cached copy.
    ///
    /// Records that fail validation are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Unavailable` if the source cannot be read. A
    /// failed load is not cached, so the next call retries.
    pub async fn load_catalog(&self) -> Result<Arc<Catalog>, CatalogError> {
        let catalog = self
            .loaded
            .get_or_try_init(|| async {
                let records = self
                    .source
                    .fetch_courses()
                    .await
                    .map_err(CatalogError::Unavailable)?;
                let catalog = build_catalog(records);
                tracing::info!(
                    courses = catalog.len(),
                    lessons = catalog.total_lessons(),
                    "course catalog loaded"
                );
                Ok::<_, CatalogError>(Arc::new(catalog))
            })
            .await?;
        Ok(Arc::clone(catalog))
    }

    /// Like `load_catalog`, but degrades to an empty catalog when the source is down.
    pub async fn load_or_empty(&self) -> Arc<Catalog> {
        match self.load_catalog().await {
            Ok(catalog) => catalog,
            Err(err) => {
                tracing::warn!(error = ?err, "continuing with an empty catalog");
                Arc::new(Catalog::empty())
            }
        }
    }

    /// The loaded catalog, if `load_catalog` has succeeded.
    #[must_use]
    pub fn catalog(&self) -> Option<Arc<Catalog>> {
        self.loaded.get().map(Arc::clone)
    }

    #[must_use]
    pub fn get_course(&self, course_id: &CourseId) -> Option<&Course> {
        self.loaded.get()?.course(course_id)
    }

    #[must_use]
    pub fn get_lesson(&self, course_id: &CourseId, lesson_id: &LessonId) -> Option<&Lesson> {
        self.loaded.get()?.lesson(course_id, lesson_id)
    }

    #[must_use]
    pub fn next_lesson(&self, course_id: &CourseId, lesson_id: &LessonId) -> Option<&Lesson> {
        self.loaded.get()?.next_lesson(course_id, lesson_id)
    }

    #[must_use]
    pub fn previous_lesson(&self, course_id: &CourseId, lesson_id: &LessonId) -> Option<&Lesson> {
        self.loaded.get()?.previous_lesson(course_id, lesson_id)
    }

    #[must_use]
    pub fn lesson_position(
        &self,
        course_id: &CourseId,
        lesson_id: &LessonId,
    ) -> Option<LessonPosition> {
        self.loaded.get()?.lesson_position(course_id, lesson_id)
    }
}

/// Converts source records into a catalog, skipping invalid or repeated courses.
fn build_catalog(records: Vec<CourseRecord>) -> Catalog {
    let mut seen = HashSet::new();
    let mut courses = Vec::with_capacity(records.len());
    for record in records {
        let raw_id = record.id.clone();
        match record.into_course() {
            Ok(course) => {
                if seen.insert(course.id().clone()) {
                    courses.push(course);
                } else {
                    tracing::warn!(course_id = %raw_id, "skipping duplicate course record");
                }
            }
            Err(err) => {
                tracing::warn!(course_id = %raw_id, error = %err, "skipping invalid course record");
            }
        }
    }
    Catalog::new(courses).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "catalog rejected; continuing with an empty catalog");
        Catalog::empty()
    })
}
