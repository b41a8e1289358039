//! Sample catalog used to bootstrap a fresh database.

use mentor_core::model::{Course, CourseId, CourseMeta, Lesson, LessonId, LessonKind};
use thiserror::Error;

use crate::repository::{CourseRepository, StorageError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SeedError {
    #[error(transparent)]
    Model(#[from] mentor_core::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn lesson(
    id: &str,
    title: &str,
    kind: LessonKind,
    duration: &str,
    description: &str,
    content: &str,
) -> Result<Lesson, mentor_core::Error> {
    Ok(Lesson::new(LessonId::new(id)?, title, kind, duration)
        .with_description(Some(description.to_owned()))
        .with_content(Some(content.to_owned())))
}

/// The two starter courses shipped with a new installation.
///
/// # Errors
///
/// Returns `mentor_core::Error` if a built-in record fails validation.
pub fn sample_catalog() -> Result<Vec<Course>, mentor_core::Error> {
    let business = Course::new(
        CourseId::new("1")?,
        "Business Fundamentals",
        "Learn the core principles of building a successful business",
        vec![
            lesson(
                "1",
                "Introduction to Business",
                LessonKind::Video,
                "15 min",
                "Overview of business fundamentals and key concepts",
                "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4",
            )?,
            lesson(
                "2",
                "Market Research",
                LessonKind::Text,
                "10 min",
                "Learn how to conduct effective market research",
                "Understanding your target market is crucial for business success...",
            )?,
            lesson(
                "3",
                "Business Planning Audio",
                LessonKind::Audio,
                "20 min",
                "Audio guide to creating a comprehensive business plan",
                "https://www.soundhelix.com/examples/mp3/SoundHelix-Song-1.mp3",
            )?,
        ],
    )?
    .with_meta(CourseMeta {
        thumbnail: Some("https://images.unsplash.com/photo-1556155092-490a1ba16284?w=400".into()),
        duration_label: Some("4 weeks".into()),
        level: Some("Beginner".into()),
    });

    let marketing = Course::new(
        CourseId::new("2")?,
        "Digital Marketing Mastery",
        "Master digital marketing strategies and tools",
        vec![lesson(
            "1",
            "SEO Fundamentals",
            LessonKind::Video,
            "25 min",
            "Learn the basics of search engine optimization",
            "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ElephantsDream.mp4",
        )?],
    )?
    .with_meta(CourseMeta {
        thumbnail: Some("https://images.unsplash.com/photo-1460925895917-afdab827c52f?w=400".into()),
        duration_label: Some("6 weeks".into()),
        level: Some("Intermediate".into()),
    });

    Ok(vec![business, marketing])
}

/// Upserts the sample catalog and returns how many courses were written.
///
/// # Errors
///
/// Returns `SeedError` if validation or a write fails.
pub async fn seed_sample_catalog(courses: &dyn CourseRepository) -> Result<usize, SeedError> {
    let catalog = sample_catalog()?;
    for course in &catalog {
        courses.upsert_course(course).await?;
        tracing::debug!(course_id = %course.id(), lessons = course.lesson_count(), "seeded course");
    }
    Ok(catalog.len())
}
