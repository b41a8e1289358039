use mentor_core::model::{CourseId, LessonId, ViewerId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, course_id_from_str, lesson_id_from_str, ser, viewer_key};
use crate::repository::{EnrollmentGateway, ProgressMap, StorageError};

#[async_trait::async_trait]
impl EnrollmentGateway for SqliteRepository {
    async fn fetch_progress(&self, viewer_id: ViewerId) -> Result<ProgressMap, StorageError> {
        let viewer = viewer_key(viewer_id);
        let mut progress = ProgressMap::new();

        let enrolled = sqlx::query("SELECT course_id FROM enrollments WHERE viewer_id = ?1")
            .bind(&viewer)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;
        for row in enrolled {
            let course_id = course_id_from_str(row.try_get("course_id").map_err(ser)?)?;
            progress.entry(course_id).or_default();
        }

        let completed = sqlx::query(
            r"
            SELECT course_id, lesson_id
            FROM lesson_completions
            WHERE viewer_id = ?1
            ",
        )
        .bind(&viewer)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;
        for row in completed {
            let course_id = course_id_from_str(row.try_get("course_id").map_err(ser)?)?;
            let lesson_id = lesson_id_from_str(row.try_get("lesson_id").map_err(ser)?)?;
            progress.entry(course_id).or_default().insert(lesson_id);
        }

        Ok(progress)
    }

    async fn record_enrollment(
        &self,
        viewer_id: ViewerId,
        course_id: &CourseId,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO enrollments (viewer_id, course_id)
            VALUES (?1, ?2)
            ON CONFLICT(viewer_id, course_id) DO NOTHING
            ",
        )
        .bind(viewer_key(viewer_id))
        .bind(course_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn record_completion(
        &self,
        viewer_id: ViewerId,
        course_id: &CourseId,
        lesson_id: &LessonId,
    ) -> Result<(), StorageError> {
        let viewer = viewer_key(viewer_id);
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO enrollments (viewer_id, course_id)
            VALUES (?1, ?2)
            ON CONFLICT(viewer_id, course_id) DO NOTHING
            ",
        )
        .bind(&viewer)
        .bind(course_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO lesson_completions (viewer_id, course_id, lesson_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(viewer_id, course_id, lesson_id) DO NOTHING
            ",
        )
        .bind(&viewer)
        .bind(course_id.as_str())
        .bind(lesson_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
