use std::collections::HashMap;

use mentor_core::model::Course;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{conn, ser};
use crate::repository::{CatalogSource, CourseRecord, CourseRepository, LessonRecord, StorageError};

fn course_from_row(row: &SqliteRow) -> Result<CourseRecord, StorageError> {
    Ok(CourseRecord {
        id: row.try_get("id").map_err(ser)?,
        title: row.try_get("title").map_err(ser)?,
        description: row.try_get("description").map_err(ser)?,
        thumbnail: row.try_get("thumbnail").map_err(ser)?,
        duration_label: row.try_get("duration_label").map_err(ser)?,
        level: row.try_get("level").map_err(ser)?,
        lessons: Vec::new(),
    })
}

fn lesson_from_row(row: &SqliteRow) -> Result<(String, LessonRecord), StorageError> {
    let course_id: String = row.try_get("course_id").map_err(ser)?;
    let lesson = LessonRecord {
        id: row.try_get("id").map_err(ser)?,
        title: row.try_get("title").map_err(ser)?,
        kind: row.try_get("kind").map_err(ser)?,
        duration_label: row.try_get("duration_label").map_err(ser)?,
        description: row.try_get("description").map_err(ser)?,
        content: row.try_get("content").map_err(ser)?,
    };
    Ok((course_id, lesson))
}

#[async_trait::async_trait]
impl CatalogSource for SqliteRepository {
    async fn fetch_courses(&self) -> Result<Vec<CourseRecord>, StorageError> {
        let course_rows = sqlx::query(
            r"
            SELECT id, title, description, thumbnail, duration_label, level
            FROM courses
            ORDER BY position ASC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let lesson_rows = sqlx::query(
            r"
            SELECT course_id, id, title, kind, duration_label, description, content
            FROM lessons
            ORDER BY course_id ASC, position ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut lessons_by_course: HashMap<String, Vec<LessonRecord>> = HashMap::new();
        for row in &lesson_rows {
            let (course_id, lesson) = lesson_from_row(row)?;
            lessons_by_course.entry(course_id).or_default().push(lesson);
        }

        let mut courses = Vec::with_capacity(course_rows.len());
        for row in &course_rows {
            let mut course = course_from_row(row)?;
            course.lessons = lessons_by_course.remove(&course.id).unwrap_or_default();
            courses.push(course);
        }
        Ok(courses)
    }
}

#[async_trait::async_trait]
impl CourseRepository for SqliteRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        let record = CourseRecord::from_course(course);
        let mut tx = self.pool.begin().await.map_err(conn)?;

        // New courses go to the end of the catalog; existing ones keep their slot.
        sqlx::query(
            r"
            INSERT INTO courses (id, position, title, description, thumbnail, duration_label, level)
            VALUES (?1, (SELECT COALESCE(MAX(position) + 1, 0) FROM courses), ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                thumbnail = excluded.thumbnail,
                duration_label = excluded.duration_label,
                level = excluded.level
            ",
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.thumbnail)
        .bind(&record.duration_label)
        .bind(&record.level)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM lessons WHERE course_id = ?1")
            .bind(&record.id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (position, lesson) in record.lessons.iter().enumerate() {
            let position = i64::try_from(position)
                .map_err(|_| StorageError::Serialization("lesson position overflow".into()))?;
            sqlx::query(
                r"
                INSERT INTO lessons (course_id, id, position, title, kind, duration_label, description, content)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
            )
            .bind(&record.id)
            .bind(&lesson.id)
            .bind(position)
            .bind(&lesson.title)
            .bind(&lesson.kind)
            .bind(&lesson.duration_label)
            .bind(&lesson.description)
            .bind(&lesson.content)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
