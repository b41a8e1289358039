use std::str::FromStr;

use mentor_core::model::{CourseId, LessonId, ViewerId};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn viewer_key(viewer_id: ViewerId) -> String {
    viewer_id.value().to_string()
}

pub(crate) fn viewer_from_str(raw: &str) -> Result<ViewerId, StorageError> {
    ViewerId::from_str(raw).map_err(ser)
}

pub(crate) fn course_id_from_str(raw: String) -> Result<CourseId, StorageError> {
    CourseId::new(raw).map_err(ser)
}

pub(crate) fn lesson_id_from_str(raw: String) -> Result<LessonId, StorageError> {
    LessonId::new(raw).map_err(ser)
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn bool_to_i64(value: bool) -> i64 {
    i64::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_key_round_trips() {
        let viewer = ViewerId::random();
        assert_eq!(viewer_from_str(&viewer_key(viewer)).unwrap(), viewer);
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert!(u32_from_i64("attempts", -1).is_err());
        assert_eq!(u32_from_i64("attempts", 3).unwrap(), 3);
    }
}
