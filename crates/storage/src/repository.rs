use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mentor_core::model::{
    Course, CourseError, CourseId, CourseMeta, Lesson, LessonId, ParseIdError, Subscription,
    ViewerId,
};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend rejected request with status {0}")]
    Status(u16),
}

/// Completed lesson ids per course, as held by the durable store.
pub type ProgressMap = HashMap<CourseId, BTreeSet<LessonId>>;

//
// ─── CATALOG RECORDS ───────────────────────────────────────────────────────────
//

/// A catalog record failed domain validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecordError {
    #[error(transparent)]
    Id(#[from] ParseIdError),
    #[error(transparent)]
    Course(#[from] CourseError),
}

/// Nullable columns arrive as `null`; treat them like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Persisted/wire shape of a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonRecord {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(rename = "type", alias = "lesson_type")]
    pub kind: String,
    #[serde(rename = "duration", default, deserialize_with = "null_as_default")]
    pub duration_label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Persisted/wire shape of a course with its lessons in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(rename = "duration", default)]
    pub duration_label: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lessons: Vec<LessonRecord>,
}

impl CourseRecord {
    #[must_use]
    pub fn from_course(course: &Course) -> Self {
        Self {
            id: course.id().to_string(),
            title: course.title().to_owned(),
            description: course.description().to_owned(),
            thumbnail: course.meta().thumbnail.clone(),
            duration_label: course.meta().duration_label.clone(),
            level: course.meta().level.clone(),
            lessons: course
                .lessons()
                .iter()
                .map(|l| LessonRecord {
                    id: l.id().to_string(),
                    title: l.title().to_owned(),
                    kind: l.kind().as_str().to_owned(),
                    duration_label: l.duration_label().to_owned(),
                    description: l.description().map(str::to_owned),
                    content: l.content().map(str::to_owned),
                })
                .collect(),
        }
    }

    /// Convert the record into a validated domain `Course`.
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if an id is blank, a lesson type is unknown, or the
    /// course fails validation (e.g. duplicate lesson ids).
    pub fn into_course(self) -> Result<Course, RecordError> {
        let lessons = self
            .lessons
            .into_iter()
            .map(|l| -> Result<Lesson, RecordError> {
                let lesson = Lesson::new(
                    LessonId::new(l.id)?,
                    l.title,
                    l.kind.parse()?,
                    l.duration_label,
                )
                .with_description(l.description)
                .with_content(l.content);
                Ok(lesson)
            })
            .collect::<Result<Vec<_>, RecordError>>()?;

        let course = Course::new(CourseId::new(self.id)?, self.title, self.description, lessons)?
            .with_meta(CourseMeta {
                thumbnail: self.thumbnail,
                duration_label: self.duration_label,
                level: self.level,
            });
        Ok(course)
    }
}

//
// ─── OUTBOX RECORDS ────────────────────────────────────────────────────────────
//

/// A change that still has to reach the enrollment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxIntent {
    Enrollment {
        viewer_id: ViewerId,
        course_id: CourseId,
    },
    Completion {
        viewer_id: ViewerId,
        course_id: CourseId,
        lesson_id: LessonId,
    },
}

impl OutboxIntent {
    #[must_use]
    pub fn viewer_id(&self) -> ViewerId {
        match self {
            OutboxIntent::Enrollment { viewer_id, .. }
            | OutboxIntent::Completion { viewer_id, .. } => *viewer_id,
        }
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        match self {
            OutboxIntent::Enrollment { course_id, .. }
            | OutboxIntent::Completion { course_id, .. } => course_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Dead,
}

impl OutboxStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "dead" => Ok(Self::Dead),
            other => Err(StorageError::Serialization(format!(
                "invalid outbox status: {other}"
            ))),
        }
    }
}

/// A queued intent plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: i64,
    pub intent: OutboxIntent,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Failed delivery attempt to be recorded against an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub error: String,
    pub next_attempt_at: DateTime<Utc>,
    /// Park the entry permanently instead of scheduling another attempt.
    pub give_up: bool,
}

//
// ─── REPOSITORY CONTRACTS ──────────────────────────────────────────────────────
//

/// Read side of the course catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch every published course, lessons in display order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the source cannot be reached or decoded.
    async fn fetch_courses(&self) -> Result<Vec<CourseRecord>, StorageError>;
}

/// Write side of the course catalog, used for seeding.
#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// Persist or replace a course and its lessons.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the course cannot be stored.
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError>;
}

/// Durable per-viewer enrollment and completion store.
///
/// Writes are idempotent: recording the same triple twice is not an error.
#[async_trait]
pub trait EnrollmentGateway: Send + Sync {
    /// Fetch every course the viewer is enrolled in with its completed lessons.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn fetch_progress(&self, viewer_id: ViewerId) -> Result<ProgressMap, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the enrollment cannot be stored.
    async fn record_enrollment(
        &self,
        viewer_id: ViewerId,
        course_id: &CourseId,
    ) -> Result<(), StorageError>;

    /// Record a lesson completion. Implies enrollment in the course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the completion cannot be stored.
    async fn record_completion(
        &self,
        viewer_id: ViewerId,
        course_id: &CourseId,
        lesson_id: &LessonId,
    ) -> Result<(), StorageError>;
}

/// Durable queue of intents waiting to be mirrored to the gateway.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Append a pending intent that becomes due immediately.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the intent cannot be stored.
    async fn enqueue(&self, intent: &OutboxIntent, at: DateTime<Utc>) -> Result<i64, StorageError>;

    /// Pending entries whose next attempt is at or before `now`, oldest first.
    ///
    /// Rows whose payload cannot be decoded are parked as dead instead of
    /// being returned.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the queue cannot be read.
    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxEntry>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the entry does not exist.
    async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Count an attempt and reschedule (or park) the entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the entry does not exist.
    async fn record_failure(&self, id: i64, failure: &DeliveryFailure) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the queue cannot be read.
    async fn count_by_status(&self, status: OutboxStatus) -> Result<u64, StorageError>;

    /// Delete delivered entries acknowledged before `before`; returns how many went.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the queue cannot be updated.
    async fn prune_delivered(&self, before: DateTime<Utc>) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get_subscription(
        &self,
        viewer_id: ViewerId,
    ) -> Result<Option<Subscription>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the subscription cannot be stored.
    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY ADAPTER ─────────────────────────────────────────────────────────
//

#[derive(Default)]
struct OutboxState {
    next_id: i64,
    entries: Vec<OutboxEntry>,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    courses: Arc<Mutex<Vec<CourseRecord>>>,
    progress: Arc<Mutex<HashMap<ViewerId, ProgressMap>>>,
    outbox: Arc<Mutex<OutboxState>>,
    subscriptions: Arc<Mutex<HashMap<ViewerId, Subscription>>>,
}

fn poisoned<E: fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every outbox entry regardless of status.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, StorageError> {
        let guard = self.outbox.lock().map_err(poisoned)?;
        Ok(guard.entries.clone())
    }
}

#[async_trait]
impl CatalogSource for InMemoryRepository {
    async fn fetch_courses(&self) -> Result<Vec<CourseRecord>, StorageError> {
        let guard = self.courses.lock().map_err(poisoned)?;
        Ok(guard.clone())
    }
}

#[async_trait]
impl CourseRepository for InMemoryRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        let record = CourseRecord::from_course(course);
        let mut guard = self.courses.lock().map_err(poisoned)?;
        match guard.iter_mut().find(|c| c.id == record.id) {
            Some(existing) => *existing = record,
            None => guard.push(record),
        }
        Ok(())
    }
}

#[async_trait]
impl EnrollmentGateway for InMemoryRepository {
    async fn fetch_progress(&self, viewer_id: ViewerId) -> Result<ProgressMap, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        Ok(guard.get(&viewer_id).cloned().unwrap_or_default())
    }

    async fn record_enrollment(
        &self,
        viewer_id: ViewerId,
        course_id: &CourseId,
    ) -> Result<(), StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        guard
            .entry(viewer_id)
            .or_default()
            .entry(course_id.clone())
            .or_default();
        Ok(())
    }

    async fn record_completion(
        &self,
        viewer_id: ViewerId,
        course_id: &CourseId,
        lesson_id: &LessonId,
    ) -> Result<(), StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        guard
            .entry(viewer_id)
            .or_default()
            .entry(course_id.clone())
            .or_default()
            .insert(lesson_id.clone());
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryRepository {
    async fn enqueue(&self, intent: &OutboxIntent, at: DateTime<Utc>) -> Result<i64, StorageError> {
        let mut guard = self.outbox.lock().map_err(poisoned)?;
        guard.next_id += 1;
        let id = guard.next_id;
        guard.entries.push(OutboxEntry {
            id,
            intent: intent.clone(),
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: at,
            next_attempt_at: at,
            delivered_at: None,
            last_error: None,
        });
        Ok(id)
    }

    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxEntry>, StorageError> {
        let guard = self.outbox.lock().map_err(poisoned)?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(guard
            .entries
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending && e.next_attempt_at <= now)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut guard = self.outbox.lock().map_err(poisoned)?;
        let entry = guard
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StorageError::NotFound)?;
        entry.status = OutboxStatus::Delivered;
        entry.attempts += 1;
        entry.delivered_at = Some(at);
        entry.last_error = None;
        Ok(())
    }

    async fn record_failure(&self, id: i64, failure: &DeliveryFailure) -> Result<(), StorageError> {
        let mut guard = self.outbox.lock().map_err(poisoned)?;
        let entry = guard
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StorageError::NotFound)?;
        entry.attempts += 1;
        entry.last_error = Some(failure.error.clone());
        entry.next_attempt_at = failure.next_attempt_at;
        if failure.give_up {
            entry.status = OutboxStatus::Dead;
        }
        Ok(())
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<u64, StorageError> {
        let guard = self.outbox.lock().map_err(poisoned)?;
        let count = guard.entries.iter().filter(|e| e.status == status).count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn prune_delivered(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut guard = self.outbox.lock().map_err(poisoned)?;
        let len = guard.entries.len();
        guard.entries.retain(|e| {
            e.status != OutboxStatus::Delivered || e.delivered_at.is_none_or(|at| at >= before)
        });
        Ok(u64::try_from(len - guard.entries.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryRepository {
    async fn get_subscription(
        &self,
        viewer_id: ViewerId,
    ) -> Result<Option<Subscription>, StorageError> {
        let guard = self.subscriptions.lock().map_err(poisoned)?;
        Ok(guard.get(&viewer_id).cloned())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        let mut guard = self.subscriptions.lock().map_err(poisoned)?;
        guard.insert(subscription.viewer_id, subscription.clone());
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub catalog: Arc<dyn CatalogSource>,
    pub courses: Arc<dyn CourseRepository>,
    pub enrollments: Arc<dyn EnrollmentGateway>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(InMemoryRepository::new())
    }

    #[must_use]
    pub fn from_in_memory(repo: InMemoryRepository) -> Self {
        Self {
            catalog: Arc::new(repo.clone()),
            courses: Arc::new(repo.clone()),
            enrollments: Arc::new(repo.clone()),
            outbox: Arc::new(repo.clone()),
            subscriptions: Arc::new(repo),
        }
    }
}
