use std::sync::Arc;

use mentor_core::model::{
    Catalog, Course, CourseFilter, CourseId, Lesson, LessonId, MergeReport, Progress,
    ProgressAggregate, ProgressLedger, ProgressState, ViewerId,
};
use storage::repository::{EnrollmentGateway, OutboxIntent, OutboxRepository};

use crate::Clock;
use crate::error::{ProgressError, SyncError};

/// Per-viewer progress for the active session.
///
/// Mutations apply to the in-memory ledger first and are then queued in the
/// outbox for delivery to the enrollment gateway. Local state is never rolled
/// back because of a gateway or outbox failure.
pub struct ProgressStore {
    clock: Clock,
    viewer_id: ViewerId,
    catalog: Arc<Catalog>,
    ledger: ProgressLedger,
    gateway: Arc<dyn EnrollmentGateway>,
    outbox: Arc<dyn OutboxRepository>,
}

impl ProgressStore {
    /// Creates a store with an empty entry for every catalog course.
    #[must_use]
    pub fn new(
        clock: Clock,
        viewer_id: ViewerId,
        catalog: Arc<Catalog>,
        gateway: Arc<dyn EnrollmentGateway>,
        outbox: Arc<dyn OutboxRepository>,
    ) -> Self {
        let mut ledger = ProgressLedger::new();
        ledger.seed(&catalog);
        Self {
            clock,
            viewer_id,
            catalog,
            ledger,
            gateway,
            outbox,
        }
    }

    #[must_use]
    pub fn viewer_id(&self) -> ViewerId {
        self.viewer_id
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Overlays the gateway's durable progress onto the seeded ledger.
    ///
    /// Entries the catalog does not know are dropped. Completions already in
    /// memory are kept.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::GatewayReadFailed` if the gateway cannot be read; the
    /// ledger is left as it was.
    pub async fn initialize(&mut self) -> Result<MergeReport, SyncError> {
        let durable = self
            .gateway
            .fetch_progress(self.viewer_id)
            .await
            .map_err(SyncError::GatewayReadFailed)?;
        let report = self.ledger.merge(&self.catalog, durable);
        if report.dropped_courses > 0 || report.dropped_lessons > 0 {
            tracing::debug!(
                viewer_id = %self.viewer_id,
                dropped_courses = report.dropped_courses,
                dropped_lessons = report.dropped_lessons,
                "ignored progress outside the catalog"
            );
        }
        Ok(report)
    }

    /// Records a lesson as completed and returns the updated snapshot.
    ///
    /// Re-marking a completed lesson leaves the set unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidLesson` if the lesson does not belong to
    /// the course. Nothing is recorded in that case.
    pub async fn mark_complete(
        &mut self,
        course_id: &CourseId,
        lesson_id: &LessonId,
    ) -> Result<Progress, ProgressError> {
        let added = self
            .ledger
            .mark_complete(&self.catalog, course_id, lesson_id)
            .inspect_err(|err| {
                tracing::debug!(viewer_id = %self.viewer_id, error = %err, "rejected completion");
            })?;
        if added {
            tracing::debug!(viewer_id = %self.viewer_id, %course_id, %lesson_id, "lesson completed");
        }
        self.queue(OutboxIntent::Completion {
            viewer_id: self.viewer_id,
            course_id: course_id.clone(),
            lesson_id: lesson_id.clone(),
        })
        .await;
        Ok(self.ledger.progress(&self.catalog, course_id))
    }

    /// Starts tracking a catalog course without completing any lesson.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::UnknownCourse` if the course is not in the catalog.
    pub async fn enroll(&mut self, course_id: &CourseId) -> Result<Progress, ProgressError> {
        self.ledger.enroll(&self.catalog, course_id)?;
        self.queue(OutboxIntent::Enrollment {
            viewer_id: self.viewer_id,
            course_id: course_id.clone(),
        })
        .await;
        Ok(self.ledger.progress(&self.catalog, course_id))
    }

    /// Snapshot for a course; zero-valued when there is no activity.
    #[must_use]
    pub fn get_progress(&self, course_id: &CourseId) -> Progress {
        self.ledger.progress(&self.catalog, course_id)
    }

    #[must_use]
    pub fn state(&self, course_id: &CourseId) -> ProgressState {
        self.ledger.state(&self.catalog, course_id)
    }

    #[must_use]
    pub fn aggregate(&self) -> ProgressAggregate {
        self.ledger.aggregate(&self.catalog)
    }

    #[must_use]
    pub fn filter_courses(&self, filter: CourseFilter) -> Vec<&Course> {
        self.ledger.filter_courses(&self.catalog, filter)
    }

    /// First lesson of the course that is not completed yet.
    #[must_use]
    pub fn resume_lesson(&self, course_id: &CourseId) -> Option<&Lesson> {
        self.ledger.resume_lesson(&self.catalog, course_id)
    }

    async fn queue(&self, intent: OutboxIntent) {
        if let Err(err) = self.outbox.enqueue(&intent, self.clock.now()).await {
            let err = SyncError::GatewayWriteFailed(err);
            tracing::warn!(
                viewer_id = %self.viewer_id,
                course_id = %intent.course_id(),
                error = ?err,
                "progress kept locally; sync intent not recorded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_core::model::LessonKind;
    use chrono::{DateTime, Utc};
    use mentor_core::time::fixed_clock;
    use storage::repository::{
        CourseRecord, DeliveryFailure, InMemoryRepository, LessonRecord, OutboxEntry, OutboxStatus,
        StorageError,
    };

    /// Outbox whose writes always fail.
    struct FailingOutbox;

    #[async_trait::async_trait]
    impl OutboxRepository for FailingOutbox {
        async fn enqueue(&self, _intent: &OutboxIntent, _at: DateTime<Utc>) -> Result<i64, StorageError> {
            Err(StorageError::Connection("disk full".into()))
        }

        async fn due_entries(
            &self,
            _now: DateTime<Utc>,
            _limit: u32,
        ) -> Result<Vec<OutboxEntry>, StorageError> {
            Ok(Vec::new())
        }

        async fn mark_delivered(&self, _id: i64, _at: DateTime<Utc>) -> Result<(), StorageError> {
            Err(StorageError::NotFound)
        }

        async fn record_failure(&self, _id: i64, _failure: &DeliveryFailure) -> Result<(), StorageError> {
            Err(StorageError::NotFound)
        }

        async fn count_by_status(&self, _status: OutboxStatus) -> Result<u64, StorageError> {
            Ok(0)
        }

        async fn prune_delivered(&self, _before: DateTime<Utc>) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    fn cid(s: &str) -> CourseId {
        CourseId::new(s).unwrap()
    }

    fn lid(s: &str) -> LessonId {
        LessonId::new(s).unwrap()
    }

    fn catalog() -> Arc<Catalog> {
        let course = |id: &str, lessons: &[&str]| {
            let lessons = lessons
                .iter()
                .map(|l| Lesson::new(lid(l), format!("Lesson {l}"), LessonKind::Text, "5 min"))
                .collect();
            Course::new(cid(id), format!("Course {id}"), "", lessons).unwrap()
        };
        Arc::new(
            Catalog::new(vec![
                course("biz-101", &["L1", "L2", "L3"]),
                course("mkt-201", &["M1", "M2"]),
                course("empty", &[]),
            ])
            .unwrap(),
        )
    }

    fn store(repo: &InMemoryRepository, viewer: ViewerId) -> ProgressStore {
        ProgressStore::new(
            fixed_clock(),
            viewer,
            catalog(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    #[tokio::test]
    async fn completion_walkthrough_reaches_completed() {
        let repo = InMemoryRepository::new();
        let mut progress = store(&repo, ViewerId::random());
        let biz = cid("biz-101");

        assert_eq!(progress.get_progress(&biz).percent_complete(), 0);
        assert_eq!(progress.state(&biz), ProgressState::NotStarted);

        let snapshot = progress.mark_complete(&biz, &lid("L1")).await.unwrap();
        assert_eq!(snapshot.percent_complete(), 33);
        assert_eq!(progress.state(&biz), ProgressState::InProgress);
        assert_eq!(progress.resume_lesson(&biz).map(Lesson::id), Some(&lid("L2")));

        progress.mark_complete(&biz, &lid("L2")).await.unwrap();
        let snapshot = progress.mark_complete(&biz, &lid("L3")).await.unwrap();
        assert_eq!(snapshot.percent_complete(), 100);
        assert_eq!(progress.state(&biz), ProgressState::Completed);
        assert!(progress.resume_lesson(&biz).is_none());

        let queued = repo.outbox_entries().unwrap();
        assert_eq!(queued.len(), 3);
        assert!(queued.iter().all(|e| e.status == OutboxStatus::Pending));
    }

    #[tokio::test]
    async fn invalid_lesson_changes_nothing() {
        let repo = InMemoryRepository::new();
        let mut progress = store(&repo, ViewerId::random());

        let err = progress
            .mark_complete(&cid("biz-101"), &lid("M1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::InvalidLesson { .. }));
        assert!(progress.mark_complete(&cid("nope"), &lid("L1")).await.is_err());

        assert_eq!(progress.aggregate().total_lessons_completed, 0);
        assert!(repo.outbox_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remarking_is_idempotent() {
        let repo = InMemoryRepository::new();
        let mut progress = store(&repo, ViewerId::random());
        let biz = cid("biz-101");

        progress.mark_complete(&biz, &lid("L1")).await.unwrap();
        let again = progress.mark_complete(&biz, &lid("L1")).await.unwrap();
        assert_eq!(again.completed_count(), 1);
        assert_eq!(again.percent_complete(), 33);
    }

    #[tokio::test]
    async fn initialize_overlays_gateway_and_drops_unknown_entries() {
        let repo = InMemoryRepository::new();
        let viewer = ViewerId::random();
        repo.record_completion(viewer, &cid("biz-101"), &lid("L2")).await.unwrap();
        repo.record_completion(viewer, &cid("biz-101"), &lid("Z9")).await.unwrap();
        repo.record_completion(viewer, &cid("retired"), &lid("L1")).await.unwrap();

        let mut progress = store(&repo, viewer);
        let report = progress.initialize().await.unwrap();
        assert_eq!(report.merged_lessons, 1);
        assert_eq!(report.dropped_lessons, 2);
        assert_eq!(report.dropped_courses, 1);

        let biz = progress.get_progress(&cid("biz-101"));
        assert!(biz.is_lesson_completed(&lid("L2")));
        assert_eq!(progress.get_progress(&cid("retired")).total_lessons(), 0);
    }

    #[tokio::test]
    async fn aggregate_counts_started_and_completed_courses() {
        let repo = InMemoryRepository::new();
        let mut progress = store(&repo, ViewerId::random());
        for lesson in ["L1", "L2", "L3"] {
            progress.mark_complete(&cid("biz-101"), &lid(lesson)).await.unwrap();
        }
        progress.mark_complete(&cid("mkt-201"), &lid("M1")).await.unwrap();

        let aggregate = progress.aggregate();
        assert_eq!(aggregate.total_courses_started, 2);
        assert_eq!(aggregate.total_courses_completed, 1);
        assert_eq!(aggregate.total_lessons_completed, 4);
        assert_eq!(aggregate.total_lessons_available, 5);
    }

    #[tokio::test]
    async fn enroll_queues_intent_and_rejects_unknown_course() {
        let repo = InMemoryRepository::new();
        let mut progress = store(&repo, ViewerId::random());

        let snapshot = progress.enroll(&cid("mkt-201")).await.unwrap();
        assert_eq!(snapshot.completed_count(), 0);
        assert!(matches!(
            progress.enroll(&cid("nope")).await,
            Err(ProgressError::UnknownCourse(_))
        ));

        let queued = repo.outbox_entries().unwrap();
        assert_eq!(queued.len(), 1);
        assert!(matches!(queued[0].intent, OutboxIntent::Enrollment { .. }));
    }

    #[tokio::test]
    async fn filter_courses_follows_state() {
        let repo = InMemoryRepository::new();
        let mut progress = store(&repo, ViewerId::random());
        progress.mark_complete(&cid("mkt-201"), &lid("M1")).await.unwrap();

        let ids = |filter| -> Vec<String> {
            progress
                .filter_courses(filter)
                .iter()
                .map(|c| c.id().to_string())
                .collect()
        };
        assert_eq!(ids(CourseFilter::InProgress), vec!["mkt-201"]);
        assert_eq!(ids(CourseFilter::NotStarted), vec!["biz-101", "empty"]);
        assert!(ids(CourseFilter::Completed).is_empty());
        assert_eq!(ids(CourseFilter::All).len(), 3);
    }

    #[tokio::test]
    async fn outbox_failure_keeps_local_completion() {
        let repo = InMemoryRepository::new();
        let mut progress = ProgressStore::new(
            fixed_clock(),
            ViewerId::random(),
            catalog(),
            Arc::new(repo.clone()),
            Arc::new(FailingOutbox),
        );
        let biz = cid("biz-101");

        let snapshot = progress.mark_complete(&biz, &lid("L1")).await.unwrap();
        assert!(snapshot.is_lesson_completed(&lid("L1")));
        assert_eq!(snapshot.percent_complete(), 33);
        assert!(progress.enroll(&cid("mkt-201")).await.is_ok());

        assert_eq!(progress.state(&biz), ProgressState::InProgress);
        assert_eq!(progress.aggregate().total_lessons_completed, 1);
    }

    #[tokio::test]
    async fn untitled_lessons_can_be_completed() {
        let record = CourseRecord {
            id: "untitled".into(),
            title: String::new(),
            description: String::new(),
            thumbnail: None,
            duration_label: None,
            level: None,
            lessons: vec![LessonRecord {
                id: "L1".into(),
                title: String::new(),
                kind: "video".into(),
                duration_label: "15 min".into(),
                description: None,
                content: None,
            }],
        };
        let catalog = Arc::new(Catalog::new(vec![record.into_course().unwrap()]).unwrap());
        let repo = InMemoryRepository::new();
        let mut progress = ProgressStore::new(
            fixed_clock(),
            ViewerId::random(),
            catalog,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        );

        let snapshot = progress.mark_complete(&cid("untitled"), &lid("L1")).await.unwrap();
        assert_eq!(snapshot.percent_complete(), 100);
        assert_eq!(progress.state(&cid("untitled")), ProgressState::Completed);
    }
}
