use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::catalog::Catalog;
use crate::model::course::{Course, Lesson};
use crate::model::ids::{CourseId, LessonId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("lesson {lesson_id} does not belong to course {course_id}")]
    InvalidLesson {
        course_id: CourseId,
        lesson_id: LessonId,
    },

    #[error("course {0} is not in the catalog")]
    UnknownCourse(CourseId),
}

//
// ─── DERIVATION ────────────────────────────────────────────────────────────────
//

/// Completion percentage, rounded half up to the nearest integer.
///
/// Returns `0` when `total` is zero. `completed` is clamped to `total`.
#[must_use]
pub fn percent_complete(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    // round(100c/t) == floor((200c + t) / 2t) for non-negative values
    let pct = (200 * completed + total) / (2 * total);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Lifecycle of a single course's progress. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    NotStarted,
    InProgress,
    Completed,
}

/// Course list filter offered to viewers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CourseFilter {
    #[default]
    All,
    InProgress,
    Completed,
    NotStarted,
}

impl CourseFilter {
    #[must_use]
    pub fn matches(self, state: ProgressState) -> bool {
        match self {
            CourseFilter::All => true,
            CourseFilter::InProgress => state == ProgressState::InProgress,
            CourseFilter::Completed => state == ProgressState::Completed,
            CourseFilter::NotStarted => state == ProgressState::NotStarted,
        }
    }
}

//
// ─── SNAPSHOT ──────────────────────────────────────────────────────────────────
//

/// Point-in-time progress of one viewer in one course.
///
/// `total_lessons` is taken from the catalog when the snapshot is built and
/// the percentage is always derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    course_id: CourseId,
    completed: BTreeSet<LessonId>,
    total_lessons: usize,
}

impl Progress {
    /// Zero-valued progress for a course with no recorded activity.
    #[must_use]
    pub fn empty(course_id: CourseId, total_lessons: usize) -> Self {
        Self {
            course_id,
            completed: BTreeSet::new(),
            total_lessons,
        }
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    #[must_use]
    pub fn completed(&self) -> &BTreeSet<LessonId> {
        &self.completed
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    #[must_use]
    pub fn total_lessons(&self) -> usize {
        self.total_lessons
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.total_lessons.saturating_sub(self.completed.len())
    }

    #[must_use]
    pub fn percent_complete(&self) -> u8 {
        percent_complete(self.completed.len(), self.total_lessons)
    }

    #[must_use]
    pub fn is_lesson_completed(&self, lesson_id: &LessonId) -> bool {
        self.completed.contains(lesson_id)
    }

    /// Classification by displayed percentage: 0 is not started, 100 is completed.
    ///
    /// A single lesson in a very long course can round to 0% and still reads
    /// as not started.
    #[must_use]
    pub fn state(&self) -> ProgressState {
        match self.percent_complete() {
            0 => ProgressState::NotStarted,
            100 => ProgressState::Completed,
            _ => ProgressState::InProgress,
        }
    }
}

/// Dashboard totals across every course the viewer has a record for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressAggregate {
    pub total_courses_started: usize,
    pub total_courses_completed: usize,
    pub total_lessons_completed: usize,
    pub total_lessons_available: usize,
}

/// Outcome of reconciling durable progress with the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub merged_lessons: usize,
    pub dropped_lessons: usize,
    pub dropped_courses: usize,
}

//
// ─── LEDGER ────────────────────────────────────────────────────────────────────
//

/// Per-course completed lesson sets for one viewer.
///
/// Every mutation validates against the catalog so that each set stays a
/// subset of its course's lesson ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressLedger {
    entries: HashMap<CourseId, BTreeSet<LessonId>>,
}

impl ProgressLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures an (empty) entry exists for every catalog course.
    pub fn seed(&mut self, catalog: &Catalog) {
        for course in catalog.courses() {
            self.entries.entry(course.id().clone()).or_default();
        }
    }

    /// Adds durable completions, dropping anything the catalog does not know.
    pub fn merge(
        &mut self,
        catalog: &Catalog,
        durable: HashMap<CourseId, BTreeSet<LessonId>>,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        for (course_id, lessons) in durable {
            let Some(course) = catalog.course(&course_id) else {
                report.dropped_courses += 1;
                report.dropped_lessons += lessons.len();
                continue;
            };
            let entry = self.entries.entry(course_id).or_default();
            for lesson_id in lessons {
                if course.contains_lesson(&lesson_id) {
                    if entry.insert(lesson_id) {
                        report.merged_lessons += 1;
                    }
                } else {
                    report.dropped_lessons += 1;
                }
            }
        }
        report
    }

    /// Creates an entry for a course. Returns `true` if it did not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::UnknownCourse` if the course is not in the catalog.
    pub fn enroll(&mut self, catalog: &Catalog, course_id: &CourseId) -> Result<bool, ProgressError> {
        if catalog.course(course_id).is_none() {
            return Err(ProgressError::UnknownCourse(course_id.clone()));
        }
        if self.entries.contains_key(course_id) {
            return Ok(false);
        }
        self.entries.insert(course_id.clone(), BTreeSet::new());
        Ok(true)
    }

    /// Marks a lesson complete. Returns `true` if the completed set grew.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidLesson` if the lesson is not a member of the
    /// course (or the course is unknown). No state changes in that case.
    pub fn mark_complete(
        &mut self,
        catalog: &Catalog,
        course_id: &CourseId,
        lesson_id: &LessonId,
    ) -> Result<bool, ProgressError> {
        if catalog.lesson(course_id, lesson_id).is_none() {
            return Err(ProgressError::InvalidLesson {
                course_id: course_id.clone(),
                lesson_id: lesson_id.clone(),
            });
        }
        Ok(self
            .entries
            .entry(course_id.clone())
            .or_default()
            .insert(lesson_id.clone()))
    }

    #[must_use]
    pub fn is_known(&self, course_id: &CourseId) -> bool {
        self.entries.contains_key(course_id)
    }

    /// Snapshot for a course; zero-valued when nothing is recorded.
    #[must_use]
    pub fn progress(&self, catalog: &Catalog, course_id: &CourseId) -> Progress {
        let total = catalog.lesson_count(course_id);
        match self.entries.get(course_id) {
            Some(completed) => Progress {
                course_id: course_id.clone(),
                completed: completed.clone(),
                total_lessons: total,
            },
            None => Progress::empty(course_id.clone(), total),
        }
    }

    #[must_use]
    pub fn state(&self, catalog: &Catalog, course_id: &CourseId) -> ProgressState {
        self.progress(catalog, course_id).state()
    }

    /// First lesson in course order that is not completed yet.
    #[must_use]
    pub fn resume_lesson<'c>(&self, catalog: &'c Catalog, course_id: &CourseId) -> Option<&'c Lesson> {
        let course = catalog.course(course_id)?;
        let completed = self.entries.get(course_id);
        course
            .lessons()
            .iter()
            .find(|l| completed.is_none_or(|set| !set.contains(l.id())))
    }

    /// Catalog courses whose progress state matches the filter, in catalog order.
    #[must_use]
    pub fn filter_courses<'c>(&self, catalog: &'c Catalog, filter: CourseFilter) -> Vec<&'c Course> {
        catalog
            .courses()
            .iter()
            .filter(|c| filter.matches(self.state(catalog, c.id())))
            .collect()
    }

    /// Folds every known entry joined against catalog lesson counts.
    #[must_use]
    pub fn aggregate(&self, catalog: &Catalog) -> ProgressAggregate {
        self.entries
            .keys()
            .map(|course_id| self.progress(catalog, course_id))
            .fold(ProgressAggregate::default(), |mut acc, p| {
                if p.completed_count() > 0 {
                    acc.total_courses_started += 1;
                }
                if p.state() == ProgressState::Completed {
                    acc.total_courses_completed += 1;
                }
                acc.total_lessons_completed += p.completed_count();
                acc.total_lessons_available += p.total_lessons();
                acc
            })
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::course::LessonKind;

    fn cid(s: &str) -> CourseId {
        CourseId::new(s).unwrap()
    }

    fn lid(s: &str) -> LessonId {
        LessonId::new(s).unwrap()
    }

    fn course(id: &str, lesson_ids: &[&str]) -> Course {
        let lessons = lesson_ids
            .iter()
            .map(|l| Lesson::new(lid(l), *l, LessonKind::Video, "15 min"))
            .collect();
        Course::new(cid(id), id, "", lessons).unwrap()
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            course("biz-101", &["L1", "L2", "L3"]),
            course("mkt-201", &["L1", "L2"]),
            course("empty", &[]),
        ])
        .unwrap()
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(percent_complete(0, 3), 0);
        assert_eq!(percent_complete(1, 3), 33);
        assert_eq!(percent_complete(2, 3), 67);
        assert_eq!(percent_complete(3, 3), 100);
        assert_eq!(percent_complete(1, 8), 13);
        assert_eq!(percent_complete(1, 200), 1);
        assert_eq!(percent_complete(1, 201), 0);
    }

    #[test]
    fn percent_matches_formula_for_every_k() {
        for n in 1..=40_usize {
            for k in 0..=n {
                let expected = (100.0 * k as f64 / n as f64).round() as u8;
                assert_eq!(percent_complete(k, n), expected, "k={k} n={n}");
            }
        }
    }

    #[test]
    fn percent_of_zero_lessons_is_zero() {
        assert_eq!(percent_complete(0, 0), 0);
        let ledger = ProgressLedger::new();
        assert_eq!(ledger.progress(&catalog(), &cid("empty")).percent_complete(), 0);
    }

    #[test]
    fn biz_101_walkthrough() {
        let catalog = catalog();
        let mut ledger = ProgressLedger::new();
        let biz = cid("biz-101");

        let initial = ledger.progress(&catalog, &biz);
        assert!(initial.completed().is_empty());
        assert_eq!(initial.total_lessons(), 3);
        assert_eq!(initial.percent_complete(), 0);
        assert_eq!(initial.state(), ProgressState::NotStarted);

        assert!(ledger.mark_complete(&catalog, &biz, &lid("L1")).unwrap());
        let after_one = ledger.progress(&catalog, &biz);
        assert_eq!(after_one.completed_count(), 1);
        assert_eq!(after_one.percent_complete(), 33);
        assert_eq!(after_one.state(), ProgressState::InProgress);

        ledger.mark_complete(&catalog, &biz, &lid("L2")).unwrap();
        ledger.mark_complete(&catalog, &biz, &lid("L3")).unwrap();
        let done = ledger.progress(&catalog, &biz);
        assert_eq!(done.percent_complete(), 100);
        assert_eq!(done.state(), ProgressState::Completed);
        assert_eq!(done.remaining(), 0);
    }

    #[test]
    fn marking_twice_is_idempotent() {
        let catalog = catalog();
        let mut ledger = ProgressLedger::new();
        let biz = cid("biz-101");

        assert!(ledger.mark_complete(&catalog, &biz, &lid("L2")).unwrap());
        let once = ledger.progress(&catalog, &biz);
        assert!(!ledger.mark_complete(&catalog, &biz, &lid("L2")).unwrap());
        assert_eq!(ledger.progress(&catalog, &biz), once);
    }

    #[test]
    fn foreign_lesson_is_rejected_without_change() {
        let catalog = catalog();
        let mut ledger = ProgressLedger::new();
        let mkt = cid("mkt-201");
        ledger.mark_complete(&catalog, &mkt, &lid("L1")).unwrap();
        let before = ledger.progress(&catalog, &mkt);

        let err = ledger.mark_complete(&catalog, &mkt, &lid("L3")).unwrap_err();
        assert_eq!(
            err,
            ProgressError::InvalidLesson {
                course_id: mkt.clone(),
                lesson_id: lid("L3"),
            }
        );
        assert_eq!(ledger.progress(&catalog, &mkt), before);

        let err = ledger.mark_complete(&catalog, &cid("ghost"), &lid("L1")).unwrap_err();
        assert!(matches!(err, ProgressError::InvalidLesson { .. }));
        assert!(!ledger.is_known(&cid("ghost")));
    }

    #[test]
    fn aggregate_counts_started_and_completed() {
        let catalog = Catalog::new(vec![
            course("biz-101", &["L1", "L2", "L3"]),
            course("mkt-201", &["L1", "L2"]),
        ])
        .unwrap();
        let mut ledger = ProgressLedger::new();
        for l in ["L1", "L2", "L3"] {
            ledger.mark_complete(&catalog, &cid("biz-101"), &lid(l)).unwrap();
        }
        ledger.mark_complete(&catalog, &cid("mkt-201"), &lid("L1")).unwrap();

        assert_eq!(
            ledger.aggregate(&catalog),
            ProgressAggregate {
                total_courses_started: 2,
                total_courses_completed: 1,
                total_lessons_completed: 4,
                total_lessons_available: 5,
            }
        );
    }

    #[test]
    fn enrolled_course_counts_as_available_but_not_started() {
        let catalog = catalog();
        let mut ledger = ProgressLedger::new();
        assert!(ledger.enroll(&catalog, &cid("mkt-201")).unwrap());
        assert!(!ledger.enroll(&catalog, &cid("mkt-201")).unwrap());

        let agg = ledger.aggregate(&catalog);
        assert_eq!(agg.total_courses_started, 0);
        assert_eq!(agg.total_lessons_available, 2);

        assert_eq!(
            ledger.enroll(&catalog, &cid("ghost")).unwrap_err(),
            ProgressError::UnknownCourse(cid("ghost"))
        );
    }

    #[test]
    fn merge_drops_unknown_courses_and_lessons() {
        let catalog = catalog();
        let mut ledger = ProgressLedger::new();
        ledger.seed(&catalog);

        let mut durable = HashMap::new();
        durable.insert(cid("biz-101"), BTreeSet::from([lid("L1"), lid("L9")]));
        durable.insert(cid("retired"), BTreeSet::from([lid("L1")]));
        let report = ledger.merge(&catalog, durable);

        assert_eq!(
            report,
            MergeReport {
                merged_lessons: 1,
                dropped_lessons: 2,
                dropped_courses: 1,
            }
        );
        assert_eq!(ledger.progress(&catalog, &cid("biz-101")).completed_count(), 1);
        assert!(!ledger.is_known(&cid("retired")));
        assert!(ledger.is_known(&cid("empty")));
    }

    #[test]
    fn resume_lesson_skips_completed() {
        let catalog = catalog();
        let mut ledger = ProgressLedger::new();
        let biz = cid("biz-101");
        assert_eq!(ledger.resume_lesson(&catalog, &biz).map(Lesson::id), Some(&lid("L1")));

        ledger.mark_complete(&catalog, &biz, &lid("L1")).unwrap();
        ledger.mark_complete(&catalog, &biz, &lid("L3")).unwrap();
        assert_eq!(ledger.resume_lesson(&catalog, &biz).map(Lesson::id), Some(&lid("L2")));

        ledger.mark_complete(&catalog, &biz, &lid("L2")).unwrap();
        assert!(ledger.resume_lesson(&catalog, &biz).is_none());
    }

    #[test]
    fn filter_courses_by_state() {
        let catalog = catalog();
        let mut ledger = ProgressLedger::new();
        ledger.mark_complete(&catalog, &cid("biz-101"), &lid("L1")).unwrap();
        ledger.mark_complete(&catalog, &cid("mkt-201"), &lid("L1")).unwrap();
        ledger.mark_complete(&catalog, &cid("mkt-201"), &lid("L2")).unwrap();

        let ids = |filter| {
            ledger
                .filter_courses(&catalog, filter)
                .into_iter()
                .map(|c| c.id().as_str().to_owned())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(CourseFilter::All), vec!["biz-101", "mkt-201", "empty"]);
        assert_eq!(ids(CourseFilter::InProgress), vec!["biz-101"]);
        assert_eq!(ids(CourseFilter::Completed), vec!["mkt-201"]);
        assert_eq!(ids(CourseFilter::NotStarted), vec!["empty"]);
    }

    #[test]
    fn state_follows_rounded_percentage() {
        let lesson_ids: Vec<String> = (1..=201).map(|n| format!("L{n}")).collect();
        let lesson_refs: Vec<&str> = lesson_ids.iter().map(String::as_str).collect();
        let catalog = Catalog::new(vec![course("long", &lesson_refs)]).unwrap();
        let mut ledger = ProgressLedger::new();

        ledger.mark_complete(&catalog, &cid("long"), &lid("L1")).unwrap();
        let progress = ledger.progress(&catalog, &cid("long"));
        assert_eq!(progress.completed_count(), 1);
        assert_eq!(progress.percent_complete(), 0);
        assert_eq!(progress.state(), ProgressState::NotStarted);
        assert_eq!(
            ledger.filter_courses(&catalog, CourseFilter::NotStarted).len(),
            1
        );
        assert_eq!(ledger.aggregate(&catalog).total_courses_started, 1);

        ledger.mark_complete(&catalog, &cid("long"), &lid("L2")).unwrap();
        assert_eq!(ledger.progress(&catalog, &cid("long")).percent_complete(), 1);
        assert_eq!(ledger.state(&catalog, &cid("long")), ProgressState::InProgress);
    }
}
