mod catalog;
mod course;
mod ids;
mod progress;
mod subscription;

pub use ids::{CourseId, LessonId, ParseIdError, ViewerId};

pub use catalog::{Catalog, LessonPosition};
pub use course::{Course, CourseError, CourseMeta, Lesson, LessonKind};
pub use progress::{
    CourseFilter, MergeReport, Progress, ProgressAggregate, ProgressError, ProgressLedger,
    ProgressState, percent_complete,
};
pub use subscription::{Subscription, SubscriptionError, SubscriptionPlan, SubscriptionStatus};
