use thiserror::Error;

use crate::model::{CourseError, ParseIdError, ProgressError, SubscriptionError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
