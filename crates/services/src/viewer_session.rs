use std::sync::Arc;

use mentor_core::model::{CourseId, LessonId, Progress, ViewerId};

use crate::app_services::AppServices;
use crate::error::ProgressError;
use crate::outbox_relay::{DrainReport, OutboxRelay};
use crate::progress_service::ProgressStore;

/// Everything one signed-in viewer works against: catalog, progress and
/// entitlement, built at sign-in and torn down at sign-out.
pub struct ViewerSession {
    progress: ProgressStore,
    relay: Arc<OutboxRelay>,
    entitled: bool,
    gateway_reachable: bool,
}

impl ViewerSession {
    /// Loads the catalog, restores the viewer's progress and checks entitlement.
    ///
    /// Never fails: an unreachable catalog yields an empty one and an
    /// unreachable gateway leaves progress empty for the session.
    pub async fn sign_in(services: &AppServices, viewer_id: ViewerId) -> Self {
        let mut progress = services.progress_store(viewer_id).await;
        let gateway_reachable = match progress.initialize().await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(%viewer_id, error = ?err, "starting session without stored progress");
                false
            }
        };
        let entitled = services.entitlements().is_entitled(viewer_id).await;
        tracing::info!(%viewer_id, entitled, "viewer signed in");
        Self {
            progress,
            relay: services.relay(),
            entitled,
            gateway_reachable,
        }
    }

    #[must_use]
    pub fn viewer_id(&self) -> ViewerId {
        self.progress.viewer_id()
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Whether gated lessons may be opened. Catalog and progress reads do not
    /// check this.
    #[must_use]
    pub fn is_entitled(&self) -> bool {
        self.entitled
    }

    /// `false` when stored progress could not be loaded at sign-in.
    #[must_use]
    pub fn gateway_reachable(&self) -> bool {
        self.gateway_reachable
    }

    /// Marks a lesson complete and tries to deliver it right away.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidLesson` if the lesson is not part of the course.
    pub async fn complete_lesson(
        &mut self,
        course_id: &CourseId,
        lesson_id: &LessonId,
    ) -> Result<Progress, ProgressError> {
        let progress = self.progress.mark_complete(course_id, lesson_id).await?;
        self.flush().await;
        Ok(progress)
    }

    /// # Errors
    ///
    /// Returns `ProgressError::UnknownCourse` if the course is not in the catalog.
    pub async fn enroll(&mut self, course_id: &CourseId) -> Result<Progress, ProgressError> {
        let progress = self.progress.enroll(course_id).await?;
        self.flush().await;
        Ok(progress)
    }

    /// Ends the session after one last delivery attempt.
    pub async fn sign_out(self) -> DrainReport {
        let report = self.flush().await;
        tracing::info!(viewer_id = %self.viewer_id(), delivered = report.delivered, "viewer signed out");
        report
    }

    async fn flush(&self) -> DrainReport {
        match self.relay.drain_once().await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = %err, "outbox flush failed");
                DrainReport::default()
            }
        }
    }
}
