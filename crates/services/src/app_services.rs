use std::sync::Arc;

use mentor_core::model::ViewerId;
use storage::repository::{CourseRepository, EnrollmentGateway, OutboxRepository, Storage};
use storage::rest::{RestBackend, RestConfig};

use crate::Clock;
use crate::catalog_service::CatalogStore;
use crate::entitlement_service::EntitlementService;
use crate::error::AppServicesError;
use crate::outbox_relay::{OutboxRelay, SyncConfig};
use crate::progress_service::ProgressStore;

/// Assembles the app-facing services over one `Storage`.
#[derive(Clone)]
pub struct AppServices {
    clock: Clock,
    catalog: Arc<CatalogStore>,
    courses: Arc<dyn CourseRepository>,
    enrollments: Arc<dyn EnrollmentGateway>,
    outbox: Arc<dyn OutboxRepository>,
    relay: Arc<OutboxRelay>,
    entitlements: Arc<EntitlementService>,
}

impl AppServices {
    /// Build services backed by `SQLite`, optionally serving the catalog and
    /// enrollments from a hosted backend.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails or the HTTP
    /// client cannot be built.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        backend: Option<RestConfig>,
        sync: SyncConfig,
    ) -> Result<Self, AppServicesError> {
        let mut storage = Storage::sqlite(db_url).await?;
        if let Some(config) = backend {
            tracing::info!(base_url = %config.base_url, "using hosted backend for catalog and enrollments");
            storage = storage.with_rest_backend(RestBackend::new(config)?);
        }
        Ok(Self::from_storage(storage, clock, sync))
    }

    #[must_use]
    pub fn from_storage(storage: Storage, clock: Clock, sync: SyncConfig) -> Self {
        let catalog = Arc::new(CatalogStore::new(Arc::clone(&storage.catalog)));
        let relay = Arc::new(OutboxRelay::new(
            clock,
            sync,
            Arc::clone(&storage.outbox),
            Arc::clone(&storage.enrollments),
        ));
        let entitlements = Arc::new(EntitlementService::new(
            clock,
            Arc::clone(&storage.subscriptions),
        ));
        Self {
            clock,
            catalog,
            courses: storage.courses,
            enrollments: storage.enrollments,
            outbox: storage.outbox,
            relay,
            entitlements,
        }
    }

    /// A fresh progress store for `viewer_id` over the loaded catalog.
    ///
    /// The catalog degrades to empty when its source is unavailable. The store
    /// is not initialized from the gateway yet.
    pub async fn progress_store(&self, viewer_id: ViewerId) -> ProgressStore {
        ProgressStore::new(
            self.clock,
            viewer_id,
            self.catalog.load_or_empty().await,
            Arc::clone(&self.enrollments),
            Arc::clone(&self.outbox),
        )
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<CatalogStore> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn courses(&self) -> Arc<dyn CourseRepository> {
        Arc::clone(&self.courses)
    }

    #[must_use]
    pub fn relay(&self) -> Arc<OutboxRelay> {
        Arc::clone(&self.relay)
    }

    #[must_use]
    pub fn entitlements(&self) -> Arc<EntitlementService> {
        Arc::clone(&self.entitlements)
    }
}
