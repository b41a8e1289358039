#![forbid(unsafe_code)]

pub mod app_services;
pub mod catalog_service;
pub mod entitlement_service;
pub mod error;
pub mod outbox_relay;
pub mod progress_service;
pub mod viewer_session;

pub use mentor_core::Clock;

pub use app_services::AppServices;
pub use catalog_service::CatalogStore;
pub use entitlement_service::EntitlementService;
pub use error::{AppServicesError, CatalogError, ProgressError, SyncError};
pub use outbox_relay::{DrainReport, OutboxRelay, RetryPolicy, SyncConfig};
pub use progress_service::ProgressStore;
pub use viewer_session::ViewerSession;
