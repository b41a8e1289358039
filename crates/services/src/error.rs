//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;
use storage::rest::RestConfigError;
use storage::sqlite::SqliteInitError;

pub use mentor_core::model::ProgressError;

/// Errors emitted by `CatalogStore`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("course catalog is unavailable")]
    Unavailable(#[source] StorageError),
}

/// Failures talking to the enrollment gateway or the outbox in front of it.
///
/// None of these reach the caller of a progress mutation; they are logged and
/// the in-memory state stays authoritative for the session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("failed to read progress from the enrollment gateway")]
    GatewayReadFailed(#[source] StorageError),
    #[error("failed to record progress for the enrollment gateway")]
    GatewayWriteFailed(#[source] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    RestConfig(#[from] RestConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
