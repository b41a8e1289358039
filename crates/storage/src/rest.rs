//! Adapter for a hosted PostgREST-style backend.
//!
//! Tables are addressed as `{base}/rest/v1/{table}` with filters in the query
//! string, authenticated with the project's API key.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mentor_core::model::{CourseId, LessonId, ViewerId};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::repository::{
    CatalogSource, CourseRecord, EnrollmentGateway, ProgressMap, StorageError, Storage,
};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RestConfigError {
    #[error("invalid backend url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct RestConfig {
    pub base_url: Url,
    pub api_key: String,
    pub timeout: Duration,
}

impl RestConfig {
    /// Reads `MENTOR_BACKEND_URL`, `MENTOR_BACKEND_KEY` and the optional
    /// `MENTOR_BACKEND_TIMEOUT_SECS`.
    ///
    /// Returns `Ok(None)` when no backend is configured.
    ///
    /// # Errors
    ///
    /// Returns `RestConfigError` if a configured value cannot be parsed.
    pub fn from_env() -> Result<Option<Self>, RestConfigError> {
        let Ok(raw_url) = env::var("MENTOR_BACKEND_URL") else {
            return Ok(None);
        };
        let api_key = env::var("MENTOR_BACKEND_KEY").unwrap_or_default();
        if raw_url.trim().is_empty() || api_key.trim().is_empty() {
            return Ok(None);
        }
        let timeout = match env::var("MENTOR_BACKEND_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .map_err(|_| RestConfigError::InvalidTimeout(raw.clone()))?,
            ),
            Err(_) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        Ok(Some(Self::new(&raw_url, api_key, timeout)?))
    }

    /// # Errors
    ///
    /// Returns `RestConfigError::InvalidUrl` if `base_url` is not a valid URL.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RestConfigError> {
        // Joining relative paths requires a trailing slash on the base.
        let mut normalized = base_url.trim().to_owned();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        Ok(Self {
            base_url: Url::parse(&normalized)?,
            api_key: api_key.into(),
            timeout,
        })
    }
}

#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    config: RestConfig,
}

#[derive(Debug, Deserialize)]
struct EnrollmentRow {
    course_id: String,
}

#[derive(Debug, Deserialize)]
struct CompletionRow {
    course_id: String,
    lesson_id: String,
}

#[derive(Debug, Serialize)]
struct EnrollmentInsert<'a> {
    viewer_id: String,
    course_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionInsert<'a> {
    viewer_id: String,
    course_id: &'a str,
    lesson_id: &'a str,
}

fn http<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

impl RestBackend {
    /// # Errors
    ///
    /// Returns `RestConfigError::Client` if the HTTP client cannot be built.
    pub fn new(config: RestConfig) -> Result<Self, RestConfigError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Table endpoint with query parameters appended in order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the path cannot be joined.
    pub fn endpoint(&self, table: &str, params: &[(&str, &str)]) -> Result<Url, StorageError> {
        let mut url = self
            .config
            .base_url
            .join(&format!("rest/v1/{table}"))
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    async fn checked(response: Response) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        tracing::debug!(%status, url = %response.url(), "backend request rejected");
        Err(StorageError::Status(status.as_u16()))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, StorageError> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(http)?;
        Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn insert_ignoring_duplicates<T: Serialize + Sync>(
        &self,
        table: &str,
        body: &T,
    ) -> Result<(), StorageError> {
        let url = self.endpoint(table, &[])?;
        let response = self
            .authorized(self.client.post(url))
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(body)
            .send()
            .await
            .map_err(http)?;
        Self::checked(response).await?;
        Ok(())
    }
}

fn progress_from_rows(
    enrollments: Vec<EnrollmentRow>,
    completions: Vec<CompletionRow>,
) -> Result<ProgressMap, StorageError> {
    let mut progress = ProgressMap::new();
    for row in enrollments {
        let course_id =
            CourseId::new(row.course_id).map_err(|e| StorageError::Serialization(e.to_string()))?;
        progress.entry(course_id).or_default();
    }
    for row in completions {
        let course_id =
            CourseId::new(row.course_id).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let lesson_id =
            LessonId::new(row.lesson_id).map_err(|e| StorageError::Serialization(e.to_string()))?;
        progress.entry(course_id).or_default().insert(lesson_id);
    }
    Ok(progress)
}

/// Decodes each course row on its own so one malformed row does not hide the
/// rest of the catalog.
fn course_records_from_rows(rows: Vec<serde_json::Value>) -> Vec<CourseRecord> {
    rows.into_iter()
        .enumerate()
        .filter_map(|(index, row)| match serde_json::from_value::<CourseRecord>(row) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(index, error = %err, "skipping undecodable course row");
                None
            }
        })
        .collect()
}

#[async_trait]
impl CatalogSource for RestBackend {
    async fn fetch_courses(&self) -> Result<Vec<CourseRecord>, StorageError> {
        let url = self.endpoint(
            "courses",
            &[
                (
                    "select",
                    "id,title,description,thumbnail,duration,level,\
                     lessons(id,title,type:lesson_type,duration,description,content)",
                ),
                ("is_published", "eq.true"),
                ("order", "sort_order.asc"),
                ("lessons.order", "sort_order.asc"),
            ],
        )?;
        let rows: Vec<serde_json::Value> = self.get_json(url).await?;
        Ok(course_records_from_rows(rows))
    }
}

#[async_trait]
impl EnrollmentGateway for RestBackend {
    async fn fetch_progress(&self, viewer_id: ViewerId) -> Result<ProgressMap, StorageError> {
        let viewer_filter = format!("eq.{viewer_id}");
        let enrollments: Vec<EnrollmentRow> = self
            .get_json(self.endpoint(
                "enrollments",
                &[("select", "course_id"), ("viewer_id", &viewer_filter)],
            )?)
            .await?;
        let completions: Vec<CompletionRow> = self
            .get_json(self.endpoint(
                "lesson_completions",
                &[("select", "course_id,lesson_id"), ("viewer_id", &viewer_filter)],
            )?)
            .await?;
        progress_from_rows(enrollments, completions)
    }

    async fn record_enrollment(
        &self,
        viewer_id: ViewerId,
        course_id: &CourseId,
    ) -> Result<(), StorageError> {
        self.insert_ignoring_duplicates(
            "enrollments",
            &EnrollmentInsert {
                viewer_id: viewer_id.to_string(),
                course_id: course_id.as_str(),
            },
        )
        .await
    }

    async fn record_completion(
        &self,
        viewer_id: ViewerId,
        course_id: &CourseId,
        lesson_id: &LessonId,
    ) -> Result<(), StorageError> {
        self.insert_ignoring_duplicates(
            "lesson_completions",
            &CompletionInsert {
                viewer_id: viewer_id.to_string(),
                course_id: course_id.as_str(),
                lesson_id: lesson_id.as_str(),
            },
        )
        .await
    }
}

impl Storage {
    /// Serve the catalog and enrollments from the hosted backend while keeping
    /// the local outbox and subscriptions.
    #[must_use]
    pub fn with_rest_backend(mut self, backend: RestBackend) -> Self {
        let backend = Arc::new(backend);
        self.catalog = backend.clone();
        self.enrollments = backend;
        self
    }
}
