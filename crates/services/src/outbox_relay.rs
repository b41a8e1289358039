//! Delivers queued progress intents to the enrollment gateway.
//!
//! Each pending outbox entry is attempted in id order. Failures are rescheduled
//! with exponential backoff plus jitter; after `max_attempts` (or a rejection the
//! gateway will never accept) the entry is parked as dead. Delivered entries
//! are deleted once they are older than the retention window.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use storage::repository::{
    DeliveryFailure, EnrollmentGateway, OutboxEntry, OutboxIntent, OutboxRepository, OutboxStatus,
    StorageError,
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::Clock;

const DEFAULT_INTERVAL_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_BATCH_SIZE: u32 = 50;
const DEFAULT_RETENTION_HOURS: u64 = 7 * 24;

/// Backoff schedule for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Extra random delay as a fraction of the computed delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15 * 60),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try once `attempts` deliveries have failed.
    #[must_use]
    pub fn delay_for(&self, attempts: u32, rng: &mut impl Rng) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let backoff = self
            .base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return backoff;
        }
        backoff.mul_f64(1.0 + rng.random_range(0.0..jitter))
    }

    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Relay scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    pub interval: Duration,
    pub batch_size: u32,
    pub retry: RetryPolicy,
    /// How long delivered entries are kept before they are pruned.
    pub retention: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            retention: Duration::from_secs(DEFAULT_RETENTION_HOURS * 60 * 60),
        }
    }
}

impl SyncConfig {
    /// Reads `MENTOR_SYNC_INTERVAL_SECS`, `MENTOR_SYNC_MAX_ATTEMPTS` and
    /// `MENTOR_SYNC_RETENTION_HOURS`.
    ///
    /// Missing or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_number::<u64>("MENTOR_SYNC_INTERVAL_SECS").filter(|s| *s > 0) {
            config.interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_number::<u32>("MENTOR_SYNC_MAX_ATTEMPTS").filter(|n| *n > 0) {
            config.retry.max_attempts = attempts;
        }
        if let Some(hours) = env_number::<u64>("MENTOR_SYNC_RETENTION_HOURS") {
            config.retention = Duration::from_secs(hours.saturating_mul(60 * 60));
        }
        config
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

/// Outcome of one pass over the due entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
    pub pruned: u64,
}

impl DrainReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.retried == 0 && self.dead == 0 && self.pruned == 0
    }
}

pub struct OutboxRelay {
    clock: Clock,
    config: SyncConfig,
    outbox: Arc<dyn OutboxRepository>,
    gateway: Arc<dyn EnrollmentGateway>,
}

impl OutboxRelay {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: SyncConfig,
        outbox: Arc<dyn OutboxRepository>,
        gateway: Arc<dyn EnrollmentGateway>,
    ) -> Self {
        Self {
            clock,
            config,
            outbox,
            gateway,
        }
    }

    /// Delivers every entry due at the clock's current time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the outbox itself cannot be read or updated.
    pub async fn drain_once(&self) -> Result<DrainReport, StorageError> {
        self.drain_due(self.clock.now()).await
    }

    /// Delivers every entry due at `now`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the outbox itself cannot be read or updated.
    /// Gateway failures are recorded on the entry instead.
    ///
    /// Finishes by pruning delivered entries older than the retention window.
    pub async fn drain_due(&self, now: DateTime<Utc>) -> Result<DrainReport, StorageError> {
        let mut report = DrainReport::default();
        let due = self.outbox.due_entries(now, self.config.batch_size).await?;
        for entry in due {
            match self.deliver(&entry.intent).await {
                Ok(()) => {
                    self.outbox.mark_delivered(entry.id, now).await?;
                    report.delivered += 1;
                }
                Err(err) => {
                    let failure = self.failure_for(&entry, &err, now);
                    if failure.give_up {
                        tracing::warn!(
                            entry_id = entry.id,
                            viewer_id = %entry.intent.viewer_id(),
                            attempts = entry.attempts + 1,
                            error = %err,
                            "giving up on progress sync entry"
                        );
                        report.dead += 1;
                    } else {
                        tracing::debug!(
                            entry_id = entry.id,
                            viewer_id = %entry.intent.viewer_id(),
                            retry_at = %failure.next_attempt_at,
                            error = %err,
                            "progress sync failed; will retry"
                        );
                        report.retried += 1;
                    }
                    self.outbox.record_failure(entry.id, &failure).await?;
                }
            }
        }
        report.pruned = self.outbox.prune_delivered(self.retention_cutoff(now)).await?;
        Ok(report)
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.retention)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Number of entries still waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the outbox cannot be read.
    pub async fn pending_count(&self) -> Result<u64, StorageError> {
        self.outbox.count_by_status(OutboxStatus::Pending).await
    }

    /// Drains on every tick until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.config.interval.as_secs(), "outbox relay started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.drain_once().await {
                        Ok(report) if !report.is_empty() => {
                            tracing::info!(
                                delivered = report.delivered,
                                retried = report.retried,
                                dead = report.dead,
                                pruned = report.pruned,
                                "outbox drained"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "outbox drain failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("outbox relay stopped");
    }

    async fn deliver(&self, intent: &OutboxIntent) -> Result<(), StorageError> {
        match intent {
            OutboxIntent::Enrollment {
                viewer_id,
                course_id,
            } => self.gateway.record_enrollment(*viewer_id, course_id).await,
            OutboxIntent::Completion {
                viewer_id,
                course_id,
                lesson_id,
            } => {
                self.gateway
                    .record_completion(*viewer_id, course_id, lesson_id)
                    .await
            }
        }
    }

    fn failure_for(
        &self,
        entry: &OutboxEntry,
        err: &StorageError,
        now: DateTime<Utc>,
    ) -> DeliveryFailure {
        let attempts = entry.attempts.saturating_add(1);
        let give_up = is_permanent(err) || self.config.retry.exhausted(attempts);
        let delay = self.config.retry.delay_for(attempts, &mut rand::rng());
        let next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        DeliveryFailure {
            error: err.to_string(),
            next_attempt_at,
            give_up,
        }
    }
}

/// Client errors the gateway will keep rejecting no matter how often we retry.
fn is_permanent(err: &StorageError) -> bool {
    match err {
        StorageError::Status(code) => (400..500).contains(code) && !matches!(*code, 408 | 429),
        StorageError::Serialization(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_core::model::{CourseId, LessonId, ViewerId};
    use mentor_core::time::{fixed_clock, fixed_now};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Mutex;
    use storage::repository::{InMemoryRepository, ProgressMap};

    /// Gateway that fails the first `failures` writes with the given error.
    struct FlakyGateway {
        inner: InMemoryRepository,
        failures: Mutex<u32>,
        error: fn() -> StorageError,
    }

    impl FlakyGateway {
        fn new(failures: u32, error: fn() -> StorageError) -> Self {
            Self {
                inner: InMemoryRepository::new(),
                failures: Mutex::new(failures),
                error,
            }
        }

        fn trip(&self) -> Result<(), StorageError> {
            let mut left = self.failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err((self.error)());
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl EnrollmentGateway for FlakyGateway {
        async fn fetch_progress(&self, viewer_id: ViewerId) -> Result<ProgressMap, StorageError> {
            self.inner.fetch_progress(viewer_id).await
        }

        async fn record_enrollment(
            &self,
            viewer_id: ViewerId,
            course_id: &CourseId,
        ) -> Result<(), StorageError> {
            self.trip()?;
            self.inner.record_enrollment(viewer_id, course_id).await
        }

        async fn record_completion(
            &self,
            viewer_id: ViewerId,
            course_id: &CourseId,
            lesson_id: &LessonId,
        ) -> Result<(), StorageError> {
            self.trip()?;
            self.inner
                .record_completion(viewer_id, course_id, lesson_id)
                .await
        }
    }

    fn offline() -> StorageError {
        StorageError::Connection("offline".into())
    }

    fn rejected() -> StorageError {
        StorageError::Status(403)
    }

    fn completion(viewer_id: ViewerId) -> OutboxIntent {
        OutboxIntent::Completion {
            viewer_id,
            course_id: CourseId::new("biz-101").unwrap(),
            lesson_id: LessonId::new("L1").unwrap(),
        }
    }

    fn no_jitter(max_attempts: u32) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_millis(10),
            batch_size: 10,
            retry: RetryPolicy {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                max_attempts,
                jitter: 0.0,
            },
            retention: Duration::from_secs(60 * 60),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..no_jitter(8).retry
        };
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<u64> = (1..=7)
            .map(|n| policy.delay_for(n, &mut rng).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(policy.delay_for(u32::MAX, &mut rng).as_secs(), 60);
    }

    #[test]
    fn jitter_only_lengthens_the_delay() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..6 {
            let base = policy.base_delay * (1 << (attempt - 1));
            let delay = policy.delay_for(attempt, &mut rng);
            assert!(delay >= base);
            assert!(delay <= base.mul_f64(1.0 + policy.jitter));
        }
    }

    #[test]
    fn client_errors_are_permanent_except_throttling() {
        assert!(is_permanent(&StorageError::Status(400)));
        assert!(!is_permanent(&StorageError::Status(429)));
        assert!(!is_permanent(&StorageError::Status(503)));
        assert!(!is_permanent(&offline()));
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_after_backoff() {
        let outbox = InMemoryRepository::new();
        let gateway = Arc::new(FlakyGateway::new(1, offline));
        let relay = OutboxRelay::new(
            fixed_clock(),
            no_jitter(5),
            Arc::new(outbox.clone()),
            gateway.clone(),
        );
        let viewer = ViewerId::random();
        let now = fixed_now();
        outbox.enqueue(&completion(viewer), now).await.unwrap();

        let first = relay.drain_due(now).await.unwrap();
        assert_eq!(first, DrainReport { delivered: 0, retried: 1, dead: 0, pruned: 0 });
        let entry = &outbox.outbox_entries().unwrap()[0];
        assert_eq!(entry.next_attempt_at, now + chrono::Duration::seconds(2));
        assert_eq!(entry.last_error.as_deref(), Some("connection error: offline"));

        assert!(relay.drain_due(now).await.unwrap().is_empty());

        let second = relay
            .drain_due(now + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(second.delivered, 1);
        assert_eq!(relay.pending_count().await.unwrap(), 0);

        let durable = gateway.inner.fetch_progress(viewer).await.unwrap();
        assert_eq!(durable[&CourseId::new("biz-101").unwrap()].len(), 1);
    }

    #[tokio::test]
    async fn entries_are_parked_after_max_attempts() {
        let outbox = InMemoryRepository::new();
        let relay = OutboxRelay::new(
            fixed_clock(),
            no_jitter(2),
            Arc::new(outbox.clone()),
            Arc::new(FlakyGateway::new(u32::MAX, offline)),
        );
        let now = fixed_now();
        outbox.enqueue(&completion(ViewerId::random()), now).await.unwrap();

        assert_eq!(relay.drain_due(now).await.unwrap().retried, 1);
        let later = now + chrono::Duration::minutes(5);
        assert_eq!(relay.drain_due(later).await.unwrap().dead, 1);
        assert!(relay.drain_due(later + chrono::Duration::hours(1)).await.unwrap().is_empty());
        assert_eq!(outbox.count_by_status(OutboxStatus::Dead).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejected_entries_are_parked_immediately() {
        let outbox = InMemoryRepository::new();
        let relay = OutboxRelay::new(
            fixed_clock(),
            no_jitter(8),
            Arc::new(outbox.clone()),
            Arc::new(FlakyGateway::new(1, rejected)),
        );
        outbox
            .enqueue(&completion(ViewerId::random()), fixed_now())
            .await
            .unwrap();

        let report = relay.drain_once().await.unwrap();
        assert_eq!(report.dead, 1);
        assert_eq!(relay.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_until_shutdown() {
        let outbox = InMemoryRepository::new();
        let gateway = Arc::new(FlakyGateway::new(0, offline));
        let relay = Arc::new(OutboxRelay::new(
            fixed_clock(),
            no_jitter(3),
            Arc::new(outbox.clone()),
            gateway.clone(),
        ));
        outbox
            .enqueue(&completion(ViewerId::random()), fixed_now())
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let relay = Arc::clone(&relay);
            async move { relay.run(rx).await }
        });
        tokio::time::sleep(Duration::from_millis(25)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(outbox.count_by_status(OutboxStatus::Delivered).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delivered_entries_are_pruned_after_retention() {
        let outbox = InMemoryRepository::new();
        let relay = OutboxRelay::new(
            fixed_clock(),
            no_jitter(3),
            Arc::new(outbox.clone()),
            Arc::new(FlakyGateway::new(0, offline)),
        );
        let now = fixed_now();
        outbox.enqueue(&completion(ViewerId::random()), now).await.unwrap();

        let first = relay.drain_due(now).await.unwrap();
        assert_eq!((first.delivered, first.pruned), (1, 0));
        assert_eq!(outbox.count_by_status(OutboxStatus::Delivered).await.unwrap(), 1);

        let within = relay.drain_due(now + chrono::Duration::minutes(30)).await.unwrap();
        assert!(within.is_empty());

        let after = relay.drain_due(now + chrono::Duration::hours(2)).await.unwrap();
        assert_eq!(after.pruned, 1);
        assert!(outbox.outbox_entries().unwrap().is_empty());
    }
}
