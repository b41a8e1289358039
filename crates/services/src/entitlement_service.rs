use std::sync::Arc;

use mentor_core::model::{Subscription, ViewerId};
use storage::repository::{StorageError, SubscriptionRepository};

use crate::Clock;

/// Answers whether a viewer may open gated content.
#[derive(Clone)]
pub struct EntitlementService {
    clock: Clock,
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl EntitlementService {
    #[must_use]
    pub fn new(clock: Clock, subscriptions: Arc<dyn SubscriptionRepository>) -> Self {
        Self {
            clock,
            subscriptions,
        }
    }

    /// `true` only for a live, active subscription. Lookup failures deny access.
    pub async fn is_entitled(&self, viewer_id: ViewerId) -> bool {
        match self.subscriptions.get_subscription(viewer_id).await {
            Ok(Some(subscription)) => subscription.is_entitled(self.clock.now()),
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(%viewer_id, error = %err, "subscription lookup failed; denying access");
                false
            }
        }
    }

    /// Stores the latest subscription state reported by the billing provider.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    pub async fn record_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        self.subscriptions.upsert_subscription(subscription).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mentor_core::model::{SubscriptionPlan, SubscriptionStatus};
    use mentor_core::time::{fixed_clock, fixed_now};
    use storage::repository::InMemoryRepository;

    struct BrokenSubscriptions;

    #[async_trait::async_trait]
    impl SubscriptionRepository for BrokenSubscriptions {
        async fn get_subscription(
            &self,
            _viewer_id: ViewerId,
        ) -> Result<Option<Subscription>, StorageError> {
            Err(StorageError::Connection("down".into()))
        }

        async fn upsert_subscription(&self, _subscription: &Subscription) -> Result<(), StorageError> {
            Err(StorageError::Connection("down".into()))
        }
    }

    fn subscription(viewer_id: ViewerId, status: SubscriptionStatus, days_left: i64) -> Subscription {
        Subscription {
            viewer_id,
            status,
            plan: SubscriptionPlan::Monthly,
            current_period_end: fixed_now() + Duration::days(days_left),
            cancel_at_period_end: false,
        }
    }

    #[tokio::test]
    async fn only_active_unexpired_subscriptions_entitle() {
        let service = EntitlementService::new(fixed_clock(), Arc::new(InMemoryRepository::new()));
        let active = ViewerId::random();
        let expired = ViewerId::random();
        let past_due = ViewerId::random();

        service
            .record_subscription(&subscription(active, SubscriptionStatus::Active, 10))
            .await
            .unwrap();
        service
            .record_subscription(&subscription(expired, SubscriptionStatus::Active, -1))
            .await
            .unwrap();
        service
            .record_subscription(&subscription(past_due, SubscriptionStatus::PastDue, 10))
            .await
            .unwrap();

        assert!(service.is_entitled(active).await);
        assert!(!service.is_entitled(expired).await);
        assert!(!service.is_entitled(past_due).await);
        assert!(!service.is_entitled(ViewerId::random()).await);
    }

    #[tokio::test]
    async fn lookup_failure_denies_access() {
        let service = EntitlementService::new(fixed_clock(), Arc::new(BrokenSubscriptions));
        assert!(!service.is_entitled(ViewerId::random()).await);
    }
}
