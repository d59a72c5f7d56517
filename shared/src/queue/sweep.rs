//! Reconciliation of abandoned claims.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::model::SweepReport;
use super::store::QueueStore;
use crate::Result;

/// Releases items that have sat in `processing` longer than `timeout`.
///
/// A claim outlives its invocation when the process dies between claiming
/// and the terminal write, or when the terminal write itself fails.
pub struct OrphanSweeper {
    store: Arc<dyn QueueStore>,
    timeout: Duration,
}

impl OrphanSweeper {
    pub fn new(store: Arc<dyn QueueStore>, timeout: std::time::Duration) -> Self {
        Self {
            store,
            timeout: Duration::from_std(timeout).unwrap_or(Duration::minutes(15)),
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let claimed_before = now - self.timeout;
        let report = self.store.requeue_orphans(claimed_before, now).await?;

        if report.failed > 0 {
            warn!(
                requeued = report.requeued,
                failed = report.failed,
                "Orphaned queue items exhausted their retries"
            );
        } else {
            info!(requeued = report.requeued, "Orphan sweep complete");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryQueueStore;
    use crate::queue::model::{ClaimOrder, NewQueueItem, QueueStatus};
    use uuid::Uuid;

    async fn claim_one(store: &MemoryQueueStore, max_retries: i32, claimed_at: DateTime<Utc>) -> Uuid {
        let item = store
            .enqueue(NewQueueItem {
                subject_id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                scheduled_for: claimed_at - Duration::minutes(1),
                priority: None,
                max_retries: Some(max_retries),
            })
            .await
            .unwrap();
        store.claim(claimed_at, 1, ClaimOrder::Scheduled).await.unwrap();
        item.id
    }

    #[tokio::test]
    async fn stale_claims_return_to_pending() {
        let store = Arc::new(MemoryQueueStore::new());
        let now = Utc::now();
        let stale = claim_one(&store, 3, now - Duration::minutes(30)).await;
        let fresh = claim_one(&store, 3, now - Duration::minutes(2)).await;

        let sweeper = OrphanSweeper::new(store.clone(), std::time::Duration::from_secs(15 * 60));
        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report, SweepReport { requeued: 1, failed: 0 });

        let stale = store.get(stale).await.unwrap().unwrap();
        assert_eq!(stale.status, QueueStatus::Pending);
        assert_eq!(stale.retry_count, 1);
        assert!(stale.processed_at.is_none());

        let fresh = store.get(fresh).await.unwrap().unwrap();
        assert_eq!(fresh.status, QueueStatus::Processing);
    }

    #[tokio::test]
    async fn exhausted_orphans_fail() {
        let store = Arc::new(MemoryQueueStore::new());
        let now = Utc::now();
        let id = claim_one(&store, 1, now - Duration::hours(1)).await;

        let sweeper = OrphanSweeper::new(store.clone(), std::time::Duration::from_secs(60));
        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report, SweepReport { requeued: 0, failed: 1 });

        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.processed_at, Some(now));
        assert_eq!(item.error_message.as_deref(), Some("claim abandoned after 1 attempts"));
    }
}
