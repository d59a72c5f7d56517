//! Record store abstraction for the audio generation queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{ClaimOrder, ClaimStamp, NewQueueItem, Outcome, QueueItem, QueueStatus, SweepReport};
use crate::Result;

/// Persistent queue storage.
///
/// Implementations must make `conditional_transition` atomic per id: an id
/// whose status is no longer `from` at the moment of the write is left alone
/// and omitted from the result. `claim` builds on that guarantee, so two
/// concurrent claims always return disjoint sets.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new pending item.
    async fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem>;

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>>;

    /// Up to `limit` items that are pending and due at `now`, in `order`.
    async fn find_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        order: ClaimOrder,
    ) -> Result<Vec<QueueItem>>;

    /// Move every id still in `from` to `to`, returning the ids that moved.
    ///
    /// Entering `processing` records `stamp` as the item's claim.
    async fn conditional_transition(
        &self,
        ids: &[Uuid],
        from: QueueStatus,
        to: QueueStatus,
        stamp: ClaimStamp,
    ) -> Result<Vec<Uuid>>;

    /// Write the terminal state of a claimed item.
    ///
    /// Returns `false` without writing when the item is not in `processing`
    /// under `claim_token`.
    async fn set_terminal(
        &self,
        id: Uuid,
        claim_token: Uuid,
        outcome: &Outcome,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Re-assert a claim just before its item is worked.
    ///
    /// Moves `claimed_at` to `at` and returns `true` only while the item is
    /// still `processing` under `claim_token`. A `false` means the claim was
    /// swept or taken over and the item must not be worked.
    async fn renew(&self, id: Uuid, claim_token: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Atomically claim up to `limit` eligible items.
    ///
    /// The default selects candidates and then transitions them conditioned
    /// on `pending`; only the ids that transitioned are returned. Stores with
    /// a single-statement claim should override it.
    async fn claim(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        order: ClaimOrder,
    ) -> Result<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.find_eligible(now, limit, order).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let stamp = ClaimStamp::new(now);
        let ids: Vec<Uuid> = candidates.iter().map(|item| item.id).collect();
        let won = self
            .conditional_transition(&ids, QueueStatus::Pending, QueueStatus::Processing, stamp)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|item| won.contains(&item.id))
            .map(|mut item| {
                item.status = QueueStatus::Processing;
                item.claimed_at = Some(stamp.at);
                item.claim_token = Some(stamp.token);
                item
            })
            .collect())
    }

    /// Release claims taken before `claimed_before`.
    ///
    /// Each orphan's `retry_count` is incremented; it returns to `pending`
    /// while retries remain and becomes `failed` (with `processed_at = now`)
    /// once they are exhausted.
    async fn requeue_orphans(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SweepReport>;
}

/// Diagnostic recorded on items whose claim was abandoned too many times.
pub fn abandoned_message(attempts: i32) -> String {
    format!("claim abandoned after {} attempts", attempts)
}
