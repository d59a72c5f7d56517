//! In-memory queue store for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::model::{
    ClaimOrder, ClaimStamp, NewQueueItem, Outcome, QueueItem, QueueStatus, SweepReport,
    DEFAULT_MAX_RETRIES,
};
use super::store::{abandoned_message, QueueStore};
use crate::{Error, Result};

#[derive(Default)]
struct State {
    items: HashMap<Uuid, QueueItem>,
    terminal_writes: HashMap<Uuid, u32>,
}

/// A `QueueStore` kept behind a single mutex.
///
/// Every operation runs under the lock, which gives the same per-id
/// atomicity as a conditional `UPDATE`.
#[derive(Default)]
pub struct MemoryQueueStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a fully specified row, bypassing `enqueue` defaults.
    pub async fn insert(&self, item: QueueItem) {
        self.state.lock().await.items.insert(item.id, item);
    }

    /// Snapshot of every row.
    pub async fn items(&self) -> Vec<QueueItem> {
        self.state.lock().await.items.values().cloned().collect()
    }

    /// How many terminal writes have been applied to `id`.
    pub async fn terminal_write_count(&self, id: Uuid) -> u32 {
        self.state
            .lock()
            .await
            .terminal_writes
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, new: NewQueueItem) -> Result<QueueItem> {
        self.check_available()?;
        let item = QueueItem {
            id: Uuid::new_v4(),
            subject_id: new.subject_id,
            owner_id: new.owner_id,
            scheduled_for: new.scheduled_for,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
            priority: new.priority,
            claimed_at: None,
            claim_token: None,
        };
        self.state.lock().await.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        self.check_available()?;
        Ok(self.state.lock().await.items.get(&id).cloned())
    }

    async fn find_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        order: ClaimOrder,
    ) -> Result<Vec<QueueItem>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut eligible: Vec<QueueItem> = state
            .items
            .values()
            .filter(|item| item.is_eligible(now))
            .cloned()
            .collect();
        order.sort(&mut eligible);
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn conditional_transition(
        &self,
        ids: &[Uuid],
        from: QueueStatus,
        to: QueueStatus,
        stamp: ClaimStamp,
    ) -> Result<Vec<Uuid>> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let mut moved = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(item) = state.items.get_mut(id) else {
                continue;
            };
            if item.status != from || item.status.is_terminal() {
                continue;
            }

            item.status = to;
            match to {
                QueueStatus::Processing => {
                    item.claimed_at = Some(stamp.at);
                    item.claim_token = Some(stamp.token);
                }
                QueueStatus::Pending => {
                    item.claimed_at = None;
                    item.claim_token = None;
                }
                QueueStatus::Completed | QueueStatus::Failed => {
                    item.processed_at = Some(stamp.at);
                }
            }
            moved.push(*id);
        }

        Ok(moved)
    }

    async fn set_terminal(
        &self,
        id: Uuid,
        claim_token: Uuid,
        outcome: &Outcome,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let Some(item) = state.items.get_mut(&id) else {
            return Ok(false);
        };
        if item.status != QueueStatus::Processing || item.claim_token != Some(claim_token) {
            return Ok(false);
        }

        item.status = outcome.status();
        item.error_message = outcome.error_message().map(str::to_string);
        item.processed_at = Some(at);

        *state.terminal_writes.entry(id).or_insert(0) += 1;
        Ok(true)
    }

    async fn renew(&self, id: Uuid, claim_token: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        match state.items.get_mut(&id) {
            Some(item)
                if item.status == QueueStatus::Processing
                    && item.claim_token == Some(claim_token) =>
            {
                item.claimed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_orphans(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let mut report = SweepReport::default();

        for item in state.items.values_mut() {
            let orphaned = item.status == QueueStatus::Processing
                && item.claimed_at.map_or(true, |at| at < claimed_before);
            if !orphaned {
                continue;
            }

            item.retry_count += 1;
            item.claimed_at = None;
            item.claim_token = None;
            if item.retry_count >= item.max_retries {
                item.status = QueueStatus::Failed;
                item.error_message = Some(abandoned_message(item.retry_count));
                item.processed_at = Some(now);
                report.failed += 1;
            } else {
                item.status = QueueStatus::Pending;
                report.requeued += 1;
            }
        }

        Ok(report)
    }
}
