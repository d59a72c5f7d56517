//! Postgres-backed queue store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{
    ClaimOrder, ClaimStamp, NewQueueItem, Outcome, QueueItem, QueueStatus, SweepReport,
    DEFAULT_MAX_RETRIES,
};
use super::store::QueueStore;
use crate::Result;

const COLUMNS: &str = r#"
    id, alarm_id, user_id, scheduled_for, status, retry_count, max_retries,
    error_message, created_at, processed_at, priority, claimed_at, claim_token
"#;

/// Queue row as stored in `audio_generation_queue`.
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    alarm_id: Uuid,
    user_id: Uuid,
    scheduled_for: DateTime<Utc>,
    status: String,
    retry_count: i32,
    max_retries: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    priority: Option<i32>,
    claimed_at: Option<DateTime<Utc>>,
    claim_token: Option<Uuid>,
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = crate::Error;

    fn try_from(row: QueueRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            subject_id: row.alarm_id,
            owner_id: row.user_id,
            scheduled_for: row.scheduled_for,
            status: row.status.parse()?,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            error_message: row.error_message,
            created_at: row.created_at,
            processed_at: row.processed_at,
            priority: row.priority,
            claimed_at: row.claimed_at,
            claim_token: row.claim_token,
        })
    }
}

fn into_items(rows: Vec<QueueRow>) -> Result<Vec<QueueItem>> {
    rows.into_iter().map(QueueItem::try_from).collect()
}

/// `QueueStore` over the `audio_generation_queue` table.
#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(&self, new: NewQueueItem) -> Result<QueueItem> {
        let sql = format!(
            r#"
            INSERT INTO audio_generation_queue
                (alarm_id, user_id, scheduled_for, priority, max_retries)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            COLUMNS
        );

        let row: QueueRow = sqlx::query_as(&sql)
            .bind(new.subject_id)
            .bind(new.owner_id)
            .bind(new.scheduled_for)
            .bind(new.priority)
            .bind(new.max_retries.unwrap_or(DEFAULT_MAX_RETRIES))
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let sql = format!("SELECT {} FROM audio_generation_queue WHERE id = $1", COLUMNS);

        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueueItem::try_from).transpose()
    }

    async fn find_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        order: ClaimOrder,
    ) -> Result<Vec<QueueItem>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM audio_generation_queue
            WHERE status = 'pending' AND scheduled_for <= $1
            ORDER BY {}
            LIMIT $2
            "#,
            COLUMNS,
            order.order_by_sql()
        );

        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        into_items(rows)
    }

    async fn conditional_transition(
        &self,
        ids: &[Uuid],
        from: QueueStatus,
        to: QueueStatus,
        stamp: ClaimStamp,
    ) -> Result<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let moved: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE audio_generation_queue
            SET status = $3,
                claimed_at = CASE
                    WHEN $3 = 'processing' THEN $4
                    WHEN $3 = 'pending' THEN NULL
                    ELSE claimed_at
                END,
                claim_token = CASE
                    WHEN $3 = 'processing' THEN $5
                    WHEN $3 = 'pending' THEN NULL
                    ELSE claim_token
                END,
                processed_at = CASE
                    WHEN $3 IN ('completed', 'failed') THEN $4
                    ELSE processed_at
                END
            WHERE id = ANY($1)
              AND status = $2
              AND status NOT IN ('completed', 'failed')
            RETURNING id
            "#,
        )
        .bind(ids)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(stamp.at)
        .bind(stamp.token)
        .fetch_all(&self.pool)
        .await?;

        Ok(moved)
    }

    async fn set_terminal(
        &self,
        id: Uuid,
        claim_token: Uuid,
        outcome: &Outcome,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE audio_generation_queue
            SET status = $3,
                error_message = $4,
                processed_at = $5
            WHERE id = $1
              AND claim_token = $2
              AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(claim_token)
        .bind(outcome.status().as_str())
        .bind(outcome.error_message())
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    async fn renew(&self, id: Uuid, claim_token: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE audio_generation_queue
            SET claimed_at = $3
            WHERE id = $1
              AND claim_token = $2
              AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(claim_token)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    /// Single-statement claim.
    ///
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent claimers from blocking on
    /// each other's rows; the outer `status = 'pending'` check is the
    /// compare-and-swap that makes the claimed sets disjoint.
    async fn claim(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        order: ClaimOrder,
    ) -> Result<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let stamp = ClaimStamp::new(now);
        let sql = format!(
            r#"
            WITH picked AS (
                SELECT id
                FROM audio_generation_queue
                WHERE status = 'pending' AND scheduled_for <= $1
                ORDER BY {order}
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE audio_generation_queue q
            SET status = 'processing',
                claimed_at = $1,
                claim_token = $3
            FROM picked
            WHERE q.id = picked.id
              AND q.status = 'pending'
            RETURNING {columns}
            "#,
            order = order.order_by_sql(),
            columns = COLUMNS
                .split(',')
                .map(|c| format!("q.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", "),
        );

        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(now)
            .bind(limit as i64)
            .bind(stamp.token)
            .fetch_all(&self.pool)
            .await?;

        let mut items = into_items(rows)?;
        // RETURNING does not preserve the CTE's order.
        order.sort(&mut items);
        Ok(items)
    }

    async fn requeue_orphans(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let statuses: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE audio_generation_queue
            SET retry_count = retry_count + 1,
                status = CASE
                    WHEN retry_count + 1 >= max_retries THEN 'failed'
                    ELSE 'pending'
                END,
                error_message = CASE
                    WHEN retry_count + 1 >= max_retries
                        THEN 'claim abandoned after ' || (retry_count + 1) || ' attempts'
                    ELSE error_message
                END,
                processed_at = CASE
                    WHEN retry_count + 1 >= max_retries THEN $2
                    ELSE processed_at
                END,
                claimed_at = NULL,
                claim_token = NULL
            WHERE status = 'processing'
              AND (claimed_at IS NULL OR claimed_at < $1)
            RETURNING status
            "#,
        )
        .bind(claimed_before)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let failed = statuses.iter().filter(|s| s.as_str() == "failed").count() as u64;
        Ok(SweepReport {
            requeued: statuses.len() as u64 - failed,
            failed,
        })
    }
}

