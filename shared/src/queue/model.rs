//! Queue item types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    /// Completed and failed items never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(Error::Internal(format!("unknown queue status: {}", other))),
        }
    }
}

/// A row of the audio generation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    /// The alarm to generate audio for.
    pub subject_id: Uuid,
    /// The user who owns the alarm.
    pub owner_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub status: QueueStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_token: Option<Uuid>,
}

impl QueueItem {
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.scheduled_for <= now
    }

    /// The worker-facing view of a claimed item.
    ///
    /// Returns `None` unless the item is currently claimed.
    pub fn to_claimed(&self) -> Option<ClaimedItem> {
        if self.status != QueueStatus::Processing {
            return None;
        }
        Some(ClaimedItem {
            id: self.id,
            subject_id: self.subject_id,
            owner_id: self.owner_id,
            scheduled_for: self.scheduled_for,
            retry_count: self.retry_count,
            claim_token: self.claim_token?,
        })
    }
}

/// The minimal fields a worker needs for one claimed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedItem {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub owner_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub retry_count: i32,
    /// Fences the terminal write to this claim.
    pub claim_token: Uuid,
}

/// Input for creating a queue item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQueueItem {
    pub subject_id: Uuid,
    pub owner_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub priority: Option<i32>,
    pub max_retries: Option<i32>,
}

pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Ordering policy for selecting eligible items.
///
/// Every policy breaks ties by `scheduled_for` ascending, then by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOrder {
    /// Oldest `scheduled_for` first; priority ignored.
    #[default]
    Scheduled,
    /// Lowest priority value first.
    PriorityAsc,
    /// Highest priority value first.
    PriorityDesc,
}

impl ClaimOrder {
    /// Compare two items under this policy. Items without a priority sort
    /// after items that have one.
    pub fn compare(&self, a: &QueueItem, b: &QueueItem) -> Ordering {
        let by_priority = match self {
            ClaimOrder::Scheduled => Ordering::Equal,
            ClaimOrder::PriorityAsc => cmp_priority(a.priority, b.priority, false),
            ClaimOrder::PriorityDesc => cmp_priority(a.priority, b.priority, true),
        };
        by_priority
            .then(a.scheduled_for.cmp(&b.scheduled_for))
            .then(a.id.cmp(&b.id))
    }

    pub fn sort(&self, items: &mut [QueueItem]) {
        items.sort_by(|a, b| self.compare(a, b));
    }

    /// SQL `ORDER BY` body for this policy.
    pub fn order_by_sql(&self) -> &'static str {
        match self {
            ClaimOrder::Scheduled => "scheduled_for ASC, id ASC",
            ClaimOrder::PriorityAsc => "priority ASC NULLS LAST, scheduled_for ASC, id ASC",
            ClaimOrder::PriorityDesc => "priority DESC NULLS LAST, scheduled_for ASC, id ASC",
        }
    }
}

fn cmp_priority(a: Option<i32>, b: Option<i32>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) if descending => y.cmp(&x),
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl FromStr for ClaimOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" | "scheduled_for" => Ok(ClaimOrder::Scheduled),
            "priority_asc" | "priority" => Ok(ClaimOrder::PriorityAsc),
            "priority_desc" => Ok(ClaimOrder::PriorityDesc),
            other => Err(Error::Config(format!("unknown claim order: {}", other))),
        }
    }
}

/// Terminal result of working one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
}

impl Outcome {
    pub fn status(&self) -> QueueStatus {
        match self {
            Outcome::Completed => QueueStatus::Completed,
            Outcome::Failed(_) => QueueStatus::Failed,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Outcome::Completed => None,
            Outcome::Failed(detail) => Some(detail.as_str()),
        }
    }
}

/// Identifies one claim: when it happened and the token fencing later writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimStamp {
    pub at: DateTime<Utc>,
    pub token: Uuid,
}

impl ClaimStamp {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            token: Uuid::new_v4(),
        }
    }
}

/// Result of one orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Items moved back to `pending`.
    pub requeued: u64,
    /// Items whose retries were exhausted and are now `failed`.
    pub failed: u64,
}
