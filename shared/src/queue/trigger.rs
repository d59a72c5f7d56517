//! Claim, acknowledge, continue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::dispatcher::{BatchDispatcher, BatchSummary};
use super::model::{ClaimOrder, ClaimedItem};
use super::store::QueueStore;
use crate::Result;

/// Hands a claimed batch to another execution context.
#[async_trait]
pub trait BackgroundLauncher: Send + Sync {
    async fn launch(&self, items: Vec<ClaimedItem>) -> Result<()>;
}

/// How dispatch continues once the caller has been answered.
#[derive(Clone)]
pub enum Continuation {
    /// Detached Tokio task in this process.
    Spawn,
    /// Dispatch before responding.
    Inline,
    /// Another invocation runs the batch. Falls back to inline dispatch if
    /// the launch fails.
    Launch(Arc<dyn BackgroundLauncher>),
}

/// Response body of a trigger invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSummary {
    pub success: bool,
    pub message: String,
    pub queued_count: usize,
    /// Minutes until the batch is expected to finish.
    pub estimated_time: u64,
    pub queue_empty: bool,
    pub processing_mode: &'static str,
    #[serde(flatten)]
    pub batch: Option<BatchSummary>,
}

impl TriggerSummary {
    fn empty() -> Self {
        Self {
            success: true,
            message: "No pending items in queue".to_string(),
            queued_count: 0,
            estimated_time: 0,
            queue_empty: true,
            processing_mode: "async",
            batch: None,
        }
    }
}

/// Minutes a batch of `count` items is expected to take.
pub fn estimate_minutes(count: usize, concurrency: usize, minutes_per_chunk: u64) -> u64 {
    let chunks = count.div_ceil(concurrency.max(1)) as u64;
    chunks * minutes_per_chunk
}

pub struct QueueTrigger {
    store: Arc<dyn QueueStore>,
    dispatcher: Arc<BatchDispatcher>,
    batch_size: usize,
    minutes_per_chunk: u64,
    order: ClaimOrder,
    continuation: Continuation,
}

impl QueueTrigger {
    pub fn new(
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<BatchDispatcher>,
        batch_size: usize,
        continuation: Continuation,
    ) -> Self {
        Self {
            store,
            dispatcher,
            batch_size,
            minutes_per_chunk: 4,
            order: ClaimOrder::default(),
            continuation,
        }
    }

    pub fn with_order(mut self, order: ClaimOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_minutes_per_chunk(mut self, minutes: u64) -> Self {
        self.minutes_per_chunk = minutes;
        self
    }

    /// Claim up to one batch and continue it per the configured
    /// continuation.
    ///
    /// A claim failure is returned as an error with nothing claimed.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<TriggerSummary> {
        let claimed = self.store.claim(now, self.batch_size, self.order).await?;
        let items: Vec<ClaimedItem> = claimed.iter().filter_map(|item| item.to_claimed()).collect();

        if items.is_empty() {
            info!("No pending items in queue");
            return Ok(TriggerSummary::empty());
        }

        let queued_count = items.len();
        let estimated_time = estimate_minutes(
            queued_count,
            self.dispatcher.concurrency(),
            self.minutes_per_chunk,
        );
        info!(queued_count, estimated_time, "Claimed queue items");

        let mut summary = TriggerSummary {
            success: true,
            message: format!(
                "Started processing {} alarms (estimated {} minutes)",
                queued_count, estimated_time
            ),
            queued_count,
            estimated_time,
            queue_empty: false,
            processing_mode: "async",
            batch: None,
        };

        match &self.continuation {
            Continuation::Spawn => {
                let dispatcher = Arc::clone(&self.dispatcher);
                tokio::spawn(async move {
                    dispatcher.dispatch(items).await;
                });
            }
            Continuation::Launch(launcher) => {
                if let Err(e) = launcher.launch(items.clone()).await {
                    warn!(error = %e, queued_count, "Background launch failed, dispatching inline");
                    self.finish_inline(&mut summary, items).await;
                }
            }
            Continuation::Inline => self.finish_inline(&mut summary, items).await,
        }

        Ok(summary)
    }

    async fn finish_inline(&self, summary: &mut TriggerSummary, items: Vec<ClaimedItem>) {
        let batch = self.dispatcher.dispatch(items).await;
        summary.processing_mode = "sync";
        summary.message = format!(
            "Processed {} alarms: {} succeeded, {} failed",
            batch.processed_count, batch.success_count, batch.failed_count
        );
        summary.batch = Some(batch);
    }
}
