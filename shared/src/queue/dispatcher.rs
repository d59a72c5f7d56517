//! Bounded-concurrency dispatch of claimed items.

use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::model::{ClaimedItem, Outcome};
use super::reporter::{Reported, StatusReporter};
use super::worker::{WorkError, WorkReport, Worker};

/// Aggregate counts for one dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub processed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    /// Items whose terminal status could not be written.
    pub unreported_count: usize,
    /// Items never worked because their claim was lost before they started.
    pub lost_count: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &Outcome, reported: Reported) {
        self.processed_count += 1;
        match outcome {
            Outcome::Completed => self.success_count += 1,
            Outcome::Failed(_) => self.failed_count += 1,
        }
        if reported != Reported::Written {
            self.unreported_count += 1;
        }
    }
}

/// Sizes of the chunks a batch of `len` items is split into.
pub fn plan_chunks(len: usize, concurrency: usize) -> Vec<usize> {
    let size = concurrency.max(1);
    (0..len)
        .step_by(size)
        .map(|start| size.min(len - start))
        .collect()
}

/// Runs a worker over claimed items, at most `concurrency` at a time.
///
/// Chunks run one after another; every item in a chunk runs as its own Tokio
/// task and the next chunk starts only once all of them have settled. A
/// failing or panicking item never affects its siblings.
///
/// Each item's claim is renewed right before it starts. Items swept or
/// re-claimed while waiting for their chunk are skipped, not worked.
pub struct BatchDispatcher {
    worker: Arc<dyn Worker>,
    reporter: StatusReporter,
    concurrency: usize,
    worker_timeout: Option<Duration>,
}

impl BatchDispatcher {
    pub fn new(worker: Arc<dyn Worker>, reporter: StatusReporter, concurrency: usize) -> Self {
        Self {
            worker,
            reporter,
            concurrency: concurrency.max(1),
            worker_timeout: None,
        }
    }

    /// Fail any item whose worker runs longer than `timeout`.
    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn dispatch(&self, items: Vec<ClaimedItem>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let chunk_count = plan_chunks(items.len(), self.concurrency).len();

        for (index, chunk) in items.chunks(self.concurrency).enumerate() {
            info!(
                chunk = index + 1,
                chunks = chunk_count,
                size = chunk.len(),
                "Dispatching chunk"
            );

            let mut handles = Vec::with_capacity(chunk.len());
            for item in chunk {
                if !self.reporter.renew_claim(item).await {
                    summary.lost_count += 1;
                    continue;
                }
                let worker = Arc::clone(&self.worker);
                let task_item = item.clone();
                let timeout = self.worker_timeout;
                let handle = tokio::spawn(async move {
                    run_worker(worker.as_ref(), &task_item, timeout).await
                });
                handles.push((item, handle));
            }

            for (item, handle) in handles {
                let result = handle
                    .await
                    .unwrap_or_else(|e| Err(WorkError::Panicked(join_error_message(e))));
                let outcome = match &result {
                    Ok(report) => {
                        info!(
                            queue_item_id = %item.id,
                            alarm_id = %item.subject_id,
                            skipped = report.skipped,
                            "Queue item completed"
                        );
                        Outcome::Completed
                    }
                    Err(e) => {
                        error!(
                            queue_item_id = %item.id,
                            alarm_id = %item.subject_id,
                            error = %e,
                            "Queue item failed"
                        );
                        Outcome::Failed(e.to_string())
                    }
                };

                let reported = self.reporter.report(item, &outcome).await;
                summary.record(&outcome, reported);
            }
        }

        info!(
            processed = summary.processed_count,
            succeeded = summary.success_count,
            failed = summary.failed_count,
            unreported = summary.unreported_count,
            lost = summary.lost_count,
            "Batch dispatch complete"
        );

        summary
    }
}

async fn run_worker(
    worker: &dyn Worker,
    item: &ClaimedItem,
    timeout: Option<Duration>,
) -> Result<WorkReport, WorkError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, worker.process(item))
            .await
            .unwrap_or(Err(WorkError::Timeout(limit))),
        None => worker.process(item).await,
    }
}

fn join_error_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    panic_message(err.into_panic())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
