//! Claim renewals and terminal status writes.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

use super::model::{ClaimedItem, Outcome};
use super::store::QueueStore;

/// Result of reporting one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reported {
    /// The terminal state was written.
    Written,
    /// The item was no longer held by this claim; nothing was written.
    Fenced,
    /// The store rejected the write; the item stays `processing`.
    WriteFailed,
}

/// Talks to the queue store on behalf of a dispatch: renews each claim before
/// its item runs and writes the terminal state afterwards.
#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn QueueStore>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Whether this dispatch still holds `item`, bumping its claim time if so.
    ///
    /// A store error counts as not held: the item stays `processing` for the
    /// orphan sweep instead of risking a second worker on it.
    pub async fn renew_claim(&self, item: &ClaimedItem) -> bool {
        match self.store.renew(item.id, item.claim_token, Utc::now()).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    queue_item_id = %item.id,
                    alarm_id = %item.subject_id,
                    "Queue item claim lost before work started; skipping"
                );
                false
            }
            Err(e) => {
                error!(
                    queue_item_id = %item.id,
                    alarm_id = %item.subject_id,
                    error = %e,
                    "Failed to renew queue item claim; skipping"
                );
                false
            }
        }
    }

    /// Write `outcome` for `item`. Never returns an error: a failed write is
    /// logged and leaves the item for the orphan sweep.
    pub async fn report(&self, item: &ClaimedItem, outcome: &Outcome) -> Reported {
        match self
            .store
            .set_terminal(item.id, item.claim_token, outcome, Utc::now())
            .await
        {
            Ok(true) => Reported::Written,
            Ok(false) => {
                warn!(
                    queue_item_id = %item.id,
                    alarm_id = %item.subject_id,
                    status = %outcome.status(),
                    "Queue item no longer held by this claim; status not written"
                );
                Reported::Fenced
            }
            Err(e) => {
                error!(
                    queue_item_id = %item.id,
                    alarm_id = %item.subject_id,
                    status = %outcome.status(),
                    error = %e,
                    "Failed to write queue item status"
                );
                Reported::WriteFailed
            }
        }
    }
}
