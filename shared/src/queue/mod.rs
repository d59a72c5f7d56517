//! Audio generation work queue.
//!
//! Items are claimed atomically, worked in bounded-concurrency chunks, and
//! each receives exactly one terminal status write fenced by its claim token.

pub mod dispatcher;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod reporter;
pub mod store;
pub mod sweep;
pub mod trigger;
pub mod worker;

pub use dispatcher::{plan_chunks, BatchDispatcher, BatchSummary};
pub use memory::MemoryQueueStore;
pub use model::{
    ClaimOrder, ClaimStamp, ClaimedItem, NewQueueItem, Outcome, QueueItem, QueueStatus,
    SweepReport, DEFAULT_MAX_RETRIES,
};
pub use postgres::PgQueueStore;
pub use reporter::{Reported, StatusReporter};
pub use store::QueueStore;
pub use sweep::OrphanSweeper;
pub use trigger::{estimate_minutes, BackgroundLauncher, Continuation, QueueTrigger, TriggerSummary};
pub use worker::{WorkError, WorkReport, Worker};
