//! Audit event log written alongside function activity.

use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Event names recorded by the audio functions.
pub mod kinds {
    pub const QUEUE_PROCESSING_STARTED: &str = "queue_processing_started";
    pub const QUEUE_BATCH_COMPLETED: &str = "queue_batch_completed";
    pub const ALARM_AUDIO_GENERATION_STARTED: &str = "alarm_audio_generation_started";
    pub const ALARM_AUDIO_GENERATION_COMPLETED: &str = "alarm_audio_generation_completed";
    pub const COMBINED_AUDIO_GENERATED: &str = "combined_audio_generated";
    pub const ORPHANS_REQUEUED: &str = "queue_orphans_requeued";
}

/// Record an event. Failures are logged and never returned.
pub async fn log_event(
    pool: &PgPool,
    event_type: &str,
    user_id: Option<Uuid>,
    meta: serde_json::Value,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO logs (event_type, user_id, meta)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(event_type)
    .bind(user_id)
    .bind(meta)
    .execute(pool)
    .await;

    if let Err(e) = result {
        warn!(event_type, error = %e, "Failed to log event");
    }
}
