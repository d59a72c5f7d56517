//! Orphan Sweeper Lambda - Releases queue claims abandoned by dead invocations.
//!
//! Runs on a schedule. Items stuck in `processing` longer than
//! `ORPHAN_TIMEOUT_MINUTES` go back to `pending`, or to `failed` once their
//! retries are used up.

use chrono::Utc;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alarm_audio::bootstrap::{connect, load_aws_config};
use shared::events::{self, kinds};
use shared::queue::{OrphanSweeper, PgQueueStore, SweepReport};
use shared::{Config, SecretsCache};

struct AppState {
    pool: PgPool,
    sweeper: OrphanSweeper,
    timeout: Duration,
}

async fn handler(state: Arc<AppState>, _event: LambdaEvent<Value>) -> Result<SweepReport, Error> {
    let report = state.sweeper.sweep(Utc::now()).await?;

    if report.requeued > 0 || report.failed > 0 {
        events::log_event(
            &state.pool,
            kinds::ORPHANS_REQUEUED,
            None,
            json!({
                "requeued": report.requeued,
                "failed": report.failed,
                "timeout_minutes": state.timeout.as_secs() / 60,
            }),
        )
        .await;
    }

    info!(requeued = report.requeued, failed = report.failed, "Sweep finished");
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;
    let aws = load_aws_config(&config).await;
    let secrets = SecretsCache::new(aws_sdk_secretsmanager::Client::new(&aws));
    let pool = connect(&config, &secrets).await?;

    let state = Arc::new(AppState {
        sweeper: OrphanSweeper::new(
            Arc::new(PgQueueStore::new(pool.clone())),
            config.orphan_timeout,
        ),
        pool,
        timeout: config.orphan_timeout,
    });

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
