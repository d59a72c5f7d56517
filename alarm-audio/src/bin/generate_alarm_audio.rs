//! Generate Alarm Audio Lambda - Processes the audio generation queue.
//!
//! Invoked by API Gateway or on a schedule. Claims a batch of due alarms,
//! answers immediately, and continues generation in a second asynchronous
//! invocation of itself.

use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use alarm_audio::bootstrap::{build_state, load_aws_config};
use alarm_audio::{handle, AppState};
use shared::Config;

async fn handler(state: Arc<AppState>, event: LambdaEvent<Value>) -> Result<Value, Error> {
    let (payload, _context) = event.into_parts();
    handle(&state, payload).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;
    let aws = load_aws_config(&config).await;
    let state = Arc::new(build_state(&config, &aws).await?);

    lambda_runtime::run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
