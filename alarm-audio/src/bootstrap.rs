//! Cold-start construction of clients and state.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use shared::queue::{Continuation, PgQueueStore};
use shared::{
    BedrockScriptGenerator, Config, DispatchMode, Error, RestAudioStorage, Result, SecretsCache,
    TtsService,
};

use crate::handler::{AppState, DispatchSettings};
use crate::launcher::SelfInvokeLauncher;
use crate::repository::PgAlarmRepository;
use crate::worker::AlarmAudioWorker;

pub async fn load_aws_config(config: &Config) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await
}

/// Connect to the database with credentials from Secrets Manager.
pub async fn connect(config: &Config, secrets: &SecretsCache) -> Result<PgPool> {
    let credentials = secrets.database_credentials(&config.db_secret_arn).await?;
    shared::db::create_pool(config, &credentials).await
}

/// Build the generate-alarm-audio state.
pub async fn build_state(config: &Config, aws: &SdkConfig) -> Result<AppState> {
    let secrets = SecretsCache::new(aws_sdk_secretsmanager::Client::new(aws));
    let pool = connect(config, &secrets).await?;

    if config.storage_api_url.is_empty() {
        return Err(Error::Config("STORAGE_API_URL not set".to_string()));
    }
    if config.storage_key_secret_arn.is_empty() {
        return Err(Error::Config("STORAGE_API_KEY_SECRET_ARN not set".to_string()));
    }
    let storage_key = secrets.get(&config.storage_key_secret_arn).await?;

    let repo = Arc::new(PgAlarmRepository::new(pool.clone()));
    let worker = AlarmAudioWorker::new(
        repo.clone(),
        Arc::new(BedrockScriptGenerator::new(
            aws_sdk_bedrockruntime::Client::new(aws),
            config.bedrock_model_id.clone(),
        )),
        Arc::new(TtsService::new(aws_sdk_polly::Client::new(aws))),
        Arc::new(RestAudioStorage::new(
            config.storage_api_url.clone(),
            config.audio_bucket.clone(),
            storage_key,
        )),
    )
    .with_default_voice(config.default_voice.clone())
    .with_expiration_hours(config.audio_expiration_hours);

    let continuation = match config.dispatch_mode {
        DispatchMode::Spawn => Continuation::Spawn,
        DispatchMode::Inline => Continuation::Inline,
        DispatchMode::SelfInvoke => Continuation::Launch(Arc::new(SelfInvokeLauncher::new(
            aws_sdk_lambda::Client::new(aws),
            config.function_name.clone(),
        ))),
    };

    info!(
        batch_size = config.batch_size,
        concurrency = config.concurrency,
        dispatch_mode = ?config.dispatch_mode,
        claim_order = ?config.claim_order,
        "Alarm audio function initialized"
    );

    Ok(AppState::new(
        Arc::new(PgQueueStore::new(pool)),
        Arc::new(worker),
        repo,
        DispatchSettings::from_config(config, continuation),
    ))
}
