//! Request routing for the generate-alarm-audio function.
//!
//! One function serves three kinds of event:
//! - API Gateway `POST` requests, which either run the queue or generate
//!   audio for a single alarm (`{"alarmId": ..., "forceRegenerate": ...}`)
//! - scheduled events, which run the queue
//! - its own asynchronous re-invocations carrying a claimed batch

use base64::Engine;
use chrono::Utc;
use lambda_runtime::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::events::kinds;
use shared::queue::{
    BatchDispatcher, ClaimOrder, Continuation, QueueStore, QueueTrigger, StatusReporter,
    WorkError,
};
use shared::Config;

use crate::launcher::DispatchPayload;
use crate::repository::AlarmRepository;
use crate::worker::{AlarmAudioWorker, GeneratedClip, AUDIO_TYPE_COMBINED};

/// API Gateway proxy request, REST (v1) or HTTP (v2) payload format.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiGatewayRequest {
    http_method: Option<String>,
    request_context: Option<RequestContext>,
    body: Option<String>,
    is_base64_encoded: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RequestContext {
    http: Option<HttpContext>,
}

#[derive(Debug, Default, Deserialize)]
struct HttpContext {
    method: Option<String>,
}

impl ApiGatewayRequest {
    fn method(&self) -> Option<&str> {
        self.http_method.as_deref().or_else(|| {
            self.request_context
                .as_ref()
                .and_then(|ctx| ctx.http.as_ref())
                .and_then(|http| http.method.as_deref())
        })
    }

    fn decoded_body(&self) -> Option<String> {
        let body = self.body.as_deref()?;
        if !self.is_base64_encoded.unwrap_or(false) {
            return Some(body.to_string());
        }
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }
}

/// API Gateway proxy response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl ApiGatewayResponse {
    fn json<T: Serialize>(status_code: u16, data: &T) -> Result<Value, Error> {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let response = Self {
            status_code,
            headers,
            body: serde_json::to_string(data)?,
            is_base64_encoded: false,
        };
        Ok(serde_json::to_value(response)?)
    }

    fn error(status_code: u16, message: &str) -> Result<Value, Error> {
        Self::json(status_code, &json!({ "success": false, "error": message }))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    alarm_id: Option<String>,
    #[serde(default)]
    force_regenerate: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailedClip {
    clip_id: String,
    error: String,
    audio_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    success: bool,
    message: String,
    generated_clips: Vec<GeneratedClip>,
    failed_clips: Vec<FailedClip>,
    alarm_id: Uuid,
    user_id: Option<Uuid>,
}

/// Queue dispatch settings.
#[derive(Clone)]
pub struct DispatchSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub minutes_per_chunk: u64,
    pub order: ClaimOrder,
    pub worker_timeout: Option<Duration>,
    pub continuation: Continuation,
}

impl DispatchSettings {
    pub fn from_config(config: &Config, continuation: Continuation) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
            minutes_per_chunk: u64::from(config.minutes_per_chunk),
            order: config.claim_order,
            worker_timeout: config.worker_timeout,
            continuation,
        }
    }
}

/// Application state
pub struct AppState {
    trigger: QueueTrigger,
    dispatcher: Arc<BatchDispatcher>,
    worker: Arc<AlarmAudioWorker>,
    repo: Arc<dyn AlarmRepository>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn QueueStore>,
        worker: Arc<AlarmAudioWorker>,
        repo: Arc<dyn AlarmRepository>,
        settings: DispatchSettings,
    ) -> Self {
        let dispatcher = Arc::new(
            BatchDispatcher::new(
                worker.clone(),
                StatusReporter::new(store.clone()),
                settings.concurrency,
            )
            .with_worker_timeout(settings.worker_timeout),
        );

        let trigger = QueueTrigger::new(
            store,
            dispatcher.clone(),
            settings.batch_size,
            settings.continuation,
        )
        .with_order(settings.order)
        .with_minutes_per_chunk(settings.minutes_per_chunk);

        Self {
            trigger,
            dispatcher,
            worker,
            repo,
        }
    }
}

pub async fn handle(state: &AppState, payload: Value) -> Result<Value, Error> {
    if let Ok(dispatch) = serde_json::from_value::<DispatchPayload>(payload.clone()) {
        if dispatch.dispatch {
            return handle_dispatch(state, dispatch).await;
        }
    }

    let request: ApiGatewayRequest = serde_json::from_value(payload).unwrap_or_default();

    let Some(method) = request.method() else {
        info!("Scheduled invocation, processing audio generation queue");
        return run_queue(state).await;
    };

    if !method.eq_ignore_ascii_case("POST") {
        return ApiGatewayResponse::error(
            405,
            "Method not allowed. Use POST to generate alarm audio.",
        );
    }

    let Some(body) = request.decoded_body() else {
        return ApiGatewayResponse::error(400, "Invalid JSON in request body");
    };
    let generate: GenerateRequest = match serde_json::from_str::<Value>(&body)
        .and_then(serde_json::from_value)
    {
        Ok(generate) => generate,
        Err(e) => {
            warn!(error = %e, "Rejected request body");
            return ApiGatewayResponse::error(400, "Invalid JSON in request body");
        }
    };

    match generate.alarm_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        None => run_queue(state).await,
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(alarm_id) => generate_one(state, alarm_id, generate.force_regenerate).await,
            Err(_) => ApiGatewayResponse::error(400, "alarmId must be a UUID"),
        },
    }
}

async fn run_queue(state: &AppState) -> Result<Value, Error> {
    match state.trigger.run(Utc::now()).await {
        Ok(summary) => {
            state
                .repo
                .log_event(
                    kinds::QUEUE_PROCESSING_STARTED,
                    None,
                    json!({
                        "queued_count": summary.queued_count,
                        "estimated_time": summary.estimated_time,
                        "processing_mode": summary.processing_mode,
                    }),
                )
                .await;
            ApiGatewayResponse::json(200, &summary)
        }
        Err(e) => {
            error!(error = %e, "Failed to claim queue items");
            let status = if e.is_retryable() { 503 } else { 500 };
            ApiGatewayResponse::json(
                status,
                &json!({
                    "success": false,
                    "error": e.to_string(),
                    "queuedCount": 0,
                    "estimatedTime": 0,
                    "queueEmpty": false,
                }),
            )
        }
    }
}

async fn handle_dispatch(state: &AppState, payload: DispatchPayload) -> Result<Value, Error> {
    info!(items = payload.items.len(), "Dispatching claimed batch");
    let summary = state.dispatcher.dispatch(payload.items).await;

    state
        .repo
        .log_event(kinds::QUEUE_BATCH_COMPLETED, None, serde_json::to_value(summary)?)
        .await;

    Ok(serde_json::to_value(summary)?)
}

async fn generate_one(state: &AppState, alarm_id: Uuid, force_regenerate: bool) -> Result<Value, Error> {
    info!(alarm_id = %alarm_id, force_regenerate, "Starting alarm audio generation");
    state
        .repo
        .log_event(
            kinds::ALARM_AUDIO_GENERATION_STARTED,
            None,
            json!({ "alarm_id": alarm_id, "force_regenerate": force_regenerate }),
        )
        .await;

    let (status, response) = match state.worker.generate(alarm_id, force_regenerate).await {
        Ok(generation) => {
            let message = if generation.reused {
                "Audio already exists for this alarm".to_string()
            } else {
                format!("Generated {} audio clips successfully", generation.clips.len())
            };
            (
                200,
                GenerateResponse {
                    success: true,
                    message,
                    generated_clips: generation.clips,
                    failed_clips: Vec::new(),
                    alarm_id,
                    user_id: Some(generation.user_id),
                },
            )
        }
        Err(WorkError::NotFound(what)) => {
            warn!(alarm_id = %alarm_id, "Alarm not found");
            return ApiGatewayResponse::error(404, &format!("{} not found", what));
        }
        Err(e) => {
            error!(alarm_id = %alarm_id, error = %e, "Alarm audio generation failed");
            (
                207,
                GenerateResponse {
                    success: false,
                    message: "Failed to generate any audio clips".to_string(),
                    generated_clips: Vec::new(),
                    failed_clips: vec![FailedClip {
                        clip_id: format!("combined_{}", alarm_id),
                        error: e.to_string(),
                        audio_type: AUDIO_TYPE_COMBINED,
                    }],
                    alarm_id,
                    user_id: None,
                },
            )
        }
    };

    state
        .repo
        .log_event(
            kinds::ALARM_AUDIO_GENERATION_COMPLETED,
            response.user_id,
            json!({
                "alarm_id": alarm_id,
                "generated_clips": response.generated_clips.len(),
                "failed_clips": response.failed_clips.len(),
            }),
        )
        .await;

    ApiGatewayResponse::json(status, &response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::tests::{alarm, worker, FakeRepository};
    use chrono::Duration as ChronoDuration;
    use shared::queue::{MemoryQueueStore, NewQueueItem, QueueStatus};

    struct Harness {
        state: AppState,
        store: Arc<MemoryQueueStore>,
        repo: Arc<FakeRepository>,
    }

    fn harness(repo: FakeRepository, scripts_fail: bool) -> Harness {
        let store = Arc::new(MemoryQueueStore::new());
        let repo = Arc::new(repo);
        let (worker, _, _) = worker(repo.clone(), scripts_fail);
        let state = AppState::new(
            store.clone(),
            Arc::new(worker),
            repo.clone(),
            DispatchSettings {
                batch_size: 50,
                concurrency: 10,
                minutes_per_chunk: 4,
                order: ClaimOrder::Scheduled,
                worker_timeout: None,
                continuation: Continuation::Inline,
            },
        );
        Harness { state, store, repo }
    }

    fn post(body: &str) -> Value {
        json!({ "httpMethod": "POST", "body": body })
    }

    fn parse(response: Value) -> (u16, Value) {
        let status = response["statusCode"].as_u64().unwrap() as u16;
        let body = serde_json::from_str(response["body"].as_str().unwrap()).unwrap();
        (status, body)
    }

    async fn enqueue(store: &MemoryQueueStore, alarm_id: Uuid) -> Uuid {
        store
            .enqueue(NewQueueItem {
                subject_id: alarm_id,
                owner_id: Uuid::new_v4(),
                scheduled_for: Utc::now() - ChronoDuration::minutes(1),
                priority: None,
                max_retries: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn non_post_methods_are_rejected() {
        let h = harness(FakeRepository::default(), false);
        let event = json!({ "requestContext": { "http": { "method": "GET" } } });

        let (status, body) = parse(handle(&h.state, event).await.unwrap());
        assert_eq!(status, 405);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn invalid_json_is_a_bad_request() {
        let h = harness(FakeRepository::default(), false);

        let (status, body) = parse(handle(&h.state, post("{not json")).await.unwrap());
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Invalid JSON in request body");

        let (status, _) = parse(handle(&h.state, post(r#"{"alarmId": "tomorrow"}"#)).await.unwrap());
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn empty_queue_reports_nothing_queued() {
        let h = harness(FakeRepository::default(), false);

        let (status, body) = parse(handle(&h.state, post("{}")).await.unwrap());
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["queuedCount"], 0);
        assert_eq!(body["estimatedTime"], 0);
        assert_eq!(body["queueEmpty"], true);
        assert_eq!(
            h.repo.events.lock().unwrap().as_slice(),
            [kinds::QUEUE_PROCESSING_STARTED]
        );
    }

    #[tokio::test]
    async fn queue_run_processes_claimed_items() {
        let alarm = alarm();
        let h = harness(FakeRepository::with_alarm(alarm.clone()), false);
        let good = enqueue(&h.store, alarm.id).await;
        let missing = enqueue(&h.store, Uuid::new_v4()).await;

        let (status, body) = parse(handle(&h.state, post("{}")).await.unwrap());
        assert_eq!(status, 200);
        assert_eq!(body["queuedCount"], 2);
        assert_eq!(body["estimatedTime"], 4);
        assert_eq!(body["processingMode"], "sync");
        assert_eq!(body["successCount"], 1);
        assert_eq!(body["failedCount"], 1);

        let good = h.store.get(good).await.unwrap().unwrap();
        assert_eq!(good.status, QueueStatus::Completed);
        let missing = h.store.get(missing).await.unwrap().unwrap();
        assert_eq!(missing.status, QueueStatus::Failed);
        assert_eq!(missing.error_message.as_deref(), Some("alarm not found"));
    }

    #[tokio::test]
    async fn scheduled_events_run_the_queue() {
        let alarm = alarm();
        let h = harness(FakeRepository::with_alarm(alarm.clone()), false);
        enqueue(&h.store, alarm.id).await;

        let event = json!({ "detail-type": "Scheduled Event", "source": "aws.events" });
        let (status, body) = parse(handle(&h.state, event).await.unwrap());
        assert_eq!(status, 200);
        assert_eq!(body["queuedCount"], 1);
    }

    #[tokio::test]
    async fn store_failure_is_service_unavailable() {
        let h = harness(FakeRepository::default(), false);
        h.store.set_unavailable(true);

        let (status, body) = parse(handle(&h.state, post("{}")).await.unwrap());
        assert_eq!(status, 503);
        assert_eq!(body["success"], false);
        assert_eq!(body["queuedCount"], 0);
    }

    #[tokio::test]
    async fn direct_generation_returns_clips() {
        let alarm = alarm();
        let h = harness(FakeRepository::with_alarm(alarm.clone()), false);
        let request = format!(r#"{{"alarmId": "{}"}}"#, alarm.id);

        let (status, body) = parse(handle(&h.state, post(&request)).await.unwrap());
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["generatedClips"].as_array().unwrap().len(), 1);
        assert_eq!(body["userId"], alarm.user_id.to_string());

        let (_, again) = parse(handle(&h.state, post(&request)).await.unwrap());
        assert_eq!(again["message"], "Audio already exists for this alarm");

        // The queue table is not touched.
        assert!(h.store.items().await.is_empty());
    }

    #[tokio::test]
    async fn direct_generation_failure_is_multi_status() {
        let alarm = alarm();
        let h = harness(FakeRepository::with_alarm(alarm.clone()), true);
        let request = format!(r#"{{"alarmId": "{}", "forceRegenerate": true}}"#, alarm.id);

        let (status, body) = parse(handle(&h.state, post(&request)).await.unwrap());
        assert_eq!(status, 207);
        assert_eq!(body["success"], false);
        assert_eq!(body["failedClips"][0]["clipId"], format!("combined_{}", alarm.id));
    }

    #[tokio::test]
    async fn unknown_alarm_is_not_found() {
        let h = harness(FakeRepository::default(), false);
        let request = format!(r#"{{"alarmId": "{}"}}"#, Uuid::new_v4());

        let (status, _) = parse(handle(&h.state, post(&request)).await.unwrap());
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn base64_bodies_are_decoded() {
        let h = harness(FakeRepository::default(), false);
        let event = json!({
            "httpMethod": "POST",
            "body": base64::engine::general_purpose::STANDARD.encode("{}"),
            "isBase64Encoded": true
        });

        let (status, body) = parse(handle(&h.state, event).await.unwrap());
        assert_eq!(status, 200);
        assert_eq!(body["queueEmpty"], true);
    }

    #[tokio::test]
    async fn dispatch_invocation_runs_the_batch() {
        let alarm = alarm();
        let h = harness(FakeRepository::with_alarm(alarm.clone()), false);
        let id = enqueue(&h.store, alarm.id).await;
        let claimed: Vec<_> = h
            .store
            .claim(Utc::now(), 10, ClaimOrder::Scheduled)
            .await
            .unwrap()
            .iter()
            .filter_map(|item| item.to_claimed())
            .collect();

        let payload = serde_json::to_value(DispatchPayload::new(claimed)).unwrap();
        let summary = handle(&h.state, payload).await.unwrap();
        assert_eq!(summary["processedCount"], 1);
        assert_eq!(summary["successCount"], 1);

        let item = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
    }
}
