//! Combined briefing generation for one alarm.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use shared::events::kinds;
use shared::queue::{ClaimedItem, WorkError, WorkReport, Worker};
use shared::storage::combined_audio_path;
use shared::tts::validate_voice;
use shared::{AudioStorage, ScriptGenerator, SpeechSynthesizer};

use crate::prompt::{ordered_categories, render_prompt, BriefingContext};
use crate::repository::{AlarmRepository, NewAudio};

pub const AUDIO_TYPE_COMBINED: &str = "combined";

/// A clip produced for, or already present on, an alarm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedClip {
    pub clip_id: String,
    pub file_name: String,
    pub audio_url: String,
    pub file_size: i64,
    pub audio_type: String,
}

/// Result of generating audio for one alarm.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub alarm_id: Uuid,
    pub user_id: Uuid,
    pub clips: Vec<GeneratedClip>,
    /// Existing audio was found and nothing new was produced.
    pub reused: bool,
}

fn file_name(url: &str) -> String {
    url.rsplit('/').next().unwrap_or_default().to_string()
}

/// Writes, voices and stores the morning briefing for an alarm.
pub struct AlarmAudioWorker {
    repo: Arc<dyn AlarmRepository>,
    scripts: Arc<dyn ScriptGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    storage: Arc<dyn AudioStorage>,
    default_voice: String,
    expiration: Duration,
}

impl AlarmAudioWorker {
    pub fn new(
        repo: Arc<dyn AlarmRepository>,
        scripts: Arc<dyn ScriptGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        storage: Arc<dyn AudioStorage>,
    ) -> Self {
        Self {
            repo,
            scripts,
            speech,
            storage,
            default_voice: "Joanna".to_string(),
            expiration: Duration::hours(48),
        }
    }

    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }

    pub fn with_expiration_hours(mut self, hours: i64) -> Self {
        self.expiration = Duration::hours(hours);
        self
    }

    /// Generate the combined briefing for `alarm_id`.
    ///
    /// Unless `force_regenerate` is set, audio already stored for the alarm
    /// is returned instead.
    pub async fn generate(&self, alarm_id: Uuid, force_regenerate: bool) -> Result<Generation, WorkError> {
        let alarm = self
            .repo
            .alarm(alarm_id)
            .await?
            .ok_or_else(|| WorkError::NotFound("alarm".to_string()))?;
        let user_id = alarm.user_id;

        if !force_regenerate {
            let existing = self.repo.existing_audio(alarm_id).await.unwrap_or_else(|e| {
                warn!(alarm_id = %alarm_id, error = %e, "Failed to check existing audio");
                Vec::new()
            });
            if !existing.is_empty() {
                info!(alarm_id = %alarm_id, clips = existing.len(), "Audio already exists for alarm");
                return Ok(Generation {
                    alarm_id,
                    user_id,
                    clips: existing
                        .into_iter()
                        .map(|audio| {
                            let url = audio.audio_url.unwrap_or_default();
                            GeneratedClip {
                                clip_id: audio.id.to_string(),
                                file_name: file_name(&url),
                                audio_url: url,
                                file_size: audio.file_size.unwrap_or(0),
                                audio_type: audio.audio_type,
                            }
                        })
                        .collect(),
                    reused: true,
                });
            }
        }

        // Optional inputs: a failed read degrades the script, not the run.
        let (preferences, weather, content) = tokio::join!(
            self.repo.preferences(user_id),
            self.repo.weather(user_id),
            self.repo.latest_daily_content(),
        );
        let preferences = preferences.unwrap_or_else(|e| {
            warn!(user_id = %user_id, error = %e, "Failed to get user preferences");
            None
        });
        let weather = weather.unwrap_or_else(|e| {
            warn!(user_id = %user_id, error = %e, "Failed to get weather data");
            None
        });
        let content = content.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to get daily content");
            None
        });

        let voice = validate_voice(
            preferences.as_ref().and_then(|p| p.tts_voice.as_deref()),
            &self.default_voice,
        )
        .to_string();

        let ctx = BriefingContext {
            categories: ordered_categories(preferences.as_ref()),
            alarm,
            preferences,
            weather,
            content,
        };

        let script = self.scripts.generate(&render_prompt(&ctx)).await?;
        let speech = self
            .speech
            .synthesize(&script.script, &voice)
            .await
            .map_err(|e| WorkError::Upstream(e.to_string()))?;

        let generated_at = Utc::now();
        let path = combined_audio_path(alarm_id, generated_at);
        let stored = self.storage.upload(&path, speech.audio, "audio/mpeg").await?;

        let audio_id = self
            .repo
            .save_audio(&NewAudio {
                user_id,
                alarm_id,
                audio_type: AUDIO_TYPE_COMBINED.to_string(),
                script_text: script.script,
                audio_url: stored.public_url.clone(),
                generated_at,
                expires_at: generated_at + self.expiration,
                file_size: stored.size_bytes as i64,
                duration_seconds: speech.duration_seconds as i32,
            })
            .await?;

        self.repo
            .log_event(
                kinds::COMBINED_AUDIO_GENERATED,
                Some(user_id),
                json!({ "alarm_id": alarm_id, "audio_id": audio_id }),
            )
            .await;

        info!(
            alarm_id = %alarm_id,
            voice = %voice,
            size_bytes = stored.size_bytes,
            duration_seconds = speech.duration_seconds,
            "Combined audio generated"
        );

        Ok(Generation {
            alarm_id,
            user_id,
            clips: vec![GeneratedClip {
                clip_id: format!("combined_{}", alarm_id),
                file_name: file_name(&stored.path),
                audio_url: stored.public_url,
                file_size: stored.size_bytes as i64,
                audio_type: AUDIO_TYPE_COMBINED.to_string(),
            }],
            reused: false,
        })
    }
}

#[async_trait]
impl Worker for AlarmAudioWorker {
    async fn process(&self, item: &ClaimedItem) -> Result<WorkReport, WorkError> {
        let generation = self.generate(item.subject_id, false).await?;
        if generation.reused {
            return Ok(WorkReport::already_done());
        }
        Ok(WorkReport {
            artifacts: generation.clips.into_iter().map(|clip| clip.audio_url).collect(),
            skipped: false,
        })
    }

    async fn already_processed(&self, item: &ClaimedItem) -> Result<bool, WorkError> {
        Ok(!self.repo.existing_audio(item.subject_id).await?.is_empty())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::{
        Alarm, DailyContent, ExistingAudio, UserPreferences, WeatherData,
    };
    use serde_json::Value;
    use shared::tts::{Speech, TtsError};
    use shared::{Error, GeneratedScript, StoredObject};
    use std::sync::Mutex;

    /// In-memory alarm records.
    #[derive(Default)]
    pub(crate) struct FakeRepository {
        pub alarms: Vec<Alarm>,
        pub preferences: Option<UserPreferences>,
        pub existing: Mutex<Vec<(Uuid, ExistingAudio)>>,
        pub saved: Mutex<Vec<NewAudio>>,
        pub events: Mutex<Vec<String>>,
        pub weather_fails: bool,
        pub existing_fails: bool,
    }

    impl FakeRepository {
        pub fn with_alarm(alarm: Alarm) -> Self {
            Self {
                alarms: vec![alarm],
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl AlarmRepository for FakeRepository {
        async fn alarm(&self, id: Uuid) -> shared::Result<Option<Alarm>> {
            Ok(self.alarms.iter().find(|a| a.id == id).cloned())
        }

        async fn preferences(&self, _user_id: Uuid) -> shared::Result<Option<UserPreferences>> {
            Ok(self.preferences.clone())
        }

        async fn weather(&self, _user_id: Uuid) -> shared::Result<Option<WeatherData>> {
            if self.weather_fails {
                return Err(Error::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(None)
        }

        async fn latest_daily_content(&self) -> shared::Result<Option<DailyContent>> {
            Ok(None)
        }

        async fn existing_audio(&self, alarm_id: Uuid) -> shared::Result<Vec<ExistingAudio>> {
            if self.existing_fails {
                return Err(Error::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(self
                .existing
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| *id == alarm_id)
                .map(|(_, audio)| audio.clone())
                .collect())
        }

        async fn save_audio(&self, audio: &NewAudio) -> shared::Result<Uuid> {
            let id = Uuid::new_v4();
            self.saved.lock().unwrap().push(audio.clone());
            self.existing.lock().unwrap().push((
                audio.alarm_id,
                ExistingAudio {
                    id,
                    audio_type: audio.audio_type.clone(),
                    audio_url: Some(audio.audio_url.clone()),
                    file_size: Some(audio.file_size),
                },
            ));
            Ok(id)
        }

        async fn log_event(&self, event_type: &str, _user_id: Option<Uuid>, _meta: Value) {
            self.events.lock().unwrap().push(event_type.to_string());
        }
    }

    pub(crate) struct FakeScripts {
        pub fail: bool,
    }

    #[async_trait]
    impl ScriptGenerator for FakeScripts {
        async fn generate(&self, prompt: &str) -> shared::Result<GeneratedScript> {
            if self.fail {
                return Err(Error::Aws("model throttled".to_string()));
            }
            assert!(prompt.contains("morning message"));
            Ok(GeneratedScript {
                script: "Good morning. Skies are clear today.".to_string(),
                estimated_duration_seconds: 4,
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeSpeech {
        pub voices: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSpeech {
        async fn synthesize(&self, script: &str, voice: &str) -> Result<Speech, TtsError> {
            self.voices.lock().unwrap().push(voice.to_string());
            Ok(Speech {
                audio: script.as_bytes().to_vec(),
                duration_seconds: 3,
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeStorage {
        pub paths: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AudioStorage for FakeStorage {
        async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> shared::Result<StoredObject> {
            self.paths.lock().unwrap().push(path.to_string());
            Ok(StoredObject {
                path: path.to_string(),
                public_url: format!("https://files.test/{}", path),
                size_bytes: bytes.len(),
            })
        }
    }

    pub(crate) fn alarm() -> Alarm {
        Alarm {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            alarm_date: None,
            alarm_time_local: None,
            alarm_timezone: None,
            next_trigger_at: None,
            active: true,
        }
    }

    pub(crate) fn worker(
        repo: Arc<FakeRepository>,
        scripts_fail: bool,
    ) -> (AlarmAudioWorker, Arc<FakeSpeech>, Arc<FakeStorage>) {
        let speech = Arc::new(FakeSpeech::default());
        let storage = Arc::new(FakeStorage::default());
        let worker = AlarmAudioWorker::new(
            repo,
            Arc::new(FakeScripts { fail: scripts_fail }),
            speech.clone(),
            storage.clone(),
        );
        (worker, speech, storage)
    }

    #[tokio::test]
    async fn generates_uploads_and_records_audio() {
        let alarm = alarm();
        let repo = Arc::new(FakeRepository::with_alarm(alarm.clone()));
        let (worker, speech, storage) = worker(repo.clone(), false);

        let generation = worker.generate(alarm.id, false).await.unwrap();
        assert!(!generation.reused);
        assert_eq!(generation.user_id, alarm.user_id);
        assert_eq!(generation.clips.len(), 1);
        assert_eq!(generation.clips[0].clip_id, format!("combined_{}", alarm.id));

        let paths = storage.paths.lock().unwrap();
        assert!(paths[0].starts_with(&format!("alarm-audio/combined/{}_combined_", alarm.id)));
        assert_eq!(speech.voices.lock().unwrap().as_slice(), ["Joanna"]);

        let saved = repo.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].audio_type, "combined");
        assert_eq!(saved[0].expires_at - saved[0].generated_at, Duration::hours(48));
        assert_eq!(
            repo.events.lock().unwrap().as_slice(),
            [kinds::COMBINED_AUDIO_GENERATED]
        );
    }

    #[tokio::test]
    async fn existing_audio_short_circuits_unless_forced() {
        let alarm = alarm();
        let repo = Arc::new(FakeRepository::with_alarm(alarm.clone()));
        let (worker, _, storage) = worker(repo.clone(), false);

        worker.generate(alarm.id, false).await.unwrap();
        let again = worker.generate(alarm.id, false).await.unwrap();
        assert!(again.reused);
        assert_eq!(storage.paths.lock().unwrap().len(), 1);

        let forced = worker.generate(alarm.id, true).await.unwrap();
        assert!(!forced.reused);
        assert_eq!(storage.paths.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_alarm_fails_item() {
        let repo = Arc::new(FakeRepository::default());
        let (worker, _, _) = worker(repo, false);

        let err = worker.generate(Uuid::new_v4(), false).await.unwrap_err();
        assert_eq!(err, WorkError::NotFound("alarm".to_string()));
        assert_eq!(err.to_string(), "alarm not found");
    }

    #[tokio::test]
    async fn optional_input_failures_do_not_fail_generation() {
        let alarm = alarm();
        let repo = Arc::new(FakeRepository {
            weather_fails: true,
            preferences: Some(UserPreferences {
                tts_voice: Some("matthew".to_string()),
                ..Default::default()
            }),
            ..FakeRepository::with_alarm(alarm.clone())
        });
        let (worker, speech, _) = worker(repo, false);

        worker.generate(alarm.id, false).await.unwrap();
        assert_eq!(speech.voices.lock().unwrap().as_slice(), ["Matthew"]);
    }

    #[tokio::test]
    async fn failed_existing_audio_lookup_generates_anyway() {
        let alarm = alarm();
        let repo = Arc::new(FakeRepository {
            existing_fails: true,
            ..FakeRepository::with_alarm(alarm.clone())
        });
        let (worker, _, storage) = worker(repo.clone(), false);

        let generation = worker.generate(alarm.id, false).await.unwrap();
        assert!(!generation.reused);
        assert_eq!(storage.paths.lock().unwrap().len(), 1);
        assert_eq!(repo.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn model_failure_is_an_upstream_error() {
        let alarm = alarm();
        let repo = Arc::new(FakeRepository::with_alarm(alarm.clone()));
        let (worker, _, storage) = worker(repo.clone(), true);

        let err = worker.generate(alarm.id, false).await.unwrap_err();
        assert!(matches!(err, WorkError::Upstream(_)));
        assert!(storage.paths.lock().unwrap().is_empty());
        assert!(repo.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_reports_existing_output() {
        let alarm = alarm();
        let repo = Arc::new(FakeRepository::with_alarm(alarm.clone()));
        let (worker, _, _) = worker(repo, false);
        let item = ClaimedItem {
            id: Uuid::new_v4(),
            subject_id: alarm.id,
            owner_id: alarm.user_id,
            scheduled_for: Utc::now(),
            retry_count: 0,
            claim_token: Uuid::new_v4(),
        };

        assert!(!worker.already_processed(&item).await.unwrap());
        let report = worker.process(&item).await.unwrap();
        assert_eq!(report.artifacts.len(), 1);
        assert!(worker.already_processed(&item).await.unwrap());
        assert!(worker.process(&item).await.unwrap().skipped);
    }
}
