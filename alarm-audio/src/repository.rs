//! Records read and written while generating alarm audio.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use shared::Result;

/// Audio types that count as existing output for an alarm.
pub const EXISTING_AUDIO_TYPES: &[&str] = &["weather", "content", "combined"];

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Alarm {
    pub id: Uuid,
    pub user_id: Uuid,
    pub alarm_date: Option<NaiveDate>,
    pub alarm_time_local: Option<NaiveTime>,
    pub alarm_timezone: Option<String>,
    pub next_trigger_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct UserPreferences {
    pub user_id: Uuid,
    pub tts_voice: Option<String>,
    pub news_categories: Option<Vec<String>>,
    pub preferred_name: Option<String>,
    pub sports_team: Option<String>,
    pub stocks: Option<Vec<String>>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct WeatherData {
    pub user_id: Uuid,
    pub location: Option<String>,
    pub current_temp: Option<f64>,
    pub high_temp: Option<f64>,
    pub low_temp: Option<f64>,
    pub condition: Option<String>,
    pub sunrise_time: Option<String>,
    pub sunset_time: Option<String>,
}

/// The latest `daily_content` row.
///
/// Headlines live in one column per news category (`{category}_headlines`),
/// so the row is kept as a JSON object.
#[derive(Debug, Clone, Default)]
pub struct DailyContent {
    columns: Map<String, Value>,
}

impl DailyContent {
    pub fn from_columns(columns: Map<String, Value>) -> Self {
        Self { columns }
    }

    fn text(&self, column: &str) -> Option<&str> {
        self.columns
            .get(column)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn headline(&self, category: &str) -> Option<&str> {
        self.text(&format!("{}_headlines", category))
    }

    pub fn sports_summary(&self) -> Option<&str> {
        self.text("sports_summary")
    }

    pub fn stocks_summary(&self) -> Option<&str> {
        self.text("stocks_summary")
    }

    pub fn holidays(&self) -> Option<&str> {
        self.text("holidays")
    }
}

/// Audio already produced for an alarm.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExistingAudio {
    pub id: Uuid,
    pub audio_type: String,
    pub audio_url: Option<String>,
    pub file_size: Option<i64>,
}

/// Metadata for a freshly uploaded clip.
#[derive(Debug, Clone, Serialize)]
pub struct NewAudio {
    pub user_id: Uuid,
    pub alarm_id: Uuid,
    pub audio_type: String,
    pub script_text: String,
    pub audio_url: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub file_size: i64,
    pub duration_seconds: i32,
}

#[async_trait]
pub trait AlarmRepository: Send + Sync {
    async fn alarm(&self, id: Uuid) -> Result<Option<Alarm>>;

    async fn preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>>;

    async fn weather(&self, user_id: Uuid) -> Result<Option<WeatherData>>;

    async fn latest_daily_content(&self) -> Result<Option<DailyContent>>;

    async fn existing_audio(&self, alarm_id: Uuid) -> Result<Vec<ExistingAudio>>;

    /// Insert a ready clip and return its id.
    async fn save_audio(&self, audio: &NewAudio) -> Result<Uuid>;

    /// Record an audit event. Never fails.
    async fn log_event(&self, event_type: &str, user_id: Option<Uuid>, meta: Value);
}

/// `AlarmRepository` over Postgres.
#[derive(Clone)]
pub struct PgAlarmRepository {
    pool: PgPool,
}

impl PgAlarmRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlarmRepository for PgAlarmRepository {
    async fn alarm(&self, id: Uuid) -> Result<Option<Alarm>> {
        let alarm = sqlx::query_as::<_, Alarm>(
            r#"
            SELECT id, user_id, alarm_date, alarm_time_local, alarm_timezone,
                   next_trigger_at, active
            FROM alarms
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(alarm)
    }

    async fn preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>> {
        let prefs = sqlx::query_as::<_, UserPreferences>(
            r#"
            SELECT user_id, tts_voice, news_categories, preferred_name,
                   sports_team, stocks, timezone
            FROM user_preferences
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(prefs)
    }

    async fn weather(&self, user_id: Uuid) -> Result<Option<WeatherData>> {
        let weather = sqlx::query_as::<_, WeatherData>(
            r#"
            SELECT user_id, location, current_temp, high_temp, low_temp,
                   condition, sunrise_time, sunset_time
            FROM weather_data
            WHERE user_id = $1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(weather)
    }

    async fn latest_daily_content(&self) -> Result<Option<DailyContent>> {
        let row: Option<Value> = sqlx::query_scalar(
            r#"
            SELECT to_jsonb(dc)
            FROM daily_content dc
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|value| match value {
            Value::Object(columns) => Some(DailyContent::from_columns(columns)),
            _ => None,
        }))
    }

    async fn existing_audio(&self, alarm_id: Uuid) -> Result<Vec<ExistingAudio>> {
        let types: Vec<String> = EXISTING_AUDIO_TYPES.iter().map(|t| t.to_string()).collect();

        let rows = sqlx::query_as::<_, ExistingAudio>(
            r#"
            SELECT id, audio_type, audio_url, file_size
            FROM audio
            WHERE alarm_id = $1 AND audio_type = ANY($2)
            ORDER BY generated_at DESC
            "#,
        )
        .bind(alarm_id)
        .bind(&types)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn save_audio(&self, audio: &NewAudio) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO audio
                (user_id, alarm_id, audio_type, script_text, audio_url,
                 generated_at, expires_at, file_size, duration_seconds,
                 status, cache_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'ready', 'pending')
            RETURNING id
            "#,
        )
        .bind(audio.user_id)
        .bind(audio.alarm_id)
        .bind(&audio.audio_type)
        .bind(&audio.script_text)
        .bind(&audio.audio_url)
        .bind(audio.generated_at)
        .bind(audio.expires_at)
        .bind(audio.file_size)
        .bind(audio.duration_seconds)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn log_event(&self, event_type: &str, user_id: Option<Uuid>, meta: Value) {
        shared::events::log_event(&self.pool, event_type, user_id, meta).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(value: Value) -> DailyContent {
        match value {
            Value::Object(columns) => DailyContent::from_columns(columns),
            _ => unreachable!(),
        }
    }

    #[test]
    fn headline_reads_category_column() {
        let row = content(json!({
            "general_headlines": "Council approves new transit line",
            "technology_headlines": "",
            "sports_summary": "Home team wins 3-1",
            "holidays": null
        }));

        assert_eq!(row.headline("general"), Some("Council approves new transit line"));
        assert_eq!(row.headline("technology"), None);
        assert_eq!(row.headline("business"), None);
        assert_eq!(row.sports_summary(), Some("Home team wins 3-1"));
        assert_eq!(row.holidays(), None);
    }
}
