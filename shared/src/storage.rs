//! Object storage for generated audio.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::info;
use uuid::Uuid;

use crate::{Error, Result};

pub const AUDIO_FOLDER: &str = "alarm-audio";

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub public_url: String,
    pub size_bytes: usize,
}

#[async_trait]
pub trait AudioStorage: Send + Sync {
    /// Upload `bytes` to `path`. Existing objects are never overwritten.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject>;
}

/// Path of a combined briefing for `alarm_id` generated at `at`.
pub fn combined_audio_path(alarm_id: Uuid, at: DateTime<Utc>) -> String {
    format!(
        "{}/combined/{}_combined_{}.mp3",
        AUDIO_FOLDER,
        alarm_id,
        at.timestamp_millis()
    )
}

/// Storage REST API client.
pub struct RestAudioStorage {
    http: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: String,
}

impl RestAudioStorage {
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            api_key: api_key.into(),
        }
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    fn upload_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }
}

#[async_trait]
impl AudioStorage for RestAudioStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject> {
        let size_bytes = bytes.len();

        let response = self
            .http
            .post(self.upload_url(path))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header("apikey", &self.api_key)
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Upload request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "Upload to {} failed: {} - {}",
                path, status, body
            )));
        }

        info!(path, size_bytes, "Uploaded audio");

        Ok(StoredObject {
            path: path.to_string(),
            public_url: self.public_url(path),
            size_bytes,
        })
    }
}
