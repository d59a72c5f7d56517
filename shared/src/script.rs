//! Spoken script generation with Amazon Bedrock.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, InferenceConfiguration, Message, SystemContentBlock,
};
use aws_sdk_bedrockruntime::Client as BedrockClient;
use serde::Deserialize;
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::{Error, Result};

const DEFAULT_DURATION_SECONDS: u32 = 30;

/// System prompt for the morning briefing.
pub const SYSTEM_PROMPT: &str = "You are a warm and intelligent personal guide. \
Write a calm, grounded morning message that helps someone wake up: a weather \
summary if available, the day's headlines, sports and markets, then a short \
closing thought. Speak naturally, avoid cliches, and never ask questions. \
Respond only with JSON: {\"script\": \"...\", \"estimated_duration_seconds\": n}";

/// A script ready for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedScript {
    pub script: String,
    pub estimated_duration_seconds: u32,
}

#[derive(Deserialize)]
struct ScriptPayload {
    script: Option<String>,
    estimated_duration_seconds: Option<f64>,
}

#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedScript>;
}

/// Generates scripts through the Bedrock `Converse` API.
pub struct BedrockScriptGenerator {
    client: BedrockClient,
    model_id: String,
    max_tokens: i32,
    temperature: f32,
    retry: RetryPolicy,
}

impl BedrockScriptGenerator {
    pub fn new(client: BedrockClient, model_id: impl Into<String>) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            max_tokens: 1200,
            temperature: 0.8,
            retry: RetryPolicy::script(),
        }
    }

    async fn converse(&self, prompt: &str) -> Result<GeneratedScript> {
        let message = Message::builder()
            .role(ConversationRole::User)
            .content(ContentBlock::Text(prompt.to_string()))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build model request: {}", e)))?;

        let response = self
            .client
            .converse()
            .model_id(&self.model_id)
            .system(SystemContentBlock::Text(SYSTEM_PROMPT.to_string()))
            .messages(message)
            .inference_config(
                InferenceConfiguration::builder()
                    .max_tokens(self.max_tokens)
                    .temperature(self.temperature)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Error::Aws(format!("Bedrock converse failed: {}", e)))?;

        let text: String = response
            .output()
            .and_then(|output| output.as_message().ok())
            .map(|message| {
                message
                    .content()
                    .iter()
                    .filter_map(|block| block.as_text().ok())
                    .map(String::as_str)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::Aws("No content received from model".to_string()));
        }

        debug!(model_id = %self.model_id, chars = text.len(), "Model responded");
        parse_script_response(&text)
    }
}

#[async_trait]
impl ScriptGenerator for BedrockScriptGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedScript> {
        self.retry
            .run("bedrock.converse", || self.converse(prompt))
            .await
            .map_err(|e| e.last)
    }
}

/// Parse the model's JSON answer. Markdown code fences and text around the
/// JSON object are ignored.
pub fn parse_script_response(text: &str) -> Result<GeneratedScript> {
    let body = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(Error::Validation(
                "Model response did not contain a JSON object".to_string(),
            ))
        }
    };

    let payload: ScriptPayload = serde_json::from_str(body)?;
    let script = payload
        .script
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation("Invalid response format from model - missing script".to_string()))?;

    Ok(GeneratedScript {
        script,
        estimated_duration_seconds: payload
            .estimated_duration_seconds
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.round() as u32)
            .unwrap_or(DEFAULT_DURATION_SECONDS),
    })
}
