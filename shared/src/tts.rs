//! Text-to-Speech using Amazon Polly.

use async_trait::async_trait;
use aws_sdk_polly::types::{Engine, OutputFormat, VoiceId};
use aws_sdk_polly::Client as PollyClient;
use thiserror::Error;
use tracing::debug;

use crate::retry::RetryPolicy;

/// Polly rejects requests above 3000 billed characters.
pub const MAX_REQUEST_CHARS: usize = 2900;

/// Neural voices a user may pick.
pub const SUPPORTED_VOICES: &[&str] = &[
    "Joanna", "Matthew", "Amy", "Brian", "Danielle", "Gregory", "Ivy", "Joey", "Justin",
    "Kendra", "Kimberly", "Ruth", "Salli", "Stephen",
];

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("Polly synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("Nothing to synthesize")]
    EmptyScript,
}

/// Synthesized audio for one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speech {
    /// MP3 bytes.
    pub audio: Vec<u8>,
    pub duration_seconds: u32,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, script: &str, voice: &str) -> Result<Speech, TtsError>;
}

/// Text-to-Speech service using Amazon Polly.
pub struct TtsService {
    client: PollyClient,
    engine: Engine,
    retry: RetryPolicy,
}

impl TtsService {
    pub fn new(client: PollyClient) -> Self {
        Self {
            client,
            engine: Engine::Neural,
            retry: RetryPolicy::speech(),
        }
    }

    async fn synthesize_segment(&self, text: &str, voice: &VoiceId) -> Result<Vec<u8>, TtsError> {
        let response = self
            .client
            .synthesize_speech()
            .text(text)
            .voice_id(voice.clone())
            .engine(self.engine.clone())
            .output_format(OutputFormat::Mp3)
            .send()
            .await
            .map_err(|e| TtsError::SynthesisFailed(e.to_string()))?;

        let audio_stream = response
            .audio_stream
            .collect()
            .await
            .map_err(|e| TtsError::SynthesisFailed(e.to_string()))?;

        Ok(audio_stream.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for TtsService {
    /// Long scripts are synthesized in segments; MP3 frames concatenate
    /// cleanly so the segments are joined byte-wise.
    async fn synthesize(&self, script: &str, voice: &str) -> Result<Speech, TtsError> {
        let segments = split_for_synthesis(script, MAX_REQUEST_CHARS);
        if segments.is_empty() {
            return Err(TtsError::EmptyScript);
        }

        let voice_id = VoiceId::from(voice);
        let mut audio = Vec::new();
        for (index, segment) in segments.iter().enumerate() {
            debug!(segment = index + 1, chars = segment.chars().count(), voice, "Synthesizing segment");
            let bytes = self
                .retry
                .run("polly.synthesize_speech", || {
                    self.synthesize_segment(segment, &voice_id)
                })
                .await
                .map_err(|e| e.last)?;
            audio.extend_from_slice(&bytes);
        }

        Ok(Speech {
            audio,
            duration_seconds: estimate_duration_seconds(script),
        })
    }
}

/// The requested voice if supported (case-insensitive), otherwise `default`.
pub fn validate_voice<'a>(requested: Option<&str>, default: &'a str) -> &'a str {
    requested
        .and_then(|name| {
            SUPPORTED_VOICES
                .iter()
                .find(|voice| voice.eq_ignore_ascii_case(name.trim()))
        })
        .copied()
        .unwrap_or(default)
}

/// Spoken length at roughly 150 words per minute.
pub fn estimate_duration_seconds(script: &str) -> u32 {
    let words = script.split_whitespace().count() as f64;
    (words / 150.0 * 60.0).round() as u32
}

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Pieces end at a sentence boundary when one fits, otherwise at the last
/// whitespace, otherwise mid-word.
pub fn split_for_synthesis(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let Some((limit, _)) = rest.char_indices().nth(max_chars) else {
            pieces.push(rest.to_string());
            break;
        };

        let window = &rest[..limit];
        let cut = sentence_end(rest, limit)
            .or_else(|| window.rfind(char::is_whitespace))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        let (head, tail) = rest.split_at(cut);
        pieces.push(head.trim_end().to_string());
        rest = tail.trim_start();
    }

    pieces
}

/// Byte offset just past the last sentence terminator before `limit` that is
/// followed by whitespace.
fn sentence_end(text: &str, limit: usize) -> Option<usize> {
    text[..limit]
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(i, c)| i + c.len_utf8())
        .filter(|&end| text[end..].starts_with(char::is_whitespace))
        .last()
}
