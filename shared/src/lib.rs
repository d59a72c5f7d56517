//! Shared library for the alarm audio Lambda functions.
//!
//! This crate provides the audio generation queue, the AWS and storage
//! clients, and the configuration used by every function.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod queue;
pub mod retry;
pub mod script;
pub mod secrets;
pub mod storage;
pub mod tts;

pub use config::{Config, DispatchMode};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use script::{BedrockScriptGenerator, GeneratedScript, ScriptGenerator};
pub use secrets::{DatabaseCredentials, SecretsCache};
pub use storage::{AudioStorage, RestAudioStorage, StoredObject};
pub use tts::{Speech, SpeechSynthesizer, TtsError, TtsService};
