//! Alarm audio generation functions.
//!
//! `generate_alarm_audio` claims queued alarms and produces a spoken morning
//! briefing for each; `orphan_sweeper` releases claims whose invocation died.

pub mod bootstrap;
pub mod handler;
pub mod launcher;
pub mod prompt;
pub mod repository;
pub mod worker;

pub use handler::{handle, AppState, DispatchSettings};
pub use worker::AlarmAudioWorker;
